//! Text rendering utilities for human-friendly error messages.
//!
//! Provides helpers to format dependency chains, type names,
//! and "did you mean" suggestions in error output.

/// Renders a dependency chain as a readable string.
///
/// # Examples
/// ```
/// use masnaa_support::rendering::render_chain;
///
/// let chain = vec!["orderService", "paymentGateway", "orderService"];
/// assert_eq!(render_chain(&chain), "orderService → paymentGateway → orderService");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Renders a list of names as `'a', 'b', 'c'`.
pub fn render_name_list(names: &[impl AsRef<str>]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shortens a fully qualified type name for display.
///
/// ```
/// use masnaa_support::rendering::shorten_type_name;
///
/// let short = shorten_type_name("my_app::services::user::UserService");
/// assert_eq!(short, "UserService");
///
/// let short = shorten_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>");
/// assert_eq!(short, "Arc<dyn Logger>");
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut current_segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                current_segment.clear();
            }
            '<' | '>' | ',' | ' ' => {
                result.push_str(&current_segment);
                result.push(ch);
                current_segment.clear();
            }
            _ => current_segment.push(ch),
        }
    }

    result.push_str(&current_segment);
    result
}

/// Checks a declared type name against a full type name.
///
/// Declarative sources usually write the short form (`Database`) while
/// the runtime knows `my_app::db::Database`; both spellings match.
///
/// ```
/// use masnaa_support::rendering::type_name_matches;
///
/// assert!(type_name_matches("Database", "my_app::db::Database"));
/// assert!(type_name_matches("my_app::db::Database", "my_app::db::Database"));
/// assert!(!type_name_matches("Data", "my_app::db::Database"));
/// ```
pub fn type_name_matches(declared: &str, full_name: &str) -> bool {
    declared == full_name || shorten_type_name(declared) == shorten_type_name(full_name)
}

/// Suggests registered names close to an unknown one.
///
/// Substring hits rank first, then names within a small edit distance.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let requested_lower = requested.to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter(|&&name| name != requested)
        .filter_map(|&name| {
            let name_lower = name.to_lowercase();

            if name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower) {
                return Some((name, 0));
            }

            let distance = edit_distance(&requested_lower, &name_lower);
            let budget = (requested_lower.chars().count() / 3).max(1);
            (distance <= budget).then_some((name, distance))
        })
        .collect();

    scored.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Levenshtein distance over chars, two-row variant.
fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_simple_chain() {
        let chain = vec!["a", "b", "c", "a"];
        assert_eq!(render_chain(&chain), "a → b → c → a");
    }

    #[test]
    fn render_empty_chain() {
        let chain: Vec<&str> = vec![];
        assert_eq!(render_chain(&chain), "");
    }

    #[test]
    fn render_names() {
        assert_eq!(render_name_list(&["x", "y"]), "'x', 'y'");
    }

    #[test]
    fn shorten_with_generics() {
        assert_eq!(
            shorten_type_name("alloc::vec::Vec<alloc::sync::Arc<app::Plugin>>"),
            "Vec<Arc<Plugin>>"
        );
    }

    #[test]
    fn shorten_no_path() {
        assert_eq!(shorten_type_name("i32"), "i32");
    }

    #[test]
    fn declared_short_name_matches() {
        assert!(type_name_matches("String", "alloc::string::String"));
        assert!(!type_name_matches("str", "alloc::string::String"));
    }

    #[test]
    fn suggest_typo() {
        let available = vec!["userService", "userRepository", "dataSource"];
        let suggestions = suggest_similar("userServise", &available, 3);
        assert_eq!(suggestions.first().map(String::as_str), Some("userService"));
    }

    #[test]
    fn suggest_no_match() {
        let available = vec!["dataSource"];
        assert!(suggest_similar("xyzAbcDef", &available, 3).is_empty());
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
