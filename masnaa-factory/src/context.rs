//! Per-request build state.
//!
//! A [`BuildContext`] is created for every top-level request and threaded
//! through all nested builds. It records the names currently being built
//! (to render cycle chains and to reject re-entrant per-request builds)
//! and collects the per-candidate failures that overload selection
//! skipped over.

use crate::error::FactoryError;

#[derive(Debug, Default)]
pub struct BuildContext {
    path: Vec<String>,
    in_flight: Vec<String>,
    suppressed: Vec<FactoryError>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names on the current build path, outermost first.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub(crate) fn enter(&mut self, name: &str) {
        self.path.push(name.to_string());
    }

    pub(crate) fn leave(&mut self, name: &str) {
        if let Some(pos) = self.path.iter().rposition(|n| n == name) {
            self.path.remove(pos);
        }
    }

    /// The build path from the first occurrence of `name`, closed with
    /// `name` again: `a → b → a`.
    pub fn chain_to(&self, name: &str) -> Vec<String> {
        let start = self.path.iter().position(|n| n == name).unwrap_or(self.path.len());
        let mut chain: Vec<String> = self.path[start..].to_vec();
        if chain.len() < 2 || chain.last().map(String::as_str) != Some(name) {
            chain.push(name.to_string());
        }
        chain
    }

    /// `true` if a non-cached object of this name is being built.
    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.iter().any(|n| n == name)
    }

    pub(crate) fn begin(&mut self, name: &str) {
        self.in_flight.push(name.to_string());
    }

    pub(crate) fn end(&mut self, name: &str) {
        if let Some(pos) = self.in_flight.iter().rposition(|n| n == name) {
            self.in_flight.remove(pos);
        }
    }

    pub(crate) fn suppress(&mut self, error: FactoryError) {
        self.suppressed.push(error);
    }

    pub(crate) fn take_suppressed(&mut self) -> Vec<FactoryError> {
        std::mem::take(&mut self.suppressed)
    }

    pub fn suppressed(&self) -> &[FactoryError] {
        &self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_starts_at_first_occurrence() {
        let mut ctx = BuildContext::new();
        ctx.enter("root");
        ctx.enter("a");
        ctx.enter("b");
        assert_eq!(ctx.chain_to("a"), vec!["a", "b", "a"]);
        assert_eq!(ctx.chain_to("zzz"), vec!["zzz"]);

        ctx.enter("a");
        assert_eq!(ctx.chain_to("a"), vec!["a", "b", "a"]);
        ctx.leave("a");

        ctx.leave("b");
        assert_eq!(ctx.path(), &["root".to_string(), "a".to_string()]);
    }

    #[test]
    fn in_flight_tracks_nesting() {
        let mut ctx = BuildContext::new();
        ctx.begin("req");
        ctx.begin("req");
        ctx.end("req");
        assert!(ctx.is_in_flight("req"));
        ctx.end("req");
        assert!(!ctx.is_in_flight("req"));
    }

    #[test]
    fn suppressed_errors_are_drained() {
        let mut ctx = BuildContext::new();
        ctx.suppress(FactoryError::invalid("x", "first"));
        assert_eq!(ctx.suppressed().len(), 1);
        assert_eq!(ctx.take_suppressed().len(), 1);
        assert!(ctx.suppressed().is_empty());
    }
}
