//! Definition store and merger.
//!
//! The registry keeps raw [`ObjectDefinition`]s by name and turns them into
//! [`ResolvedDefinition`]s by merging each with its parent chain. Resolved
//! definitions are immutable snapshots, cached per name until marked stale.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use masnaa_support::rendering::suggest_similar;

use crate::callable::ResolvedCallable;
use crate::catalog::CallableCatalog;
use crate::definition::{AutowireMode, ObjectDefinition, TypeRef};
use crate::error::{AlreadyRegisteredError, FactoryError, NoSuchDefinitionError, Result};
use crate::hooks::DefinitionHook;
use crate::key::TypeKey;
use crate::scope::Scope;

/// A definition merged with its ancestors, ready for instantiation.
pub struct ResolvedDefinition {
    definition: ObjectDefinition,
    scope: Scope,
    type_key: Option<TypeKey>,
    lineage: Vec<String>,
    lenient: bool,
    inner: bool,
    stale: AtomicBool,
    resolution: Mutex<Option<ResolvedCallable>>,
}

impl ResolvedDefinition {
    /// The merged definition; its `scope` is always set.
    pub fn definition(&self) -> &ObjectDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Declared type, if the definition names one.
    pub fn type_key(&self) -> Option<TypeKey> {
        self.type_key
    }

    /// Ancestor names, root first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn is_abstract(&self) -> bool {
        self.definition.is_abstract
    }

    pub fn is_lazy(&self) -> bool {
        self.definition.lazy.unwrap_or(false)
    }

    pub fn is_primary(&self) -> bool {
        self.definition.primary.unwrap_or(false)
    }

    pub fn is_autowire_candidate(&self) -> bool {
        self.definition.autowire_candidate.unwrap_or(true)
    }

    pub fn autowire(&self) -> AutowireMode {
        self.definition.autowire.unwrap_or_default()
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    pub fn allows_restricted_access(&self) -> bool {
        self.definition.allow_restricted_access.unwrap_or(true)
    }

    /// `true` for nested definitions built for a containing object.
    pub fn is_inner(&self) -> bool {
        self.inner
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub(crate) fn resolution(&self) -> Option<ResolvedCallable> {
        self.resolution.lock().clone()
    }

    pub(crate) fn memoize(&self, resolved: ResolvedCallable) {
        *self.resolution.lock() = Some(resolved);
    }

    /// Same type, factory object and factory method, built from the same
    /// declared arguments. Only then can a memoized selection be reused.
    fn same_recipe(&self, other: &ResolvedDefinition) -> bool {
        self.type_key == other.type_key
            && self.definition.factory_object == other.definition.factory_object
            && self.definition.factory_method == other.definition.factory_method
            && self.definition.constructor_args == other.definition.constructor_args
            && self.autowire() == other.autowire()
            && self.lenient == other.lenient
    }
}

impl fmt::Debug for ResolvedDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDefinition")
            .field("name", &self.definition.name)
            .field("scope", &self.scope)
            .field("type", &self.type_key)
            .field("lineage", &self.lineage)
            .field("stale", &self.is_stale())
            .finish()
    }
}

#[derive(Default)]
struct MergeState {
    merged: HashMap<String, Arc<ResolvedDefinition>>,
    already_created: HashSet<String>,
}

/// Stores raw definitions and caches their merged form.
pub struct DefinitionRegistry {
    definitions: DashMap<String, ObjectDefinition>,
    order: RwLock<Vec<String>>,
    aliases: DashMap<String, String>,
    state: Mutex<MergeState>,
    enclosing: Option<Arc<DefinitionRegistry>>,
    catalog: Arc<dyn CallableCatalog>,
    hooks: RwLock<Vec<Arc<dyn DefinitionHook>>>,
    allow_override: bool,
    default_lenient: bool,
}

impl DefinitionRegistry {
    pub(crate) fn new(
        catalog: Arc<dyn CallableCatalog>,
        enclosing: Option<Arc<DefinitionRegistry>>,
        allow_override: bool,
        default_lenient: bool,
    ) -> Self {
        Self {
            definitions: DashMap::new(),
            order: RwLock::new(Vec::new()),
            aliases: DashMap::new(),
            state: Mutex::new(MergeState::default()),
            enclosing,
            catalog,
            hooks: RwLock::new(Vec::new()),
            allow_override,
            default_lenient,
        }
    }

    pub(crate) fn add_hook(&self, hook: Arc<dyn DefinitionHook>) {
        self.hooks.write().push(hook);
        self.invalidate_all();
    }

    /// Registers a raw definition.
    ///
    /// # Errors
    /// [`FactoryError::AlreadyRegistered`] if the name is taken and
    /// overriding is disabled; [`FactoryError::InvalidDefinition`] for an
    /// empty name.
    pub fn register(&self, definition: ObjectDefinition) -> Result<()> {
        let name = definition.name.clone();
        if name.is_empty() {
            return Err(FactoryError::invalid("<unnamed>", "definitions need a name"));
        }

        let replaced = self.definitions.contains_key(&name);
        if replaced && !self.allow_override {
            return Err(FactoryError::AlreadyRegistered(AlreadyRegisteredError { name }));
        }

        debug!(name = %name, parent = ?definition.parent, replaced, "Registered definition");
        self.definitions.insert(name.clone(), definition);

        if replaced {
            self.mark_stale_with_descendants(&name);
        } else {
            self.order.write().push(name);
        }
        Ok(())
    }

    /// Registers an alias: requesting `alias` yields the object named `name`.
    pub fn register_alias(&self, alias: impl Into<String>, name: impl Into<String>) {
        let (alias, name) = (alias.into(), name.into());
        debug!(alias = %alias, name = %name, "Registered alias");
        self.aliases.insert(alias, name);
    }

    /// Follows aliases to the registered name.
    pub fn canonical_name(&self, name: &str) -> String {
        let mut current = name.to_string();
        let mut seen = HashSet::new();
        while let Some(target) = self.aliases.get(&current).map(|t| t.value().clone()) {
            if !seen.insert(current.clone()) {
                break;
            }
            trace!(from = %current, to = %target, "Following alias");
            current = target;
        }
        current
    }

    /// `true` if `name` (after aliases) is registered in this registry.
    pub fn contains_local(&self, name: &str) -> bool {
        self.definitions.contains_key(&self.canonical_name(name))
    }

    /// Local definition names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Copy of the raw definition.
    pub fn raw(&self, name: &str) -> Option<ObjectDefinition> {
        self.definitions
            .get(&self.canonical_name(name))
            .map(|d| d.value().clone())
    }

    /// Mutates a raw definition in place and marks it (and every definition
    /// inheriting from it) stale.
    pub fn update<F>(&self, name: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ObjectDefinition),
    {
        let canonical = self.canonical_name(name);
        {
            let mut entry = self
                .definitions
                .get_mut(&canonical)
                .ok_or_else(|| self.no_such_definition(&canonical, None))?;
            mutate(entry.value_mut());
        }
        self.mark_stale_with_descendants(&canonical);
        Ok(())
    }

    /// Forces the next lookup of `name` to re-merge.
    pub fn mark_stale(&self, name: &str) {
        let canonical = self.canonical_name(name);
        if let Some(resolved) = self.state.lock().merged.get(&canonical) {
            trace!(name = %canonical, "Marked merged definition stale");
            resolved.mark_stale();
        }
    }

    /// Marks every cached merged definition stale.
    pub fn invalidate_all(&self) {
        let state = self.state.lock();
        debug!(cached = state.merged.len(), "Invalidating merged definitions");
        for resolved in state.merged.values() {
            resolved.mark_stale();
        }
    }

    fn mark_stale_with_descendants(&self, name: &str) {
        let state = self.state.lock();
        for (merged_name, resolved) in &state.merged {
            if merged_name == name || resolved.lineage.iter().any(|ancestor| ancestor == name) {
                resolved.mark_stale();
            }
        }
    }

    /// Records that creation of `name` has started. The first time, the
    /// cached merged definition is refreshed so creation sees the latest
    /// raw definition.
    pub(crate) fn mark_created(&self, name: &str) {
        let mut state = self.state.lock();
        if state.already_created.insert(name.to_string()) {
            if let Some(resolved) = state.merged.get(name) {
                resolved.mark_stale();
            }
        }
    }

    /// Undoes [`mark_created`](Self::mark_created) after a failed build.
    pub(crate) fn unmark_created(&self, name: &str) {
        self.state.lock().already_created.remove(name);
    }

    pub fn has_any_created(&self) -> bool {
        !self.state.lock().already_created.is_empty()
    }

    /// The merged definition for `name`, found here or in an enclosing registry.
    ///
    /// # Errors
    /// [`FactoryError::NoSuchDefinition`] if no registry knows the name;
    /// [`FactoryError::InvalidDefinition`] if the type cannot be determined
    /// or the parent chain loops.
    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedDefinition>> {
        let mut chain = Vec::new();
        self.resolve_in_chain(name, &mut chain)
    }

    fn resolve_in_chain(&self, name: &str, chain: &mut Vec<String>) -> Result<Arc<ResolvedDefinition>> {
        let canonical = self.canonical_name(name);

        let Some(raw) = self.raw(&canonical) else {
            return match &self.enclosing {
                Some(enclosing) => enclosing.resolve_in_chain(&canonical, chain),
                None => Err(self.no_such_definition(&canonical, chain.last().cloned())),
            };
        };

        let previous = {
            let state = self.state.lock();
            match state.merged.get(&canonical) {
                Some(cached) if !cached.is_stale() => return Ok(cached.clone()),
                other => other.cloned(),
            }
        };

        if chain.contains(&canonical) {
            chain.push(canonical.clone());
            return Err(FactoryError::invalid(
                &canonical,
                format!("parent chain loops: {}", chain.join(" → ")),
            ));
        }

        chain.push(canonical.clone());
        let resolved = self.merge(&raw, None, chain);
        chain.pop();
        let resolved = resolved?;

        if let Some(previous) = previous {
            if previous.same_recipe(&resolved) {
                if let Some(memo) = previous.resolution() {
                    resolved.memoize(memo);
                }
            }
        }

        let resolved = Arc::new(resolved);
        trace!(name = %canonical, scope = %resolved.scope, "Cached merged definition");
        self.state.lock().merged.insert(canonical, resolved.clone());
        Ok(resolved)
    }

    /// Merges a nested definition for `containing`. Never cached.
    pub fn resolve_inner(
        &self,
        definition: &ObjectDefinition,
        containing: &ResolvedDefinition,
    ) -> Result<Arc<ResolvedDefinition>> {
        let mut chain = vec![containing.name().to_string()];
        self.merge(definition, Some(containing), &mut chain).map(Arc::new)
    }

    fn merge(
        &self,
        raw: &ObjectDefinition,
        containing: Option<&ResolvedDefinition>,
        chain: &mut Vec<String>,
    ) -> Result<ResolvedDefinition> {
        let (mut definition, lineage) = match &raw.parent {
            None => (raw.clone(), Vec::new()),
            Some(parent_name) => {
                let parent = self.resolve_parent(raw, parent_name, chain)?;
                let mut lineage = parent.lineage.clone();
                lineage.push(parent.name().to_string());
                (raw.merged_over(parent.definition()), lineage)
            }
        };

        let hooks = self.hooks.read().clone();
        for hook in &hooks {
            hook.process_definition(&raw.name, &mut definition)?;
        }

        let mut scope = definition.scope.clone().unwrap_or_default();
        if let Some(container) = containing {
            if !container.scope.is_singleton() && scope.is_singleton() {
                trace!(name = %raw.name, container = %container.name(), scope = %container.scope, "Inner definition takes container scope");
                scope = container.scope.clone();
            }
        }
        definition.scope = Some(scope.clone());

        let type_key = match &definition.type_ref {
            Some(TypeRef::Key(key)) => Some(*key),
            Some(TypeRef::Named(type_name)) => match self.catalog.lookup(type_name) {
                Some(key) => Some(key),
                None if definition.is_abstract => None,
                None => {
                    return Err(FactoryError::invalid(
                        &raw.name,
                        format!("type '{type_name}' is not registered in the callable catalog"),
                    ));
                }
            },
            None => None,
        };

        if !definition.is_abstract {
            if type_key.is_none() && definition.factory_object.is_none() {
                return Err(FactoryError::invalid(
                    &raw.name,
                    "no type and no factory object; the object type cannot be determined",
                ));
            }
            if definition.factory_object.is_some() && definition.factory_method.is_none() {
                return Err(FactoryError::invalid(&raw.name, "factory object without factory method"));
            }
        }

        let lenient = definition.lenient_resolution.unwrap_or(self.default_lenient);
        Ok(ResolvedDefinition {
            definition,
            scope,
            type_key,
            lineage,
            lenient,
            inner: containing.is_some(),
            stale: AtomicBool::new(false),
            resolution: Mutex::new(None),
        })
    }

    fn resolve_parent(
        &self,
        raw: &ObjectDefinition,
        parent_name: &str,
        chain: &mut Vec<String>,
    ) -> Result<Arc<ResolvedDefinition>> {
        let canonical = self.canonical_name(parent_name);

        // A parent with the child's own name lives in the enclosing registry,
        // which cannot refer back into this one.
        if canonical == raw.name {
            return match &self.enclosing {
                Some(enclosing) => enclosing.resolve(&canonical),
                None => Err(FactoryError::invalid(
                    &raw.name,
                    format!("parent '{parent_name}' has the same name and there is no enclosing factory"),
                )),
            };
        }

        self.resolve_in_chain(&canonical, chain)
    }

    fn no_such_definition(&self, name: &str, required_by: Option<String>) -> FactoryError {
        let names = self.names();
        let available: Vec<&str> = names.iter().map(String::as_str).collect();
        FactoryError::NoSuchDefinition(NoSuchDefinitionError {
            name: name.to_string(),
            required_by,
            suggestions: suggest_similar(name, &available, 3),
        })
    }
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("definitions", &self.definitions.len())
            .field("aliases", &self.aliases.len())
            .field("enclosing", &self.enclosing.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TypeDescriptor};
    use crate::definition::ArgumentValue;

    struct Database;
    struct Cache;

    fn catalog() -> Arc<dyn CallableCatalog> {
        let catalog = Catalog::new();
        catalog.register(TypeDescriptor::builder::<Database>().named("db.Database").build());
        Arc::new(catalog)
    }

    fn registry() -> DefinitionRegistry {
        DefinitionRegistry::new(catalog(), None, true, true)
    }

    #[test]
    fn parentless_definition_resolves_to_itself() {
        let registry = registry();
        let definition = ObjectDefinition::of::<Database>("db")
            .arg(ArgumentValue::literal("url"))
            .lazy(true);
        registry.register(definition.clone()).unwrap();

        let resolved = registry.resolve("db").unwrap();
        let expected = ObjectDefinition {
            scope: Some(Scope::Singleton),
            ..definition
        };
        assert_eq!(resolved.definition(), &expected);
        assert_eq!(resolved.type_key(), Some(TypeKey::of::<Database>()));
        assert!(resolved.lineage().is_empty());
    }

    #[test]
    fn merged_definitions_are_cached() {
        let registry = registry();
        registry.register(ObjectDefinition::of::<Database>("db")).unwrap();

        let a = registry.resolve("db").unwrap();
        let b = registry.resolve("db").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn child_inherits_from_parent_chain() {
        let registry = registry();
        registry
            .register(ObjectDefinition::of::<Database>("base").scope(Scope::PerRequest).abstract_template())
            .unwrap();
        registry.register(ObjectDefinition::new("middle").parent("base").lazy(true)).unwrap();
        registry.register(ObjectDefinition::new("leaf").parent("middle")).unwrap();

        let leaf = registry.resolve("leaf").unwrap();
        assert_eq!(leaf.scope(), &Scope::PerRequest);
        assert!(leaf.is_lazy());
        assert!(!leaf.is_abstract());
        assert_eq!(leaf.lineage(), &["base".to_string(), "middle".to_string()]);
    }

    #[test]
    fn deferred_type_names_resolve_through_catalog() {
        let registry = registry();
        registry.register(ObjectDefinition::new("db").type_name("db.Database")).unwrap();
        registry.register(ObjectDefinition::new("ghost").type_name("Ghost")).unwrap();

        assert_eq!(registry.resolve("db").unwrap().type_key(), Some(TypeKey::of::<Database>()));
        assert!(matches!(
            registry.resolve("ghost"),
            Err(FactoryError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn missing_type_is_invalid_unless_abstract() {
        let registry = registry();
        registry.register(ObjectDefinition::new("untyped")).unwrap();
        registry.register(ObjectDefinition::new("template").abstract_template()).unwrap();

        assert!(matches!(registry.resolve("untyped"), Err(FactoryError::InvalidDefinition { .. })));
        assert!(registry.resolve("template").unwrap().is_abstract());
    }

    #[test]
    fn unknown_name_suggests_close_names() {
        let registry = registry();
        registry.register(ObjectDefinition::of::<Database>("database")).unwrap();

        match registry.resolve("databse") {
            Err(FactoryError::NoSuchDefinition(err)) => {
                assert_eq!(err.suggestions, vec!["database".to_string()]);
            }
            other => panic!("Expected NoSuchDefinition, got: {other:?}"),
        }
    }

    #[test]
    fn parent_loop_is_invalid() {
        let registry = registry();
        registry.register(ObjectDefinition::of::<Database>("a").parent("b")).unwrap();
        registry.register(ObjectDefinition::of::<Database>("b").parent("a")).unwrap();

        match registry.resolve("a") {
            Err(FactoryError::InvalidDefinition { reason, .. }) => assert!(reason.contains("loops")),
            other => panic!("Expected InvalidDefinition, got: {other:?}"),
        }
    }

    #[test]
    fn stale_entries_are_recomputed_without_touching_old_snapshots() {
        let registry = registry();
        registry.register(ObjectDefinition::of::<Database>("db")).unwrap();
        let before = registry.resolve("db").unwrap();

        registry.update("db", |d| d.type_ref = Some(TypeRef::Key(TypeKey::of::<Cache>()))).unwrap();
        assert!(before.is_stale());

        let after = registry.resolve("db").unwrap();
        assert_eq!(after.type_key(), Some(TypeKey::of::<Cache>()));
        assert_eq!(before.type_key(), Some(TypeKey::of::<Database>()));
    }

    #[test]
    fn updating_parent_marks_children_stale() {
        let registry = registry();
        registry.register(ObjectDefinition::of::<Database>("base")).unwrap();
        registry.register(ObjectDefinition::new("child").parent("base")).unwrap();
        let child = registry.resolve("child").unwrap();

        registry.update("base", |d| d.lazy = Some(true)).unwrap();
        assert!(child.is_stale());
        assert!(registry.resolve("child").unwrap().is_lazy());
    }

    #[test]
    fn override_can_be_disabled() {
        let registry = DefinitionRegistry::new(catalog(), None, false, true);
        registry.register(ObjectDefinition::of::<Database>("db")).unwrap();
        assert!(matches!(
            registry.register(ObjectDefinition::of::<Cache>("db")),
            Err(FactoryError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn enclosing_registry_supplies_parents() {
        let outer = Arc::new(registry());
        outer
            .register(ObjectDefinition::of::<Database>("db").scope(Scope::PerRequest))
            .unwrap();

        let inner = DefinitionRegistry::new(catalog(), Some(outer.clone()), true, true);
        inner.register(ObjectDefinition::new("db").parent("db").lazy(true)).unwrap();

        let resolved = inner.resolve("db").unwrap();
        assert_eq!(resolved.scope(), &Scope::PerRequest);
        assert!(resolved.is_lazy());
        assert_eq!(resolved.type_key(), Some(TypeKey::of::<Database>()));
    }

    #[test]
    fn inner_definitions_take_non_singleton_container_scope() {
        let registry = registry();
        registry
            .register(ObjectDefinition::of::<Database>("outer").scope(Scope::PerRequest))
            .unwrap();
        let outer = registry.resolve("outer").unwrap();

        let nested = registry
            .resolve_inner(&ObjectDefinition::of::<Cache>("(inner)"), &outer)
            .unwrap();
        assert_eq!(nested.scope(), &Scope::PerRequest);
        assert!(nested.is_inner());
    }

    #[test]
    fn aliases_resolve() {
        let registry = registry();
        registry.register(ObjectDefinition::of::<Database>("db")).unwrap();
        registry.register_alias("primaryDb", "db");

        assert!(registry.contains_local("primaryDb"));
        assert_eq!(registry.resolve("primaryDb").unwrap().name(), "db");
    }
}
