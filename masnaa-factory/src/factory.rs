//! # The object factory
//!
//! [`ObjectFactory`] builds named objects from registered definitions,
//! caches them per scope, and wires their dependencies.
//!
//! # Architecture
//! ```text
//! ObjectFactoryBuilder ──build()──> ObjectFactory
//!                                      │ get_instance(name)
//!                                      ▼
//!          singleton tiers ── hit ──> instance
//!                │ miss
//!                ▼
//!          DefinitionRegistry::resolve ──> depends-on ──> CallableResolver
//!                                                             │
//!                             early reference <── raw instance
//!                                                             │
//!                                 properties, hooks, init ──> cache
//! ```
//!
//! # Examples
//! ```rust
//! use masnaa_factory::prelude::*;
//!
//! struct Endpoint { url: String }
//!
//! let catalog = Catalog::new();
//! catalog.register(
//!     TypeDescriptor::builder::<Endpoint>()
//!         .constructor("new", vec![ParamSpec::of::<String>("url")], |args| {
//!             Ok(Endpoint { url: args.value(0)? })
//!         })
//!         .build(),
//! );
//!
//! let factory = ObjectFactory::builder()
//!     .catalog(catalog)
//!     .definition(ObjectDefinition::of::<Endpoint>("endpoint").arg(ArgumentValue::literal("http://localhost")))
//!     .build()
//!     .expect("Failed to build factory");
//!
//! let endpoint = factory.get::<Endpoint>("endpoint").expect("Failed to get endpoint");
//! assert_eq!(endpoint.url, "http://localhost");
//! ```

use std::any::type_name;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use crate::arguments::{ArgumentResolver, AutowireCandidate};
use crate::callable::CallableResolver;
use crate::catalog::{CallableCatalog, CallableTarget, Catalog, Setter};
use crate::context::BuildContext;
use crate::conversion::ConversionService;
use crate::definition::{AutowireMode, ObjectDefinition};
use crate::error::{BuildFailureError, CircularReason, FactoryError, Result};
use crate::graph::DependencyGraph;
use crate::hooks::{DefinitionHook, InstanceHook, apply_phase};
use crate::instance::Instance;
use crate::key::TypeKey;
use crate::registry::{DefinitionRegistry, ResolvedDefinition};
use crate::scope::{Scope, ScopeProvider};
use crate::settings::FactorySettings;
use crate::singleton::SingletonRegistry;

// ═══════════════════════════════════════════
// ObjectFactoryBuilder
// ═══════════════════════════════════════════

/// Builds an [`ObjectFactory`].
///
/// Without an explicit catalog the factory collects every
/// `TypeRegistration` submitted with `inventory` (or shares its parent's
/// catalog).
#[derive(Default)]
pub struct ObjectFactoryBuilder {
    catalog: Option<Arc<dyn CallableCatalog>>,
    conversion: Option<Arc<ConversionService>>,
    parent: Option<Arc<ObjectFactory>>,
    settings: FactorySettings,
    definition_hooks: Vec<Arc<dyn DefinitionHook>>,
    instance_hooks: Vec<Arc<dyn InstanceHook>>,
    scopes: Vec<(String, Arc<dyn ScopeProvider>)>,
    definitions: Vec<ObjectDefinition>,
    singletons: Vec<(String, Instance)>,
}

impl ObjectFactoryBuilder {
    pub fn catalog(mut self, catalog: impl CallableCatalog + 'static) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    /// Shares an existing catalog.
    pub fn shared_catalog(mut self, catalog: Arc<dyn CallableCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn conversion(mut self, conversion: ConversionService) -> Self {
        self.conversion = Some(Arc::new(conversion));
        self
    }

    /// Unknown names (and same-named parent definitions) are looked up in `parent`.
    pub fn parent(mut self, parent: Arc<ObjectFactory>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn settings(mut self, settings: FactorySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn definition_hook(mut self, hook: impl DefinitionHook + 'static) -> Self {
        self.definition_hooks.push(Arc::new(hook));
        self
    }

    pub fn instance_hook(mut self, hook: impl InstanceHook + 'static) -> Self {
        self.instance_hooks.push(Arc::new(hook));
        self
    }

    /// Registers the provider backing `Scope::Named(name)`.
    pub fn scope(mut self, name: impl Into<String>, provider: Arc<dyn ScopeProvider>) -> Self {
        self.scopes.push((name.into(), provider));
        self
    }

    pub fn definition(mut self, definition: ObjectDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Registers a pre-built singleton.
    pub fn singleton<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.singletons.push((name.into(), Instance::new(value)));
        self
    }

    /// Builds the factory, registering every definition.
    ///
    /// # Errors
    /// The first registration error (duplicate names with overriding
    /// disabled, unnamed definitions).
    #[instrument(skip(self), name = "factory_build")]
    pub fn build(self) -> Result<ObjectFactory> {
        let catalog = match (self.catalog, &self.parent) {
            (Some(catalog), _) => catalog,
            (None, Some(parent)) => parent.catalog.clone(),
            (None, None) => Arc::new(Catalog::from_inventory()),
        };
        let conversion = match (self.conversion, &self.parent) {
            (Some(conversion), _) => conversion,
            (None, Some(parent)) => parent.conversion.clone(),
            (None, None) => Arc::new(ConversionService::new()),
        };

        let definitions = Arc::new(DefinitionRegistry::new(
            catalog.clone(),
            self.parent.as_ref().map(|p| p.definitions.clone()),
            self.settings.allow_definition_override,
            self.settings.default_lenient_resolution,
        ));
        for hook in self.definition_hooks {
            definitions.add_hook(hook);
        }

        let factory = ObjectFactory {
            definitions,
            singletons: SingletonRegistry::new(),
            graph: Mutex::new(DependencyGraph::new()),
            catalog,
            conversion,
            instance_hooks: RwLock::new(self.instance_hooks),
            scopes: self.scopes.into_iter().collect(),
            parent: self.parent,
            settings: self.settings,
        };

        for definition in self.definitions {
            factory.register_definition(definition)?;
        }
        for (name, instance) in self.singletons {
            factory.register_singleton(&name, instance)?;
        }

        info!(definitions = factory.definitions.len(), "Object factory ready");
        Ok(factory)
    }
}

// ═══════════════════════════════════════════
// ObjectFactory
// ═══════════════════════════════════════════

/// Thread-safe factory of named objects.
///
/// Created by [`ObjectFactoryBuilder::build`]. Definitions, singletons,
/// hooks and scopes may still be added afterwards.
pub struct ObjectFactory {
    definitions: Arc<DefinitionRegistry>,
    singletons: SingletonRegistry,
    graph: Mutex<DependencyGraph>,
    catalog: Arc<dyn CallableCatalog>,
    conversion: Arc<ConversionService>,
    instance_hooks: RwLock<Vec<Arc<dyn InstanceHook>>>,
    scopes: DashMap<String, Arc<dyn ScopeProvider>>,
    parent: Option<Arc<ObjectFactory>>,
    settings: FactorySettings,
}

impl ObjectFactory {
    pub fn builder() -> ObjectFactoryBuilder {
        ObjectFactoryBuilder::default()
    }

    // ── Registration ──

    pub fn register_definition(&self, definition: ObjectDefinition) -> Result<()> {
        self.definitions.register(definition)
    }

    /// Mutates a registered definition; it and every definition inheriting
    /// from it are re-merged on next use. Objects already built keep the
    /// definition they were built from.
    pub fn update_definition<F>(&self, name: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ObjectDefinition),
    {
        self.definitions.update(name, mutate)
    }

    pub fn register_alias(&self, alias: impl Into<String>, name: impl Into<String>) {
        self.definitions.register_alias(alias, name);
    }

    /// Registers a pre-built singleton under `name`.
    pub fn register_singleton(&self, name: &str, instance: Instance) -> Result<()> {
        debug!(name = %name, ty = %instance.key(), "Registered singleton instance");
        self.singletons.register(name, instance)
    }

    pub fn register_scope(&self, name: impl Into<String>, provider: Arc<dyn ScopeProvider>) {
        self.scopes.insert(name.into(), provider);
    }

    pub fn add_definition_hook(&self, hook: impl DefinitionHook + 'static) {
        self.definitions.add_hook(Arc::new(hook));
    }

    pub fn add_instance_hook(&self, hook: impl InstanceHook + 'static) {
        self.instance_hooks.write().push(Arc::new(hook));
    }

    // ── Definitions ──

    /// The merged definition for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedDefinition>> {
        self.definitions.resolve(name)
    }

    pub fn mark_stale(&self, name: &str) {
        self.definitions.mark_stale(name);
    }

    pub fn invalidate_all(&self) {
        self.definitions.invalidate_all();
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    /// Local definition names in registration order.
    pub fn definition_names(&self) -> Vec<String> {
        self.definitions.names()
    }

    /// `true` if a definition or singleton named `name` exists here or in
    /// a parent factory.
    pub fn contains(&self, name: &str) -> bool {
        let name = self.definitions.canonical_name(name);
        self.definitions.contains_local(&name)
            || self.singletons.contains(&name)
            || self.parent.as_ref().is_some_and(|p| p.contains(&name))
    }

    // ── Retrieval ──

    /// Returns the object named `name`, building it if needed.
    #[instrument(level = "debug", skip(self))]
    pub fn get_instance(&self, name: &str) -> Result<Instance> {
        let mut ctx = BuildContext::new();
        self.get_in(name, None, &mut ctx)
    }

    /// Builds `name` with programmatically supplied arguments. Only
    /// callables taking exactly `args.len()` parameters are considered.
    #[instrument(level = "debug", skip(self, args), fields(args = args.len()))]
    pub fn get_with_args(&self, name: &str, args: Vec<Instance>) -> Result<Instance> {
        let mut ctx = BuildContext::new();
        self.get_in(name, Some(&args), &mut ctx)
    }

    /// Typed retrieval. Interface types are reached through the upcasts
    /// registered in the catalog.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let instance = self.get_instance(name)?;
        if let Some(value) = instance.downcast::<T>() {
            return Ok(value);
        }

        self.conversion
            .convert(self.catalog.as_ref(), &instance, &TypeKey::of::<T>())
            .ok()
            .and_then(|converted| converted.downcast::<T>())
            .ok_or_else(|| FactoryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
                actual: instance.key().type_name(),
            })
    }

    /// Builds every non-lazy, non-abstract singleton definition.
    #[instrument(skip(self))]
    pub fn preinstantiate_singletons(&self) -> Result<()> {
        let names = self.definitions.names();
        info!(definitions = names.len(), "Pre-instantiating singletons");

        for name in names {
            let definition = self.definitions.resolve(&name)?;
            if !definition.is_abstract() && definition.scope().is_singleton() && !definition.is_lazy() {
                self.get_instance(&name)?;
            }
        }
        Ok(())
    }

    // ── Introspection ──

    /// Type of the object `name` builds, without building it when possible.
    pub fn type_of(&self, name: &str) -> Result<Option<TypeKey>> {
        let name = self.definitions.canonical_name(name);
        if let Ok(Some(reference)) = self.singletons.get(&name, false) {
            return Ok(Some(reference.instance().key()));
        }
        if !self.definitions.contains_local(&name) {
            if let Some(parent) = &self.parent {
                return parent.type_of(&name);
            }
        }
        let definition = self.definitions.resolve(&name)?;
        Ok(self.predict_type(&definition, &mut Vec::new()))
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        let name = self.definitions.canonical_name(name);
        if self.singletons.contains(&name) {
            return Ok(true);
        }
        if !self.definitions.contains_local(&name) {
            if let Some(parent) = &self.parent {
                return parent.is_singleton(&name);
            }
        }
        Ok(self.definitions.resolve(&name)?.scope().is_singleton())
    }

    /// Names of the objects assignable to `ty`: local definitions first,
    /// then pre-built singletons, then the parent's.
    pub fn names_for_type(&self, ty: &TypeKey) -> Vec<String> {
        let mut names = Vec::new();

        for name in self.definitions.names() {
            let definition = match self.definitions.resolve(&name) {
                Ok(definition) => definition,
                Err(err) => {
                    trace!(name = %name, error = %err, "Skipping unresolvable definition");
                    continue;
                }
            };
            if definition.is_abstract() {
                continue;
            }
            let actual = match self.singletons.get(&name, false) {
                Ok(Some(reference)) => Some(reference.instance().key()),
                _ => self.predict_type(&definition, &mut Vec::new()),
            };
            if actual.is_some_and(|actual| self.conversion.is_assignable(self.catalog.as_ref(), ty, &actual)) {
                names.push(name);
            }
        }

        for name in self.singletons.names() {
            if names.contains(&name) || self.definitions.contains_local(&name) {
                continue;
            }
            if let Ok(Some(reference)) = self.singletons.get(&name, false) {
                if self.conversion.is_assignable(self.catalog.as_ref(), ty, &reference.instance().key()) {
                    names.push(name);
                }
            }
        }

        if let Some(parent) = &self.parent {
            for name in parent.names_for_type(ty) {
                if !names.contains(&name) && !self.definitions.contains_local(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn names_for<T: 'static>(&self) -> Vec<String> {
        self.names_for_type(&TypeKey::of::<T>())
    }

    /// Objects recorded as needing `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.graph.lock().dependents_of(&self.definitions.canonical_name(name))
    }

    /// Objects `name` was recorded as needing.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.graph.lock().dependencies_of(&self.definitions.canonical_name(name))
    }

    pub fn catalog(&self) -> &dyn CallableCatalog {
        self.catalog.as_ref()
    }

    pub fn conversion(&self) -> &ConversionService {
        &self.conversion
    }

    pub fn settings(&self) -> &FactorySettings {
        &self.settings
    }

    pub fn parent(&self) -> Option<&Arc<ObjectFactory>> {
        self.parent.as_ref()
    }

    // ── Internal: instance coordination ──

    pub(crate) fn get_in(&self, name: &str, explicit: Option<&[Instance]>, ctx: &mut BuildContext) -> Result<Instance> {
        let name = self.definitions.canonical_name(name);

        if let Some(reference) = self.singletons.get(&name, explicit.is_none())? {
            if reference.is_early() {
                trace!(name = %name, "Returning early reference");
            }
            return Ok(reference.into_instance());
        }

        if ctx.is_in_flight(&name) {
            return Err(FactoryError::circular(ctx.chain_to(&name), CircularReason::InCreation));
        }

        if !self.definitions.contains_local(&name) {
            if let Some(parent) = &self.parent {
                trace!(name = %name, "Delegating to parent factory");
                return parent.get_in(&name, explicit, ctx);
            }
        }

        ctx.enter(&name);
        let result = self.create_named(&name, explicit, ctx);
        ctx.leave(&name);
        result.map_err(|cause| self.build_failure(&name, cause, ctx))
    }

    fn create_named(&self, name: &str, explicit: Option<&[Instance]>, ctx: &mut BuildContext) -> Result<Instance> {
        self.definitions.mark_created(name);
        let created = self.create_scoped(name, explicit, ctx);
        if created.is_err() {
            self.definitions.unmark_created(name);
        }
        created
    }

    fn create_scoped(&self, name: &str, explicit: Option<&[Instance]>, ctx: &mut BuildContext) -> Result<Instance> {
        let definition = self.definitions.resolve(name)?;
        if definition.is_abstract() {
            return Err(FactoryError::AbstractDefinition { name: name.to_string() });
        }

        self.resolve_depends_on(name, &definition, ctx)?;

        match definition.scope() {
            Scope::Singleton => {
                let chain = ctx.chain_to(name);
                let mut started = false;
                let created = self.singletons.get_or_create(name, move || chain, || {
                    started = true;
                    self.create(name, &definition, explicit, ctx)
                });
                if created.is_err() && started {
                    self.destroy_singleton(name);
                }
                created
            }
            Scope::PerRequest => {
                ctx.begin(name);
                let created = self.create(name, &definition, explicit, ctx);
                ctx.end(name);
                created
            }
            Scope::Named(scope_name) => {
                let provider = self
                    .scopes
                    .get(scope_name)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| {
                        FactoryError::invalid(name, format!("no scope named '{scope_name}' is registered"))
                    })?;
                provider.get(name, &mut || {
                    ctx.begin(name);
                    let created = self.create(name, &definition, explicit, ctx);
                    ctx.end(name);
                    created
                })
            }
        }
    }

    /// Builds every `depends-on` entry of `name` first, rejecting cycles
    /// before anything is instantiated.
    fn resolve_depends_on(&self, name: &str, definition: &ResolvedDefinition, ctx: &mut BuildContext) -> Result<()> {
        for dependency in &definition.definition().depends_on {
            let dependency = self.definitions.canonical_name(dependency);
            {
                let mut graph = self.graph.lock();
                if graph.is_dependent(name, &dependency) {
                    return Err(FactoryError::circular(
                        graph.cycle_through(name, &dependency),
                        CircularReason::DependsOn,
                    ));
                }
                graph.register(&dependency, name);
            }

            trace!(name = %name, dependency = %dependency, "Building depends-on first");
            self.get_in(&dependency, None, ctx)?;
        }
        Ok(())
    }

    /// Constructs, publishes the early reference, populates and
    /// initializes one object.
    fn create(
        &self,
        name: &str,
        definition: &ResolvedDefinition,
        explicit: Option<&[Instance]>,
        ctx: &mut BuildContext,
    ) -> Result<Instance> {
        let raw = CallableResolver::new(self, definition).instantiate(explicit, ctx)?;

        let early_exposure = definition.scope().is_singleton()
            && !definition.is_inner()
            && self.settings.allow_circular_references
            && self.singletons.is_in_creation(name);

        if early_exposure {
            trace!(name = %name, "Publishing early reference factory");
            let hooks = self.instance_hooks.read().clone();
            let exposed = raw.clone();
            let object_name = name.to_string();
            self.singletons.add_early_factory(
                name,
                Box::new(move || {
                    hooks
                        .iter()
                        .try_fold(exposed, |current, hook| hook.early_reference(current, &object_name))
                }),
            );
        }

        self.populate(name, definition, &raw, ctx)?;
        let mut exposed = self.initialize(name, definition, raw.clone())?;

        if early_exposure {
            if let Some(early) = self.singletons.early_reference(name) {
                if exposed.same_object(&raw) {
                    exposed = early;
                } else if !self.settings.allow_raw_injection_despite_wrapping {
                    let dependents = self.graph.lock().dependents_of(name);
                    if !dependents.is_empty() {
                        let mut chain = vec![name.to_string()];
                        chain.extend(dependents);
                        return Err(FactoryError::circular(chain, CircularReason::WrappedAfterEarlyReference));
                    }
                }
            }
        }

        if let Scope::Named(scope_name) = definition.scope() {
            self.register_destruction(name, scope_name, definition, &exposed);
        }

        debug!(name = %name, scope = %definition.scope(), ty = %exposed.key(), "Built object");
        Ok(exposed)
    }

    /// Applies declared properties, then autowires the remaining setters
    /// by name or type.
    fn populate(&self, name: &str, definition: &ResolvedDefinition, instance: &Instance, ctx: &mut BuildContext) -> Result<()> {
        let declared = &definition.definition().properties;
        let autowire = definition.autowire();
        if declared.is_empty() && !matches!(autowire, AutowireMode::ByName | AutowireMode::ByType) {
            return Ok(());
        }

        let descriptor = self.catalog.describe(&instance.key()).ok_or_else(|| {
            FactoryError::invalid(
                name,
                format!("type {} is not described in the callable catalog; properties cannot be set", instance.key()),
            )
        })?;
        let resolver = ArgumentResolver::new(self, definition);

        for property in declared {
            let setter = descriptor.setter(&property.name).ok_or_else(|| {
                FactoryError::invalid(
                    name,
                    format!("{} has no property '{}'", instance.key().short_name(), property.name),
                )
            })?;
            let value = resolver.resolve_value(&property.value, ctx)?;
            let converted = resolver.convert(&value, setter.param())?;
            self.apply_setter(instance, &property.name, setter, &converted)?;
        }

        for (property, setter) in descriptor.setters() {
            if declared.iter().any(|p| p.name == property) {
                continue;
            }

            let target = match autowire {
                AutowireMode::ByName if property != name && self.contains(property) => Some(property.to_string()),
                AutowireMode::ByType if !setter.param().is_collection() => resolver
                    .autowire_target(&setter.param().ty(), property)
                    .map_err(|reason| FactoryError::invalid(name, format!("property '{property}': {reason}")))?,
                _ => None,
            };
            let Some(target) = target else { continue };

            let value = self.get_in(&target, None, ctx)?;
            let converted = self
                .conversion
                .convert(self.catalog.as_ref(), &value, &setter.param().ty())?;
            self.apply_setter(instance, property, setter, &converted)?;
            self.register_dependent(&target, name);
            trace!(name = %name, property = %property, target = %target, "Autowired property");
        }
        Ok(())
    }

    fn apply_setter(&self, instance: &Instance, property: &str, setter: &Setter, value: &Instance) -> Result<()> {
        setter.apply(instance, value).map_err(|source| FactoryError::Invocation {
            callable: format!("{}.{property}", instance.key().short_name()),
            source,
        })
    }

    /// Before-init hooks, the init method, then after-init hooks.
    fn initialize(&self, name: &str, definition: &ResolvedDefinition, instance: Instance) -> Result<Instance> {
        let hooks = self.instance_hooks.read().clone();
        let current = apply_phase(&hooks, instance, |hook, current| hook.before_initialization(current, name))?;

        if let Some(method) = &definition.definition().init_method {
            self.invoke_lifecycle(name, &current, method)?;
        }

        apply_phase(&hooks, current, |hook, current| hook.after_initialization(current, name))
    }

    fn invoke_lifecycle(&self, name: &str, instance: &Instance, method: &str) -> Result<()> {
        let lifecycle = self
            .catalog
            .describe(&instance.key())
            .and_then(|descriptor| descriptor.lifecycle_method(method).cloned())
            .ok_or_else(|| {
                FactoryError::invalid(
                    name,
                    format!("{} has no lifecycle method '{method}'", instance.key().short_name()),
                )
            })?;

        trace!(name = %name, method = %method, "Invoking lifecycle method");
        lifecycle(instance).map_err(|source| FactoryError::Invocation {
            callable: format!("{}::{method}", instance.key().short_name()),
            source,
        })
    }

    fn register_destruction(&self, name: &str, scope_name: &str, definition: &ResolvedDefinition, instance: &Instance) {
        let Some(method) = &definition.definition().destroy_method else {
            return;
        };
        let Some(provider) = self.scopes.get(scope_name).map(|entry| entry.value().clone()) else {
            return;
        };
        let Some(destroy) = self
            .catalog
            .describe(&instance.key())
            .and_then(|descriptor| descriptor.lifecycle_method(method).cloned())
        else {
            warn!(name = %name, method = %method, "Destroy method not found; no destruction callback registered");
            return;
        };

        let instance = instance.clone();
        let object_name = name.to_string();
        provider.register_destruction_callback(
            name,
            Box::new(move || {
                if let Err(err) = destroy(&instance) {
                    warn!(name = %object_name, error = %err, "Destroy method failed");
                }
            }),
        );
    }

    /// Builds a nested definition for `containing`. Never cached.
    pub(crate) fn build_inner(
        &self,
        definition: &ObjectDefinition,
        containing: &ResolvedDefinition,
        ctx: &mut BuildContext,
    ) -> Result<Instance> {
        let resolved = self.definitions.resolve_inner(definition, containing)?;
        let name = if definition.name.is_empty() {
            format!("{}#inner", containing.name())
        } else {
            definition.name.clone()
        };
        if resolved.is_abstract() {
            return Err(FactoryError::AbstractDefinition { name });
        }

        trace!(name = %name, containing = %containing.name(), scope = %resolved.scope(), "Building inner object");
        let built = self
            .resolve_depends_on(&name, &resolved, ctx)
            .and_then(|()| self.create(&name, &resolved, None, ctx));
        built.map_err(|cause| self.build_failure(&name, cause, ctx))
    }

    pub(crate) fn register_dependent(&self, dependency: &str, dependent: &str) {
        let dependency = self.definitions.canonical_name(dependency);
        self.graph.lock().register(&dependency, dependent);
    }

    /// Objects that may be autowired into a slot of type `ty` for `requester`.
    pub(crate) fn autowire_candidates(&self, ty: &TypeKey, requester: &str) -> Vec<AutowireCandidate> {
        self.names_for_type(ty)
            .into_iter()
            .filter(|name| name != requester)
            .filter_map(|name| match self.definitions.resolve(&name) {
                Ok(definition) => definition.is_autowire_candidate().then(|| AutowireCandidate {
                    primary: definition.is_primary(),
                    name,
                }),
                // Pre-built singletons have no definition.
                Err(_) => Some(AutowireCandidate { name, primary: false }),
            })
            .collect()
    }

    fn predict_type(&self, definition: &ResolvedDefinition, visiting: &mut Vec<String>) -> Option<TypeKey> {
        let inner = definition.definition();
        let Some(method) = inner.factory_method.as_deref() else {
            return definition.type_key();
        };

        let owner = match &inner.factory_object {
            Some(object) => {
                if visiting.iter().any(|n| n == object) || object == definition.name() {
                    return None;
                }
                visiting.push(definition.name().to_string());
                if let Ok(Some(reference)) = self.singletons.get(object, false) {
                    reference.instance().key()
                } else {
                    let object_definition = self.definitions.resolve(object).ok()?;
                    self.predict_type(&object_definition, visiting)?
                }
            }
            None => definition.type_key()?,
        };

        self.catalog
            .candidates_for(&owner, CallableTarget::FactoryMethod(method))
            .first()
            .map(|callable| callable.produces())
    }

    /// Drops a failed singleton and, transitively, every singleton that
    /// captured a reference to it.
    fn destroy_singleton(&self, name: &str) {
        let mut visited = HashSet::new();
        self.destroy_singleton_inner(name, &mut visited);
    }

    fn destroy_singleton_inner(&self, name: &str, visited: &mut HashSet<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        if self.singletons.remove(name).is_some() {
            debug!(name = %name, "Removed singleton after failed build");
        }

        let dependents = {
            let mut graph = self.graph.lock();
            let dependents = graph.dependents_of(name);
            graph.remove(name);
            dependents
        };
        for dependent in dependents {
            self.destroy_singleton_inner(&dependent, visited);
        }
    }

    fn build_failure(&self, name: &str, cause: FactoryError, ctx: &mut BuildContext) -> FactoryError {
        match &cause {
            FactoryError::BuildFailure(failure) if failure.name == name => return cause,
            FactoryError::NoSuchDefinition(err) if err.name == name => return cause,
            FactoryError::AbstractDefinition { name: abstract_name } if abstract_name == name => return cause,
            _ => {}
        }

        debug!(name = %name, error = %cause, "Build failed");
        FactoryError::BuildFailure(Box::new(BuildFailureError {
            name: name.to_string(),
            source_description: self.definitions.raw(name).and_then(|d| d.source),
            cause,
            suppressed: ctx.take_suppressed(),
        }))
    }
}

impl fmt::Debug for ObjectFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFactory")
            .field("definitions", &self.definitions.len())
            .field("singletons", &self.singletons.len())
            .field("scopes", &self.scopes.len())
            .field("parent", &self.parent.is_some())
            .finish()
    }
}
