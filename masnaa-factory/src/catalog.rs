//! Callable catalog: what the factory knows about each buildable type.
//!
//! Rust has no runtime reflection, so every type the factory builds is
//! described up front by a [`TypeDescriptor`]: its constructors, factory
//! methods, property setters, lifecycle methods and the interface types it
//! can be viewed as. Descriptors are registered at runtime with
//! [`Catalog::register`] or at compile time with `inventory::submit!` and
//! collected by [`Catalog::from_inventory`].
//!
//! # Examples
//! ```
//! use masnaa_factory::catalog::{Catalog, CallableCatalog, ParamSpec, TypeDescriptor};
//! use masnaa_factory::key::TypeKey;
//!
//! struct Endpoint { host: String, port: u16 }
//!
//! let catalog = Catalog::new();
//! catalog.register(
//!     TypeDescriptor::builder::<Endpoint>()
//!         .constructor("new", vec![ParamSpec::of::<String>("host"), ParamSpec::of::<u16>("port")], |args| {
//!             Ok(Endpoint { host: args.value(0)?, port: args.value(1)? })
//!         })
//!         .build(),
//! );
//!
//! assert_eq!(catalog.lookup("Endpoint"), Some(TypeKey::of::<Endpoint>()));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::BoxError;
use crate::instance::{Args, Instance};
use crate::key::TypeKey;

/// Erased callable body. The first argument is the factory object for
/// instance factory methods and `None` otherwise.
pub type InvokeFn =
    Arc<dyn Fn(Option<&Instance>, Args<'_>) -> Result<Instance, BoxError> + Send + Sync>;

/// Erased property setter: `(target, value)`.
pub type SetterFn = Arc<dyn Fn(&Instance, &Instance) -> Result<(), BoxError> + Send + Sync>;

/// Erased lifecycle method (init / destroy).
pub type LifecycleFn = Arc<dyn Fn(&Instance) -> Result<(), BoxError> + Send + Sync>;

/// Erased upcast into an interface representation.
pub type UpcastFn = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

type CollectFn = fn(&[Instance]) -> Instance;

/// How a callable produces its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    /// Builds the described type directly.
    Constructor,
    /// Associated function of the described type, looked up by name.
    StaticFactory,
    /// Method on a factory object, looked up by name.
    InstanceFactory,
}

/// Accessibility of a callable. Restricted callables are only considered
/// when the definition allows restricted access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Public,
    Restricted,
}

/// One parameter of a callable or setter.
#[derive(Clone)]
pub struct ParamSpec {
    name: String,
    ty: TypeKey,
    element: Option<(TypeKey, CollectFn)>,
}

impl ParamSpec {
    /// A parameter receiving a single `Arc<T>`.
    pub fn of<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: TypeKey::of::<T>(),
            element: None,
        }
    }

    /// A parameter receiving every matching object as `Vec<Arc<T>>`.
    pub fn all<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: TypeKey::of::<Vec<Arc<T>>>(),
            element: Some((TypeKey::of::<T>(), collect_all::<T> as CollectFn)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> TypeKey {
        self.ty
    }

    /// Element type of a collection parameter.
    pub fn element_type(&self) -> Option<TypeKey> {
        self.element.map(|(key, _)| key)
    }

    pub fn is_collection(&self) -> bool {
        self.element.is_some()
    }

    /// Packs already converted elements into the parameter's collection type.
    pub fn collect(&self, items: &[Instance]) -> Option<Instance> {
        self.element.map(|(_, collect)| collect(items))
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty.short_name())
    }
}

fn collect_all<T: Send + Sync + 'static>(items: &[Instance]) -> Instance {
    Instance::new(items.iter().filter_map(Instance::downcast::<T>).collect::<Vec<Arc<T>>>())
}

/// A constructor or factory method the factory may invoke.
pub struct Callable {
    name: String,
    kind: CallableKind,
    params: Vec<ParamSpec>,
    visibility: Visibility,
    produces: TypeKey,
    invoke: InvokeFn,
}

impl Callable {
    /// A constructor producing `T`.
    pub fn constructor<T, F>(name: impl Into<String>, params: Vec<ParamSpec>, body: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Args<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::unbound(name, CallableKind::Constructor, params, body)
    }

    /// An associated factory function producing `T`.
    pub fn static_factory<T, F>(name: impl Into<String>, params: Vec<ParamSpec>, body: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Args<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::unbound(name, CallableKind::StaticFactory, params, body)
    }

    /// A factory method on objects of type `S` producing `T`.
    pub fn instance_factory<S, T, F>(name: impl Into<String>, params: Vec<ParamSpec>, body: F) -> Self
    where
        S: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(&S, Args<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        Self {
            name,
            kind: CallableKind::InstanceFactory,
            params,
            visibility: Visibility::Public,
            produces: TypeKey::of::<T>(),
            invoke: Arc::new(move |target, args| {
                let target = target
                    .and_then(|t| t.downcast_ref::<S>())
                    .ok_or_else(|| -> BoxError {
                        format!(
                            "factory method '{label}' needs a {} target",
                            std::any::type_name::<S>()
                        )
                        .into()
                    })?;
                body(target, args).map(Instance::new)
            }),
        }
    }

    fn unbound<T, F>(name: impl Into<String>, kind: CallableKind, params: Vec<ParamSpec>, body: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Args<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            params,
            visibility: Visibility::Public,
            produces: TypeKey::of::<T>(),
            invoke: Arc::new(move |_, args| body(args).map(Instance::new)),
        }
    }

    /// Marks this callable as restricted (non-public).
    pub fn restricted(mut self) -> Self {
        self.visibility = Visibility::Restricted;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Type of the object this callable returns.
    pub fn produces(&self) -> TypeKey {
        self.produces
    }

    /// `true` when both callables take the same parameter types.
    pub fn same_parameter_types(&self, other: &Callable) -> bool {
        self.params.len() == other.params.len()
            && self.params.iter().zip(&other.params).all(|(a, b)| a.ty == b.ty)
    }

    /// Human-readable signature, e.g. `new(host: String, port: u16)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| format!("{p:?}")).collect();
        format!("{}({})", self.name, params.join(", "))
    }

    pub fn invoke(&self, target: Option<&Instance>, args: &[Instance]) -> Result<Instance, BoxError> {
        (self.invoke)(target, Args::new(args))
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("signature", &self.signature())
            .field("kind", &self.kind)
            .field("visibility", &self.visibility)
            .field("produces", &self.produces)
            .finish()
    }
}

/// A property setter used for setter injection.
#[derive(Clone)]
pub struct Setter {
    param: ParamSpec,
    apply: SetterFn,
}

impl Setter {
    pub fn param(&self) -> &ParamSpec {
        &self.param
    }

    pub fn apply(&self, target: &Instance, value: &Instance) -> Result<(), BoxError> {
        (self.apply)(target, value)
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Setter({:?})", self.param)
    }
}

/// An interface representation a type can be viewed as.
#[derive(Clone)]
pub struct Upcast {
    target: TypeKey,
    cast: UpcastFn,
}

impl Upcast {
    pub fn target(&self) -> TypeKey {
        self.target
    }

    pub fn apply(&self, instance: &Instance) -> Option<Instance> {
        (self.cast)(instance)
    }
}

/// Everything the factory knows about one type.
pub struct TypeDescriptor {
    key: TypeKey,
    names: Vec<String>,
    constructors: Vec<Arc<Callable>>,
    factory_methods: Vec<Arc<Callable>>,
    setters: BTreeMap<String, Setter>,
    lifecycle: HashMap<String, LifecycleFn>,
    upcasts: Vec<Upcast>,
}

impl TypeDescriptor {
    /// Starts describing type `S`.
    pub fn builder<S: Send + Sync + 'static>() -> DescriptorBuilder<S> {
        DescriptorBuilder {
            descriptor: TypeDescriptor {
                key: TypeKey::of::<S>(),
                names: Vec::new(),
                constructors: Vec::new(),
                factory_methods: Vec::new(),
                setters: BTreeMap::new(),
                lifecycle: HashMap::new(),
                upcasts: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Extra names this type can be referred to by in definitions.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn constructors(&self) -> &[Arc<Callable>] {
        &self.constructors
    }

    /// Static and instance factory methods called `name`.
    pub fn factory_methods(&self, name: &str) -> Vec<Arc<Callable>> {
        self.factory_methods
            .iter()
            .filter(|c| c.name() == name)
            .cloned()
            .collect()
    }

    pub fn setter(&self, property: &str) -> Option<&Setter> {
        self.setters.get(property)
    }

    /// Setters in property-name order.
    pub fn setters(&self) -> impl Iterator<Item = (&str, &Setter)> {
        self.setters.iter().map(|(name, setter)| (name.as_str(), setter))
    }

    pub fn lifecycle_method(&self, name: &str) -> Option<&LifecycleFn> {
        self.lifecycle.get(name)
    }

    pub fn upcast_to(&self, target: &TypeKey) -> Option<&Upcast> {
        self.upcasts.iter().find(|u| u.target == *target)
    }

    pub fn upcasts(&self) -> &[Upcast] {
        &self.upcasts
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("key", &self.key)
            .field("constructors", &self.constructors.len())
            .field("factory_methods", &self.factory_methods.len())
            .field("setters", &self.setters.keys().collect::<Vec<_>>())
            .field("upcasts", &self.upcasts.len())
            .finish()
    }
}

/// Typed builder for a [`TypeDescriptor`] of `S`.
pub struct DescriptorBuilder<S> {
    descriptor: TypeDescriptor,
    _marker: PhantomData<fn() -> S>,
}

impl<S: Send + Sync + 'static> DescriptorBuilder<S> {
    /// Registers an extra lookup name (e.g. the name used in declarative sources).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.descriptor.names.push(name.into());
        self
    }

    /// Adds a public constructor.
    pub fn constructor<F>(self, name: impl Into<String>, params: Vec<ParamSpec>, body: F) -> Self
    where
        F: Fn(Args<'_>) -> Result<S, BoxError> + Send + Sync + 'static,
    {
        self.callable(Callable::constructor(name, params, body))
    }

    /// Adds an associated factory function producing `T`.
    pub fn static_factory<T, F>(self, name: impl Into<String>, params: Vec<ParamSpec>, body: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Args<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.callable(Callable::static_factory(name, params, body))
    }

    /// Adds a factory method on `S` producing `T`.
    pub fn instance_factory<T, F>(self, name: impl Into<String>, params: Vec<ParamSpec>, body: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&S, Args<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.callable(Callable::instance_factory::<S, T, F>(name, params, body))
    }

    /// Adds a prepared callable, sorted into constructors or factory methods by kind.
    pub fn callable(mut self, callable: Callable) -> Self {
        match callable.kind() {
            CallableKind::Constructor => self.descriptor.constructors.push(Arc::new(callable)),
            CallableKind::StaticFactory | CallableKind::InstanceFactory => {
                self.descriptor.factory_methods.push(Arc::new(callable))
            }
        }
        self
    }

    /// Adds a property setter receiving `Arc<V>`.
    pub fn setter<V, F>(mut self, property: impl Into<String>, body: F) -> Self
    where
        V: Send + Sync + 'static,
        F: Fn(&S, Arc<V>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let property = property.into();
        let label = property.clone();
        let apply: SetterFn = Arc::new(move |target, value| {
            let target = target
                .downcast_ref::<S>()
                .ok_or_else(|| -> BoxError { format!("setter '{label}' applied to a foreign type").into() })?;
            let value = value.downcast::<V>().ok_or_else(|| -> BoxError {
                format!("setter '{label}' expects {}", std::any::type_name::<V>()).into()
            })?;
            body(target, value)
        });

        self.descriptor.setters.insert(
            property.clone(),
            Setter {
                param: ParamSpec::of::<V>(property),
                apply,
            },
        );
        self
    }

    /// Adds a named lifecycle method (referenced by `init_method` / `destroy_method`).
    pub fn lifecycle<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&S) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let method: LifecycleFn = Arc::new(move |target| {
            let target = target
                .downcast_ref::<S>()
                .ok_or_else(|| -> BoxError { "lifecycle method applied to a foreign type".into() })?;
            body(target)
        });
        self.descriptor.lifecycle.insert(name.into(), method);
        self
    }

    /// Declares that `S` can be viewed as `I` (typically `Arc<dyn Trait>`).
    pub fn implements<I, F>(mut self, cast: F) -> Self
    where
        I: Send + Sync + 'static,
        F: Fn(Arc<S>) -> I + Send + Sync + 'static,
    {
        self.descriptor.upcasts.push(Upcast {
            target: TypeKey::of::<I>(),
            cast: Arc::new(move |instance| instance.downcast::<S>().map(|s| Instance::new(cast(s)))),
        });
        self
    }

    pub fn build(self) -> TypeDescriptor {
        self.descriptor
    }
}

/// Which callables of a type to enumerate.
#[derive(Debug, Clone, Copy)]
pub enum CallableTarget<'a> {
    Constructors,
    FactoryMethod(&'a str),
}

/// Source of type descriptors.
///
/// Implement this to plug a different registration mechanism (generated
/// tables, plugin manifests) into the factory.
pub trait CallableCatalog: Send + Sync {
    /// Descriptor for a type, if it is known.
    fn describe(&self, key: &TypeKey) -> Option<Arc<TypeDescriptor>>;

    /// Resolves a deferred type name (short or fully qualified).
    fn lookup(&self, type_name: &str) -> Option<TypeKey>;

    /// Candidate entry points for building an object of `key`.
    fn candidates_for(&self, key: &TypeKey, target: CallableTarget<'_>) -> Vec<Arc<Callable>> {
        let Some(descriptor) = self.describe(key) else {
            return Vec::new();
        };
        match target {
            CallableTarget::Constructors => descriptor.constructors().to_vec(),
            CallableTarget::FactoryMethod(name) => descriptor.factory_methods(name),
        }
    }
}

/// Compile-time registration of a type descriptor.
///
/// ```ignore
/// inventory::submit! { TypeRegistration::new(describe_database) }
/// ```
pub struct TypeRegistration {
    describe: fn() -> TypeDescriptor,
}

impl TypeRegistration {
    pub const fn new(describe: fn() -> TypeDescriptor) -> Self {
        Self { describe }
    }
}

inventory::collect!(TypeRegistration);

/// Thread-safe in-memory catalog.
#[derive(Default)]
pub struct Catalog {
    types: DashMap<TypeKey, Arc<TypeDescriptor>>,
    names: DashMap<String, TypeKey>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from every `TypeRegistration` submitted in the binary.
    pub fn from_inventory() -> Self {
        let catalog = Self::new();
        for registration in inventory::iter::<TypeRegistration> {
            catalog.register((registration.describe)());
        }
        debug!(types = catalog.len(), "Collected type registrations");
        catalog
    }

    /// Adds or replaces a descriptor.
    pub fn register(&self, descriptor: TypeDescriptor) -> &Self {
        let key = descriptor.key();
        let mut names = vec![key.type_name().to_string(), key.short_name()];
        names.extend(descriptor.names().iter().cloned());

        for name in names {
            if let Some(previous) = self.names.insert(name.clone(), key) {
                if previous != key {
                    warn!(name = %name, previous = %previous, now = %key, "Type name rebound");
                }
            }
        }

        debug!(ty = %key, "Registered type descriptor");
        self.types.insert(key, Arc::new(descriptor));
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl CallableCatalog for Catalog {
    fn describe(&self, key: &TypeKey) -> Option<Arc<TypeDescriptor>> {
        self.types.get(key).map(|entry| entry.value().clone())
    }

    fn lookup(&self, type_name: &str) -> Option<TypeKey> {
        self.names.get(type_name).map(|entry| *entry.value())
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog").field("types", &self.types.len()).finish()
    }
}
