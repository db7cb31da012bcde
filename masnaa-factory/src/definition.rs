//! Object definitions: declarative recipes for building named objects.
//!
//! An [`ObjectDefinition`] is what a loader (or code) registers. It may name
//! a parent definition; [`ObjectDefinition::merged_over`] applies the child
//! on top of an already resolved parent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instance::Instance;
use crate::key::TypeKey;
use crate::scope::Scope;

/// Type of the object a definition builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// Known at registration time.
    Key(TypeKey),
    /// Deferred; resolved through the callable catalog when the
    /// definition is merged.
    Named(String),
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Key(key) => write!(f, "{key}"),
            TypeRef::Named(name) => write!(f, "{name}"),
        }
    }
}

/// How unmatched dependencies are filled in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutowireMode {
    /// Only declared values are used.
    #[default]
    No,
    /// Unset setters are filled with the object named like the property.
    ByName,
    /// Unset setters are filled with the single object of the setter type.
    ByType,
    /// Constructor and factory parameters without a declared value are
    /// resolved by type.
    Constructor,
}

/// A declared argument or property value, before resolution.
#[derive(Debug, Clone)]
pub enum ArgumentValue {
    /// Text to be converted to the parameter type.
    Literal(String),
    /// A ready-made object.
    Instance(Instance),
    /// Another named object.
    Reference(String),
    /// A nested object built for this one only; never cached.
    Inner(Box<ObjectDefinition>),
    /// Elements for a collection parameter.
    List(Vec<ArgumentValue>),
}

impl ArgumentValue {
    pub fn literal(text: impl Into<String>) -> Self {
        ArgumentValue::Literal(text.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        ArgumentValue::Reference(name.into())
    }

    pub fn instance<T: Send + Sync + 'static>(value: T) -> Self {
        ArgumentValue::Instance(Instance::new(value))
    }

    pub fn inner(definition: ObjectDefinition) -> Self {
        ArgumentValue::Inner(Box::new(definition))
    }

    /// Short rendering for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            ArgumentValue::Literal(text) => format!("{text:?}"),
            ArgumentValue::Instance(instance) => format!("{instance:?}"),
            ArgumentValue::Reference(name) => format!("ref '{name}'"),
            ArgumentValue::Inner(definition) => format!("inner '{}'", definition.name),
            ArgumentValue::List(items) => format!("list of {}", items.len()),
        }
    }
}

impl PartialEq for ArgumentValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ArgumentValue::Literal(a), ArgumentValue::Literal(b)) => a == b,
            (ArgumentValue::Instance(a), ArgumentValue::Instance(b)) => a.same_object(b),
            (ArgumentValue::Reference(a), ArgumentValue::Reference(b)) => a == b,
            (ArgumentValue::Inner(a), ArgumentValue::Inner(b)) => a == b,
            (ArgumentValue::List(a), ArgumentValue::List(b)) => a == b,
            _ => false,
        }
    }
}

/// A constructor or factory argument with optional matching hints.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredArgument {
    pub value: ArgumentValue,
    /// Declared parameter type name (short or fully qualified).
    pub type_name: Option<String>,
    /// Declared parameter name.
    pub name: Option<String>,
}

impl DeclaredArgument {
    pub fn new(value: ArgumentValue) -> Self {
        Self {
            value,
            type_name: None,
            name: None,
        }
    }

    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `true` if neither a type nor a name restricts where this value goes.
    pub fn is_untyped(&self) -> bool {
        self.type_name.is_none() && self.name.is_none()
    }
}

/// Declared constructor / factory arguments: positional and unpositioned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstructorArgs {
    indexed: BTreeMap<usize, DeclaredArgument>,
    generic: Vec<DeclaredArgument>,
}

impl ConstructorArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_indexed(&mut self, index: usize, argument: DeclaredArgument) {
        self.indexed.insert(index, argument);
    }

    /// Adds an unpositioned argument. A named argument replaces an earlier
    /// one of the same name; anything else is appended, equal values
    /// included.
    pub fn add_generic(&mut self, argument: DeclaredArgument) {
        if let Some(name) = &argument.name {
            if let Some(existing) = self
                .generic
                .iter_mut()
                .find(|a| a.name.as_deref() == Some(name.as_str()))
            {
                *existing = argument;
                return;
            }
        }
        self.generic.push(argument);
    }

    pub fn indexed(&self) -> &BTreeMap<usize, DeclaredArgument> {
        &self.indexed
    }

    pub fn generic(&self) -> &[DeclaredArgument] {
        &self.generic
    }

    /// Total number of declared values.
    pub fn len(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.generic.is_empty()
    }

    /// Fewest parameters a candidate callable must take to accept all
    /// declared values.
    pub fn min_arg_count(&self) -> usize {
        let highest_index = self.indexed.keys().next_back().map_or(0, |i| i + 1);
        self.len().max(highest_index)
    }

    /// Child arguments applied over `parent`'s.
    ///
    /// A child entry equal to one the parent already carries is taken as
    /// that entry, each parent entry matching at most once. Merging a child
    /// over its own merge result therefore changes nothing.
    pub fn merged_over(&self, parent: &ConstructorArgs) -> ConstructorArgs {
        let mut merged = parent.clone();
        for (index, argument) in &self.indexed {
            merged.indexed.insert(*index, argument.clone());
        }

        let mut inherited: Vec<&DeclaredArgument> = parent.generic.iter().collect();
        for argument in &self.generic {
            if let Some(position) = inherited.iter().position(|a| *a == argument) {
                inherited.swap_remove(position);
                continue;
            }
            merged.add_generic(argument.clone());
        }
        merged
    }
}

/// A property (setter) value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub name: String,
    pub value: ArgumentValue,
}

/// A recipe for one named object.
///
/// Optional fields left `None` inherit from the parent definition when the
/// definition is merged, and fall back to defaults afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDefinition {
    pub name: String,
    pub parent: Option<String>,
    pub type_ref: Option<TypeRef>,
    pub scope: Option<Scope>,
    pub constructor_args: ConstructorArgs,
    pub properties: Vec<PropertyValue>,
    pub lazy: Option<bool>,
    /// Template only; never inherited.
    pub is_abstract: bool,
    pub depends_on: Vec<String>,
    pub factory_object: Option<String>,
    pub factory_method: Option<String>,
    pub autowire: Option<AutowireMode>,
    pub primary: Option<bool>,
    pub autowire_candidate: Option<bool>,
    pub lenient_resolution: Option<bool>,
    pub allow_restricted_access: Option<bool>,
    pub init_method: Option<String>,
    pub destroy_method: Option<String>,
    /// Where the definition was declared (file, module), for diagnostics.
    pub source: Option<String>,
}

impl ObjectDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Definition of an object of type `T`.
    pub fn of<T: 'static>(name: impl Into<String>) -> Self {
        Self::new(name).with_type(TypeRef::Key(TypeKey::of::<T>()))
    }

    pub fn with_type(mut self, type_ref: TypeRef) -> Self {
        self.type_ref = Some(type_ref);
        self
    }

    /// Deferred type, resolved by name through the catalog.
    pub fn type_name(self, name: impl Into<String>) -> Self {
        self.with_type(TypeRef::Named(name.into()))
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Adds an unpositioned argument.
    pub fn arg(mut self, value: ArgumentValue) -> Self {
        self.constructor_args.add_generic(DeclaredArgument::new(value));
        self
    }

    pub fn indexed_arg(mut self, index: usize, value: ArgumentValue) -> Self {
        self.constructor_args.add_indexed(index, DeclaredArgument::new(value));
        self
    }

    pub fn named_arg(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.constructor_args
            .add_generic(DeclaredArgument::new(value).named(name));
        self
    }

    pub fn declared_arg(mut self, argument: DeclaredArgument) -> Self {
        self.constructor_args.add_generic(argument);
        self
    }

    /// Sets a property, replacing an earlier value for the same name.
    pub fn property(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        set_property(&mut self.properties, PropertyValue { name: name.into(), value });
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = Some(lazy);
        self
    }

    pub fn abstract_template(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Builds through the named static factory of the definition's type.
    pub fn factory_method(mut self, method: impl Into<String>) -> Self {
        self.factory_method = Some(method.into());
        self
    }

    /// Builds by calling `method` on the object named `object`.
    pub fn factory_object(mut self, object: impl Into<String>, method: impl Into<String>) -> Self {
        self.factory_object = Some(object.into());
        self.factory_method = Some(method.into());
        self
    }

    pub fn autowire(mut self, mode: AutowireMode) -> Self {
        self.autowire = Some(mode);
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = Some(true);
        self
    }

    /// Excludes this object from autowiring by type.
    pub fn no_autowire_candidate(mut self) -> Self {
        self.autowire_candidate = Some(false);
        self
    }

    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient_resolution = Some(lenient);
        self
    }

    pub fn allow_restricted_access(mut self, allow: bool) -> Self {
        self.allow_restricted_access = Some(allow);
        self
    }

    pub fn init_method(mut self, method: impl Into<String>) -> Self {
        self.init_method = Some(method.into());
        self
    }

    pub fn destroy_method(mut self, method: impl Into<String>) -> Self {
        self.destroy_method = Some(method.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Applies this (child) definition over a resolved `parent`.
    ///
    /// Scalars set on the child replace the parent's; argument lists and
    /// properties merge entry by entry with the child winning; the abstract
    /// flag always comes from the child.
    pub fn merged_over(&self, parent: &ObjectDefinition) -> ObjectDefinition {
        let mut properties = parent.properties.clone();
        for property in &self.properties {
            set_property(&mut properties, property.clone());
        }

        ObjectDefinition {
            name: self.name.clone(),
            parent: self.parent.clone(),
            type_ref: self.type_ref.clone().or_else(|| parent.type_ref.clone()),
            scope: self.scope.clone().or_else(|| parent.scope.clone()),
            constructor_args: self.constructor_args.merged_over(&parent.constructor_args),
            properties,
            lazy: self.lazy.or(parent.lazy),
            is_abstract: self.is_abstract,
            depends_on: if self.depends_on.is_empty() {
                parent.depends_on.clone()
            } else {
                self.depends_on.clone()
            },
            factory_object: self.factory_object.clone().or_else(|| parent.factory_object.clone()),
            factory_method: self.factory_method.clone().or_else(|| parent.factory_method.clone()),
            autowire: self.autowire.or(parent.autowire),
            primary: self.primary.or(parent.primary),
            autowire_candidate: self.autowire_candidate.or(parent.autowire_candidate),
            lenient_resolution: self.lenient_resolution.or(parent.lenient_resolution),
            allow_restricted_access: self.allow_restricted_access.or(parent.allow_restricted_access),
            init_method: self.init_method.clone().or_else(|| parent.init_method.clone()),
            destroy_method: self.destroy_method.clone().or_else(|| parent.destroy_method.clone()),
            source: self.source.clone().or_else(|| parent.source.clone()),
        }
    }
}

fn set_property(properties: &mut Vec<PropertyValue>, property: PropertyValue) {
    match properties.iter_mut().find(|p| p.name == property.name) {
        Some(existing) => *existing = property,
        None => properties.push(property),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pool;

    fn parent() -> ObjectDefinition {
        ObjectDefinition::of::<Pool>("basePool")
            .scope(Scope::PerRequest)
            .lazy(true)
            .indexed_arg(0, ArgumentValue::literal("localhost"))
            .indexed_arg(1, ArgumentValue::literal("5432"))
            .named_arg("timeout", ArgumentValue::literal("30"))
            .property("max", ArgumentValue::literal("10"))
            .depends_on("metrics")
            .init_method("open")
            .abstract_template()
    }

    fn child() -> ObjectDefinition {
        ObjectDefinition::new("pool")
            .parent("basePool")
            .indexed_arg(1, ArgumentValue::literal("6543"))
            .named_arg("timeout", ArgumentValue::literal("5"))
            .arg(ArgumentValue::reference("tracer"))
            .property("min", ArgumentValue::literal("2"))
    }

    #[test]
    fn child_overrides_and_inherits() {
        let merged = child().merged_over(&parent());

        assert_eq!(merged.name, "pool");
        assert_eq!(merged.type_ref, Some(TypeRef::Key(TypeKey::of::<Pool>())));
        assert_eq!(merged.scope, Some(Scope::PerRequest));
        assert_eq!(merged.lazy, Some(true));
        assert!(!merged.is_abstract);
        assert_eq!(merged.depends_on, vec!["metrics".to_string()]);
        assert_eq!(merged.init_method.as_deref(), Some("open"));

        let indexed = merged.constructor_args.indexed();
        assert_eq!(indexed[&0].value, ArgumentValue::literal("localhost"));
        assert_eq!(indexed[&1].value, ArgumentValue::literal("6543"));

        let generic = merged.constructor_args.generic();
        assert_eq!(generic.len(), 2);
        assert_eq!(generic[0].value, ArgumentValue::literal("5"));
        assert_eq!(generic[1].value, ArgumentValue::reference("tracer"));

        let names: Vec<&str> = merged.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["max", "min"]);
    }

    #[test]
    fn remerge_is_idempotent() {
        let once = child().merged_over(&parent());
        let twice = child().merged_over(&once);
        assert_eq!(once, twice);
        assert_eq!(once.merged_over(&once), once);
    }

    #[test]
    fn min_arg_count_uses_highest_index() {
        let mut args = ConstructorArgs::new();
        assert_eq!(args.min_arg_count(), 0);

        args.add_indexed(3, DeclaredArgument::new(ArgumentValue::literal("x")));
        assert_eq!(args.min_arg_count(), 4);

        args.add_generic(DeclaredArgument::new(ArgumentValue::literal("y")));
        args.add_generic(DeclaredArgument::new(ArgumentValue::literal("z")));
        args.add_generic(DeclaredArgument::new(ArgumentValue::literal("w")));
        args.add_generic(DeclaredArgument::new(ArgumentValue::literal("v")));
        assert_eq!(args.min_arg_count(), 5);
    }

    #[test]
    fn equal_generic_arguments_are_kept() {
        let definition = ObjectDefinition::new("pair")
            .arg(ArgumentValue::literal("a"))
            .arg(ArgumentValue::literal("a"));
        assert_eq!(definition.constructor_args.len(), 2);

        let template = ObjectDefinition::new("template").arg(ArgumentValue::literal("a"));
        let merged = definition.merged_over(&template);
        assert_eq!(merged.constructor_args.generic().len(), 2);
        assert_eq!(definition.merged_over(&merged), merged);
    }

    #[test]
    fn named_generic_argument_replaces_earlier() {
        let definition = ObjectDefinition::new("pool")
            .named_arg("size", ArgumentValue::literal("4"))
            .named_arg("size", ArgumentValue::literal("8"));

        let generic = definition.constructor_args.generic();
        assert_eq!(generic.len(), 1);
        assert_eq!(generic[0].value, ArgumentValue::literal("8"));
    }

    #[test]
    fn instance_values_compare_by_identity() {
        let shared = Instance::new(5u8);
        assert_eq!(
            ArgumentValue::Instance(shared.clone()),
            ArgumentValue::Instance(shared)
        );
        assert_ne!(ArgumentValue::instance(5u8), ArgumentValue::instance(5u8));
    }
}
