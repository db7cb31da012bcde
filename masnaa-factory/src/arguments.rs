//! Argument resolution.
//!
//! Turns a definition's declared argument values into the concrete
//! argument array for one candidate callable. Declared values are resolved
//! once per build (references fetched, inner objects built) and then
//! matched against each candidate's parameters by position, name, declared
//! type or value type. Parameters left over are autowired by type when the
//! definition asks for it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use tracing::trace;

use masnaa_support::rendering::render_name_list;

use crate::catalog::{Callable, ParamSpec};
use crate::context::BuildContext;
use crate::definition::{ArgumentValue, DeclaredArgument};
use crate::error::{FactoryError, Result, TypeConversionError, UnsatisfiedDependencyError};
use crate::factory::ObjectFactory;
use crate::instance::Instance;
use crate::key::TypeKey;
use crate::registry::ResolvedDefinition;

/// A declared value after references and inner objects were resolved.
#[derive(Debug, Clone)]
pub(crate) enum ResolvedValue {
    Single(Instance),
    List(Vec<Instance>),
}

impl ResolvedValue {
    /// The value as supplied, before conversion.
    fn raw(&self) -> Instance {
        match self {
            ResolvedValue::Single(instance) => instance.clone(),
            ResolvedValue::List(items) => Instance::new(items.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedArgument {
    value: ResolvedValue,
    source: ArgumentValue,
    type_name: Option<String>,
    name: Option<String>,
}

impl ResolvedArgument {
    fn is_untyped(&self) -> bool {
        self.type_name.is_none() && self.name.is_none()
    }

    /// Declared hints agree with the parameter.
    fn hints_match(&self, param: &ParamSpec) -> bool {
        self.name.as_deref().is_none_or(|name| name == param.name())
            && self.type_name.as_deref().is_none_or(|ty| param.ty().matches_name(ty))
    }
}

/// Declared values of one definition, resolved for one build.
#[derive(Debug, Default)]
pub(crate) struct ResolvedArguments {
    indexed: BTreeMap<usize, ResolvedArgument>,
    generic: Vec<ResolvedArgument>,
}

impl ResolvedArguments {
    pub fn count(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }
}

/// Reusable recipe for one argument slot of a memoized callable.
#[derive(Debug, Clone)]
pub(crate) enum PreparedArgument {
    /// Converted once; reused as is.
    Value(Instance),
    /// A reference, inner object or list; resolved again on every build.
    Declared(ArgumentValue),
    /// Autowired again on every build. The flag is the empty-collection
    /// fallback in force when the slot was first resolved.
    Autowired(bool),
}

/// Memoized arguments of a resolved callable.
#[derive(Debug, Clone)]
pub(crate) enum CachedArguments {
    /// Every argument was a plain value; invoke with these directly.
    Resolved(Vec<Instance>),
    /// Some slots need resolution on each build.
    Prepared(Vec<PreparedArgument>),
}

/// Arguments built for one candidate callable.
#[derive(Debug, Default)]
pub(crate) struct ArgumentHolder {
    pub raw: Vec<Instance>,
    pub converted: Vec<Instance>,
    pub prepared: Vec<PreparedArgument>,
    pub resolve_necessary: bool,
    /// Objects obtained by autowiring; the caller records them as
    /// dependencies of the object being built.
    pub autowired: Vec<String>,
}

impl ArgumentHolder {
    fn push(&mut self, raw: Instance, converted: Instance, prepared: PreparedArgument) {
        if !matches!(prepared, PreparedArgument::Value(_)) {
            self.resolve_necessary = true;
        }
        self.raw.push(raw);
        self.converted.push(converted);
        self.prepared.push(prepared);
    }

    pub fn cached(&self) -> CachedArguments {
        if self.resolve_necessary {
            CachedArguments::Prepared(self.prepared.clone())
        } else {
            CachedArguments::Resolved(self.converted.clone())
        }
    }
}

/// Resolves arguments for one definition.
pub(crate) struct ArgumentResolver<'a> {
    factory: &'a ObjectFactory,
    definition: &'a ResolvedDefinition,
}

impl<'a> ArgumentResolver<'a> {
    pub fn new(factory: &'a ObjectFactory, definition: &'a ResolvedDefinition) -> Self {
        Self { factory, definition }
    }

    /// Resolves every declared constructor/factory argument value.
    pub fn resolve_declared(&self, ctx: &mut BuildContext) -> Result<ResolvedArguments> {
        let declared = &self.definition.definition().constructor_args;
        let mut resolved = ResolvedArguments::default();

        for (index, argument) in declared.indexed() {
            resolved.indexed.insert(*index, self.resolve_argument(argument, ctx)?);
        }
        for argument in declared.generic() {
            resolved.generic.push(self.resolve_argument(argument, ctx)?);
        }
        Ok(resolved)
    }

    fn resolve_argument(&self, argument: &DeclaredArgument, ctx: &mut BuildContext) -> Result<ResolvedArgument> {
        Ok(ResolvedArgument {
            value: self.resolve_value(&argument.value, ctx)?,
            source: argument.value.clone(),
            type_name: argument.type_name.clone(),
            name: argument.name.clone(),
        })
    }

    /// Resolves a declared value: references are fetched from the factory
    /// and inner definitions built for this object.
    pub fn resolve_value(&self, value: &ArgumentValue, ctx: &mut BuildContext) -> Result<ResolvedValue> {
        match value {
            ArgumentValue::Literal(text) => Ok(ResolvedValue::Single(Instance::new(text.clone()))),
            ArgumentValue::Instance(instance) => Ok(ResolvedValue::Single(instance.clone())),
            ArgumentValue::Reference(name) => {
                let instance = self.factory.get_in(name, None, ctx)?;
                self.factory.register_dependent(name, self.definition.name());
                Ok(ResolvedValue::Single(instance))
            }
            ArgumentValue::Inner(definition) => {
                let instance = self.factory.build_inner(definition, self.definition, ctx)?;
                Ok(ResolvedValue::Single(instance))
            }
            ArgumentValue::List(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve_value(item, ctx)? {
                        ResolvedValue::Single(instance) => resolved.push(instance),
                        ResolvedValue::List(nested) => resolved.extend(nested),
                    }
                }
                Ok(ResolvedValue::List(resolved))
            }
        }
    }

    /// Converts a resolved value to the parameter's type.
    pub fn convert(&self, value: &ResolvedValue, param: &ParamSpec) -> Result<Instance> {
        let conversion = self.factory.conversion();
        let catalog = self.factory.catalog();

        match value {
            ResolvedValue::Single(instance) => match conversion.convert(catalog, instance, &param.ty()) {
                Ok(converted) => Ok(converted),
                Err(err) => match param.element_type() {
                    Some(element) => {
                        let item = conversion
                            .convert(catalog, instance, &element)
                            .map_err(|_| FactoryError::TypeConversion(err))?;
                        self.collect(param, &[item])
                    }
                    None => Err(FactoryError::TypeConversion(err)),
                },
            },
            ResolvedValue::List(items) => {
                let Some(element) = param.element_type() else {
                    return Err(FactoryError::TypeConversion(TypeConversionError {
                        value: format!("list of {}", items.len()),
                        target: param.ty(),
                        reason: "parameter does not take a collection".into(),
                    }));
                };
                let converted = items
                    .iter()
                    .map(|item| conversion.convert(catalog, item, &element))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.collect(param, &converted)
            }
        }
    }

    fn collect(&self, param: &ParamSpec, items: &[Instance]) -> Result<Instance> {
        param.collect(items).ok_or_else(|| {
            FactoryError::TypeConversion(TypeConversionError {
                value: format!("{} item(s)", items.len()),
                target: param.ty(),
                reason: "parameter does not take a collection".into(),
            })
        })
    }

    /// Builds the argument array for `callable`.
    ///
    /// `single_candidate` says `callable` is the only candidate being tried.
    /// It enables two fallbacks: with autowiring off, a parameter nothing
    /// matches takes the single remaining untyped value; with autowiring
    /// on, a collection parameter nothing can be autowired into gets an
    /// empty collection.
    pub fn build_arguments(
        &self,
        callable: &Callable,
        declared: &ResolvedArguments,
        autowire: bool,
        single_candidate: bool,
        ctx: &mut BuildContext,
    ) -> Result<ArgumentHolder> {
        let params = callable.params();
        let mut holder = ArgumentHolder::default();
        let mut used = Used::default();
        let leftover_allowed = !autowire && single_candidate;

        for (index, param) in params.iter().enumerate() {
            let found = self
                .find_declared(declared, index, param, &mut used)
                .or_else(|| leftover_allowed.then(|| Self::take_untyped(declared, &mut used)).flatten());

            if let Some(argument) = found {
                let converted = self.convert(&argument.value, param)?;
                let prepared = match &argument.source {
                    ArgumentValue::Literal(_) | ArgumentValue::Instance(_) => {
                        PreparedArgument::Value(converted.clone())
                    }
                    source => PreparedArgument::Declared(source.clone()),
                };
                holder.push(argument.value.raw(), converted, prepared);
                continue;
            }

            if !autowire {
                return Err(self.unsatisfied(
                    callable,
                    index,
                    param,
                    "no declared value matches and autowiring is off".into(),
                ));
            }

            let (instance, names) = self.autowire_param(callable, index, param, single_candidate, ctx)?;
            holder.push(instance.clone(), instance, PreparedArgument::Autowired(single_candidate));
            holder.autowired.extend(names);
        }

        trace!(
            object = %self.definition.name(),
            callable = %callable.signature(),
            prepared = holder.resolve_necessary,
            "Built argument array"
        );
        Ok(holder)
    }

    /// Re-resolves a memoized argument template.
    pub fn resolve_prepared(
        &self,
        callable: &Callable,
        prepared: &[PreparedArgument],
        ctx: &mut BuildContext,
    ) -> Result<(Vec<Instance>, Vec<String>)> {
        let mut values = Vec::with_capacity(prepared.len());
        let mut autowired = Vec::new();

        for (index, (param, slot)) in callable.params().iter().zip(prepared).enumerate() {
            let value = match slot {
                PreparedArgument::Value(value) => value.clone(),
                PreparedArgument::Declared(source) => {
                    let resolved = self.resolve_value(source, ctx)?;
                    self.convert(&resolved, param)?
                }
                PreparedArgument::Autowired(fallback) => {
                    let (instance, names) = self.autowire_param(callable, index, param, *fallback, ctx)?;
                    autowired.extend(names);
                    instance
                }
            };
            values.push(value);
        }
        Ok((values, autowired))
    }

    fn find_declared<'d>(
        &self,
        declared: &'d ResolvedArguments,
        index: usize,
        param: &ParamSpec,
        used: &mut Used,
    ) -> Option<&'d ResolvedArgument> {
        if let Some(argument) = declared.indexed.get(&index) {
            if !used.indexed.contains(&index) && argument.hints_match(param) {
                used.indexed.insert(index);
                return Some(argument);
            }
        }

        let position = declared.generic.iter().enumerate().position(|(i, argument)| {
            !used.generic.contains(&i)
                && argument.hints_match(param)
                && (!argument.is_untyped() || self.value_fits(&argument.value, param))
        })?;
        used.generic.insert(position);
        declared.generic.get(position)
    }

    /// The one untyped value nothing consumed yet. `None` if there are
    /// several, since any choice among them would be a guess.
    fn take_untyped<'d>(declared: &'d ResolvedArguments, used: &mut Used) -> Option<&'d ResolvedArgument> {
        let mut unused = declared
            .generic
            .iter()
            .enumerate()
            .filter(|(i, argument)| !used.generic.contains(i) && argument.is_untyped());
        let (position, argument) = unused.next()?;
        if unused.next().is_some() {
            return None;
        }
        used.generic.insert(position);
        Some(argument)
    }

    /// An untyped value fits a parameter it is assignable or convertible to.
    fn value_fits(&self, value: &ResolvedValue, param: &ParamSpec) -> bool {
        let conversion = self.factory.conversion();
        let catalog = self.factory.catalog();
        match value {
            ResolvedValue::Single(instance) => {
                conversion.can_convert(catalog, &instance.key(), &param.ty())
                    || param
                        .element_type()
                        .is_some_and(|element| conversion.can_convert(catalog, &instance.key(), &element))
            }
            ResolvedValue::List(items) => param.element_type().is_some_and(|element| {
                items
                    .iter()
                    .all(|item| conversion.can_convert(catalog, &item.key(), &element))
            }),
        }
    }

    fn autowire_param(
        &self,
        callable: &Callable,
        index: usize,
        param: &ParamSpec,
        single_candidate: bool,
        ctx: &mut BuildContext,
    ) -> Result<(Instance, Vec<String>)> {
        if let Some(element) = param.element_type() {
            let names = self.factory.autowire_candidates(&element, self.definition.name());
            if names.is_empty() {
                if single_candidate {
                    trace!(object = %self.definition.name(), parameter = %param.name(), "Using empty collection");
                    return Ok((self.collect(param, &[])?, Vec::new()));
                }
                return Err(self.unsatisfied(
                    callable,
                    index,
                    param,
                    format!("no objects of type {} are available", element.short_name()),
                ));
            }

            let mut items = Vec::with_capacity(names.len());
            for candidate in &names {
                let instance = self.factory.get_in(&candidate.name, None, ctx)?;
                items.push(self.factory.conversion().convert(self.factory.catalog(), &instance, &element)?);
            }
            let names = names.into_iter().map(|c| c.name).collect();
            return Ok((self.collect(param, &items)?, names));
        }

        let name = self
            .autowire_target(&param.ty(), param.name())
            .and_then(|found| {
                found.ok_or_else(|| format!("no object of type {} is available", param.ty().short_name()))
            })
            .map_err(|reason| self.unsatisfied(callable, index, param, reason))?;
        let instance = self.factory.get_in(&name, None, ctx)?;
        let converted = self
            .factory
            .conversion()
            .convert(self.factory.catalog(), &instance, &param.ty())?;
        trace!(object = %self.definition.name(), parameter = %param.name(), candidate = %name, "Autowired");
        Ok((converted, vec![name]))
    }

    /// Picks the object to autowire into a slot of type `ty` named
    /// `slot_name`: the only candidate, else the primary one, else the one
    /// named like the slot. `Ok(None)` when nothing matches the type; `Err`
    /// with a reason when several do and none can be preferred.
    pub fn autowire_target(&self, ty: &TypeKey, slot_name: &str) -> std::result::Result<Option<String>, String> {
        let candidates = self.factory.autowire_candidates(ty, self.definition.name());
        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.name.clone())),
            _ => {
                let primaries: Vec<&AutowireCandidate> = candidates.iter().filter(|c| c.primary).collect();
                if let [primary] = primaries.as_slice() {
                    return Ok(Some(primary.name.clone()));
                }
                if let Some(named) = candidates.iter().find(|c| c.name == slot_name) {
                    return Ok(Some(named.name.clone()));
                }
                let names: Vec<String> = candidates.iter().map(|c| c.name.clone()).collect();
                Err(format!(
                    "{} objects of type {} match: {}. Mark one as primary or name the parameter after one",
                    names.len(),
                    ty.short_name(),
                    render_name_list(&names)
                ))
            }
        }
    }

    fn unsatisfied(&self, callable: &Callable, index: usize, param: &ParamSpec, reason: String) -> FactoryError {
        FactoryError::UnsatisfiedDependency(UnsatisfiedDependencyError {
            object: self.definition.name().to_string(),
            callable: callable.signature(),
            index,
            parameter: param.name().to_string(),
            ty: param.ty(),
            reason,
        })
    }
}

/// An object that may be autowired into a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AutowireCandidate {
    pub name: String,
    pub primary: bool,
}

#[derive(Default)]
struct Used {
    indexed: HashSet<usize>,
    generic: HashSet<usize>,
}

impl fmt::Debug for ArgumentResolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentResolver")
            .field("object", &self.definition.name())
            .finish()
    }
}
