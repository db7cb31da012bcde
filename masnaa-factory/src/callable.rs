//! Callable selection.
//!
//! Picks the constructor or factory method to invoke among a type's
//! overloads. Candidates are tried greedily (most parameters first, public
//! before restricted); each one that accepts the declared arguments is
//! scored by how far its argument types are from its parameter types and
//! the lowest score wins.
//!
//! Two scoring modes exist:
//! - lenient: the better of the converted-argument weight and the
//!   raw-argument weight minus [`RAW_MATCH_BIAS`]; ties go to the first
//!   candidate in sort order
//! - strict: a three-step scale (converted args not assignable, raw args
//!   not assignable, both assignable); ties between different signatures
//!   of the same arity are ambiguous

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::arguments::{ArgumentHolder, ArgumentResolver, CachedArguments};
use crate::catalog::{Callable, CallableKind, CallableTarget, ParamSpec};
use crate::context::BuildContext;
use crate::definition::AutowireMode;
use crate::error::{AmbiguousCallableError, FactoryError, NoMatchingCallableError, Result};
use crate::factory::ObjectFactory;
use crate::instance::Instance;
use crate::registry::ResolvedDefinition;

/// Score of a candidate whose arguments do not fit at all.
pub const UNASSIGNABLE: i64 = i32::MAX as i64;
/// Lenient mode prefers candidates whose raw arguments already fit.
pub const RAW_MATCH_BIAS: i64 = 1024;
/// Strict mode penalty when only the converted arguments fit.
pub const CONVERTED_ONLY_PENALTY: i64 = 512;

/// A selected callable memoized on its resolved definition.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedCallable {
    pub callable: Arc<Callable>,
    pub arguments: CachedArguments,
}

/// Selects and invokes the callable that builds one definition.
pub(crate) struct CallableResolver<'a> {
    factory: &'a ObjectFactory,
    definition: &'a ResolvedDefinition,
    arguments: ArgumentResolver<'a>,
}

impl<'a> CallableResolver<'a> {
    pub fn new(factory: &'a ObjectFactory, definition: &'a ResolvedDefinition) -> Self {
        Self {
            factory,
            definition,
            arguments: ArgumentResolver::new(factory, definition),
        }
    }

    /// Builds the raw object.
    ///
    /// Without explicit arguments a memoized selection is reused; with them,
    /// only candidates taking exactly that many parameters are considered
    /// and nothing is memoized.
    pub fn instantiate(&self, explicit: Option<&[Instance]>, ctx: &mut BuildContext) -> Result<Instance> {
        let target = self.factory_target(ctx)?;

        if explicit.is_none() {
            if let Some(memo) = self.definition.resolution() {
                return self.invoke_memoized(&memo, target.as_ref(), ctx);
            }
        }

        let candidates = self.candidates(target.as_ref())?;
        let (callable, holder) = self.select(candidates, explicit, ctx)?;

        if explicit.is_none() {
            self.definition.memoize(ResolvedCallable {
                callable: callable.clone(),
                arguments: holder.cached(),
            });
        }
        for name in &holder.autowired {
            self.factory.register_dependent(name, self.definition.name());
        }

        self.invoke(&callable, target.as_ref(), &holder.converted)
    }

    fn factory_target(&self, ctx: &mut BuildContext) -> Result<Option<Instance>> {
        let Some(object) = &self.definition.definition().factory_object else {
            return Ok(None);
        };
        if object == self.definition.name() {
            return Err(FactoryError::invalid(
                self.definition.name(),
                "factory object reference points back to the same definition",
            ));
        }

        let target = self.factory.get_in(object, None, ctx)?;
        self.factory.register_dependent(object, self.definition.name());
        Ok(Some(target))
    }

    /// Candidate callables for the definition, unsorted.
    fn candidates(&self, target: Option<&Instance>) -> Result<Vec<Arc<Callable>>> {
        let definition = self.definition.definition();
        let name = self.definition.name();

        let declared_type = || {
            self.definition
                .type_key()
                .ok_or_else(|| FactoryError::invalid(name, "no type to build"))
        };

        let (key, lookup, kind) = match (target, definition.factory_method.as_deref()) {
            (Some(object), Some(method)) => (object.key(), CallableTarget::FactoryMethod(method), CallableKind::InstanceFactory),
            (None, Some(method)) => (declared_type()?, CallableTarget::FactoryMethod(method), CallableKind::StaticFactory),
            (None, None) => (declared_type()?, CallableTarget::Constructors, CallableKind::Constructor),
            (Some(_), None) => return Err(FactoryError::invalid(name, "factory object without factory method")),
        };

        let catalog = self.factory.catalog();
        if catalog.describe(&key).is_none() {
            return Err(FactoryError::invalid(
                name,
                format!("type {key} is not described in the callable catalog"),
            ));
        }

        let allow_restricted = self.definition.allows_restricted_access();
        Ok(catalog
            .candidates_for(&key, lookup)
            .into_iter()
            .filter(|c| c.kind() == kind)
            .filter(|c| allow_restricted || c.is_public())
            .collect())
    }

    #[instrument(level = "debug", skip_all, fields(object = %self.definition.name(), candidates = candidates.len()))]
    fn select(
        &self,
        mut candidates: Vec<Arc<Callable>>,
        explicit: Option<&[Instance]>,
        ctx: &mut BuildContext,
    ) -> Result<(Arc<Callable>, ArgumentHolder)> {
        candidates.sort_by(|a, b| {
            b.param_count()
                .cmp(&a.param_count())
                .then(a.visibility().cmp(&b.visibility()))
        });

        let lenient = self.definition.is_lenient();
        let autowire = self.definition.autowire() == AutowireMode::Constructor;
        let single_candidate = candidates.len() == 1;

        let declared = match explicit {
            Some(_) => None,
            None => Some(self.arguments.resolve_declared(ctx)?),
        };
        let min_args = match explicit {
            Some(values) => values.len(),
            None => self.definition.definition().constructor_args.min_arg_count(),
        };

        let mut chosen: Option<(Arc<Callable>, ArgumentHolder)> = None;
        let mut min_weight = UNASSIGNABLE;
        let mut ambiguous: Vec<Arc<Callable>> = Vec::new();
        let mut failures: Vec<FactoryError> = Vec::new();

        for candidate in &candidates {
            let count = candidate.param_count();

            if let Some((_, holder)) = &chosen {
                if holder.converted.len() > count {
                    trace!(callable = %candidate.signature(), "Stopping: greedier candidate already chosen");
                    break;
                }
            }
            if count < min_args {
                continue;
            }

            let built = match (explicit, &declared) {
                (Some(values), _) if count != values.len() => continue,
                (Some(values), _) => self.explicit_holder(candidate, values),
                (None, Some(declared)) => {
                    self.arguments
                        .build_arguments(candidate, declared, autowire, single_candidate, ctx)
                }
                (None, None) => continue,
            };
            let holder = match built {
                Ok(holder) => holder,
                Err(err) => {
                    trace!(callable = %candidate.signature(), error = %err, "Candidate rejected");
                    failures.push(err);
                    continue;
                }
            };

            let weight = if lenient {
                self.lenient_weight(candidate.params(), &holder)
            } else {
                self.strict_weight(candidate.params(), &holder)
            };
            trace!(callable = %candidate.signature(), weight, "Candidate accepted");

            if weight < min_weight {
                chosen = Some((candidate.clone(), holder));
                min_weight = weight;
                ambiguous.clear();
            } else if let Some((best, _)) = &chosen {
                if weight == min_weight
                    && !lenient
                    && best.param_count() == count
                    && !best.same_parameter_types(candidate)
                {
                    if ambiguous.is_empty() {
                        ambiguous.push(best.clone());
                    }
                    ambiguous.push(candidate.clone());
                }
            }
        }

        let Some((callable, holder)) = chosen else {
            if let Some(last) = failures.pop() {
                for earlier in failures {
                    ctx.suppress(earlier);
                }
                return Err(last);
            }
            return Err(FactoryError::NoMatchingCallable(NoMatchingCallableError {
                object: self.definition.name().to_string(),
                candidates: candidates.iter().map(|c| c.signature()).collect(),
                min_args,
                explicit_args: explicit.map(<[Instance]>::len),
            }));
        };

        if !ambiguous.is_empty() {
            return Err(FactoryError::AmbiguousCallable(AmbiguousCallableError {
                object: self.definition.name().to_string(),
                candidates: ambiguous.iter().map(|c| c.signature()).collect(),
            }));
        }

        debug!(callable = %callable.signature(), weight = min_weight, "Selected callable");
        Ok((callable, holder))
    }

    fn explicit_holder(&self, callable: &Callable, values: &[Instance]) -> Result<ArgumentHolder> {
        let conversion = self.factory.conversion();
        let catalog = self.factory.catalog();
        let converted = callable
            .params()
            .iter()
            .zip(values)
            .map(|(param, value)| conversion.convert(catalog, value, &param.ty()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ArgumentHolder {
            raw: values.to_vec(),
            converted,
            ..ArgumentHolder::default()
        })
    }

    /// Sum of per-parameter assignability, or [`UNASSIGNABLE`].
    fn type_difference(&self, params: &[ParamSpec], args: &[Instance]) -> i64 {
        let conversion = self.factory.conversion();
        let catalog = self.factory.catalog();
        let mut total = 0i64;
        for (param, arg) in params.iter().zip(args) {
            match conversion.assignability(catalog, &param.ty(), &arg.key()) {
                Some(weight) => total += i64::from(weight),
                None => return UNASSIGNABLE,
            }
        }
        total
    }

    fn lenient_weight(&self, params: &[ParamSpec], holder: &ArgumentHolder) -> i64 {
        let converted = self.type_difference(params, &holder.converted);
        let raw = self.type_difference(params, &holder.raw) - RAW_MATCH_BIAS;
        converted.min(raw)
    }

    fn strict_weight(&self, params: &[ParamSpec], holder: &ArgumentHolder) -> i64 {
        if self.type_difference(params, &holder.converted) == UNASSIGNABLE {
            UNASSIGNABLE
        } else if self.type_difference(params, &holder.raw) == UNASSIGNABLE {
            UNASSIGNABLE - CONVERTED_ONLY_PENALTY
        } else {
            UNASSIGNABLE - RAW_MATCH_BIAS
        }
    }

    fn invoke_memoized(
        &self,
        memo: &ResolvedCallable,
        target: Option<&Instance>,
        ctx: &mut BuildContext,
    ) -> Result<Instance> {
        trace!(object = %self.definition.name(), callable = %memo.callable.signature(), "Reusing resolved callable");
        let args = match &memo.arguments {
            CachedArguments::Resolved(values) => values.clone(),
            CachedArguments::Prepared(prepared) => {
                let (values, autowired) = self.arguments.resolve_prepared(&memo.callable, prepared, ctx)?;
                for name in &autowired {
                    self.factory.register_dependent(name, self.definition.name());
                }
                values
            }
        };
        self.invoke(&memo.callable, target, &args)
    }

    fn invoke(&self, callable: &Callable, target: Option<&Instance>, args: &[Instance]) -> Result<Instance> {
        trace!(object = %self.definition.name(), callable = %callable.signature(), "Invoking");
        callable
            .invoke(target, args)
            .map_err(|source| FactoryError::Invocation {
                callable: format!("{}::{}", callable.produces().short_name(), callable.signature()),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::arguments::PreparedArgument;
    use crate::catalog::{CallableCatalog, Catalog, TypeDescriptor};
    use crate::definition::{ArgumentValue, ObjectDefinition};
    use crate::key::TypeKey;
    use crate::scope::Scope;

    fn factory_with(catalog: Catalog, definitions: Vec<ObjectDefinition>) -> ObjectFactory {
        definitions
            .into_iter()
            .fold(ObjectFactory::builder().catalog(catalog), |builder, definition| {
                builder.definition(definition)
            })
            .build()
            .unwrap()
    }

    // ── Fixtures ──

    struct Point {
        x: i64,
        y: i64,
    }

    struct Holder {
        point: Arc<Point>,
    }

    struct Engine;
    struct Wheel;
    struct Spare;

    struct Car {
        engine: Arc<Engine>,
    }

    struct Kit {
        parts: usize,
    }

    struct Token {
        via: &'static str,
    }

    struct Sealed;

    fn point_catalog() -> Catalog {
        let catalog = Catalog::new();
        catalog
            .register(
                TypeDescriptor::builder::<Point>()
                    .constructor("new", vec![ParamSpec::of::<i64>("x")], |args| {
                        Ok(Point { x: args.value(0)?, y: 0 })
                    })
                    .constructor(
                        "with_y",
                        vec![ParamSpec::of::<i64>("x"), ParamSpec::of::<i64>("y")],
                        |args| Ok(Point { x: args.value(0)?, y: args.value(1)? }),
                    )
                    .build(),
            )
            .register(
                TypeDescriptor::builder::<Holder>()
                    .constructor("new", vec![ParamSpec::of::<Point>("point")], |args| {
                        Ok(Holder { point: args.get(0)? })
                    })
                    .build(),
            );
        catalog
    }

    fn workshop_catalog(spares: Arc<AtomicUsize>) -> Catalog {
        let catalog = Catalog::new();
        catalog
            .register(TypeDescriptor::builder::<Engine>().constructor("new", vec![], |_| Ok(Engine)).build())
            .register(TypeDescriptor::builder::<Wheel>().constructor("new", vec![], |_| Ok(Wheel)).build())
            .register(
                TypeDescriptor::builder::<Spare>()
                    .constructor("new", vec![], move |_| {
                        spares.fetch_add(1, Ordering::SeqCst);
                        Ok(Spare)
                    })
                    .build(),
            )
            .register(
                TypeDescriptor::builder::<Car>()
                    .constructor("new", vec![ParamSpec::of::<Engine>("engine")], |args| {
                        Ok(Car { engine: args.get(0)? })
                    })
                    .build(),
            )
            .register(
                TypeDescriptor::builder::<Kit>()
                    .constructor(
                        "full",
                        vec![ParamSpec::of::<Engine>("engine"), ParamSpec::of::<Wheel>("wheel")],
                        |_| Ok(Kit { parts: 2 }),
                    )
                    .constructor("spare", vec![ParamSpec::of::<Spare>("spare")], |_| Ok(Kit { parts: 1 }))
                    .build(),
            );
        catalog
    }

    fn token_catalog() -> Catalog {
        let catalog = Catalog::new();
        catalog
            .register(
                TypeDescriptor::builder::<Token>()
                    .callable(
                        Callable::constructor("hidden", vec![ParamSpec::of::<String>("text")], |_| {
                            Ok(Token { via: "hidden" })
                        })
                        .restricted(),
                    )
                    .constructor("open", vec![ParamSpec::of::<String>("text")], |_| Ok(Token { via: "open" }))
                    .build(),
            )
            .register(
                TypeDescriptor::builder::<Sealed>()
                    .callable(Callable::constructor("new", vec![], |_| Ok(Sealed)).restricted())
                    .build(),
            );
        catalog
    }

    // ── Memoization ──

    #[test]
    fn per_request_builds_reuse_the_selection() {
        let factory = factory_with(
            point_catalog(),
            vec![
                ObjectDefinition::of::<Point>("point")
                    .scope(Scope::PerRequest)
                    .arg(ArgumentValue::literal("1")),
            ],
        );
        assert_eq!(factory.get::<Point>("point").unwrap().x, 1);

        let definition = factory.resolve("point").unwrap();
        let memo = definition.resolution().unwrap();
        assert_eq!(memo.callable.param_count(), 1);
        assert!(matches!(memo.arguments, CachedArguments::Resolved(ref values) if values.len() == 1));

        // A later build invokes whatever was memoized without selecting again.
        let with_y = factory
            .catalog()
            .candidates_for(&TypeKey::of::<Point>(), CallableTarget::Constructors)
            .into_iter()
            .find(|c| c.param_count() == 2)
            .unwrap();
        definition.memoize(ResolvedCallable {
            callable: with_y,
            arguments: CachedArguments::Resolved(vec![Instance::new(7i64), Instance::new(8i64)]),
        });

        let point = factory.get::<Point>("point").unwrap();
        assert_eq!((point.x, point.y), (7, 8));
    }

    #[test]
    fn prepared_references_resolve_on_every_build() {
        let factory = factory_with(
            point_catalog(),
            vec![
                ObjectDefinition::of::<Point>("point")
                    .scope(Scope::PerRequest)
                    .arg(ArgumentValue::literal("1")),
                ObjectDefinition::of::<Holder>("holder")
                    .scope(Scope::PerRequest)
                    .arg(ArgumentValue::reference("point")),
            ],
        );

        let first = factory.get::<Holder>("holder").unwrap();
        let second = factory.get::<Holder>("holder").unwrap();
        assert!(!Arc::ptr_eq(&first.point, &second.point));

        let memo = factory.resolve("holder").unwrap().resolution().unwrap();
        match memo.arguments {
            CachedArguments::Prepared(slots) => match &slots[0] {
                PreparedArgument::Declared(ArgumentValue::Reference(name)) => assert_eq!(name, "point"),
                other => panic!("Expected a declared reference slot, got: {other:?}"),
            },
            other => panic!("Expected prepared arguments, got: {other:?}"),
        }
    }

    #[test]
    fn prepared_autowired_slots_resolve_on_every_build() {
        let factory = factory_with(
            workshop_catalog(Arc::new(AtomicUsize::new(0))),
            vec![
                ObjectDefinition::of::<Engine>("engine").scope(Scope::PerRequest),
                ObjectDefinition::of::<Car>("car")
                    .scope(Scope::PerRequest)
                    .autowire(AutowireMode::Constructor),
            ],
        );

        let first = factory.get::<Car>("car").unwrap();
        let second = factory.get::<Car>("car").unwrap();
        assert!(!Arc::ptr_eq(&first.engine, &second.engine));

        let memo = factory.resolve("car").unwrap().resolution().unwrap();
        assert!(matches!(
            memo.arguments,
            CachedArguments::Prepared(ref slots) if matches!(slots.as_slice(), [PreparedArgument::Autowired(true)])
        ));
    }

    #[test]
    fn memo_carries_over_unchanged_recipe() {
        let factory = factory_with(
            point_catalog(),
            vec![
                ObjectDefinition::of::<Point>("point")
                    .scope(Scope::PerRequest)
                    .arg(ArgumentValue::literal("1")),
            ],
        );
        factory.get::<Point>("point").unwrap();
        let before = factory.resolve("point").unwrap();
        let selected = before.resolution().unwrap().callable;

        factory.update_definition("point", |d| d.lazy = Some(true)).unwrap();
        let after = factory.resolve("point").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.resolution().is_some_and(|memo| Arc::ptr_eq(&memo.callable, &selected)));

        factory
            .update_definition("point", |d| {
                *d = ObjectDefinition::of::<Point>("point")
                    .scope(Scope::PerRequest)
                    .arg(ArgumentValue::literal("1"))
                    .arg(ArgumentValue::literal("2"));
            })
            .unwrap();
        assert!(factory.resolve("point").unwrap().resolution().is_none());

        let point = factory.get::<Point>("point").unwrap();
        assert_eq!((point.x, point.y), (1, 2));
    }

    // ── Candidate order ──

    #[test]
    fn greedy_choice_stops_the_scan() {
        let spares = Arc::new(AtomicUsize::new(0));
        let factory = factory_with(
            workshop_catalog(spares.clone()),
            vec![
                ObjectDefinition::of::<Engine>("engine"),
                ObjectDefinition::of::<Wheel>("wheel"),
                ObjectDefinition::of::<Spare>("spare"),
                ObjectDefinition::of::<Kit>("kit").autowire(AutowireMode::Constructor),
            ],
        );

        assert_eq!(factory.get::<Kit>("kit").unwrap().parts, 2);
        assert_eq!(spares.load(Ordering::SeqCst), 0);
        assert!(!factory.dependencies_of("kit").contains(&"spare".to_string()));
    }

    #[test]
    fn public_callables_are_preferred() {
        let factory = factory_with(
            token_catalog(),
            vec![
                ObjectDefinition::of::<Token>("lenient").arg(ArgumentValue::literal("t")),
                ObjectDefinition::of::<Token>("strict").arg(ArgumentValue::literal("t")).lenient(false),
                ObjectDefinition::of::<Token>("public_only")
                    .arg(ArgumentValue::literal("t"))
                    .allow_restricted_access(false),
            ],
        );

        assert_eq!(factory.get::<Token>("lenient").unwrap().via, "open");
        assert_eq!(factory.get::<Token>("strict").unwrap().via, "open");
        assert_eq!(factory.get::<Token>("public_only").unwrap().via, "open");
    }

    #[test]
    fn restricted_callables_are_filtered_when_disallowed() {
        let factory = factory_with(
            token_catalog(),
            vec![
                ObjectDefinition::of::<Sealed>("sealed"),
                ObjectDefinition::of::<Sealed>("closed").allow_restricted_access(false),
            ],
        );

        assert!(factory.get::<Sealed>("sealed").is_ok());

        let err = factory.get_instance("closed").unwrap_err();
        match err.root_cause() {
            FactoryError::NoMatchingCallable(none) => {
                assert_eq!(none.object, "closed");
                assert!(none.candidates.is_empty());
            }
            other => panic!("Expected NoMatchingCallable, got: {other:?}"),
        }
    }
}
