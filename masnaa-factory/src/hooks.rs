//! Extension hooks.
//!
//! Two kinds of collaborators can take part in building objects:
//! - [`DefinitionHook`]s see every merged definition once, right after it is
//!   computed, and may rewrite it.
//! - [`InstanceHook`]s see every instance before and after its
//!   initialisation and may replace it (e.g. with a proxy). One of them can
//!   also supply the early reference published for circular references.

use crate::definition::ObjectDefinition;
use crate::error::Result;
use crate::instance::Instance;

/// Rewrites merged definitions before they are cached.
pub trait DefinitionHook: Send + Sync {
    fn process_definition(&self, name: &str, definition: &mut ObjectDefinition) -> Result<()>;
}

/// Observes or replaces instances around initialisation.
///
/// Returning `Ok(None)` from a phase keeps the current instance and skips
/// the remaining hooks of that phase.
pub trait InstanceHook: Send + Sync {
    fn before_initialization(&self, instance: Instance, _name: &str) -> Result<Option<Instance>> {
        Ok(Some(instance))
    }

    fn after_initialization(&self, instance: Instance, _name: &str) -> Result<Option<Instance>> {
        Ok(Some(instance))
    }

    /// Object to hand out while `name` is still being built.
    ///
    /// Hooks that wrap instances in `after_initialization` should return
    /// the same wrapper here, so dependents see the final object.
    fn early_reference(&self, instance: Instance, _name: &str) -> Result<Instance> {
        Ok(instance)
    }
}

/// Runs one hook phase over `instance`.
pub(crate) fn apply_phase<F>(hooks: &[std::sync::Arc<dyn InstanceHook>], instance: Instance, mut phase: F) -> Result<Instance>
where
    F: FnMut(&dyn InstanceHook, Instance) -> Result<Option<Instance>>,
{
    let mut current = instance;
    for hook in hooks {
        match phase(hook.as_ref(), current.clone())? {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Wrap;

    impl InstanceHook for Wrap {
        fn after_initialization(&self, instance: Instance, _name: &str) -> Result<Option<Instance>> {
            let inner = instance.downcast_ref::<u32>().copied().unwrap_or_default();
            Ok(Some(Instance::new(inner + 1)))
        }
    }

    struct Stop;

    impl InstanceHook for Stop {
        fn after_initialization(&self, _instance: Instance, _name: &str) -> Result<Option<Instance>> {
            Ok(None)
        }
    }

    #[test]
    fn phases_chain_and_stop_on_none() {
        let hooks: Vec<Arc<dyn InstanceHook>> = vec![Arc::new(Wrap), Arc::new(Stop), Arc::new(Wrap)];
        let out = apply_phase(&hooks, Instance::new(1u32), |hook, i| hook.after_initialization(i, "n")).unwrap();
        assert_eq!(out.downcast_ref::<u32>(), Some(&2));
    }

    #[test]
    fn default_phases_are_identity() {
        let hooks: Vec<Arc<dyn InstanceHook>> = vec![Arc::new(Stop)];
        let input = Instance::new(5u32);
        let out = apply_phase(&hooks, input.clone(), |hook, i| hook.before_initialization(i, "n")).unwrap();
        assert!(out.same_object(&input));
    }
}
