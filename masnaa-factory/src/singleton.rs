//! Singleton cache tiers.
//!
//! Three tiers hold a singleton name at different stages:
//! 1. fully initialized instances
//! 2. early references handed out while the object is still being built
//! 3. early-reference factories registered right after construction and
//!    not yet invoked
//!
//! A name lives in at most one tier. All tiers sit behind one re-entrant
//! lock which is held for the whole creation of a singleton, so nested
//! singleton requests on the building thread proceed while other threads
//! wait for the finished object.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use crate::error::{AlreadyRegisteredError, FactoryError, Result};
use crate::instance::{Instance, Reference};

/// Produces the early reference for an object under construction.
pub(crate) type EarlyFactory = Box<dyn FnOnce() -> Result<Instance> + Send>;

#[derive(Default)]
struct Tiers {
    singletons: HashMap<String, Instance>,
    early: HashMap<String, Instance>,
    factories: HashMap<String, EarlyFactory>,
    in_creation: HashSet<String>,
    order: Vec<String>,
}

#[derive(Default)]
pub(crate) struct SingletonRegistry {
    tiers: ReentrantMutex<RefCell<Tiers>>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks `name` up in the tiers.
    ///
    /// With `allow_early`, a name still under construction yields its early
    /// reference, invoking (and retiring) its tier-3 factory if needed.
    pub fn get(&self, name: &str, allow_early: bool) -> Result<Option<Reference>> {
        let guard = self.tiers.lock();
        {
            let tiers = guard.borrow();
            if let Some(instance) = tiers.singletons.get(name) {
                return Ok(Some(Reference::Final(instance.clone())));
            }
            if !tiers.in_creation.contains(name) {
                return Ok(None);
            }
            if let Some(early) = tiers.early.get(name) {
                return Ok(Some(Reference::Early(early.clone())));
            }
            if !allow_early {
                return Ok(None);
            }
        }

        let Some(factory) = guard.borrow_mut().factories.remove(name) else {
            return Ok(None);
        };

        // The factory may run instance hooks that call back into the
        // factory, so no borrow is held while it runs.
        let early = factory()?;
        trace!(name = %name, "Promoted early reference");
        guard.borrow_mut().early.insert(name.to_string(), early.clone());
        Ok(Some(Reference::Early(early)))
    }

    /// Returns the singleton, creating it with `create` under the tier lock
    /// if it does not exist yet.
    ///
    /// # Errors
    /// `CircularDependency` when `name` is already being created on this
    /// thread (a constructor-level cycle); otherwise whatever `create`
    /// returns. On failure the caller is responsible for cleanup.
    pub fn get_or_create<F>(&self, name: &str, chain: impl FnOnce() -> Vec<String>, create: F) -> Result<Instance>
    where
        F: FnOnce() -> Result<Instance>,
    {
        let guard = self.tiers.lock();
        {
            let mut tiers = guard.borrow_mut();
            if let Some(instance) = tiers.singletons.get(name) {
                return Ok(instance.clone());
            }
            if !tiers.in_creation.insert(name.to_string()) {
                return Err(FactoryError::circular(chain(), crate::error::CircularReason::InCreation));
            }
        }

        debug!(name = %name, "Creating singleton");
        let created = create();
        guard.borrow_mut().in_creation.remove(name);

        let instance = created?;
        self.add(name, instance.clone());
        Ok(instance)
    }

    /// Registers the tier-3 factory for a freshly constructed singleton.
    pub fn add_early_factory(&self, name: &str, factory: EarlyFactory) {
        let guard = self.tiers.lock();
        let mut tiers = guard.borrow_mut();
        if !tiers.singletons.contains_key(name) {
            tiers.factories.insert(name.to_string(), factory);
            tiers.early.remove(name);
        }
    }

    /// The early reference handed out for `name`, if any was.
    pub fn early_reference(&self, name: &str) -> Option<Instance> {
        let guard = self.tiers.lock();
        let tiers = guard.borrow();
        tiers.early.get(name).cloned()
    }

    /// Stores a finished singleton, retiring the lower tiers.
    pub fn add(&self, name: &str, instance: Instance) {
        let guard = self.tiers.lock();
        let mut tiers = guard.borrow_mut();
        tiers.factories.remove(name);
        tiers.early.remove(name);
        if tiers.singletons.insert(name.to_string(), instance).is_none() {
            tiers.order.push(name.to_string());
        }
    }

    /// Registers a pre-built singleton.
    pub fn register(&self, name: &str, instance: Instance) -> Result<()> {
        let guard = self.tiers.lock();
        if guard.borrow().singletons.contains_key(name) {
            return Err(FactoryError::AlreadyRegistered(AlreadyRegisteredError { name: name.to_string() }));
        }
        self.add(name, instance);
        Ok(())
    }

    /// Drops `name` from every tier.
    pub fn remove(&self, name: &str) -> Option<Instance> {
        let guard = self.tiers.lock();
        let mut tiers = guard.borrow_mut();
        tiers.factories.remove(name);
        tiers.early.remove(name);
        tiers.order.retain(|n| n != name);
        tiers.singletons.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tiers.lock().borrow().singletons.contains_key(name)
    }

    pub fn is_in_creation(&self, name: &str) -> bool {
        self.tiers.lock().borrow().in_creation.contains(name)
    }

    /// Names of finished singletons in completion order.
    pub fn names(&self) -> Vec<String> {
        self.tiers.lock().borrow().order.clone()
    }

    pub fn len(&self) -> usize {
        self.tiers.lock().borrow().singletons.len()
    }
}

impl fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.tiers.lock();
        let tiers = guard.borrow();
        f.debug_struct("SingletonRegistry")
            .field("singletons", &tiers.singletons.len())
            .field("early", &tiers.early.len())
            .field("factories", &tiers.factories.len())
            .field("in_creation", &tiers.in_creation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn created_once_and_cached() {
        let registry = SingletonRegistry::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            registry
                .get_or_create("db", Vec::new, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Instance::new(7u32))
                })
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(registry.get("db", false).unwrap(), Some(Reference::Final(_))));
    }

    #[test]
    fn reentrant_creation_is_circular() {
        let registry = SingletonRegistry::new();
        let result = registry.get_or_create("a", Vec::new, || {
            registry.get_or_create("a", || vec!["a".into(), "a".into()], || Ok(Instance::new(1u8)))
        });

        match result {
            Err(FactoryError::CircularDependency(err)) => assert_eq!(err.chain, vec!["a", "a"]),
            other => panic!("Expected CircularDependency, got: {other:?}"),
        }
        assert!(!registry.is_in_creation("a"));
    }

    #[test]
    fn early_factory_promotes_to_tier_two_once() {
        let registry = SingletonRegistry::new();
        let invoked = Arc::new(AtomicUsize::new(0));

        registry
            .get_or_create("a", Vec::new, || {
                let raw = Instance::new(String::from("raw"));
                let early = raw.clone();
                let counter = invoked.clone();
                registry.add_early_factory(
                    "a",
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(early)
                    }),
                );

                assert!(registry.get("a", false).unwrap().is_none());
                let first = registry.get("a", true).unwrap().unwrap();
                let second = registry.get("a", true).unwrap().unwrap();
                assert!(first.is_early());
                assert!(first.instance().same_object(second.instance()));
                assert!(registry.early_reference("a").is_some());
                Ok(raw)
            })
            .unwrap();

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert!(registry.early_reference("a").is_none());
        assert!(registry.contains("a"));
    }

    #[test]
    fn failed_creation_leaves_no_entry() {
        let registry = SingletonRegistry::new();
        let result = registry.get_or_create("broken", Vec::new, || {
            Err(FactoryError::invalid("broken", "boom"))
        });

        assert!(result.is_err());
        assert!(!registry.contains("broken"));
        assert!(!registry.is_in_creation("broken"));
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = SingletonRegistry::new();
        registry.register("cfg", Instance::new(1i32)).unwrap();
        assert!(matches!(
            registry.register("cfg", Instance::new(2i32)),
            Err(FactoryError::AlreadyRegistered(_))
        ));
        assert_eq!(registry.names(), vec!["cfg".to_string()]);
        assert!(registry.remove("cfg").is_some());
        assert_eq!(registry.len(), 0);
    }
}
