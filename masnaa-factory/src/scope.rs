//! Object lifetime scopes.
//!
//! Scopes determine how long a built object lives:
//! - [`Scope::Singleton`] — one instance per factory, cached in the singleton tiers
//! - [`Scope::PerRequest`] — a new instance for every request
//! - [`Scope::Named`] — delegated to a registered [`ScopeProvider`]
//!   (request, session, thread, ...)

use std::collections::HashMap;
use std::fmt;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;
use crate::instance::Instance;

/// Defines the lifetime of an object built by the factory.
///
/// # Examples
/// ```
/// use masnaa_factory::scope::Scope;
///
/// assert!(Scope::Singleton.is_singleton());
/// assert!(!Scope::PerRequest.is_cached());
/// assert_eq!(Scope::named("session").to_string(), "session");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// One shared instance, created on first request (or eagerly by
    /// `preinstantiate_singletons`) and kept for the life of the factory.
    #[default]
    Singleton,

    /// A new instance on every request. Never cached.
    PerRequest,

    /// Lifetime managed by the [`ScopeProvider`] registered under this name.
    Named(String),
}

impl Scope {
    pub fn named(name: impl Into<String>) -> Self {
        Scope::Named(name.into())
    }

    /// Returns `true` if the factory itself keeps the instance.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    #[inline]
    pub fn is_per_request(&self) -> bool {
        matches!(self, Scope::PerRequest)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::PerRequest => write!(f, "per-request"),
            Scope::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Callback run when a scoped object's scope ends.
pub type DestructionCallback = Box<dyn FnOnce() + Send + Sync>;

/// Backing store for a [`Scope::Named`] scope.
///
/// The factory never caches named-scope objects itself; it hands the
/// provider a callback that builds the object and lets the provider decide
/// whether to reuse a stored one.
pub trait ScopeProvider: Send + Sync {
    /// Returns the object stored under `name`, building it with `factory`
    /// if the scope does not hold one yet.
    fn get(&self, name: &str, factory: &mut dyn FnMut() -> Result<Instance>) -> Result<Instance>;

    /// Removes and returns the object stored under `name`.
    fn remove(&self, name: &str) -> Option<Instance>;

    /// Registers a callback to run when the object named `name` is destroyed
    /// with its scope.
    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback);
}

/// A map-backed scope whose lifetime is controlled by the caller.
///
/// Objects live until [`SimpleScope::close`] runs their destruction
/// callbacks and drops them. Useful for request or unit-of-work scopes.
#[derive(Default)]
pub struct SimpleScope {
    objects: DashMap<String, Instance>,
    callbacks: Mutex<HashMap<String, Vec<DestructionCallback>>>,
}

impl SimpleScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently held.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Ends the scope: runs every destruction callback and drops all objects.
    pub fn close(&self) {
        let callbacks: Vec<(String, Vec<DestructionCallback>)> =
            self.callbacks.lock().drain().collect();

        debug!(objects = self.objects.len(), callbacks = callbacks.len(), "Closing scope");
        for (name, pending) in callbacks {
            trace!(name = %name, "Running destruction callbacks");
            for callback in pending {
                callback();
            }
        }
        self.objects.clear();
    }
}

impl ScopeProvider for SimpleScope {
    fn get(&self, name: &str, factory: &mut dyn FnMut() -> Result<Instance>) -> Result<Instance> {
        if let Some(existing) = self.objects.get(name) {
            return Ok(existing.clone());
        }

        // The shard lock must not be held while building: the factory may
        // request other objects of this scope.
        let created = factory()?;
        let stored = self.objects.entry(name.to_string()).or_insert(created).clone();
        Ok(stored)
    }

    fn remove(&self, name: &str) -> Option<Instance> {
        self.callbacks.lock().remove(name);
        self.objects.remove(name).map(|(_, instance)| instance)
    }

    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) {
        self.callbacks
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(callback);
    }
}

impl fmt::Debug for SimpleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleScope")
            .field("objects", &self.objects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scope_flags() {
        assert!(Scope::Singleton.is_cached());
        assert!(!Scope::PerRequest.is_cached());
        assert!(!Scope::named("session").is_cached());
        assert!(Scope::PerRequest.is_per_request());
        assert_eq!(Scope::default(), Scope::Singleton);
    }

    #[test]
    fn scope_display() {
        assert_eq!(format!("{}", Scope::Singleton), "singleton");
        assert_eq!(format!("{}", Scope::PerRequest), "per-request");
        assert_eq!(format!("{}", Scope::named("thread")), "thread");
    }

    #[test]
    fn simple_scope_reuses_objects() {
        let scope = SimpleScope::new();
        let builds = AtomicUsize::new(0);
        let mut factory = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok::<_, crate::error::FactoryError>(Instance::new(String::from("conn")))
        };

        let a = scope.get("conn", &mut factory).unwrap();
        let b = scope.get("conn", &mut factory).unwrap();

        assert!(a.same_object(&b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn simple_scope_remove_and_close() {
        let scope = SimpleScope::new();
        let destroyed = Arc::new(AtomicUsize::new(0));

        for name in ["a", "b"] {
            scope
                .get(name, &mut || Ok::<_, crate::error::FactoryError>(Instance::new(1u8)))
                .unwrap();
            let destroyed = destroyed.clone();
            scope.register_destruction_callback(
                name,
                Box::new(move || {
                    destroyed.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        assert!(scope.remove("a").is_some());
        assert!(scope.remove("a").is_none());

        scope.close();
        assert!(scope.is_empty());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
