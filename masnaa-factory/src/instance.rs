//! Type-erased object handles.
//!
//! Everything the factory builds, caches or passes into a callable is an
//! [`Instance`]: a shared `Arc<dyn Any + Send + Sync>` tagged with the
//! [`TypeKey`] it was produced as.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::key::TypeKey;

/// Shared, type-erased object.
pub type AnyObject = Arc<dyn Any + Send + Sync>;

/// A built object together with the type it was produced as.
///
/// Cloning an `Instance` clones the handle, never the object.
#[derive(Clone)]
pub struct Instance {
    key: TypeKey,
    object: AnyObject,
}

impl Instance {
    /// Wraps a freshly built value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an already shared value without re-allocating.
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            object: value,
        }
    }

    /// Type this instance was produced as.
    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// The erased object.
    #[inline]
    pub fn object(&self) -> &AnyObject {
        &self.object
    }

    /// Typed shared handle, `None` if `T` is not the produced type.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.object.clone().downcast::<T>().ok()
    }

    /// Borrowed typed view.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// `true` when both handles point at the same object.
    pub fn same_object(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({} @ {:p})", self.key.short_name(), Arc::as_ptr(&self.object))
    }
}

/// A handle obtained from the singleton tiers.
///
/// `Early` handles point at objects that are still being initialised; they
/// are only handed out to break circular references between singletons.
#[derive(Debug, Clone)]
pub enum Reference {
    Final(Instance),
    Early(Instance),
}

impl Reference {
    pub fn instance(&self) -> &Instance {
        match self {
            Reference::Final(instance) | Reference::Early(instance) => instance,
        }
    }

    pub fn into_instance(self) -> Instance {
        match self {
            Reference::Final(instance) | Reference::Early(instance) => instance,
        }
    }

    pub fn is_early(&self) -> bool {
        matches!(self, Reference::Early(_))
    }
}

/// Failure to read a resolved argument inside a callable.
#[derive(Debug, thiserror::Error)]
pub enum ArgumentAccessError {
    #[error("argument index {index} out of range ({len} arguments)")]
    OutOfRange { index: usize, len: usize },

    #[error("argument {index} is a {actual}, not a {expected}")]
    WrongType {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Resolved arguments handed to a constructor or factory callable.
///
/// Arguments arrive already converted to the declared parameter types,
/// so a well-formed callable only fails here on programming errors.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Instance],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Instance]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw instance at `index`.
    pub fn instance(&self, index: usize) -> Result<&'a Instance, ArgumentAccessError> {
        self.values.get(index).ok_or(ArgumentAccessError::OutOfRange {
            index,
            len: self.values.len(),
        })
    }

    /// Shared handle to the argument at `index`.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, ArgumentAccessError> {
        let instance = self.instance(index)?;
        instance.downcast::<T>().ok_or(ArgumentAccessError::WrongType {
            index,
            expected: std::any::type_name::<T>(),
            actual: instance.key().type_name(),
        })
    }

    /// Cloned value of the argument at `index`.
    pub fn value<T: Clone + Send + Sync + 'static>(&self, index: usize) -> Result<T, ArgumentAccessError> {
        self.get::<T>(index).map(|value| T::clone(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_to_produced_type() {
        let instance = Instance::new(42i32);
        assert_eq!(instance.key(), TypeKey::of::<i32>());
        assert_eq!(instance.downcast::<i32>().as_deref(), Some(&42));
        assert!(instance.downcast::<u32>().is_none());
    }

    #[test]
    fn clones_share_object() {
        let a = Instance::new(String::from("x"));
        let b = a.clone();
        let c = Instance::new(String::from("x"));
        assert!(a.same_object(&b));
        assert!(!a.same_object(&c));
    }

    #[test]
    fn reference_variants() {
        let early = Reference::Early(Instance::new(1u8));
        assert!(early.is_early());
        assert!(!Reference::Final(early.instance().clone()).is_early());
    }

    #[test]
    fn args_access() {
        let values = vec![Instance::new(7i64), Instance::new(String::from("name"))];
        let args = Args::new(&values);

        assert_eq!(args.len(), 2);
        assert_eq!(args.value::<i64>(0).unwrap(), 7);
        assert_eq!(args.value::<String>(1).unwrap(), "name");

        match args.get::<i64>(1) {
            Err(ArgumentAccessError::WrongType { index, .. }) => assert_eq!(index, 1),
            other => panic!("Expected WrongType, got: {other:?}"),
        }
        assert!(matches!(args.get::<i64>(5), Err(ArgumentAccessError::OutOfRange { .. })));
    }
}
