//! Core of the masnaa object factory.
//!
//! Named objects are described by [`ObjectDefinition`](definition::ObjectDefinition)s,
//! merged with their parent definitions, and built by an
//! [`ObjectFactory`](factory::ObjectFactory) that picks constructors and
//! factory methods from a [`CallableCatalog`](catalog::CallableCatalog).

mod arguments;
mod callable;
pub mod catalog;
pub mod context;
pub mod conversion;
pub mod definition;
pub mod error;
pub mod factory;
mod graph;
pub mod hooks;
pub mod instance;
pub mod key;
pub mod registry;
pub mod scope;
pub mod settings;
mod singleton;

#[cfg(feature = "async")]
pub mod asynchronous;

pub use error::{FactoryError, Result};
pub use factory::{ObjectFactory, ObjectFactoryBuilder};
pub use inventory;
pub use key::TypeKey;
pub use scope::Scope;

pub mod prelude {
    #[cfg(feature = "async")]
    pub use crate::asynchronous::AsyncObjectSource;
    pub use crate::catalog::{
        Callable, CallableCatalog, CallableKind, Catalog, ParamSpec, TypeDescriptor, TypeRegistration,
    };
    pub use crate::conversion::ConversionService;
    pub use crate::definition::{ArgumentValue, AutowireMode, DeclaredArgument, ObjectDefinition, TypeRef};
    pub use crate::error::{FactoryError, Result};
    pub use crate::factory::{ObjectFactory, ObjectFactoryBuilder};
    pub use crate::hooks::{DefinitionHook, InstanceHook};
    pub use crate::instance::{Args, Instance, Reference};
    pub use crate::key::TypeKey;
    pub use crate::scope::{Scope, ScopeProvider, SimpleScope};
    pub use crate::settings::FactorySettings;
}
