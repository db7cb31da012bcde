//! # Masnaa: an object factory for Rust
//!
//! Declare named objects as definitions (with parent templates, scopes,
//! declared arguments and properties), describe how each type is built in
//! a callable catalog, and let the factory pick constructors, wire
//! dependencies and break property-level cycles.
//!
//! ```rust
//! use masnaa::prelude::*;
//!
//! struct Pool { size: u32 }
//!
//! let catalog = Catalog::new();
//! catalog.register(
//!     TypeDescriptor::builder::<Pool>()
//!         .constructor("new", vec![], |_| Ok(Pool { size: 4 }))
//!         .constructor("with_size", vec![ParamSpec::of::<u32>("size")], |args| {
//!             Ok(Pool { size: args.value(0)? })
//!         })
//!         .build(),
//! );
//!
//! let factory = ObjectFactory::builder()
//!     .catalog(catalog)
//!     .definition(ObjectDefinition::of::<Pool>("pool").arg(ArgumentValue::literal("16")))
//!     .build()
//!     .expect("Failed to build factory");
//!
//! assert_eq!(factory.get::<Pool>("pool").expect("Failed to get pool").size, 16);
//! ```

pub use masnaa_factory::*;
pub use masnaa_support::{logging, rendering};
