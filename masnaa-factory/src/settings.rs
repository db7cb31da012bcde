//! Factory-wide settings.

use serde::{Deserialize, Serialize};

/// Behaviour switches for an [`ObjectFactory`](crate::factory::ObjectFactory).
///
/// Deserializable so applications can keep them next to their own
/// configuration; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorySettings {
    /// Registering a definition under an existing name replaces it
    /// instead of failing with `AlreadyRegistered`.
    pub allow_definition_override: bool,

    /// Singletons publish an early reference right after construction so
    /// that property-level cycles can complete.
    pub allow_circular_references: bool,

    /// Accept a hook wrapping an object after its raw early reference was
    /// already injected elsewhere. Off by default: the dependents would
    /// hold an object that differs from the published one.
    pub allow_raw_injection_despite_wrapping: bool,

    /// Overload resolution mode for definitions that do not choose one.
    pub default_lenient_resolution: bool,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            allow_definition_override: true,
            allow_circular_references: true,
            allow_raw_injection_despite_wrapping: false,
            default_lenient_resolution: true,
        }
    }
}
