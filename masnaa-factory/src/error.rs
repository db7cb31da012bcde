//! Error types for object factory operations.
//!
//! Every failure names the object involved and, where it helps, what to do
//! about it. Failures raised while building an object are wrapped in a
//! [`BuildFailureError`] so a top-level request reports one chain from the
//! requested object down to the root cause.

use std::fmt;

use masnaa_support::rendering::{render_chain, render_name_list};

use crate::key::TypeKey;

/// Boxed error returned by user callables (constructors, factories, setters).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all factory operations.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// No definition (and no parent factory definition) exists for a name.
    #[error("{}", .0)]
    NoSuchDefinition(NoSuchDefinitionError),

    /// A definition cannot be turned into a buildable recipe.
    #[error("Invalid definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// The resolved definition is an abstract template.
    #[error("Object '{name}' is declared abstract and only serves as a parent definition")]
    AbstractDefinition { name: String },

    /// A definition was registered twice while overriding is disabled.
    #[error("{}", .0)]
    AlreadyRegistered(AlreadyRegisteredError),

    /// A callable parameter could not be satisfied.
    #[error("{}", .0)]
    UnsatisfiedDependency(UnsatisfiedDependencyError),

    /// A declared value could not be converted to the parameter type.
    #[error("{}", .0)]
    TypeConversion(TypeConversionError),

    /// No candidate callable accepted the declared arguments.
    #[error("{}", .0)]
    NoMatchingCallable(NoMatchingCallableError),

    /// Several candidate callables matched equally well under strict resolution.
    #[error("{}", .0)]
    AmbiguousCallable(AmbiguousCallableError),

    /// A circular reference that early references cannot break.
    #[error("{}", .0)]
    CircularDependency(CircularDependencyError),

    /// A built object is not of the type the caller asked for.
    #[error("Object '{name}' is a {actual}, but {expected} was requested")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A constructor, factory, setter or lifecycle method returned an error.
    #[error("{callable} failed: {source}")]
    Invocation { callable: String, source: BoxError },

    /// Building a named object failed; wraps the cause.
    #[error(transparent)]
    BuildFailure(Box<BuildFailureError>),
}

impl FactoryError {
    /// Follows nested build failures down to the error that started them.
    pub fn root_cause(&self) -> &FactoryError {
        let mut current = self;
        while let FactoryError::BuildFailure(failure) = current {
            current = &failure.cause;
        }
        current
    }

    /// Names of the objects whose construction failed, outermost first.
    pub fn build_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        while let FactoryError::BuildFailure(failure) = current {
            path.push(failure.name.as_str());
            current = &failure.cause;
        }
        path
    }

    /// `true` if the root cause is an unresolvable circular reference.
    pub fn is_circular(&self) -> bool {
        matches!(self.root_cause(), FactoryError::CircularDependency(_))
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        FactoryError::InvalidDefinition {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn circular(chain: Vec<String>, reason: CircularReason) -> Self {
        FactoryError::CircularDependency(CircularDependencyError { chain, reason })
    }
}

/// Error when a name is unknown to the factory and its ancestors.
#[derive(Debug)]
pub struct NoSuchDefinitionError {
    /// The name that was requested
    pub name: String,
    /// What required this name (if known)
    pub required_by: Option<String>,
    /// Registered names close to the requested one
    pub suggestions: Vec<String>,
}

impl fmt::Display for NoSuchDefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No object definition named '{}'", self.name)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: '{parent}'")?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of: {}", render_name_list(&self.suggestions))?;
        }

        Ok(())
    }
}

/// Error when a definition name is already taken.
#[derive(Debug)]
pub struct AlreadyRegisteredError {
    pub name: String,
}

impl fmt::Display for AlreadyRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object definition already registered: '{}'", self.name)?;
        write!(
            f,
            "\n  Hint: enable allow_definition_override in FactorySettings to replace definitions"
        )
    }
}

/// Error when a parameter has neither a declared value nor an autowire match.
#[derive(Debug)]
pub struct UnsatisfiedDependencyError {
    /// Object being built
    pub object: String,
    /// Callable whose parameter failed
    pub callable: String,
    /// Parameter position
    pub index: usize,
    /// Parameter name
    pub parameter: String,
    /// Parameter type
    pub ty: TypeKey,
    /// Why it could not be satisfied
    pub reason: String,
}

impl fmt::Display for UnsatisfiedDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unsatisfied dependency of '{}' through parameter {} ('{}': {}) of {}: {}",
            self.object,
            self.index,
            self.parameter,
            self.ty.short_name(),
            self.callable,
            self.reason,
        )
    }
}

/// Error when a declared value cannot become the parameter type.
#[derive(Debug)]
pub struct TypeConversionError {
    /// Rendering of the offending value
    pub value: String,
    /// Target type
    pub target: TypeKey,
    /// Converter message
    pub reason: String,
}

impl fmt::Display for TypeConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot convert {} to {}: {}",
            self.value,
            self.target.short_name(),
            self.reason,
        )
    }
}

impl From<TypeConversionError> for FactoryError {
    fn from(err: TypeConversionError) -> Self {
        FactoryError::TypeConversion(err)
    }
}

/// Error when no candidate callable fits.
#[derive(Debug)]
pub struct NoMatchingCallableError {
    pub object: String,
    /// Signatures that were considered
    pub candidates: Vec<String>,
    /// Minimum argument count implied by the declared values
    pub min_args: usize,
    /// Explicit argument count, when arguments were supplied programmatically
    pub explicit_args: Option<usize>,
}

impl fmt::Display for NoMatchingCallableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No matching constructor or factory method for '{}'", self.object)?;
        match self.explicit_args {
            Some(count) => write!(f, " taking exactly {count} explicit argument(s)")?,
            None if self.min_args > 0 => write!(f, " taking at least {} argument(s)", self.min_args)?,
            None => {}
        }

        if self.candidates.is_empty() {
            write!(f, "\n  No candidates are registered in the callable catalog")
        } else {
            write!(f, "\n  Candidates:")?;
            for candidate in &self.candidates {
                write!(f, "\n    - {candidate}")?;
            }
            Ok(())
        }
    }
}

/// Error when strict resolution cannot pick between candidates.
#[derive(Debug)]
pub struct AmbiguousCallableError {
    pub object: String,
    /// Signatures that tied
    pub candidates: Vec<String>,
}

impl fmt::Display for AmbiguousCallableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ambiguous constructor or factory method for '{}':", self.object)?;
        for candidate in &self.candidates {
            write!(f, "\n    - {candidate}")?;
        }
        write!(
            f,
            "\n  Hint: declare argument types or names, or enable lenient resolution"
        )
    }
}

/// Why a circular reference could not be broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircularReason {
    /// `depends-on` lists form a cycle
    DependsOn,
    /// An object was requested again while it was still being constructed
    InCreation,
    /// An early reference was injected but the final object was wrapped
    WrappedAfterEarlyReference,
}

/// Error when a circular dependency cannot be resolved.
#[derive(Debug)]
pub struct CircularDependencyError {
    /// The chain of names that forms the cycle, e.g. `["a", "b", "a"]`.
    pub chain: Vec<String>,
    pub reason: CircularReason,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Circular dependency detected:\n  {}", render_chain(&self.chain))?;

        let hint = match self.reason {
            CircularReason::DependsOn => "Remove one of the depends-on entries",
            CircularReason::InCreation => {
                "Constructor cycles and per-request cycles cannot be broken; \
                 inject one side through a property instead"
            }
            CircularReason::WrappedAfterEarlyReference => {
                "An early reference was injected before a hook wrapped the object; \
                 expose the wrapper through InstanceHook::early_reference"
            }
        };
        write!(f, "\n  Hint: {hint}")
    }
}

/// Failure while building one named object.
#[derive(Debug)]
pub struct BuildFailureError {
    /// Object being built
    pub name: String,
    /// Where the definition was declared, if known
    pub source_description: Option<String>,
    /// What went wrong
    pub cause: FactoryError,
    /// Errors from candidates that were tried and abandoned before `cause`
    pub suppressed: Vec<FactoryError>,
}

impl fmt::Display for BuildFailureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error creating object '{}'", self.name)?;
        if let Some(ref source) = self.source_description {
            write!(f, " defined in {source}")?;
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for BuildFailureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Convenient Result type for factory operations.
pub type Result<T> = std::result::Result<T, FactoryError>;
