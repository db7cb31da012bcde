//! Type conversion and assignability.
//!
//! Declared values reach callables in two steps: a *raw* form (text
//! literal, referenced object, explicit instance) and a *converted* form of
//! exactly the parameter type. This module decides whether a raw value fits
//! a parameter, how well it fits (the weight used for overload selection),
//! and performs the conversion.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::trace;

use crate::catalog::CallableCatalog;
use crate::error::TypeConversionError;
use crate::instance::Instance;
use crate::key::TypeKey;

/// Parses a text literal into an instance of the target type.
pub type TextConverter = Arc<dyn Fn(&str) -> Result<Instance, String> + Send + Sync>;

type BuiltinConverter = fn(&str) -> Result<Instance, String>;

/// Weight of an exact type match.
pub const EXACT_MATCH: u32 = 0;
/// Weight of a match through an interface upcast.
pub const UPCAST_MATCH: u32 = 1;

macro_rules! integer_converter {
    ($ty:ty) => {
        (TypeKey::of::<$ty>(), (|text: &str| {
            let text = text.trim();
            let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                Some(hex) => <$ty>::from_str_radix(hex, 16),
                None => text.parse::<$ty>(),
            };
            parsed.map(Instance::new).map_err(|e| e.to_string())
        }) as BuiltinConverter)
    };
}

macro_rules! parse_converter {
    ($ty:ty) => {
        (TypeKey::of::<$ty>(), (|text: &str| {
            text.trim().parse::<$ty>().map(Instance::new).map_err(|e| e.to_string())
        }) as BuiltinConverter)
    };
}

static BUILTIN_CONVERTERS: Lazy<HashMap<TypeKey, BuiltinConverter>> = Lazy::new(|| {
    HashMap::from([
        integer_converter!(i8),
        integer_converter!(i16),
        integer_converter!(i32),
        integer_converter!(i64),
        integer_converter!(i128),
        integer_converter!(isize),
        integer_converter!(u8),
        integer_converter!(u16),
        integer_converter!(u32),
        integer_converter!(u64),
        integer_converter!(u128),
        integer_converter!(usize),
        parse_converter!(f32),
        parse_converter!(f64),
        (TypeKey::of::<bool>(), parse_bool as BuiltinConverter),
        (TypeKey::of::<char>(), parse_char as BuiltinConverter),
        (TypeKey::of::<PathBuf>(), (|text: &str| Ok(Instance::new(PathBuf::from(text)))) as BuiltinConverter),
    ])
});

fn parse_bool(text: &str) -> Result<Instance, String> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(Instance::new(true)),
        "false" | "no" | "off" | "0" => Ok(Instance::new(false)),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

fn parse_char(text: &str) -> Result<Instance, String> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Instance::new(c)),
        _ => Err(format!("'{text}' is not a single character")),
    }
}

/// Converts declared values into parameter types.
#[derive(Default)]
pub struct ConversionService {
    custom: DashMap<TypeKey, TextConverter>,
}

impl ConversionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a text converter for `T`, replacing any built-in one.
    pub fn register<T, E, F>(&self, parse: F) -> &Self
    where
        T: Send + Sync + 'static,
        E: fmt::Display,
        F: Fn(&str) -> Result<T, E> + Send + Sync + 'static,
    {
        let converter: TextConverter =
            Arc::new(move |text| parse(text).map(Instance::new).map_err(|e| e.to_string()));
        self.custom.insert(TypeKey::of::<T>(), converter);
        self
    }

    /// `true` if text literals can be converted to `target`.
    pub fn can_convert_text(&self, target: &TypeKey) -> bool {
        *target == TypeKey::of::<String>()
            || self.custom.contains_key(target)
            || BUILTIN_CONVERTERS.contains_key(target)
    }

    /// How well a value of type `value` fits a parameter of type `param`:
    /// `Some(0)` for the same type, `Some(1)` through an upcast, `None` if
    /// it is not assignable at all.
    pub fn assignability(
        &self,
        catalog: &dyn CallableCatalog,
        param: &TypeKey,
        value: &TypeKey,
    ) -> Option<u32> {
        if param == value {
            return Some(EXACT_MATCH);
        }
        catalog
            .describe(value)
            .and_then(|d| d.upcast_to(param).map(|_| UPCAST_MATCH))
    }

    pub fn is_assignable(&self, catalog: &dyn CallableCatalog, param: &TypeKey, value: &TypeKey) -> bool {
        self.assignability(catalog, param, value).is_some()
    }

    /// `true` if a value of type `value` is assignable or convertible to `target`.
    pub fn can_convert(&self, catalog: &dyn CallableCatalog, value: &TypeKey, target: &TypeKey) -> bool {
        self.is_assignable(catalog, target, value)
            || (*value == TypeKey::of::<String>() && self.can_convert_text(target))
    }

    /// Converts `instance` to exactly `target`.
    pub fn convert(
        &self,
        catalog: &dyn CallableCatalog,
        instance: &Instance,
        target: &TypeKey,
    ) -> Result<Instance, TypeConversionError> {
        if instance.key() == *target {
            return Ok(instance.clone());
        }

        if let Some(upcast) = catalog.describe(&instance.key()).and_then(|d| d.upcast_to(target).cloned()) {
            trace!(from = %instance.key(), to = %target, "Upcasting");
            return upcast.apply(instance).ok_or_else(|| TypeConversionError {
                value: format!("{instance:?}"),
                target: *target,
                reason: "upcast rejected the instance".into(),
            });
        }

        if let Some(text) = instance.downcast_ref::<String>() {
            return self.convert_text(text, target);
        }

        Err(TypeConversionError {
            value: format!("{instance:?}"),
            target: *target,
            reason: format!("no conversion from {}", instance.key().short_name()),
        })
    }

    /// Parses a text literal into `target`.
    pub fn convert_text(&self, text: &str, target: &TypeKey) -> Result<Instance, TypeConversionError> {
        let failure = |reason: String| TypeConversionError {
            value: format!("{text:?}"),
            target: *target,
            reason,
        };

        if *target == TypeKey::of::<String>() {
            return Ok(Instance::new(text.to_string()));
        }
        let custom = self.custom.get(target).map(|entry| entry.value().clone());
        if let Some(converter) = custom {
            return converter(text).map_err(failure);
        }
        match BUILTIN_CONVERTERS.get(target) {
            Some(converter) => converter(text).map_err(failure),
            None => Err(failure(format!("no text converter for {}", target.short_name()))),
        }
    }
}

impl fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionService")
            .field("builtin", &BUILTIN_CONVERTERS.len())
            .field("custom", &self.custom.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TypeDescriptor};

    trait Shape: Send + Sync {
        fn sides(&self) -> u32;
    }

    struct Square;

    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    fn catalog() -> Catalog {
        let catalog = Catalog::new();
        catalog.register(
            TypeDescriptor::builder::<Square>()
                .implements::<Arc<dyn Shape>, _>(|s| s as Arc<dyn Shape>)
                .build(),
        );
        catalog
    }

    #[test]
    fn builtin_text_conversions() {
        let service = ConversionService::new();
        let converted = service.convert_text(" 42 ", &TypeKey::of::<i32>()).unwrap();
        assert_eq!(converted.downcast_ref::<i32>(), Some(&42));

        let hex = service.convert_text("0xff", &TypeKey::of::<u8>()).unwrap();
        assert_eq!(hex.downcast_ref::<u8>(), Some(&255));

        let flag = service.convert_text("yes", &TypeKey::of::<bool>()).unwrap();
        assert_eq!(flag.downcast_ref::<bool>(), Some(&true));

        assert!(service.convert_text("abc", &TypeKey::of::<i32>()).is_err());
        assert!(service.convert_text("300", &TypeKey::of::<u8>()).is_err());
        assert!(service.convert_text("ab", &TypeKey::of::<char>()).is_err());
    }

    #[test]
    fn custom_converter_wins() {
        #[derive(Debug, PartialEq)]
        struct Millis(u64);

        let service = ConversionService::new();
        assert!(!service.can_convert_text(&TypeKey::of::<Millis>()));

        service.register::<Millis, String, _>(|text| {
            text.strip_suffix("ms")
                .and_then(|n| n.parse().ok())
                .map(Millis)
                .ok_or_else(|| format!("'{text}' is not a duration"))
        });

        let converted = service.convert_text("250ms", &TypeKey::of::<Millis>()).unwrap();
        assert_eq!(converted.downcast_ref::<Millis>(), Some(&Millis(250)));
        assert!(service.convert_text("soon", &TypeKey::of::<Millis>()).is_err());
    }

    #[test]
    fn assignability_weights() {
        let catalog = catalog();
        let service = ConversionService::new();
        let shape = TypeKey::of::<Arc<dyn Shape>>();
        let square = TypeKey::of::<Square>();

        assert_eq!(service.assignability(&catalog, &square, &square), Some(EXACT_MATCH));
        assert_eq!(service.assignability(&catalog, &shape, &square), Some(UPCAST_MATCH));
        assert_eq!(service.assignability(&catalog, &square, &shape), None);
        assert!(service.can_convert(&catalog, &TypeKey::of::<String>(), &TypeKey::of::<u16>()));
        assert!(!service.can_convert(&catalog, &TypeKey::of::<u16>(), &TypeKey::of::<String>()));
    }

    #[test]
    fn convert_through_upcast() {
        let catalog = catalog();
        let service = ConversionService::new();

        let converted = service
            .convert(&catalog, &Instance::new(Square), &TypeKey::of::<Arc<dyn Shape>>())
            .unwrap();
        let shape = converted.downcast::<Arc<dyn Shape>>().unwrap();
        assert_eq!(shape.sides(), 4);

        let err = service
            .convert(&catalog, &Instance::new(7u8), &TypeKey::of::<Square>())
            .unwrap_err();
        assert!(err.reason.contains("no conversion"));
    }
}
