//! # Masnaa Support
//!
//! Shared utilities for the Masnaa object factory.
//!
//! This crate provides:
//! - Rendering of dependency chains and type names for error messages
//! - "Did you mean" suggestions for unknown object names
//! - Tracing subscriber setup for binaries and examples

pub mod logging;
pub mod rendering;
