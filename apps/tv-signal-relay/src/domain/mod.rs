//! Domain Layer - Signal extraction and subscriber settings.
//!
//! This layer contains the core domain types of the relay with no I/O.
//! All types here are pure Rust with serialization support.

/// Configuration errors shared by all layers.
pub mod error;

/// Indicator samples, signals and the debouncing extractor.
pub mod signal;

/// Subscriber identity and stream settings.
pub mod subscription;
