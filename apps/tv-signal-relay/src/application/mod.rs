//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the relay core interacts with its host application.

/// Port interfaces for the host application (signal delivery).
pub mod ports;

/// Application services for subscriber session management.
pub mod services;
