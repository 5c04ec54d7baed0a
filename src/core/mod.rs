//! Core components shared by both key delivery interfaces.
//!
//! Backend contracts, configuration, error handling and the clocks that
//! drive session ageing.

// Backend contracts
pub mod backend;

// Millisecond clocks
pub mod clock;

// Backend selection
pub mod config;

// Protocol constants
pub mod constants;

// Error handling
pub mod error;

// Re-exports for convenience
pub use self::backend::{Role, StreamBackend, VaultBackend};
pub use self::config::{Config, QkdContext};
pub use self::error::{Error, Result};
