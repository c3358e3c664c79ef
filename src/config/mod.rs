//! Persistent and runtime configuration.
//!
//! - [`document`]: the JSON config document with atomic saves
//! - [`input`]: touch/scroll settings read from the document
//! - [`runtime`]: environment snapshot, CLI test flags, runout-modal policy

pub mod document;
pub mod input;
pub mod runtime;

pub use document::{default_config_path, ConfigStore};
pub use input::InputSettings;
pub use runtime::{DisplayBackend, RuntimeConfig, TestModeFlags};
