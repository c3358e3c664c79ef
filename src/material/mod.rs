//! Filament material presets and user overrides.

pub mod database;
pub mod settings;

pub use database::{database_defaults, find_material, material_names, MaterialInfo, MATERIALS};
pub use settings::{MaterialOverride, MaterialSettings};
