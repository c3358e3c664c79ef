//! Spoolman integration: spool records, the database collaborator, an
//! in-memory database and slot-edit saving.

pub mod memory;
pub mod slot_saver;
pub mod types;

pub use memory::MemorySpoolDatabase;
pub use slot_saver::{detect_changes, ChangeSet, SpoolmanSlotSaver, WEIGHT_THRESHOLD_G};
pub use types::{
    hex_to_rgb, rgb_to_hex, FilamentPatch, SpoolCallback, SpoolDatabase, SpoolId, SpoolInfo,
    SpoolmanError,
};
