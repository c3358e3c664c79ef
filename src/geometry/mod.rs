//! G-code preview geometry under a memory budget.
//!
//! # Module structure
//!
//! ```text
//! geometry/
//! ├── memory.rs : /proc/meminfo and /proc/self/status probes
//! ├── budget.rs : budget derivation, tier selection, live checks
//! └── builder.rs: pull-based builder that degrades tiers itself
//! ```

pub mod budget;
pub mod builder;
pub mod memory;

pub use budget::{BudgetAction, BudgetConfig, GeometryBudgetManager, MemoryProbe};
pub use builder::{BuildOutcome, BuiltGeometry, GcodeSegment, GeometryBuilder, Polyline, Vec3};
pub use memory::{
    is_gcode_3d_render_safe, parse_meminfo_available_kb, read_process_memory,
    system_memory_info, MemoryInfo, ProcessMemory,
};
