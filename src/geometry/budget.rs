//! Memory budget and level-of-detail tier selection for G-code previews.
//!
//! # Tiers
//!
//! | Tier | Tube sides | Tolerance (mm) | Travels | Bytes / segment |
//! |------|------------|----------------|---------|-----------------|
//! | 3    | 16         | 0.01           | yes     | 1300            |
//! | 2    | 8          | 0.05           | no      | 600             |
//! | 1    | 4          | 0.1            | no      | 300             |
//! | 0    | strip (2)  | 0.2            | no      | 120             |
//!
//! Per-segment costs are empirical (simplification, strip overhead, normal
//! and colour palettes included).

use super::memory;

/// Highest (most detailed) tier.
pub const MAX_TIER: u8 = 3;

/// Answer of [`GeometryBudgetManager::check_budget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetAction {
    Continue,
    /// Drop one tier and rebuild.
    Degrade,
    /// Stop and keep what has been built.
    Abort,
}

/// Geometry parameters for one tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetConfig {
    pub tier: u8,
    pub tube_sides: u32,
    pub simplification_tolerance: f32,
    pub include_travels: bool,
    pub budget_bytes: u64,
}

/// Where the manager gets its "available memory" figure from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryProbe {
    /// `/proc/meminfo`.
    System,
    /// A fixed available-memory figure in KiB (0 = unreadable).
    Fixed(u64),
}

/// Picks and polices the memory budget for one preview build.
#[derive(Debug, Clone)]
pub struct GeometryBudgetManager {
    probe: MemoryProbe,
}

impl GeometryBudgetManager {
    pub const MAX_BUDGET_BYTES: u64 = 256 * 1024 * 1024;
    pub const BUDGET_PERCENT: u64 = 25;
    /// Below this much available memory the system is critical.
    pub const CRITICAL_MEMORY_KB: u64 = 100 * 1024;
    /// Assumed available memory when it cannot be read.
    pub const DEFAULT_AVAILABLE_KB: u64 = 512 * 1024;

    pub const BYTES_PER_SEG_N16: u64 = 1300;
    pub const BYTES_PER_SEG_N8: u64 = 600;
    pub const BYTES_PER_SEG_N4: u64 = 300;
    pub const BYTES_PER_SEG_STRIP: u64 = 120;

    /// Usage may reach this fraction of the budget (9/10).
    pub const BUDGET_THRESHOLD_NUM: u64 = 9;
    pub const BUDGET_THRESHOLD_DEN: u64 = 10;
    pub const CHECK_INTERVAL_SEGMENTS: usize = 5_000;
    pub const SYSTEM_CHECK_INTERVAL_SEGMENTS: usize = 20_000;

    pub fn new() -> Self {
        Self {
            probe: MemoryProbe::System,
        }
    }

    /// A manager that reports `available_kb` instead of reading the system.
    pub fn with_available_kb(available_kb: u64) -> Self {
        Self {
            probe: MemoryProbe::Fixed(available_kb),
        }
    }

    pub fn probe(&self) -> MemoryProbe {
        self.probe
    }

    /// Available memory in KiB; 0 when it cannot be determined.
    pub fn read_system_available_kb(&self) -> u64 {
        match self.probe {
            MemoryProbe::System => memory::system_memory_info().available_kb,
            MemoryProbe::Fixed(kb) => kb,
        }
    }

    /// `min(MAX_BUDGET_BYTES, available · 25%)`.
    pub fn calculate_budget(&self, available_kb: u64) -> u64 {
        let budget = u128::from(available_kb) * 1024 * u128::from(Self::BUDGET_PERCENT) / 100;
        budget.min(u128::from(Self::MAX_BUDGET_BYTES)) as u64
    }

    /// Budget from live memory, with the 512 MiB assumption when unreadable.
    pub fn current_budget(&self) -> u64 {
        let available_kb = match self.read_system_available_kb() {
            0 => {
                tracing::debug!(
                    "available memory unknown, assuming {} KiB",
                    Self::DEFAULT_AVAILABLE_KB
                );
                Self::DEFAULT_AVAILABLE_KB
            }
            kb => kb,
        };
        self.calculate_budget(available_kb)
    }

    /// `true` when readable memory has dropped below 100 MiB.
    pub fn is_system_memory_critical(&self) -> bool {
        let kb = self.read_system_available_kb();
        kb > 0 && kb < Self::CRITICAL_MEMORY_KB
    }

    /// Same as [`is_system_memory_critical`](Self::is_system_memory_critical),
    /// logged; used by the builder's periodic system check.
    pub fn check_system_critical(&self) -> bool {
        let critical = self.is_system_memory_critical();
        if critical {
            tracing::warn!(
                "system memory critical ({} KiB available)",
                self.read_system_available_kb()
            );
        }
        critical
    }

    /// Estimated bytes per raw segment at `tier`.
    pub fn bytes_per_segment(tier: u8) -> u64 {
        match tier {
            3 => Self::BYTES_PER_SEG_N16,
            2 => Self::BYTES_PER_SEG_N8,
            1 => Self::BYTES_PER_SEG_N4,
            _ => Self::BYTES_PER_SEG_STRIP,
        }
    }

    /// Geometry parameters for `tier` (values above 3 are treated as 3).
    pub fn tier_config(tier: u8, budget_bytes: u64) -> BudgetConfig {
        let (tier, tube_sides, simplification_tolerance, include_travels) = match tier {
            0 => (0, 2, 0.2, false),
            1 => (1, 4, 0.1, false),
            2 => (2, 8, 0.05, false),
            _ => (3, 16, 0.01, true),
        };
        BudgetConfig {
            tier,
            tube_sides,
            simplification_tolerance,
            include_travels,
            budget_bytes,
        }
    }

    /// Highest tier whose estimated cost for `segment_count` stays under the
    /// live-check threshold of the budget. Tier 0 is always feasible.
    pub fn select_tier(&self, segment_count: u64, budget_bytes: u64) -> BudgetConfig {
        let tier = (1..=MAX_TIER)
            .rev()
            .find(|&t| {
                let estimate = segment_count.saturating_mul(Self::bytes_per_segment(t));
                Self::within_threshold(estimate, budget_bytes)
            })
            .unwrap_or(0);
        Self::tier_config(tier, budget_bytes)
    }

    /// Budget and tier for a file of `segment_count` segments, from live
    /// memory. A critical system always gets tier 0.
    pub fn plan(&self, segment_count: u64) -> BudgetConfig {
        let budget = self.current_budget();
        if self.is_system_memory_critical() {
            tracing::warn!("system memory critical, forcing geometry tier 0");
            return Self::tier_config(0, budget);
        }
        let config = self.select_tier(segment_count, budget);
        tracing::info!(
            segments = segment_count,
            budget_mb = budget / (1024 * 1024),
            tier = config.tier,
            "geometry tier selected"
        );
        config
    }

    fn within_threshold(usage: u64, budget_bytes: u64) -> bool {
        u128::from(usage) * u128::from(Self::BUDGET_THRESHOLD_DEN)
            <= u128::from(budget_bytes) * u128::from(Self::BUDGET_THRESHOLD_NUM)
    }

    /// Live check during construction.
    pub fn check_budget(&self, current_usage: u64, budget_bytes: u64, tier: u8) -> BudgetAction {
        if Self::within_threshold(current_usage, budget_bytes) {
            BudgetAction::Continue
        } else if tier > 0 {
            BudgetAction::Degrade
        } else {
            BudgetAction::Abort
        }
    }
}

impl Default for GeometryBudgetManager {
    fn default() -> Self {
        Self::new()
    }
}
