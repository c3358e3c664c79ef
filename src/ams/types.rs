//! Canonical AMS data model shared by every backend.
//!
//! Enum discriminants are the integer values published through subjects;
//! keep them stable.

use serde::Serialize;

/// Number of per-gate subject pairs published by the state engine.
pub const MAX_GATES: usize = 16;

/// Colour shown for gates with no known filament (grey).
pub const DEFAULT_GATE_COLOR: u32 = 0x50_5050;

/// `current_gate` value when no gate is selected.
pub const GATE_NONE: i32 = -1;

/// `current_gate` value in bypass mode (external spool).
pub const GATE_BYPASS: i32 = -2;

/// Which multi-material system is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum AmsType {
    #[default]
    None = 0,
    /// Bambu-style hub unit.
    Hub = 1,
    /// AFC sequential lanes.
    Afc = 2,
    /// Happy Hare MMU.
    HappyHare = 3,
    Mock = 4,
}

impl AmsType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Hub => "Hub",
            Self::Afc => "AFC",
            Self::HappyHare => "Happy Hare",
            Self::Mock => "Mock",
        }
    }
}

/// Physical filament routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum PathTopology {
    /// All gates merge at one junction before the toolhead.
    #[default]
    Hub = 0,
    /// Lanes feed one at a time through a shared buffer.
    Sequential = 1,
    Direct = 2,
}

/// Where the filament tip currently is, spool to nozzle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(i32)]
pub enum PathSegment {
    #[default]
    None = 0,
    Spool = 1,
    Prep = 2,
    Lane = 3,
    Hub = 4,
    Output = 5,
    Toolhead = 6,
    Nozzle = 7,
}

impl PathSegment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Spool => "Spool",
            Self::Prep => "Prep",
            Self::Lane => "Lane",
            Self::Hub => "Hub",
            Self::Output => "Output",
            Self::Toolhead => "Toolhead",
            Self::Nozzle => "Nozzle",
        }
    }
}

/// Per-gate state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum GateStatus {
    #[default]
    Unknown = 0,
    Empty = 1,
    Loaded = 2,
    Loading = 3,
    Unloading = 4,
    Error = 5,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Empty => "Empty",
            Self::Loaded => "Loaded",
            Self::Loading => "Loading",
            Self::Unloading => "Unloading",
            Self::Error => "Error",
        }
    }
}

/// System-wide operation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum AmsAction {
    #[default]
    Idle = 0,
    Heating = 1,
    Cutting = 2,
    FormingTip = 3,
    Purging = 4,
    Unloading = 5,
    Loading = 6,
    Selecting = 7,
    Checking = 8,
    Resetting = 9,
    Paused = 10,
    Error = 11,
}

impl AmsAction {
    pub const ALL: [AmsAction; 12] = [
        Self::Idle,
        Self::Heating,
        Self::Cutting,
        Self::FormingTip,
        Self::Purging,
        Self::Unloading,
        Self::Loading,
        Self::Selecting,
        Self::Checking,
        Self::Resetting,
        Self::Paused,
        Self::Error,
    ];

    /// Inverse of `as i32`.
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|a| *a as i32 == value)
    }

    /// Human-readable label, used as the detail text when a backend gives
    /// none.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Heating => "Heating",
            Self::Cutting => "Cutting",
            Self::FormingTip => "Forming Tip",
            Self::Purging => "Purging",
            Self::Unloading => "Unloading",
            Self::Loading => "Loading",
            Self::Selecting => "Selecting",
            Self::Checking => "Checking",
            Self::Resetting => "Resetting",
            Self::Paused => "Paused",
            Self::Error => "Error",
        }
    }

    /// Map a firmware action/state string onto an action.
    ///
    /// Matching is case-insensitive and tolerant of the wording differences
    /// between AFC (`"Tool Loading"`), Happy Hare (`"Forming tip"`) and hub
    /// units. Unknown strings map to `Idle`.
    pub fn from_firmware(text: &str) -> Self {
        let t = text.trim().to_ascii_lowercase();
        let has = |needle: &str| t.contains(needle);
        if t.is_empty() || has("idle") || has("ready") {
            Self::Idle
        } else if has("error") || has("fault") {
            Self::Error
        } else if has("pause") {
            Self::Paused
        } else if has("heat") {
            Self::Heating
        } else if has("cut") {
            Self::Cutting
        } else if has("tip") {
            Self::FormingTip
        } else if has("purg") || has("wip") {
            Self::Purging
        } else if has("unload") || has("eject") {
            Self::Unloading
        } else if has("load") {
            Self::Loading
        } else if has("select") || has("homing") || has("changing") {
            Self::Selecting
        } else if has("check") || has("calibrat") {
            Self::Checking
        } else if has("reset") || has("recover") {
            Self::Resetting
        } else {
            Self::Idle
        }
    }
}

/// Read-only view of one gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateInfo {
    /// Global 0-based index; `-1` marks an invalid lookup.
    pub gate_index: i32,
    pub unit_index: i32,
    pub slot_within_unit: i32,
    pub color_rgb: u32,
    pub status: GateStatus,
    pub material: String,
    pub brand: String,
    /// Tool mapped to this gate, or `-1`.
    pub mapped_tool: i32,
    /// Spoolman spool id, or `0`.
    pub spoolman_id: i32,
}

impl Default for GateInfo {
    fn default() -> Self {
        Self {
            gate_index: -1,
            unit_index: 0,
            slot_within_unit: 0,
            color_rgb: DEFAULT_GATE_COLOR,
            status: GateStatus::Unknown,
            material: String::new(),
            brand: String::new(),
            mapped_tool: -1,
            spoolman_id: 0,
        }
    }
}

impl GateInfo {
    pub fn is_valid(&self) -> bool {
        self.gate_index >= 0
    }
}

/// Editable view of a gate, including spool weights.
///
/// `spoolman_id == 0` means the slot is not backed by the spool database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotInfo {
    pub gate_index: i32,
    pub unit_index: i32,
    pub slot_within_unit: i32,
    pub color_rgb: u32,
    pub status: GateStatus,
    pub material: String,
    pub brand: String,
    pub mapped_tool: i32,
    pub spoolman_id: i32,
    pub spoolman_filament_id: i32,
    pub remaining_weight_g: f64,
    pub total_weight_g: f64,
}

impl Default for SlotInfo {
    fn default() -> Self {
        Self::from(&GateInfo::default())
    }
}

impl From<&GateInfo> for SlotInfo {
    fn from(gate: &GateInfo) -> Self {
        Self {
            gate_index: gate.gate_index,
            unit_index: gate.unit_index,
            slot_within_unit: gate.slot_within_unit,
            color_rgb: gate.color_rgb,
            status: gate.status,
            material: gate.material.clone(),
            brand: gate.brand.clone(),
            mapped_tool: gate.mapped_tool,
            spoolman_id: gate.spoolman_id,
            spoolman_filament_id: 0,
            remaining_weight_g: 0.0,
            total_weight_g: 0.0,
        }
    }
}

impl SlotInfo {
    /// An empty slot at `gate_index` in unit 0.
    pub fn empty(gate_index: i32) -> Self {
        Self {
            gate_index,
            slot_within_unit: gate_index,
            status: GateStatus::Empty,
            ..Self::default()
        }
    }

    pub fn gate_info(&self) -> GateInfo {
        GateInfo {
            gate_index: self.gate_index,
            unit_index: self.unit_index,
            slot_within_unit: self.slot_within_unit,
            color_rgb: self.color_rgb,
            status: self.status,
            material: self.material.clone(),
            brand: self.brand.clone(),
            mapped_tool: self.mapped_tool,
            spoolman_id: self.spoolman_id,
        }
    }

    pub fn is_spoolman_linked(&self) -> bool {
        self.spoolman_id != 0
    }
}

/// Whole-system snapshot produced by a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmsSystemInfo {
    pub ams_type: AmsType,
    pub action: AmsAction,
    pub operation_detail: String,
    /// `-2` bypass, `-1` none, otherwise a gate index.
    pub current_gate: i32,
    pub current_tool: i32,
    pub filament_loaded: bool,
    pub total_gates: i32,
    /// `gates[i].gate_index == i`.
    pub gates: Vec<GateInfo>,
    /// `-1` before the first swap, then the 0-based index of the last swap.
    pub current_toolchange: i32,
    pub number_of_toolchanges: i32,
}

impl Default for AmsSystemInfo {
    fn default() -> Self {
        Self {
            ams_type: AmsType::None,
            action: AmsAction::Idle,
            operation_detail: String::new(),
            current_gate: GATE_NONE,
            current_tool: -1,
            filament_loaded: false,
            total_gates: 0,
            gates: Vec::new(),
            current_toolchange: -1,
            number_of_toolchanges: 0,
        }
    }
}

impl AmsSystemInfo {
    /// Gate by global index, if in range.
    pub fn gate(&self, index: i32) -> Option<&GateInfo> {
        usize::try_from(index).ok().and_then(|i| self.gates.get(i))
    }

    pub fn is_bypass(&self) -> bool {
        self.current_gate == GATE_BYPASS
    }
}
