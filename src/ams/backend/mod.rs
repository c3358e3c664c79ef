//! AMS backend abstraction.
//!
//! A backend adapts one multi-material system to the canonical model in
//! [`crate::ams::types`]. Backends are fed Moonraker status updates by the
//! host, issue G-code through a [`GcodeSender`](crate::moonraker::GcodeSender)
//! and report changes through an [`EventSink`]. The sink may be invoked on
//! any thread; the state engine's sink marshals onto the UI queue.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde_json::Value;

use super::types::{
    AmsAction, AmsSystemInfo, AmsType, GateInfo, GateStatus, PathSegment, PathTopology, SlotInfo,
    GATE_BYPASS, GATE_NONE,
};

pub mod afc;
pub mod happy_hare;
pub mod hub;
pub mod mock;

pub use afc::AfcBackend;
pub use happy_hare::HappyHareBackend;
pub use hub::HubBackend;
pub use mock::MockBackend;

/// Errors returned by backend operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("backend is not running")]
    NotRunning,

    #[error("another filament operation is in progress")]
    Busy,

    #[error("invalid gate {0}")]
    InvalidGate(i32),

    #[error("invalid tool {0}")]
    InvalidTool(i32),

    #[error("{0} is not supported by this backend")]
    NotSupported(String),

    #[error("gcode failed: {0}")]
    Gcode(String),
}

/// Notifications emitted by backends.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Something changed; re-snapshot everything.
    StateChanged,
    /// One gate's attributes changed.
    GateChanged(i32),
    LoadComplete,
    UnloadComplete,
    ToolChanged,
    /// Recoverable failure.
    Error(String),
    /// User intervention needed.
    AttentionRequired(String),
}

/// Event callback installed by the state engine.
pub type EventSink = Arc<dyn Fn(BackendEvent) + Send + Sync>;

/// Common backend contract.
///
/// Queries never fail: an out-of-range gate yields a default (invalid)
/// [`GateInfo`]. Operations return `Err` without side effects when rejected.
pub trait AmsBackend: Send {
    fn start(&mut self) -> Result<(), BackendError>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    fn set_event_sink(&mut self, sink: Option<EventSink>);

    fn system_info(&self) -> AmsSystemInfo;
    fn ams_type(&self) -> AmsType;
    fn gate_info(&self, gate: i32) -> GateInfo;
    fn slot_info(&self, gate: i32) -> SlotInfo;
    fn topology(&self) -> PathTopology;
    fn filament_segment(&self) -> PathSegment;
    fn infer_error_segment(&self) -> PathSegment;

    /// Apply a Moonraker status update. Returns `true` if state changed.
    fn handle_status_update(&mut self, _status: &Value) -> bool {
        false
    }

    /// Apply one line of G-code console output. Returns `true` if a tool
    /// change was recognised and applied.
    fn handle_gcode_response(&mut self, _line: &str) -> bool {
        false
    }

    fn load_filament(&mut self, gate: i32) -> Result<(), BackendError>;
    fn unload_filament(&mut self) -> Result<(), BackendError>;
    fn select_gate(&mut self, gate: i32) -> Result<(), BackendError>;
    fn change_tool(&mut self, tool: i32) -> Result<(), BackendError>;
    fn recover(&mut self) -> Result<(), BackendError>;
    fn reset(&mut self) -> Result<(), BackendError>;
    fn cancel(&mut self) -> Result<(), BackendError>;
    fn set_gate_info(&mut self, gate: i32, slot: SlotInfo) -> Result<(), BackendError>;
    fn set_tool_mapping(&mut self, tool: i32, gate: i32) -> Result<(), BackendError>;
    fn enable_bypass(&mut self) -> Result<(), BackendError>;
    fn disable_bypass(&mut self) -> Result<(), BackendError>;

    /// Store Spoolman weights on a slot. Returns `true` if either changed.
    fn update_slot_weights(&mut self, gate: i32, remaining_g: f64, total_g: f64) -> bool;

    fn is_bypass_active(&self) -> bool {
        self.system_info().current_gate == GATE_BYPASS
    }
}

/// The attached backend.
pub enum Backend {
    Hub(HubBackend),
    Afc(AfcBackend),
    HappyHare(HappyHareBackend),
    Mock(MockBackend),
}

impl Backend {
    pub fn as_dyn(&self) -> &(dyn AmsBackend + 'static) {
        match self {
            Backend::Hub(b) => b,
            Backend::Afc(b) => b,
            Backend::HappyHare(b) => b,
            Backend::Mock(b) => b,
        }
    }

    pub fn as_dyn_mut(&mut self) -> &mut (dyn AmsBackend + 'static) {
        match self {
            Backend::Hub(b) => b,
            Backend::Afc(b) => b,
            Backend::HappyHare(b) => b,
            Backend::Mock(b) => b,
        }
    }

    pub fn as_mock_mut(&mut self) -> Option<&mut MockBackend> {
        match self {
            Backend::Mock(m) => Some(m),
            _ => None,
        }
    }
}

impl Deref for Backend {
    type Target = dyn AmsBackend;

    fn deref(&self) -> &Self::Target {
        self.as_dyn()
    }
}

impl DerefMut for Backend {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_dyn_mut()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("type", &self.ams_type())
            .field("running", &self.is_running())
            .finish()
    }
}

// ── Shared state for the concrete backends ───────────────────────────────────

/// State every backend keeps: the system snapshot, per-slot detail, path
/// position and the event sink.
pub(crate) struct BackendCore {
    pub info: AmsSystemInfo,
    pub slots: Vec<SlotInfo>,
    pub topology: PathTopology,
    pub segment: PathSegment,
    running: bool,
    sink: Option<EventSink>,
}

impl BackendCore {
    pub fn new(ams_type: AmsType, topology: PathTopology) -> Self {
        Self {
            info: AmsSystemInfo {
                ams_type,
                ..AmsSystemInfo::default()
            },
            slots: Vec::new(),
            topology,
            segment: PathSegment::None,
            running: false,
            sink: None,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_sink(&mut self, sink: Option<EventSink>) {
        self.sink = sink;
    }

    pub fn emit(&self, event: BackendEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    /// Grow or shrink to `count` slots, keeping existing slot data.
    pub fn resize(&mut self, count: usize) {
        self.slots.truncate(count);
        for index in self.slots.len()..count {
            self.slots.push(SlotInfo {
                status: GateStatus::Unknown,
                ..SlotInfo::empty(index as i32)
            });
        }
    }

    pub fn slot_index(&self, gate: i32) -> Option<usize> {
        usize::try_from(gate).ok().filter(|&i| i < self.slots.len())
    }

    /// A firmware-reported gate, or `GATE_NONE` when it is neither bypass
    /// nor an existing gate.
    pub fn clamp_gate(&self, gate: i32) -> i32 {
        if gate == GATE_BYPASS || self.slot_index(gate).is_some() {
            gate
        } else {
            GATE_NONE
        }
    }

    pub fn check_gate(&self, gate: i32) -> Result<usize, BackendError> {
        self.slot_index(gate).ok_or(BackendError::InvalidGate(gate))
    }

    pub fn require_running(&self) -> Result<(), BackendError> {
        if self.running {
            Ok(())
        } else {
            Err(BackendError::NotRunning)
        }
    }

    /// Running and not in the middle of another filament operation.
    pub fn require_idle(&self) -> Result<(), BackendError> {
        self.require_running()?;
        match self.info.action {
            AmsAction::Idle | AmsAction::Paused | AmsAction::Error => Ok(()),
            _ => Err(BackendError::Busy),
        }
    }

    pub fn snapshot(&self) -> AmsSystemInfo {
        let mut info = self.info.clone();
        info.total_gates = i32::try_from(self.slots.len()).unwrap_or(i32::MAX);
        info.gates = self.slots.iter().map(SlotInfo::gate_info).collect();
        info
    }

    pub fn gate_info(&self, gate: i32) -> GateInfo {
        self.slot_index(gate)
            .map(|i| self.slots[i].gate_info())
            .unwrap_or_default()
    }

    pub fn slot_info(&self, gate: i32) -> SlotInfo {
        self.slot_index(gate)
            .map(|i| self.slots[i].clone())
            .unwrap_or_default()
    }

    /// The segment after the current one, while the system reports an
    /// error; filament stalls on its way to the next sensor.
    pub fn infer_error_segment(&self) -> PathSegment {
        if self.info.action != AmsAction::Error {
            return PathSegment::None;
        }
        next_segment(self.segment, self.topology)
    }

    pub fn update_slot_weights(&mut self, gate: i32, remaining_g: f64, total_g: f64) -> bool {
        let Some(i) = self.slot_index(gate) else {
            return false;
        };
        let slot = &mut self.slots[i];
        if slot.remaining_weight_g == remaining_g && slot.total_weight_g == total_g {
            return false;
        }
        slot.remaining_weight_g = remaining_g;
        slot.total_weight_g = total_g;
        true
    }

    /// Index of the gate mapped to `tool`, if any.
    pub fn gate_for_tool(&self, tool: i32) -> Option<usize> {
        self.slots.iter().position(|s| s.mapped_tool == tool)
    }

    /// Track a tool change seen in console output (`T2`,
    /// `MMU_CHANGE_TOOL TOOL=2`). The current gate follows the tool's
    /// mapping when it has one. Emits `ToolChanged` on a change.
    pub fn apply_gcode_response(&mut self, line: &str) -> bool {
        let Some(tool) = crate::moonraker::detect_tool_change(line) else {
            return false;
        };
        if tool < 0 || tool == self.info.current_tool {
            return false;
        }
        self.info.current_tool = tool;
        if let Some(index) = self.gate_for_tool(tool) {
            self.info.current_gate = index as i32;
        }
        self.emit(BackendEvent::ToolChanged);
        true
    }

    /// `current_tool` for the gate, or `-1`.
    pub fn tool_for_gate(&self, gate: i32) -> i32 {
        self.slot_index(gate)
            .map(|i| self.slots[i].mapped_tool)
            .unwrap_or(-1)
    }
}

fn next_segment(segment: PathSegment, topology: PathTopology) -> PathSegment {
    match segment {
        PathSegment::None | PathSegment::Spool => PathSegment::Prep,
        PathSegment::Prep => PathSegment::Lane,
        PathSegment::Lane if topology == PathTopology::Hub => PathSegment::Hub,
        PathSegment::Lane | PathSegment::Hub => PathSegment::Output,
        PathSegment::Output => PathSegment::Toolhead,
        PathSegment::Toolhead | PathSegment::Nozzle => PathSegment::Nozzle,
    }
}

/// Send a script through `sender`, mapping failures to
/// [`BackendError::Gcode`].
pub(crate) fn send(
    sender: &dyn crate::moonraker::GcodeSender,
    script: &str,
) -> Result<(), BackendError> {
    tracing::debug!(script, "sending AMS gcode");
    sender
        .send_gcode(script)
        .map_err(|e| BackendError::Gcode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn error_segment_follows_the_stalled_position() {
        let mut core = BackendCore::new(AmsType::Afc, PathTopology::Hub);
        core.segment = PathSegment::Lane;
        assert_eq!(core.infer_error_segment(), PathSegment::None);

        core.info.action = AmsAction::Error;
        assert_eq!(core.infer_error_segment(), PathSegment::Hub);

        core.topology = PathTopology::Sequential;
        assert_eq!(core.infer_error_segment(), PathSegment::Output);
    }

    #[test]
    fn resize_keeps_existing_slots() {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        core.resize(2);
        core.slots[1].material = "PLA".to_string();
        core.resize(4);
        assert_eq!(core.slots.len(), 4);
        assert_eq!(core.slots[1].material, "PLA");
        assert_eq!(core.slots[3].gate_index, 3);
        core.resize(1);
        assert_eq!(core.snapshot().total_gates, 1);
    }

    #[test]
    fn out_of_range_gate_is_invalid() {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        core.resize(2);
        assert!(!core.gate_info(2).is_valid());
        assert!(!core.gate_info(-1).is_valid());
        assert_eq!(core.check_gate(5), Err(BackendError::InvalidGate(5)));
        assert!(!core.update_slot_weights(9, 1.0, 2.0));
    }

    #[test]
    fn firmware_gate_outside_the_system_reads_as_none() {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        core.resize(4);
        assert_eq!(core.clamp_gate(0), 0);
        assert_eq!(core.clamp_gate(3), 3);
        assert_eq!(core.clamp_gate(GATE_BYPASS), GATE_BYPASS);
        assert_eq!(core.clamp_gate(4), GATE_NONE);
        assert_eq!(core.clamp_gate(-3), GATE_NONE);
    }

    #[test]
    fn console_tool_change_moves_tool_and_mapped_gate() {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        core.resize(3);
        core.slots[2].mapped_tool = 1;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        core.set_sink(Some(Arc::new(move |ev: BackendEvent| sink.lock().unwrap().push(ev))));

        assert!(core.apply_gcode_response("MMU_CHANGE_TOOL TOOL=1"));
        assert_eq!(core.info.current_tool, 1);
        assert_eq!(core.info.current_gate, 2);

        assert!(!core.apply_gcode_response("T1"));
        assert!(!core.apply_gcode_response("ok"));
        assert!(!core.apply_gcode_response("CHANGE_TOOL TOOL=-1"));
        assert_eq!(*seen.lock().unwrap(), vec![BackendEvent::ToolChanged]);
    }

    #[test]
    fn weight_update_reports_changes_only() {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        core.resize(1);
        assert!(core.update_slot_weights(0, 400.0, 1000.0));
        assert!(!core.update_slot_weights(0, 400.0, 1000.0));
    }

    #[test]
    fn emit_without_sink_is_a_no_op_and_with_sink_delivers() {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        core.emit(BackendEvent::StateChanged);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        core.set_sink(Some(Arc::new(move |ev: BackendEvent| sink.lock().unwrap().push(ev))));
        core.emit(BackendEvent::GateChanged(1));
        assert_eq!(*seen.lock().unwrap(), vec![BackendEvent::GateChanged(1)]);
    }

    #[test]
    fn busy_while_moving_filament() {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        assert_eq!(core.require_idle(), Err(BackendError::NotRunning));
        core.start();
        assert_eq!(core.require_idle(), Ok(()));
        core.info.action = AmsAction::Loading;
        assert_eq!(core.require_idle(), Err(BackendError::Busy));
    }
}
