//! In-process AMS for test mode and unit tests.
//!
//! Operations complete synchronously and emit the matching completion
//! event. The first four gates carry Spoolman ids that match
//! [`MemorySpoolDatabase::with_demo_spools`](crate::spoolman::MemorySpoolDatabase::with_demo_spools).

use tracing::info;

use super::{AmsBackend, BackendCore, BackendError, BackendEvent, EventSink};
use crate::ams::types::{
    AmsAction, AmsSystemInfo, AmsType, GateInfo, GateStatus, PathSegment, PathTopology, SlotInfo,
    GATE_BYPASS, GATE_NONE,
};

/// (colour, material, brand) presets, cycled across gates.
const PRESETS: [(u32, &str, &str); 8] = [
    (0xE5_3935, "PLA", "Polymaker"),
    (0x1E_88E5, "PETG", "Prusament"),
    (0xFD_D835, "ABS", "eSun"),
    (0x43_A047, "TPU", "Sunlu"),
    (0xFF_FFFF, "PLA", "Generic"),
    (0x21_2121, "PLA", "Generic"),
    (0xFB_8C00, "ASA", "Generic"),
    (0x8E_24AA, "PETG", "Generic"),
];

const DEMO_SPOOLS: usize = 4;

pub struct MockBackend {
    core: BackendCore,
}

impl MockBackend {
    /// `gates` loaded gates, tool `i` mapped to gate `i`.
    pub fn new(gates: usize) -> Self {
        let mut core = BackendCore::new(AmsType::Mock, PathTopology::Hub);
        core.resize(gates);
        for (i, slot) in core.slots.iter_mut().enumerate() {
            let (color, material, brand) = PRESETS[i % PRESETS.len()];
            slot.color_rgb = color;
            slot.material = material.to_string();
            slot.brand = brand.to_string();
            slot.status = GateStatus::Loaded;
            slot.mapped_tool = i as i32;
            if i < DEMO_SPOOLS {
                slot.spoolman_id = i as i32 + 1;
                slot.spoolman_filament_id = i as i32 + 101;
                slot.total_weight_g = 1000.0;
            }
        }
        Self { core }
    }

    /// Put the system in bypass without emitting events (test setup).
    pub fn enable_bypass_now(&mut self) {
        self.core.info.current_gate = GATE_BYPASS;
        self.core.info.current_tool = -1;
        self.core.info.filament_loaded = true;
        self.core.segment = PathSegment::Nozzle;
    }

    pub fn set_action(&mut self, action: AmsAction) {
        self.core.info.action = action;
        self.core.emit(BackendEvent::StateChanged);
    }

    pub fn set_operation_detail(&mut self, detail: impl Into<String>) {
        self.core.info.operation_detail = detail.into();
        self.core.emit(BackendEvent::StateChanged);
    }

    pub fn set_toolchange_progress(&mut self, current: i32, total: i32) {
        self.core.info.current_toolchange = current;
        self.core.info.number_of_toolchanges = total;
        self.core.emit(BackendEvent::StateChanged);
    }

    /// Replace a slot. The slot keeps its index; out-of-range gates are
    /// ignored.
    pub fn set_slot_info(&mut self, gate: i32, slot: SlotInfo) {
        let Some(index) = self.core.slot_index(gate) else {
            return;
        };
        self.core.slots[index] = SlotInfo {
            gate_index: gate,
            ..slot
        };
        self.core.emit(BackendEvent::GateChanged(gate));
    }

    pub fn set_topology(&mut self, topology: PathTopology) {
        self.core.topology = topology;
        self.core.emit(BackendEvent::StateChanged);
    }

    pub fn set_filament_segment(&mut self, segment: PathSegment) {
        self.core.segment = segment;
        self.core.emit(BackendEvent::StateChanged);
    }

    /// Enter the error state and report `message`.
    pub fn simulate_error(&mut self, message: &str) {
        self.core.info.action = AmsAction::Error;
        self.core.info.operation_detail = message.to_string();
        self.core.emit(BackendEvent::Error(message.to_string()));
    }

    /// Report that the user must intervene, without changing state.
    pub fn request_attention(&mut self, message: &str) {
        self.core.emit(BackendEvent::AttentionRequired(message.to_string()));
    }

    /// Emit an arbitrary event.
    pub fn emit(&self, event: BackendEvent) {
        self.core.emit(event);
    }

    fn finish_load(&mut self, index: usize) {
        let gate = index as i32;
        self.core.slots[index].status = GateStatus::Loaded;
        self.core.info.current_gate = gate;
        self.core.info.current_tool = self.core.tool_for_gate(gate);
        self.core.info.filament_loaded = true;
        self.core.info.action = AmsAction::Idle;
        self.core.segment = PathSegment::Nozzle;
    }
}

impl AmsBackend for MockBackend {
    fn start(&mut self) -> Result<(), BackendError> {
        self.core.start();
        info!(gates = self.core.slots.len(), "mock AMS started");
        Ok(())
    }

    fn stop(&mut self) {
        self.core.stop();
    }

    fn is_running(&self) -> bool {
        self.core.is_running()
    }

    fn set_event_sink(&mut self, sink: Option<EventSink>) {
        self.core.set_sink(sink);
    }

    fn system_info(&self) -> AmsSystemInfo {
        self.core.snapshot()
    }

    fn ams_type(&self) -> AmsType {
        AmsType::Mock
    }

    fn gate_info(&self, gate: i32) -> GateInfo {
        self.core.gate_info(gate)
    }

    fn slot_info(&self, gate: i32) -> SlotInfo {
        self.core.slot_info(gate)
    }

    fn topology(&self) -> PathTopology {
        self.core.topology
    }

    fn filament_segment(&self) -> PathSegment {
        self.core.segment
    }

    fn infer_error_segment(&self) -> PathSegment {
        self.core.infer_error_segment()
    }

    fn handle_gcode_response(&mut self, line: &str) -> bool {
        self.core.apply_gcode_response(line)
    }

    fn load_filament(&mut self, gate: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        let index = self.core.check_gate(gate)?;
        if self.core.slots[index].status == GateStatus::Empty {
            return Err(BackendError::InvalidGate(gate));
        }
        self.finish_load(index);
        self.core.emit(BackendEvent::LoadComplete);
        Ok(())
    }

    fn unload_filament(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.core.info.current_gate = GATE_NONE;
        self.core.info.current_tool = -1;
        self.core.info.filament_loaded = false;
        self.core.info.action = AmsAction::Idle;
        self.core.segment = PathSegment::None;
        self.core.emit(BackendEvent::UnloadComplete);
        Ok(())
    }

    fn select_gate(&mut self, gate: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.core.check_gate(gate)?;
        self.core.info.current_gate = gate;
        self.core.emit(BackendEvent::StateChanged);
        Ok(())
    }

    fn change_tool(&mut self, tool: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        let index = self
            .core
            .gate_for_tool(tool)
            .ok_or(BackendError::InvalidTool(tool))?;
        self.finish_load(index);
        self.core.emit(BackendEvent::ToolChanged);
        Ok(())
    }

    fn recover(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.core.info.action = AmsAction::Idle;
        self.core.info.operation_detail.clear();
        self.core.emit(BackendEvent::StateChanged);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.core.info.action = AmsAction::Idle;
        self.core.info.operation_detail.clear();
        self.core.info.current_toolchange = -1;
        self.core.info.number_of_toolchanges = 0;
        self.core.emit(BackendEvent::StateChanged);
        Ok(())
    }

    fn cancel(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.core.info.action = AmsAction::Idle;
        self.core.emit(BackendEvent::StateChanged);
        Ok(())
    }

    fn set_gate_info(&mut self, gate: i32, slot: SlotInfo) -> Result<(), BackendError> {
        self.core.check_gate(gate)?;
        self.set_slot_info(gate, slot);
        Ok(())
    }

    fn set_tool_mapping(&mut self, tool: i32, gate: i32) -> Result<(), BackendError> {
        if tool < 0 {
            return Err(BackendError::InvalidTool(tool));
        }
        let index = self.core.check_gate(gate)?;
        for slot in &mut self.core.slots {
            if slot.mapped_tool == tool {
                slot.mapped_tool = -1;
            }
        }
        self.core.slots[index].mapped_tool = tool;
        self.core.emit(BackendEvent::StateChanged);
        Ok(())
    }

    fn enable_bypass(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.enable_bypass_now();
        self.core.emit(BackendEvent::StateChanged);
        Ok(())
    }

    fn disable_bypass(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        if self.core.info.current_gate == GATE_BYPASS {
            self.core.info.current_gate = GATE_NONE;
            self.core.info.filament_loaded = false;
            self.core.segment = PathSegment::None;
            self.core.emit(BackendEvent::StateChanged);
        }
        Ok(())
    }

    fn update_slot_weights(&mut self, gate: i32, remaining_g: f64, total_g: f64) -> bool {
        self.core.update_slot_weights(gate, remaining_g, total_g)
    }
}
