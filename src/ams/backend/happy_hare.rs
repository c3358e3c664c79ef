//! Happy Hare MMU backend.
//!
//! Reads the `mmu` printer object. Gate arrays (`gate_status`,
//! `gate_color`, ...) are indexed by gate; `ttg_map` maps tool to gate.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{send, AmsBackend, BackendCore, BackendError, BackendEvent, EventSink};
use crate::ams::types::{
    AmsAction, AmsSystemInfo, AmsType, GateInfo, GateStatus, PathSegment, PathTopology, SlotInfo,
    GATE_BYPASS,
};
use crate::moonraker::{int_field, object_field, status_object, str_field, GcodeSender};
use crate::spoolman::{hex_to_rgb, rgb_to_hex};

/// Map Happy Hare's `filament_pos` onto the path model.
fn segment_for_position(pos: i32) -> PathSegment {
    match pos {
        i32::MIN..=-1 => PathSegment::None,
        0 => PathSegment::Spool,
        1 => PathSegment::Prep,
        2 | 3 => PathSegment::Lane,
        4 | 5 => PathSegment::Output,
        6..=9 => PathSegment::Toolhead,
        _ => PathSegment::Nozzle,
    }
}

fn gate_status(value: i64) -> GateStatus {
    match value {
        0 => GateStatus::Empty,
        1 | 2 => GateStatus::Loaded,
        _ => GateStatus::Unknown,
    }
}

pub struct HappyHareBackend {
    core: BackendCore,
    gcode: Arc<dyn GcodeSender>,
}

impl HappyHareBackend {
    pub fn new(gcode: Arc<dyn GcodeSender>) -> Self {
        Self {
            core: BackendCore::new(AmsType::HappyHare, PathTopology::Sequential),
            gcode,
        }
    }

    pub fn with_gates(gcode: Arc<dyn GcodeSender>, gates: usize) -> Self {
        let mut backend = Self::new(gcode);
        backend.core.resize(gates);
        backend
    }

    fn ensure_gates(&mut self, count: usize) {
        if count > self.core.slots.len() {
            info!(gates = count, "Happy Hare gate count");
            self.core.resize(count);
        }
    }

    fn apply_gate_arrays(&mut self, mmu: &Map<String, Value>) {
        let array = |key: &str| mmu.get(key).and_then(Value::as_array);

        if let Some(statuses) = array("gate_status") {
            self.ensure_gates(statuses.len());
            for (slot, v) in self.core.slots.iter_mut().zip(statuses) {
                slot.status = v.as_i64().map(gate_status).unwrap_or(GateStatus::Unknown);
            }
        }
        if let Some(colors) = array("gate_color") {
            self.ensure_gates(colors.len());
            for (slot, v) in self.core.slots.iter_mut().zip(colors) {
                match v.as_str().and_then(hex_to_rgb) {
                    Some(rgb) => slot.color_rgb = rgb,
                    None => slot.color_rgb = crate::ams::types::DEFAULT_GATE_COLOR,
                }
            }
        }
        if let Some(materials) = array("gate_material") {
            self.ensure_gates(materials.len());
            for (slot, v) in self.core.slots.iter_mut().zip(materials) {
                slot.material = v.as_str().unwrap_or_default().to_string();
            }
        }
        if let Some(spools) = array("gate_spool_id") {
            self.ensure_gates(spools.len());
            for (slot, v) in self.core.slots.iter_mut().zip(spools) {
                slot.spoolman_id = v
                    .as_i64()
                    .and_then(|id| i32::try_from(id).ok())
                    .filter(|id| *id > 0)
                    .unwrap_or(0);
            }
        }
        if let Some(ttg) = array("ttg_map") {
            for slot in &mut self.core.slots {
                slot.mapped_tool = -1;
            }
            for (tool, gate) in ttg.iter().enumerate() {
                let Some(gate) = gate.as_i64().and_then(|g| usize::try_from(g).ok()) else {
                    continue;
                };
                match self.core.slots.get_mut(gate) {
                    // First tool wins when several map to one gate.
                    Some(slot) if slot.mapped_tool < 0 => slot.mapped_tool = tool as i32,
                    Some(_) => {}
                    None => debug!(tool, gate, "ttg_map points past the last gate"),
                }
            }
        }
    }

    fn apply_mmu(&mut self, mmu: &Map<String, Value>) {
        self.apply_gate_arrays(mmu);

        if let Some(gate) = int_field(mmu, "gate") {
            self.core.info.current_gate = self.core.clamp_gate(gate);
        }
        if let Some(tool) = int_field(mmu, "tool") {
            self.core.info.current_tool = tool.max(-1);
        }
        if let Some(filament) = str_field(mmu, "filament") {
            self.core.info.filament_loaded = filament.eq_ignore_ascii_case("loaded");
        }
        if let Some(action) = str_field(mmu, "action") {
            self.core.info.action = AmsAction::from_firmware(action);
            self.core.info.operation_detail = if self.core.info.action == AmsAction::Idle {
                String::new()
            } else {
                action.to_string()
            };
        }
        if let Some(pos) = int_field(mmu, "filament_pos") {
            self.core.segment = segment_for_position(pos);
        }

        // Happy Hare counts completed swaps; the engine wants the index of
        // the last one.
        if let Some(count) = int_field(mmu, "num_toolchanges") {
            self.core.info.current_toolchange = if count > 0 { count - 1 } else { -1 };
        }
        if let Some(total) =
            object_field(mmu, "slicer_tool_map").and_then(|m| int_field(m, "total_toolchanges"))
        {
            self.core.info.number_of_toolchanges = total;
        }
    }

    fn send(&self, script: &str) -> Result<(), BackendError> {
        send(self.gcode.as_ref(), script)
    }
}

impl AmsBackend for HappyHareBackend {
    fn start(&mut self) -> Result<(), BackendError> {
        self.core.start();
        info!(gates = self.core.slots.len(), "Happy Hare backend started");
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
        AmsType::HappyHare
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

    fn handle_status_update(&mut self, status: &Value) -> bool {
        let Some(mmu) = status_object(status).and_then(|s| object_field(s, "mmu")) else {
            return false;
        };
        let before = (self.core.snapshot(), self.core.segment);
        self.apply_mmu(mmu);
        let changed = before != (self.core.snapshot(), self.core.segment);
        if changed {
            self.core.emit(BackendEvent::StateChanged);
        }
        changed
    }

    fn handle_gcode_response(&mut self, line: &str) -> bool {
        self.core.apply_gcode_response(line)
    }

    fn load_filament(&mut self, gate: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.core.check_gate(gate)?;
        self.send(&format!("MMU_SELECT GATE={gate}\nMMU_LOAD"))
    }

    fn unload_filament(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.send("MMU_UNLOAD")
    }

    fn select_gate(&mut self, gate: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.core.check_gate(gate)?;
        self.send(&format!("MMU_SELECT GATE={gate}"))
    }

    fn change_tool(&mut self, tool: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        if tool < 0 {
            return Err(BackendError::InvalidTool(tool));
        }
        self.send(&format!("MMU_CHANGE_TOOL TOOL={tool}"))
    }

    fn recover(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.send("MMU_RECOVER")
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.send("MMU_RESET CONFIRM=1")
    }

    fn cancel(&mut self) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("cancel".to_string()))
    }

    fn set_gate_info(&mut self, gate: i32, slot: SlotInfo) -> Result<(), BackendError> {
        self.core.require_running()?;
        let index = self.core.check_gate(gate)?;
        let spool_id = if slot.spoolman_id > 0 { slot.spoolman_id } else { -1 };
        let material = if slot.material.is_empty() { "unknown" } else { slot.material.as_str() };
        self.send(&format!(
            "MMU_GATE_MAP GATE={gate} COLOR={} MATERIAL={material} SPOOLID={spool_id}",
            rgb_to_hex(slot.color_rgb)
        ))?;

        let stored = &mut self.core.slots[index];
        stored.color_rgb = slot.color_rgb;
        stored.material = slot.material;
        stored.brand = slot.brand;
        stored.spoolman_id = slot.spoolman_id;
        stored.spoolman_filament_id = slot.spoolman_filament_id;
        stored.remaining_weight_g = slot.remaining_weight_g;
        stored.total_weight_g = slot.total_weight_g;
        self.core.emit(BackendEvent::GateChanged(gate));
        Ok(())
    }

    fn set_tool_mapping(&mut self, tool: i32, gate: i32) -> Result<(), BackendError> {
        self.core.require_running()?;
        if tool < 0 {
            return Err(BackendError::InvalidTool(tool));
        }
        self.core.check_gate(gate)?;
        self.send(&format!("MMU_TTG_MAP TOOL={tool} GATE={gate}"))
    }

    fn enable_bypass(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.send("MMU_SELECT_BYPASS")
    }

    fn disable_bypass(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        if self.core.info.current_gate != GATE_BYPASS {
            return Ok(());
        }
        self.send("MMU_UNLOAD")
    }

    fn update_slot_weights(&mut self, gate: i32, remaining_g: f64, total_g: f64) -> bool {
        self.core.update_slot_weights(gate, remaining_g, total_g)
    }
}
