//! Hub-style (Bambu-like) backend: every gate merges at one hub before the
//! toolhead. State comes from a single `ams` printer object.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{send, AmsBackend, BackendCore, BackendError, BackendEvent, EventSink};
use crate::ams::types::{
    AmsAction, AmsSystemInfo, AmsType, GateInfo, GateStatus, PathSegment, PathTopology, SlotInfo,
};
use crate::moonraker::{
    bool_field, float_field, int_field, object_field, status_object, str_field, GcodeSender,
};
use crate::spoolman::{hex_to_rgb, rgb_to_hex};

fn parse_gate_status(text: &str) -> GateStatus {
    match text.trim().to_ascii_lowercase().as_str() {
        "empty" => GateStatus::Empty,
        "loaded" | "ready" | "available" => GateStatus::Loaded,
        "loading" => GateStatus::Loading,
        "unloading" => GateStatus::Unloading,
        "error" => GateStatus::Error,
        _ => GateStatus::Unknown,
    }
}

fn parse_segment(text: &str) -> PathSegment {
    match text.trim().to_ascii_lowercase().as_str() {
        "spool" => PathSegment::Spool,
        "prep" => PathSegment::Prep,
        "lane" => PathSegment::Lane,
        "hub" => PathSegment::Hub,
        "output" => PathSegment::Output,
        "toolhead" => PathSegment::Toolhead,
        "nozzle" => PathSegment::Nozzle,
        _ => PathSegment::None,
    }
}

pub struct HubBackend {
    core: BackendCore,
    gcode: Arc<dyn GcodeSender>,
}

impl HubBackend {
    pub fn new(gcode: Arc<dyn GcodeSender>) -> Self {
        Self {
            core: BackendCore::new(AmsType::Hub, PathTopology::Hub),
            gcode,
        }
    }

    fn apply_gate(&mut self, index: usize, gate: &Map<String, Value>) {
        let slot = &mut self.core.slots[index];
        if let Some(color) = str_field(gate, "color") {
            slot.color_rgb = hex_to_rgb(color).unwrap_or(crate::ams::types::DEFAULT_GATE_COLOR);
        }
        if let Some(material) = str_field(gate, "material") {
            slot.material = material.to_string();
        }
        if let Some(brand) = str_field(gate, "brand") {
            slot.brand = brand.to_string();
        }
        if let Some(status) = str_field(gate, "status") {
            slot.status = parse_gate_status(status);
        }
        if let Some(id) = int_field(gate, "spool_id") {
            slot.spoolman_id = id.max(0);
        }
        if let Some(tool) = int_field(gate, "tool") {
            slot.mapped_tool = tool.max(-1);
        }
        if let Some(unit) = int_field(gate, "unit") {
            slot.unit_index = unit.max(0);
        }
        if let Some(pos) = int_field(gate, "slot") {
            slot.slot_within_unit = pos.max(0);
        }
        if let Some(remaining) = float_field(gate, "remaining_weight") {
            slot.remaining_weight_g = remaining;
        }
    }

    fn apply_ams(&mut self, ams: &Map<String, Value>) {
        if let Some(Value::Array(gates)) = ams.get("gates") {
            if gates.len() != self.core.slots.len() {
                info!(gates = gates.len(), "hub gate count");
                self.core.resize(gates.len());
            }
            for (index, gate) in gates.iter().enumerate() {
                match gate.as_object() {
                    Some(gate) => self.apply_gate(index, gate),
                    None => debug!(index, "skipping malformed hub gate"),
                }
            }
        }

        let current_gate = int_field(ams, "current_gate").map(|g| self.core.clamp_gate(g));
        let info = &mut self.core.info;
        if let Some(gate) = current_gate {
            info.current_gate = gate;
        }
        if let Some(tool) = int_field(ams, "current_tool") {
            info.current_tool = tool.max(-1);
        }
        if let Some(loaded) = bool_field(ams, "filament_loaded") {
            info.filament_loaded = loaded;
        }
        if let Some(action) = str_field(ams, "action") {
            info.action = AmsAction::from_firmware(action);
        }
        if let Some(detail) = str_field(ams, "detail") {
            info.operation_detail = detail.to_string();
        }
        if let Some(cur) = int_field(ams, "current_toolchange") {
            info.current_toolchange = cur;
        }
        if let Some(total) = int_field(ams, "number_of_toolchanges") {
            info.number_of_toolchanges = total;
        }
        if let Some(segment) = str_field(ams, "filament_segment") {
            self.core.segment = parse_segment(segment);
        } else if !self.core.info.filament_loaded {
            self.core.segment = PathSegment::None;
        } else if self.core.segment == PathSegment::None {
            self.core.segment = PathSegment::Nozzle;
        }
    }

    fn send(&self, script: &str) -> Result<(), BackendError> {
        send(self.gcode.as_ref(), script)
    }
}

impl AmsBackend for HubBackend {
    fn start(&mut self) -> Result<(), BackendError> {
        self.core.start();
        info!("hub backend started");
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
        AmsType::Hub
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
        let Some(ams) = status_object(status).and_then(|s| object_field(s, "ams")) else {
            return false;
        };
        let before = (self.core.snapshot(), self.core.segment);
        self.apply_ams(ams);
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
        self.send(&format!("AMS_LOAD GATE={gate}"))
    }

    fn unload_filament(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.send("AMS_UNLOAD")
    }

    fn select_gate(&mut self, gate: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.core.check_gate(gate)?;
        self.send(&format!("AMS_SELECT GATE={gate}"))
    }

    fn change_tool(&mut self, tool: i32) -> Result<(), BackendError> {
        self.core.require_idle()?;
        if self.core.gate_for_tool(tool).is_none() {
            return Err(BackendError::InvalidTool(tool));
        }
        self.send(&format!("T{tool}"))
    }

    fn recover(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.send("AMS_RECOVER")
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.send("AMS_RESET")
    }

    fn cancel(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.send("AMS_CANCEL")
    }

    fn set_gate_info(&mut self, gate: i32, slot: SlotInfo) -> Result<(), BackendError> {
        self.core.require_running()?;
        let index = self.core.check_gate(gate)?;
        self.send(&format!(
            "AMS_SET_GATE GATE={gate} COLOR={} MATERIAL=\"{}\" BRAND=\"{}\" SPOOL_ID={}",
            rgb_to_hex(slot.color_rgb),
            slot.material,
            slot.brand,
            slot.spoolman_id
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
        self.send(&format!("AMS_MAP TOOL={tool} GATE={gate}"))
    }

    fn enable_bypass(&mut self) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("enable_bypass".to_string()))
    }

    fn disable_bypass(&mut self) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("disable_bypass".to_string()))
    }

    fn update_slot_weights(&mut self, gate: i32, remaining_g: f64, total_g: f64) -> bool {
        self.core.update_slot_weights(gate, remaining_g, total_g)
    }
}
