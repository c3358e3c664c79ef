//! AFC (Armored Turtle) lane-based backend.
//!
//! State comes from the `AFC` printer object plus one object per lane,
//! `AFC_stepper <lane>` or `AFC_lane <lane>`. Lanes are addressed by name in
//! G-code; gate indices follow the order of `AFC.lanes`.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{send, AmsBackend, BackendCore, BackendError, BackendEvent, EventSink};
use crate::ams::types::{
    AmsAction, AmsSystemInfo, AmsType, GateInfo, GateStatus, PathSegment, PathTopology, SlotInfo,
    GATE_BYPASS, GATE_NONE,
};
use crate::moonraker::{
    bool_field, float_field, int_field, object_field, parse_tool_name, status_object, str_field,
    GcodeSender,
};
use crate::spoolman::{hex_to_rgb, rgb_to_hex};

const LANE_PREFIXES: [&str; 2] = ["AFC_stepper ", "AFC_lane "];

/// Sensor state of one lane.
#[derive(Debug, Clone, Default, PartialEq)]
struct LaneSensors {
    prep: bool,
    load: bool,
    loaded_to_hub: bool,
    tool_loaded: bool,
}

impl LaneSensors {
    fn segment(&self) -> PathSegment {
        if self.tool_loaded {
            PathSegment::Nozzle
        } else if self.loaded_to_hub {
            PathSegment::Hub
        } else if self.load {
            PathSegment::Lane
        } else if self.prep {
            PathSegment::Prep
        } else {
            PathSegment::Spool
        }
    }
}

pub struct AfcBackend {
    core: BackendCore,
    gcode: Arc<dyn GcodeSender>,
    lanes: Vec<String>,
    sensors: Vec<LaneSensors>,
    current_lane: Option<String>,
}

impl AfcBackend {
    pub fn new(gcode: Arc<dyn GcodeSender>) -> Self {
        Self {
            core: BackendCore::new(AmsType::Afc, PathTopology::Hub),
            gcode,
            lanes: Vec::new(),
            sensors: Vec::new(),
            current_lane: None,
        }
    }

    /// Create with a known lane list, e.g. from `printer.objects.list`.
    pub fn with_lanes<I, S>(gcode: Arc<dyn GcodeSender>, lanes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut backend = Self::new(gcode);
        backend.set_lanes(lanes.into_iter().map(Into::into).collect());
        backend
    }

    pub fn lane_names(&self) -> &[String] {
        &self.lanes
    }

    fn set_lanes(&mut self, lanes: Vec<String>) {
        if lanes == self.lanes {
            return;
        }
        info!(count = lanes.len(), "AFC lanes discovered");
        self.core.resize(lanes.len());
        self.sensors.resize(lanes.len(), LaneSensors::default());
        self.lanes = lanes;
    }

    fn lane_index(&self, name: &str) -> Option<usize> {
        self.lanes.iter().position(|l| l == name)
    }

    fn lane_name(&self, gate: i32) -> Result<&str, BackendError> {
        let index = self.core.check_gate(gate)?;
        Ok(self.lanes[index].as_str())
    }

    fn parse_afc(&mut self, afc: &Map<String, Value>) {
        if let Some(Value::Array(lanes)) = afc.get("lanes") {
            let names = lanes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            self.set_lanes(names);
        }

        match afc.get("current_lane") {
            Some(Value::String(lane)) => self.current_lane = Some(lane.clone()),
            Some(Value::Null) => self.current_lane = None,
            _ => {}
        }

        if let Some(state) = str_field(afc, "current_state") {
            self.core.info.action = AmsAction::from_firmware(state);
        }
        if bool_field(afc, "error_state") == Some(true) {
            self.core.info.action = AmsAction::Error;
        }

        if let Some(message) = object_field(afc, "message").and_then(|m| str_field(m, "message")) {
            self.core.info.operation_detail = message.to_string();
        }

        if let Some(cur) = int_field(afc, "current_toolchange") {
            self.core.info.current_toolchange = cur;
        }
        if let Some(total) = int_field(afc, "number_of_toolchanges") {
            self.core.info.number_of_toolchanges = total;
        }

        if let Some(bypass) = bool_field(afc, "bypass_state") {
            self.core.info.current_gate = if bypass { GATE_BYPASS } else { GATE_NONE };
        }
    }

    fn parse_lane(&mut self, index: usize, lane: &Map<String, Value>) {
        let sensors = &mut self.sensors[index];
        if let Some(v) = bool_field(lane, "prep") {
            sensors.prep = v;
        }
        if let Some(v) = bool_field(lane, "load") {
            sensors.load = v;
        }
        if let Some(v) = bool_field(lane, "loaded_to_hub") {
            sensors.loaded_to_hub = v;
        }
        if let Some(v) = bool_field(lane, "tool_loaded") {
            sensors.tool_loaded = v;
        }
        let present = sensors.prep || sensors.load;

        let slot = &mut self.core.slots[index];
        slot.slot_within_unit = index as i32;
        if let Some(color) = str_field(lane, "color") {
            match hex_to_rgb(color) {
                Some(rgb) => slot.color_rgb = rgb,
                None => debug!(color, "ignoring unparsable AFC lane colour"),
            }
        }
        if let Some(material) = str_field(lane, "material") {
            slot.material = material.to_string();
        }
        if let Some(spool_id) = int_field(lane, "spool_id") {
            slot.spoolman_id = spool_id.max(0);
        } else if lane.get("spool_id").is_some_and(Value::is_null) {
            slot.spoolman_id = 0;
        }
        if let Some(weight) = float_field(lane, "weight") {
            slot.remaining_weight_g = weight;
        }
        if let Some(map) = str_field(lane, "map") {
            slot.mapped_tool = parse_tool_name(map).unwrap_or(-1);
        }

        let status = str_field(lane, "status").map(str::to_ascii_lowercase);
        slot.status = match status.as_deref() {
            Some(s) if s.contains("error") => GateStatus::Error,
            Some(s) if s.contains("unload") => GateStatus::Unloading,
            Some(s) if s.contains("load") && !s.contains("loaded") => GateStatus::Loading,
            _ if present => GateStatus::Loaded,
            _ => GateStatus::Empty,
        };
    }

    /// Derive the current gate, tool and filament position from lane state.
    fn derive_position(&mut self) {
        if self.core.info.current_gate == GATE_BYPASS {
            self.core.info.filament_loaded = true;
            self.core.info.current_tool = -1;
            self.core.segment = PathSegment::Nozzle;
            return;
        }
        let current = self
            .current_lane
            .as_deref()
            .and_then(|name| self.lane_index(name));
        match current {
            Some(index) => {
                let sensors = &self.sensors[index];
                self.core.info.current_gate = index as i32;
                self.core.info.current_tool = self.core.slots[index].mapped_tool;
                self.core.info.filament_loaded = sensors.tool_loaded;
                self.core.segment = sensors.segment();
            }
            None => {
                self.core.info.current_gate = GATE_NONE;
                self.core.info.current_tool = -1;
                self.core.info.filament_loaded = false;
                self.core.segment = PathSegment::None;
            }
        }
    }

    fn apply_status(&mut self, status: &Map<String, Value>) {
        if let Some(afc) = object_field(status, "AFC") {
            self.parse_afc(afc);
        }
        for (key, value) in status {
            let Some(name) = LANE_PREFIXES.iter().find_map(|p| key.strip_prefix(p)) else {
                continue;
            };
            let Some(lane) = value.as_object() else {
                continue;
            };
            match self.lane_index(name) {
                Some(index) => self.parse_lane(index, lane),
                None => debug!(lane = name, "status for unknown AFC lane"),
            }
        }
        self.derive_position();
    }

    fn send(&self, script: &str) -> Result<(), BackendError> {
        send(self.gcode.as_ref(), script)
    }
}

impl AmsBackend for AfcBackend {
    fn start(&mut self) -> Result<(), BackendError> {
        self.core.start();
        info!(lanes = self.lanes.len(), "AFC backend started");
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
        AmsType::Afc
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
        let Some(status) = status_object(status) else {
            debug!("AFC status update without a status object");
            return false;
        };
        let before = (self.core.snapshot(), self.core.segment);
        self.apply_status(status);
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
        let lane = self.lane_name(gate)?;
        self.send(&format!("CHANGE_TOOL LANE={lane}"))
    }

    fn unload_filament(&mut self) -> Result<(), BackendError> {
        self.core.require_idle()?;
        self.send("TOOL_UNLOAD")
    }

    fn select_gate(&mut self, _gate: i32) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("select_gate".to_string()))
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
        self.send("AFC_RESUME")
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        self.core.require_running()?;
        self.send("AFC_RESET")
    }

    fn cancel(&mut self) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("cancel".to_string()))
    }

    fn set_gate_info(&mut self, gate: i32, slot: SlotInfo) -> Result<(), BackendError> {
        self.core.require_running()?;
        let lane = self.lane_name(gate)?.to_string();
        let color = rgb_to_hex(slot.color_rgb);
        let mut script = format!("SET_COLOR LANE={lane} COLOR={color}");
        if !slot.material.is_empty() {
            script.push_str(&format!("\nSET_MATERIAL LANE={lane} MATERIAL={}", slot.material));
        }
        if slot.spoolman_id > 0 {
            script.push_str(&format!("\nSET_SPOOL_ID LANE={lane} SPOOL_ID={}", slot.spoolman_id));
        }
        if slot.remaining_weight_g > 0.0 {
            script.push_str(&format!(
                "\nSET_WEIGHT LANE={lane} WEIGHT={:.0}",
                slot.remaining_weight_g
            ));
        }
        self.send(&script)?;

        let index = self.core.check_gate(gate)?;
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
        let lane = self.lane_name(gate)?;
        self.send(&format!("SET_MAP LANE={lane} MAP=T{tool}"))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moonraker::RecordingGcodeSender;
    use serde_json::json;
    use std::sync::Mutex;

    fn backend() -> (AfcBackend, Arc<RecordingGcodeSender>) {
        let sender = Arc::new(RecordingGcodeSender::new());
        let mut afc = AfcBackend::with_lanes(sender.clone(), ["lane1", "lane2", "lane3", "lane4"]);
        afc.start().expect("start");
        (afc, sender)
    }

    fn feed(afc: &mut AfcBackend, afc_obj: Value) -> bool {
        afc.handle_status_update(&json!({ "params": [{ "AFC": afc_obj }, 0.0] }))
    }

    #[test]
    fn toolchange_fields_are_read() {
        let (mut afc, _) = backend();
        feed(&mut afc, json!({"current_toolchange": 2, "number_of_toolchanges": 5}));
        let info = afc.system_info();
        assert_eq!(info.current_toolchange, 2);
        assert_eq!(info.number_of_toolchanges, 5);
    }

    #[test]
    fn missing_toolchange_fields_keep_defaults() {
        let (mut afc, _) = backend();
        feed(&mut afc, json!({"current_state": "Idle"}));
        let info = afc.system_info();
        assert_eq!(info.current_toolchange, -1);
        assert_eq!(info.number_of_toolchanges, 0);
    }

    #[test]
    fn null_toolchange_fields_keep_previous_values() {
        let (mut afc, _) = backend();
        feed(&mut afc, json!({"current_toolchange": 1, "number_of_toolchanges": 3}));
        feed(&mut afc, json!({"current_toolchange": null, "number_of_toolchanges": null}));
        let info = afc.system_info();
        assert_eq!(info.current_toolchange, 1);
        assert_eq!(info.number_of_toolchanges, 3);
    }

    #[test]
    fn before_first_swap_index_stays_minus_one() {
        let (mut afc, _) = backend();
        feed(&mut afc, json!({"current_toolchange": -1, "number_of_toolchanges": 5}));
        let info = afc.system_info();
        assert_eq!(info.current_toolchange, -1);
        assert_eq!(info.number_of_toolchanges, 5);
    }

    #[test]
    fn print_complete_reset_reports_zero() {
        let (mut afc, _) = backend();
        feed(&mut afc, json!({"current_toolchange": 4, "number_of_toolchanges": 5}));
        feed(&mut afc, json!({"current_toolchange": 0, "number_of_toolchanges": 0}));
        let info = afc.system_info();
        assert_eq!(info.current_toolchange, 0);
        assert_eq!(info.number_of_toolchanges, 0);
    }

    #[test]
    fn lanes_are_discovered_from_status() {
        let sender = Arc::new(RecordingGcodeSender::new());
        let mut afc = AfcBackend::new(sender);
        feed(&mut afc, json!({"lanes": ["lane1", "lane2"]}));
        assert_eq!(afc.lane_names(), ["lane1".to_string(), "lane2".to_string()]);
        assert_eq!(afc.system_info().total_gates, 2);
        assert_eq!(afc.gate_info(1).gate_index, 1);
    }

    #[test]
    fn lane_objects_fill_gates_and_position() {
        let (mut afc, _) = backend();
        let changed = afc.handle_status_update(&json!({"params": [{
            "AFC": {"current_lane": "lane2", "current_state": "Idle"},
            "AFC_stepper lane2": {
                "prep": true, "load": true, "loaded_to_hub": true, "tool_loaded": true,
                "color": "#1E88E5", "material": "PETG", "spool_id": 7, "weight": 455.5,
                "map": "T1", "status": "Loaded"
            },
            "AFC_lane lane3": {"prep": false, "load": false, "color": "FF0000"}
        }, 0.0]}));
        assert!(changed);

        let info = afc.system_info();
        assert_eq!(info.current_gate, 1);
        assert_eq!(info.current_tool, 1);
        assert!(info.filament_loaded);
        assert_eq!(info.gates[1].color_rgb, 0x1E88E5);
        assert_eq!(info.gates[1].material, "PETG");
        assert_eq!(info.gates[1].spoolman_id, 7);
        assert_eq!(info.gates[1].status, GateStatus::Loaded);
        assert_eq!(info.gates[2].status, GateStatus::Empty);
        assert_eq!(info.gates[2].color_rgb, 0xFF0000);
        assert_eq!(afc.slot_info(1).remaining_weight_g, 455.5);
        assert_eq!(afc.filament_segment(), PathSegment::Nozzle);
        assert_eq!(afc.topology(), PathTopology::Hub);
    }

    #[test]
    fn bypass_and_error_state() {
        let (mut afc, _) = backend();
        feed(&mut afc, json!({"bypass_state": true}));
        assert_eq!(afc.system_info().current_gate, GATE_BYPASS);
        assert!(afc.is_bypass_active());

        feed(&mut afc, json!({"bypass_state": false, "error_state": true,
                              "message": {"message": "Lane 2 jammed", "type": "error"}}));
        let info = afc.system_info();
        assert_eq!(info.action, AmsAction::Error);
        assert_eq!(info.operation_detail, "Lane 2 jammed");
        assert_eq!(info.current_gate, GATE_NONE);
    }

    #[test]
    fn unchanged_update_emits_nothing() {
        let (mut afc, _) = backend();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        afc.set_event_sink(Some(Arc::new(move |ev: BackendEvent| sink.lock().unwrap().push(ev))));

        assert!(feed(&mut afc, json!({"current_state": "Tool Loading"})));
        assert!(!feed(&mut afc, json!({"current_state": "Tool Loading"})));
        assert_eq!(*events.lock().unwrap(), vec![BackendEvent::StateChanged]);
    }

    #[test]
    fn operations_send_lane_gcode() {
        let (mut afc, sender) = backend();
        afc.load_filament(2).expect("load");
        assert_eq!(sender.last_script().as_deref(), Some("CHANGE_TOOL LANE=lane3"));
        afc.set_tool_mapping(0, 3).expect("map");
        assert_eq!(sender.last_script().as_deref(), Some("SET_MAP LANE=lane4 MAP=T0"));
        afc.unload_filament().expect("unload");
        assert_eq!(sender.last_script().as_deref(), Some("TOOL_UNLOAD"));
        assert_eq!(afc.load_filament(9), Err(BackendError::InvalidGate(9)));
        assert!(matches!(afc.enable_bypass(), Err(BackendError::NotSupported(_))));
    }

    #[test]
    fn set_gate_info_sends_lane_settings_and_emits_gate_changed() {
        let (mut afc, sender) = backend();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        afc.set_event_sink(Some(Arc::new(move |ev: BackendEvent| sink.lock().unwrap().push(ev))));

        let slot = SlotInfo {
            color_rgb: 0x00FF00,
            material: "PLA".to_string(),
            spoolman_id: 3,
            ..SlotInfo::empty(0)
        };
        afc.set_gate_info(0, slot).expect("set gate info");
        assert_eq!(
            sender.last_script().as_deref(),
            Some("SET_COLOR LANE=lane1 COLOR=00FF00\nSET_MATERIAL LANE=lane1 MATERIAL=PLA\nSET_SPOOL_ID LANE=lane1 SPOOL_ID=3")
        );
        assert_eq!(afc.gate_info(0).color_rgb, 0x00FF00);
        assert_eq!(*events.lock().unwrap(), vec![BackendEvent::GateChanged(0)]);
    }

    #[test]
    fn operations_rejected_while_busy_or_stopped() {
        let (mut afc, sender) = backend();
        feed(&mut afc, json!({"current_state": "Tool Loading"}));
        assert_eq!(afc.load_filament(0), Err(BackendError::Busy));
        afc.stop();
        assert_eq!(afc.reset(), Err(BackendError::NotRunning));
        assert!(sender.scripts().is_empty());
    }
}
