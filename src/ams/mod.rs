//! Automatic Material System: canonical model, backends and the state
//! engine that publishes them to the UI.

pub mod backend;
pub mod state;
pub mod step_operation;
pub mod types;

pub use backend::{AmsBackend, Backend, BackendError, BackendEvent, EventSink};
pub use state::{AmsState, SPOOLMAN_POLL_INTERVAL};
pub use step_operation::{detect_step_operation, StepOperationResult, StepOperationType};
pub use types::{
    AmsAction, AmsSystemInfo, AmsType, GateInfo, GateStatus, PathSegment, PathTopology, SlotInfo,
    DEFAULT_GATE_COLOR, GATE_BYPASS, GATE_NONE, MAX_GATES,
};
