mod handler;
mod model;

pub use handler::{check, get_record, health, reset_record, run_cleanup};
pub use model::{
    CheckRequest, CheckResponse, CleanupResponse, HealthResponse, RecordResponse, ResetResponse,
    RuleRequest,
};
