pub mod cost_guardrail;
pub mod idempotency;
pub mod identity;
pub mod intake_precheck;
pub mod intake_router;
pub mod jobs;
pub mod listing;
pub mod memory;
pub mod queue;
pub mod queue_router;
pub mod quota;
pub mod request_id;
pub mod state_store;
pub mod status_machine;
pub mod storage;
pub mod upload_rules;
