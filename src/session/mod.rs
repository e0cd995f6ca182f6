//! Session lifecycle management.
//!
//! The registry is the authoritative in-memory table of live sessions; the
//! service drives the creation pipeline, teardown, push requests and idle
//! eviction; the slot pool bounds concurrent admissions.

mod error;
mod models;
mod registry;
mod service;
mod slots;

pub use error::{SessionError, SessionResult};
pub use models::{
    AgentConfigPayload, CreateSessionRequest, PermissionsConfig, Session, SessionDetails,
    SessionStatus, SessionSummary,
};
pub use registry::SessionRegistry;
pub use service::{SessionService, SessionServiceConfig};
pub use slots::SlotPool;
