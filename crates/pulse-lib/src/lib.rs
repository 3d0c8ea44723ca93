//! Network quality monitoring library
//!
//! This crate provides the core functionality for:
//! - Metric acquisition from a live transport or a bounded simulation
//! - Health classification and readiness scoring
//! - A fixed-capacity rolling history for charting
//! - The monitoring session and its timer-driven controller
//! - Health checks and observability

pub mod classifier;
pub mod health;
pub mod history;
pub mod models;
pub mod observability;
pub mod probe;
pub mod session;

pub use classifier::{classify_health, compute_readiness_score};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use history::{HistorySnapshot, HistorySummary, RollingHistory};
pub use models::*;
pub use observability::{PulseMetrics, StructuredLogger};
pub use probe::{Probe, ProbeError, ProbeKind, StatsSource};
pub use session::{
    DashboardSnapshot, Session, SessionConfig, SessionController, SessionControllerBuilder,
    SessionError, SessionHandle, SessionState,
};
