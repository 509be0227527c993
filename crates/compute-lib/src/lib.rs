//! Core library for the compute API service
//!
//! This crate provides:
//! - Pure numeric engine functions over arbitrary-precision integers
//! - The compute dispatcher (worker isolation + result memoization)
//! - The SQLite-backed result store and request audit log
//! - The background host resource sampler
//! - Health checks and Prometheus observability

pub mod dispatch;
pub mod engine;
pub mod health;
pub mod models;
pub mod observability;
pub mod sampler;
pub mod store;

pub use dispatch::{ComputeError, Dispatcher, DispatcherConfig};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::ServiceMetrics;
pub use sampler::{HostSampler, ResourceProbe, SamplerConfig, SamplerState};
pub use store::{ResultStore, SqliteStore, StoreError};
