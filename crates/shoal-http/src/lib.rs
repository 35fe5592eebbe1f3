//! Control-plane REST surface for the Shoal gateway.
//!
//! JSON over HTTP: health, bucket views and stats, presigned-URL
//! generation, placement listing, and the operation-counter reset. Error
//! payloads are `{"error": ...}` with statuses derived from the core
//! error taxonomy.

pub mod handlers;
pub mod response;
pub mod router;
pub mod service;

pub use handlers::ApiState;
pub use service::ControlPlaneService;
