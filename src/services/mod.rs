/// OpenAPI documentation generation.
pub mod documentation;
/// Gate-side controller driving the detector from host messages.
pub mod gate_service;
/// Health check service.
pub mod health_service;
/// Motion detector seam and sampling task.
pub mod motion;
/// Host-side race orchestration.
pub mod race_service;
/// Fixed-delay retry schedule.
pub mod retry;
/// Peer session protocol engine.
pub mod session;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
