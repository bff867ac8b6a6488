//! HTTP API handlers for vfd-analyzer
//!
//! REST for submission, status, results and anchoring; SSE and WebSocket
//! for per-job progress.

pub mod analyze;
pub mod anchor;
pub mod health;
pub mod progress;
pub mod results;

pub use analyze::analyze_routes;
pub use anchor::anchor_routes;
pub use health::health_routes;
pub use progress::progress_routes;
pub use results::result_routes;
