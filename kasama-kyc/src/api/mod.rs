//! HTTP API for kasama-kyc
//!
//! **[KYC-API-010]** Submission intake, status queries, human review, SSE
//! events, and health.

mod events;
mod health;
mod review;
mod submissions;

pub use events::event_stream;
pub use health::health_routes;
pub use review::review_routes;
pub use submissions::submission_routes;
