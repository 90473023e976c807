//! `relayd-client`: network side of relayd.
//!
//! ```text
//! Controller::tick ──► Request::Poll / Request::Report
//!        ▲                      │
//!        │                      ▼ tokio::spawn
//!  complete_poll /       DispatchClient (reqwest)
//!  complete_report ◄── mpsc ◄──┘
//! ```
//!
//! The core crate stays synchronous; this crate owns the runtime, the HTTP
//! client and the loop that glues them together.

pub mod client;
pub mod error;
pub mod runner;

pub use client::DispatchClient;
pub use error::ClientError;
pub use runner::run;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClientError>;
