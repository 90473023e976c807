pub mod body;
pub mod channel;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod io;
pub mod notifier;
pub mod output;
pub mod service;
pub mod source;

pub use clock::{Clock, Millis, MonotonicClock};
pub use controller::{Controller, Request, Snapshot};
pub use error::{RelayError, Result};
