#![warn(clippy::unwrap_used)]

//! Outbound delivery of canonical records to the Amplitude HTTP API.
//!
//! # Modules
//!
//! - [`transport`]: HTTP seam ([`Transport`]) with a reqwest implementation
//!   and a recording stub for tests
//! - [`dispatcher`]: request envelope, endpoint selection, fire-and-forget send

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{Dispatcher, Endpoints};
pub use transport::{HttpTransport, RecordedRequest, RecordingTransport, Transport, TransportResponse};
