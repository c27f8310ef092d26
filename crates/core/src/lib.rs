pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{ForwarderError, ForwarderResult};
pub use types::{
    CanonicalEventRecord, ClientContext, DispatchOptions, DispatchRequest, EventKind, Payload,
    RawEvent, Region,
};
