//! Clients for a running Home Assistant instance
//!
//! - [`RestClient`] calls services over the REST API
//!   (`POST /api/services/<domain>/<service>`)
//! - [`EventStream`] subscribes to events over the websocket API and
//!   fires them onto a local [`ha_event_bus::EventBus`]

mod error;
mod rest;
mod websocket;

pub use error::{RemoteError, RemoteResult};
pub use rest::{RestClient, ServiceCaller};
pub use websocket::{EventStream, EventStreamHandle};

/// Default address of a local Home Assistant instance
pub const DEFAULT_BASE_URL: &str = "http://localhost:8123";
