// syndesis-api: Async transport and change-event stream client for the Syndesis REST API

pub mod client;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod transport;

pub use client::{ApiClient, ResourceEndpoints, XsrfConfig};
pub use endpoints::{Endpoint, EndpointParams, EndpointRegistry, ParamValue};
pub use error::Error;
pub use events::{
    ChangeAction, ChangeEvent, EventStream, EventStreamConfig, EventTransport, ReconnectConfig, StreamState,
};
pub use transport::{TlsMode, TransportConfig};
