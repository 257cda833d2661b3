//! HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! GatewayClient verb (client.rs)
//!     → request.rs (endpoint class, query string, per-call options)
//!     → [GET only] resilience::dedup (one in-flight request per key)
//!     → pipeline.rs (offline gate, credential headers, correlation ID)
//!     → transport.rs (reqwest, or an injected Transport)
//!     → response.rs (classify failures, unwrap success envelope)
//!     → [401] auth::refresh, replay once
//! ```

pub mod client;
pub mod correlation;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod transport;

pub use client::{BuildError, GatewayClient, GatewayClientBuilder};
pub use correlation::{CorrelationId, X_CORRELATION_ID};
pub use pipeline::X_API_KEY;
pub use request::{EndpointClass, EndpointRules, RequestOptions};
pub use reqwest::Method;
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
