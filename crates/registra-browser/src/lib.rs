//! Transport capability for legacy portals.
//!
//! The query engine never talks to the network directly; it drives a
//! [`PortalPage`] opened from a [`PortalTransport`]. Two transports are
//! provided: a cookie-jar HTTP client for plain and WebForms portals, and a
//! headless Chromium engine for client-rendered or framed portals.

pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod transport;

pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
pub use http::{HttpTransport, HttpTransportConfig};
pub use transport::{
    resolve_url, Document, FetchedBytes, FormMethod, FormSubmission, PortalPage, PortalTransport,
};
