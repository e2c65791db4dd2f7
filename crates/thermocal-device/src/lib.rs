//! Thermocal device crate - client for the smart device management API.
//!
//! Covers the authenticated HTTP client (redirects, single retry on 401,
//! typed errors, request spacing), topology parsing, command envelopes, the
//! OAuth token file, and the gateway the executor drives.

pub mod client;
pub mod commands;
pub mod error;
pub mod gateway;
pub mod token;
pub mod topology;
pub mod transport;

pub use client::DeviceClient;
pub use commands::DeviceCommand;
pub use error::DeviceError;
pub use gateway::{DeviceGateway, SdmGateway, StructureSnapshot};
pub use token::FileTokenProvider;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
