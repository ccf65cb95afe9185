//! X-Road service dispatcher, middleware chain, HTTP endpoint and client.
//!
//! The receiving side is a [`Dispatcher`]: a table of handlers keyed by
//! service code, wrapped in a tower middleware chain (fault translation,
//! panic recovery, header logging) and exposed over HTTP by
//! [`NetworkModule`]. The calling side is a [`Client`] over a pluggable
//! [`Transport`].

pub mod body;
pub mod client;
pub mod logging;
pub mod network;
pub mod service;

pub use client::{Client, ClientError, RequestConfig, Transport};
pub use logging::{init_tracing, LogFormat};
pub use network::{NetworkConfig, NetworkModule};
pub use service::{
    handler_fn, DispatchError, Dispatcher, DispatcherConfig, ServiceRouter, SoapHandler,
    SoapRequest, SoapResponse,
};
