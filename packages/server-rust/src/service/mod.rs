//! Service dispatch framework.
//!
//! This module implements the receiving side of an exchange:
//!
//! 1. **Decoding** (`dispatcher`): raw body + content type -> `SoapRequest`
//! 2. **Middleware** (`middleware`): Tower layers (fault translation, recovery, logging)
//! 3. **Routing** (`router`): Dispatch to handlers by service code, with a `*` fallback
//! 4. **Types** (`request`): Request, response and error types shared by every stage

pub mod config;
pub mod dispatcher;
pub mod middleware;
pub mod request;
pub mod router;

// Re-export key types for convenient access.
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use middleware::{Middlewares, SoapMiddleware, SoapService};
pub use request::{DispatchError, SoapFuture, SoapRequest, SoapResponse};
pub use router::{handler_fn, RouterService, ServiceRouter, SoapHandler, FALLBACK};
