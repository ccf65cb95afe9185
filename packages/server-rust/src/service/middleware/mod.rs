//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`fault`]: Translates errors into SOAP fault responses
//! - [`recover`]: Converts handler panics into errors
//! - [`header_log`]: Logs the identities of every inbound header
//! - [`dump`]: Logs raw requests and rendered responses in verbose mode
//! - [`pipeline`]: Composes an ordered middleware list around the router

pub mod dump;
pub mod fault;
pub mod header_log;
pub mod pipeline;
pub mod recover;

pub use dump::{dump_request, DumpLayer};
pub use fault::FaultLayer;
pub use header_log::HeaderLogLayer;
pub use pipeline::{
    build_pipeline, default_middlewares, verbose_middlewares, Middlewares, SoapMiddleware,
    SoapService,
};
pub use recover::RecoverLayer;
