//! HTTP handler definitions for the SOAP endpoint.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod soap;

pub use soap::soap_handler;

use std::sync::Arc;

use crate::service::Dispatcher;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
pub struct AppState<B> {
    /// Decoder, middleware chain and handler table for inbound messages.
    pub dispatcher: Arc<Dispatcher<B>>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}
