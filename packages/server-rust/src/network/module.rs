//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. Callers learn the bound port between `start()` and
//! `serve()`, which is what tests on an OS-assigned port rely on.

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;
use xroad_core::FromXml;

use super::config::NetworkConfig;
use super::handlers::{soap_handler, AppState};
use super::middleware::build_http_layers;
use crate::service::Dispatcher;

/// Manages the HTTP server lifecycle for one dispatcher.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- takes the configuration and the shared dispatcher
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- begins accepting connections until shutdown is signalled
pub struct NetworkModule<B> {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    dispatcher: Arc<Dispatcher<B>>,
}

impl<B: FromXml + Send + 'static> NetworkModule<B> {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, dispatcher: Dispatcher<B>) -> Self {
        Self {
            config,
            listener: None,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Returns a shared reference to the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher<B>> {
        Arc::clone(&self.dispatcher)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `POST /` -- SOAP endpoint (XML or multipart/related)
    ///
    /// Every other path falls through to axum's 404.
    pub fn build_router(&self) -> Router {
        router(&self.config, Arc::clone(&self.dispatcher))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then lets in-flight
    /// requests finish.
    ///
    /// Consumes `self` because the listener is moved into the server.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server
    /// hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = router(&self.config, self.dispatcher);

        info!("Serving SOAP endpoint");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("SOAP endpoint stopped");
        Ok(())
    }
}

fn router<B: FromXml + Send + 'static>(
    config: &NetworkConfig,
    dispatcher: Arc<Dispatcher<B>>,
) -> Router {
    let state = AppState { dispatcher };
    let layers = build_http_layers(config);

    // The size cap is enforced by `RequestBodyLimitLayer` in `layers`.
    Router::new()
        .route("/", post(soap_handler::<B>))
        .layer(DefaultBodyLimit::disable())
        .layer(layers)
        .with_state(state)
}
