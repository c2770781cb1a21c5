use std::net::SocketAddr;

use axum::Router;
use console::style;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::error::ServeError;
use crate::server::ServeConfig;

/// Binds the HTTP listener on localhost.
pub async fn bind(config: &ServeConfig) -> Result<TcpListener, ServeError> {
    let address = SocketAddr::from(([127, 0, 0, 1], config.port));
    TcpListener::bind(address)
        .await
        .map_err(|e| ServeError::Bind(address, e))
}

/// Static files: the base directory at `/`, plus one directory per route.
pub(crate) fn router(config: &ServeConfig) -> Router {
    let mut router = Router::new();
    for (route, dir) in &config.routes {
        router = router.nest_service(route, ServeDir::new(dir));
    }

    router.fallback_service(ServeDir::new(&config.base))
}

/// Serves on an already bound listener in the background.
pub(crate) fn start(listener: TcpListener, config: &ServeConfig) -> Result<(), ServeError> {
    let port = listener.local_addr()?.port();
    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    let router = router(config);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("HTTP server stopped: {e}");
        }
    });

    Ok(())
}
