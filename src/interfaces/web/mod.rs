mod handlers;
mod router;

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::error::{SmithError, SmithResult};
use crate::core::registry::EndpointRegistry;

/// Successive ports probed after the preferred one is taken.
const MAX_PORT_ATTEMPTS: u16 = 10;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) registry: Arc<EndpointRegistry>,
}

/// Embedded HTTP server. Binding happens before the registry is built so
/// the registry can compose access URLs from the final port; `serve` then
/// hands the listener to a background worker that lives until process exit.
pub struct ApiServer {
    listener: TcpListener,
    host: String,
    port: u16,
}

impl ApiServer {
    /// Bind the preferred port, falling back across the next
    /// `MAX_PORT_ATTEMPTS` ports on conflict. Pass port 0 to let the OS
    /// choose (tests do).
    pub async fn bind(host: &str, preferred_port: u16) -> SmithResult<Self> {
        for offset in 0..MAX_PORT_ATTEMPTS {
            let candidate = preferred_port.saturating_add(offset);
            match TcpListener::bind((host, candidate)).await {
                Ok(listener) => {
                    let port = listener
                        .local_addr()
                        .map_err(|e| SmithError::Internal(format!("no local addr: {e}")))?
                        .port();
                    return Ok(ApiServer {
                        listener,
                        host: host.to_string(),
                        port,
                    });
                }
                Err(e) => {
                    warn!(port = candidate, error = %e, "port unavailable, trying next");
                }
            }
            if preferred_port == 0 {
                break;
            }
        }
        Err(SmithError::Internal(format!(
            "could not bind a port after {MAX_PORT_ATTEMPTS} attempts from {preferred_port}"
        )))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Start serving on a background worker. The worker terminates with the
    /// process; there is no explicit shutdown.
    pub fn serve(self, registry: Arc<EndpointRegistry>) {
        let state = AppState { registry };
        let app = router::build_router(state, self.port);
        let base_url = self.base_url();

        tokio::spawn(async move {
            info!("API server running at {base_url}");
            if let Err(e) = axum::serve(self.listener, app).await {
                error!("API server crashed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_falls_back_when_preferred_port_is_taken() {
        let first = ApiServer::bind("127.0.0.1", 0).await.unwrap();
        let taken = first.port();

        let second = ApiServer::bind("127.0.0.1", taken).await.unwrap();
        assert_ne!(second.port(), taken);
        assert!(second.port() > taken);
        assert!(second.port() <= taken + MAX_PORT_ATTEMPTS);
    }

    #[tokio::test]
    async fn base_url_reflects_the_bound_port() {
        let server = ApiServer::bind("127.0.0.1", 0).await.unwrap();
        assert_eq!(
            server.base_url(),
            format!("http://127.0.0.1:{}", server.port())
        );
    }
}
