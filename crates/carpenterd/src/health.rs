//! Healthcheck endpoint.

use axum::Router;
use axum::http::{StatusCode, Uri};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Any path mentioning `healthcheck` answers `ok`, so `/healthcheck.html`
/// and friends work for load balancers that append a suffix.
pub fn router() -> Router {
    Router::new().fallback(healthcheck)
}

async fn healthcheck(uri: Uri) -> (StatusCode, &'static str) {
    if uri.path().contains("healthcheck") {
        (StatusCode::OK, "ok")
    } else {
        warn!(path = %uri.path(), "Unknown healthcheck route");
        (StatusCode::NOT_FOUND, "not found")
    }
}

/// Bind the healthcheck port on all interfaces.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Healthcheck listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve the healthcheck on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
    axum::serve(listener, router().layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Healthcheck stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(path: &str) -> (StatusCode, String) {
        let response = router()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthcheck_ok() {
        assert_eq!(get_path("/healthcheck").await, (StatusCode::OK, "ok".to_string()));
    }

    #[tokio::test]
    async fn test_healthcheck_variants_ok() {
        for path in ["/healthcheck.html", "/status/healthcheck", "/healthcheck?deep=1"] {
            assert_eq!(get_path(path).await, (StatusCode::OK, "ok".to_string()), "{path}");
        }
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        assert_eq!(
            get_path("/status").await,
            (StatusCode::NOT_FOUND, "not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_bind_occupied_port_fails() {
        let held = bind(0).await.unwrap();
        let port = held.local_addr().unwrap().port();
        assert!(bind(port).await.is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let listener = bind(0).await.unwrap();
        let server = tokio::spawn(serve(listener, shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
