//! Prometheus scrape endpoint.
//!
//! Serves the OpenTelemetry Prometheus exporter's registry as text exposition
//! format on `GET /metrics`; every other path answers 404.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Bind `addr` and serve scrapes until `shutdown` becomes `true`.
pub async fn serve(
    addr: SocketAddr,
    registry: Registry,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {addr}"))?;
    serve_listener(listener, registry, shutdown).await
}

async fn serve_listener(
    listener: TcpListener,
    registry: Registry,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Prometheus metrics server listening");

    loop {
        let (stream, _) = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => accepted.context("Metrics server accept error")?,
        };

        let registry = registry.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = render(req.uri().path(), &registry);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                error!("Metrics server connection error: {}", e);
            }
        });
    }

    info!("Prometheus metrics server stopped");
    Ok(())
}

fn render(path: &str, registry: &Registry) -> Response<Full<Bytes>> {
    if path != "/metrics" {
        return respond(StatusCode::NOT_FOUND, "text/plain", Bytes::from_static(b"not found"));
    }

    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        Ok(()) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, Bytes::from(buffer)),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from_static(b"failed to encode metrics"),
            )
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::InstrumentRegistry;
    use crate::probes::ProbeResult;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn exporting_provider(registry: &Registry) -> SdkMeterProvider {
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();
        SdkMeterProvider::builder().with_reader(exporter).build()
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let response = render("/", &Registry::new());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_metrics_rendered_as_text_format() {
        let registry = Registry::new();
        let provider = exporting_provider(&registry);
        let instruments = InstrumentRegistry::new(Arc::new(provider.meter("pingward")));
        instruments.record(&ProbeResult::success("a.example", 12));

        let response = render("/metrics", &registry);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );
    }

    #[tokio::test]
    async fn test_scrape_over_http_then_shutdown() {
        let registry = Registry::new();
        let provider = exporting_provider(&registry);
        let instruments = InstrumentRegistry::new(Arc::new(provider.meter("pingward")));
        instruments.record(&ProbeResult::success("a.example", 12));
        instruments.record(&ProbeResult::failure("b.example"));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve_listener(listener, registry, shutdown_rx));

        let body = get(addr, "/metrics").await;
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("ping_host_success"));
        assert!(body.contains(r#"host="a.example""#));
        assert!(body.contains(r#"status="failure""#));
        assert!(body.contains("ping_roundtrip_time"));

        let body = get(addr, "/other").await;
        assert!(body.starts_with("HTTP/1.1 404 Not Found"));

        shutdown_tx.send_replace(true);
        server.await.unwrap().unwrap();
    }
}
