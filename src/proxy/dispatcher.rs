use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{ProxiedResponse, ProxyContext};
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::routes::{BackendTarget, RouteTable};

/// Forwarding dispatcher: resolves each inbound request against the route
/// table and relays it to the resolved backend over a shared connection pool.
///
/// Constructed once at startup with its full configuration; holds no
/// per-request state.
pub struct Dispatcher {
    table: RouteTable,
    client: reqwest::Client,
    request_timeout: Duration,
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

impl Dispatcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let table = RouteTable::from_config(config);

        // Backends speak plain HTTP on loopback; redirects they emit are
        // part of their response and must be relayed, never followed, and
        // the outbound hop must not pick up ambient proxy settings.
        let client = reqwest::Client::builder()
            .timeout(config.client.timeout)
            .connect_timeout(config.client.connect_timeout)
            .pool_idle_timeout(config.client.pool_idle_timeout)
            .pool_max_idle_per_host(config.client.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            table,
            client,
            request_timeout: config.client.timeout,
        })
    }

    /// Build the inbound router: any method on any path reaches the
    /// dispatch handler.
    pub fn router(self: &Arc<Self>) -> Router {
        let state = AppState {
            dispatcher: self.clone(),
        };

        // The inbound timeout sits above the outbound deadline so the
        // outbound call always fails first and maps to a gateway status.
        let inbound_timeout = self.request_timeout + Duration::from_secs(10);

        Router::<AppState>::new()
            .route("/*path", any(handle_request))
            .fallback(handle_request)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(inbound_timeout))
                    .into_inner(),
            )
            .with_state(state)
    }

    /// Serve requests on an already-bound listener until the task is
    /// dropped or the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        let app = self.router();

        info!("Reverse proxy listening on {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| ProxyError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Process a single proxy request
    #[instrument(skip(self, req), fields(request_id, client_ip, method, path))]
    pub async fn dispatch(&self, req: Request, client_addr: SocketAddr) -> Result<Response> {
        let ctx = ProxyContext {
            request_id: Uuid::new_v4().to_string(),
            client_ip: client_addr.ip(),
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            query: req.uri().query().map(String::from),
            start_time: Instant::now(),
        };

        tracing::Span::current()
            .record("request_id", ctx.request_id.as_str())
            .record("client_ip", ctx.client_ip.to_string().as_str())
            .record("method", ctx.method.as_str())
            .record("path", ctx.path.as_str());

        let (parts, body) = req.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!("Failed to read request body: {}", e);
                return Err(ProxyError::BadRequest(format!(
                    "Failed to read request body: {}",
                    e
                )));
            }
        };

        let target = self.table.resolve(&ctx.path);

        info!(
            method = ctx.method.as_str(),
            path = ctx.path.as_str(),
            query = ctx.query.as_deref().unwrap_or(""),
            route = self.table.route_name(&ctx.path).unwrap_or("default"),
            backend_host = target.host.as_str(),
            backend_port = target.port,
            "dispatching request"
        );

        let proxied = self.forward(&ctx, &parts.headers, body_bytes, &target).await?;

        debug!(
            "Completed request {} in {}ms",
            ctx.request_id,
            ctx.start_time.elapsed().as_millis()
        );

        Ok(build_response(proxied))
    }

    async fn forward(
        &self,
        ctx: &ProxyContext,
        headers: &HeaderMap,
        body: Bytes,
        target: &BackendTarget,
    ) -> Result<ProxiedResponse> {
        let target_url = target.url(ctx.query.as_deref());

        debug!("Forwarding request {} to {}", ctx.request_id, target_url);

        // Convert method and headers by value across the axum/reqwest seam.
        let method = reqwest::Method::from_bytes(ctx.method.as_bytes())
            .map_err(|e| ProxyError::BadRequest(format!("Invalid method: {}", e)))?;
        let mut request_builder = self.client.request(method, &target_url);

        for (name, value) in headers.iter() {
            if !is_hop_by_hop_header(name.as_str()) {
                request_builder = request_builder.header(name.as_str(), value.as_bytes());
            }
        }

        if !body.is_empty() {
            request_builder = request_builder.body(body);
        }

        let response = request_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!("Upstream call for {} exceeded deadline: {}", ctx.request_id, e);
                ProxyError::Timeout(format!("No response within deadline: {}", e))
            } else {
                error!("Upstream request failed for {}: {}", ctx.request_id, e);
                ProxyError::Upstream(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status().as_u16();
        let response_headers = response.headers().clone();

        let response_body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProxyError::Timeout(format!("Response body stalled past deadline: {}", e))
            } else {
                ProxyError::Upstream(format!("Failed to read response body: {}", e))
            }
        })?;

        let mut converted_headers = HeaderMap::new();
        for (name, value) in response_headers.iter() {
            if let Ok(header_name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
                if let Ok(header_value) = HeaderValue::from_bytes(value.as_bytes()) {
                    converted_headers.append(header_name, header_value);
                }
            }
        }

        Ok(ProxiedResponse {
            status,
            headers: converted_headers,
            body: response_body,
        })
    }
}

async fn handle_request(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    match state.dispatcher.dispatch(req, client_addr).await {
        Ok(response) => response,
        Err(e) => {
            error!("Proxy request failed: {}", e);
            e.into_response()
        }
    }
}

/// Relay the backend response: same status, non-hop-by-hop headers and body.
/// Nothing is injected in either direction.
fn build_response(proxied: ProxiedResponse) -> Response {
    let mut response_builder = Response::builder().status(proxied.status);

    for (name, value) in proxied.headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    response_builder
        .body(Body::from(proxied.body))
        .unwrap_or_else(|e| {
            error!("Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

// Helper function to identify hop-by-hop headers
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_recognized_case_insensitively() {
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(is_hop_by_hop_header("Proxy-Authorization"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("x-forwarded-for"));
    }

    #[test]
    fn relay_drops_hop_by_hop_headers_and_keeps_the_rest() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("connection", HeaderValue::from_static("close"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let response = build_response(ProxiedResponse {
            status: 201,
            headers,
            body: Bytes::from_static(b"created"),
        });

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain"
        );
        assert!(response.headers().get("connection").is_none());
        assert_eq!(
            response
                .headers()
                .get_all("set-cookie")
                .iter()
                .collect::<Vec<_>>()
                .len(),
            2
        );
    }
}
