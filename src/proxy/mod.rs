pub mod dispatcher;

pub use dispatcher::Dispatcher;

/// Proxy request context
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub request_id: String,
    pub client_ip: std::net::IpAddr,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub start_time: std::time::Instant,
}

/// Backend response, read fully before being relayed.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: u16,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}
