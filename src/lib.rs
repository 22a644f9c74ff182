pub mod config;
pub mod error;
pub mod proxy;
pub mod routes;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use proxy::Dispatcher;
pub use routes::{BackendTarget, RouteTable};
