use crate::config::Config;

/// A single entry in the dispatch table.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub prefix: String,
    pub host: String,
    pub port: u16,
    pub strip_prefix: bool,
}

/// Resolved destination for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl BackendTarget {
    /// Render the outbound URL, appending the original query string verbatim.
    pub fn url(&self, query: Option<&str>) -> String {
        match query {
            Some(q) => format!("http://{}:{}{}?{}", self.host, self.port, self.path, q),
            None => format!("http://{}:{}{}", self.host, self.port, self.path),
        }
    }
}

/// Ordered prefix-to-backend mapping. Built once at startup and never
/// mutated afterwards.
///
/// Matching is first-match-in-table-order, not longest-prefix: when two
/// prefixes both match a path, the one listed earlier wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
    default_host: String,
    default_port: u16,
}

impl RouteTable {
    pub fn from_config(config: &Config) -> Self {
        let routes = config
            .routes
            .iter()
            .map(|r| Route {
                name: r.name.clone(),
                prefix: r.prefix.clone(),
                host: r.host.clone(),
                port: r.port,
                strip_prefix: r.strip_prefix,
            })
            .collect();

        Self {
            routes,
            default_host: config.default_backend.host.clone(),
            default_port: config.default_backend.port,
        }
    }

    /// Resolve a request path to a backend target.
    ///
    /// Unmatched paths are not an error: they resolve to the default
    /// backend with the path unchanged.
    pub fn resolve(&self, path: &str) -> BackendTarget {
        for route in &self.routes {
            if !path.starts_with(route.prefix.as_str()) {
                continue;
            }

            let forwarded = if route.strip_prefix {
                let rest = &path[route.prefix.len()..];
                if rest.is_empty() {
                    // An empty path is not a valid request target.
                    "/".to_string()
                } else {
                    rest.to_string()
                }
            } else {
                path.to_string()
            };

            return BackendTarget {
                host: route.host.clone(),
                port: route.port,
                path: forwarded,
            };
        }

        BackendTarget {
            host: self.default_host.clone(),
            port: self.default_port,
            path: if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            },
        }
    }

    /// Name of the route a path resolves to, for access logs.
    pub fn route_name(&self, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|route| path.starts_with(route.prefix.as_str()))
            .map(|route| route.name.as_str())
    }
}
