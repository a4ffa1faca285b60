//! # Portico
//!
//! Portico compiles a declarative API description (service name, RPC
//! methods, HTTP path bindings, backend routing rules, authentication
//! providers, quota rules, CORS policy) plus a set of deployment options
//! into the configuration an Envoy proxy needs to route and police
//! traffic: upstream clusters, a request-matching route table, and an
//! ordered HTTP filter chain.
//!
//! This is a configuration compiler, not a request-serving runtime. A
//! compilation run is single-threaded and deterministic over in-memory
//! data; the only network access is the optional OpenID Connect key-set
//! discovery for providers without an explicit `jwks_uri`. A run either
//! returns a complete, immutable [`ProxyConfig`] or an error - partial
//! state is never exposed.
//!
//! ## Pipeline
//!
//! ```text
//! ServiceDescription + Options
//!         │
//!         ▼
//!   Service Model (ordered pure build stages)
//!         │
//!         ├── Cluster Resolver  ──►  clusters
//!         ├── Filter Pipeline   ──►  HTTP filter chain + per-route overrides
//!         └── Route Pipeline    ──►  route table
//!         │
//!         ▼
//!   Listener assembly  ──►  ProxyConfig { clusters, listener }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use portico::{compile, Options, ServiceDescription};
//!
//! # fn main() -> portico::Result<()> {
//! let description: ServiceDescription = serde_json::from_value(serde_json::json!({
//!     "name": "bookstore.example.com",
//!     "apis": [{
//!         "name": "bookstore.Bookstore",
//!         "methods": [{ "name": "ListShelves" }]
//!     }],
//!     "http_rules": [{
//!         "selector": "bookstore.Bookstore.ListShelves",
//!         "pattern": { "get": { "path": "/v1/shelves" } }
//!     }]
//! }))
//! .expect("valid description");
//!
//! let config = compile(&description, &Options::default())?;
//! assert_eq!(config.clusters.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod model;
pub mod observability;
pub mod proto;
pub mod template;
pub mod xds;

pub use config::Options;
pub use errors::{Error, Result};
pub use model::discovery::KeySetResolver;
pub use model::{ServiceDescription, ServiceModel};
pub use observability::init_tracing;
pub use xds::{compile, compile_with_resolver, ProxyConfig};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_available() {
        assert!(!VERSION.is_empty());
    }
}
