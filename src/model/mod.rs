//! Service model: the normalized intermediate representation.
//!
//! The model is built once per compilation run from the immutable input
//! description and options, through an explicitly ordered pipeline of pure
//! stages (see [`builder`]). Everything downstream - cluster resolution,
//! route generation, filter generation - reads the model and never mutates
//! it.

pub mod builder;
pub mod descriptor;
pub mod discovery;
pub mod service;

use std::collections::BTreeMap;

use url::Url;

use crate::errors::{Error, Result};
use crate::template::UriTemplate;

pub use service::{PathTranslation, ServiceDescription};

/// Selector of the generated health-check method.
pub const HEALTH_CHECK_SELECTOR: &str = "portico.health.Check";

/// API name of discovery-only services, skipped unless explicitly allowed.
pub const DISCOVERY_API_NAME: &str = "google.discovery.Discovery";

/// One HTTP method + URI template binding of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPattern {
    /// HTTP method token; `*` matches any method.
    pub http_method: String,
    pub template: UriTemplate,
}

/// Application protocol spoken toward a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendProtocol {
    Http1,
    Http2,
    Grpc,
}

impl BackendProtocol {
    pub fn is_grpc(self) -> bool {
        matches!(self, Self::Grpc)
    }

    /// Whether the upstream connection uses HTTP/2 framing.
    pub fn uses_http2(self) -> bool {
        matches!(self, Self::Http2 | Self::Grpc)
    }
}

/// A parsed backend address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddress {
    pub protocol: BackendProtocol,
    pub use_tls: bool,
    pub hostname: String,
    pub port: u32,
    /// Path component of the address, empty when absent.
    pub path: String,
}

impl BackendAddress {
    /// Parse a backend address URI, failing fast on unsupported schemes.
    pub fn parse(address: &str) -> Result<Self> {
        let url = Url::parse(address).map_err(|err| {
            Error::description(format!("invalid backend address '{}': {}", address, err))
        })?;

        let (protocol, use_tls, default_port) = match url.scheme() {
            "http" => (BackendProtocol::Http1, false, 80),
            "https" => (BackendProtocol::Http1, true, 443),
            "grpc" => (BackendProtocol::Grpc, false, 80),
            "grpcs" => (BackendProtocol::Grpc, true, 443),
            other => {
                return Err(Error::description(format!(
                    "unsupported backend scheme '{}' in address '{}'",
                    other, address
                )))
            }
        };

        let hostname = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                Error::description(format!("backend address '{}' has no host", address))
            })?
            .to_string();

        let port = url.port().map(u32::from).unwrap_or(default_port);

        let path = match url.path() {
            "" | "/" => String::new(),
            path => path.trim_end_matches('/').to_string(),
        };

        Ok(Self { protocol, use_tls, hostname, port, path })
    }

    /// Cluster-name authority, `host:port`.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Resolved backend target of one method, attached by the backend-rule stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTarget {
    pub address: BackendAddress,
    pub path_translation: PathTranslation,
    /// Raw deadline from the rule; normalization happens in the cluster
    /// resolver so the degraded-value warning sits next to the default.
    pub deadline_secs: Option<f64>,
    /// Audience for backend token injection, `None` when auth is disabled.
    pub jwt_audience: Option<String>,
}

/// Where an API key may be extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyLocation {
    Header(String),
    Query(String),
}

/// One authentication requirement attached to a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequirement {
    pub provider_id: String,
    /// Sorted; empty means the provider's own audiences apply.
    pub audiences: Vec<String>,
}

/// A JWT provider with a resolved key-set URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthProvider {
    pub id: String,
    pub issuer: String,
    pub jwks_uri: String,
    /// Sorted and deduplicated.
    pub audiences: Vec<String>,
}

/// Normalized view of one RPC method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub selector: String,
    pub api_name: String,
    pub name: String,
    pub request_streaming: bool,
    pub response_streaming: bool,
    pub patterns: Vec<HttpPattern>,
    /// Remote backend target; `None` routes to the local backend.
    pub backend: Option<BackendTarget>,
    pub require_auth: bool,
    pub auth_requirements: Vec<AuthRequirement>,
    pub allow_without_credential: bool,
    pub allow_unregistered_calls: bool,
    pub skip_service_control: bool,
    /// Sorted by metric name.
    pub metric_costs: Vec<(String, i64)>,
    pub api_key_locations: Vec<ApiKeyLocation>,
    /// Synthesized by the compiler (health check), not declared by the API.
    pub generated: bool,
}

impl MethodInfo {
    pub(crate) fn new(api_name: &str, rpc_name: &str) -> Self {
        Self {
            selector: format!("{}.{}", api_name, rpc_name),
            api_name: api_name.to_string(),
            name: rpc_name.to_string(),
            request_streaming: false,
            response_streaming: false,
            patterns: Vec::new(),
            backend: None,
            require_auth: false,
            auth_requirements: Vec::new(),
            allow_without_credential: false,
            allow_unregistered_calls: false,
            skip_service_control: false,
            metric_costs: Vec::new(),
            api_key_locations: Vec::new(),
            generated: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.request_streaming || self.response_streaming
    }

    /// Protocol this method's traffic speaks upstream.
    pub fn backend_protocol(&self, local: &BackendAddress) -> BackendProtocol {
        match &self.backend {
            Some(target) => target.address.protocol,
            None => local.protocol,
        }
    }

    /// Raw deadline carried by the backend rule, if any.
    pub fn deadline_secs(&self) -> Option<f64> {
        self.backend.as_ref().and_then(|target| target.deadline_secs)
    }
}

/// The complete normalized model for one compilation run.
#[derive(Debug, Clone)]
pub struct ServiceModel {
    pub service_name: String,
    pub config_id: String,
    pub producer_project_id: String,
    /// Registered API names in declaration order.
    pub api_names: Vec<String>,
    /// Selector-keyed method map; BTreeMap keeps iteration deterministic.
    pub methods: BTreeMap<String, MethodInfo>,
    /// Provider-id-keyed JWT providers.
    pub auth_providers: BTreeMap<String, AuthProvider>,
    /// Service opted into CORS pass-through via its endpoint entry.
    pub cors_pass_through: bool,
    /// The service's own backend, from the deployment options.
    pub local_backend: BackendAddress,
    /// Serialized method descriptors for transcoding, if provided.
    pub proto_descriptor: Option<Vec<u8>>,
    /// Raw HTTP rules in descriptor form, keyed by selector; the transcoder
    /// needs them verbatim (variable names included) for binding rewriting.
    pub http_rules: BTreeMap<String, descriptor::HttpRule>,
}

impl ServiceModel {
    /// Whether any method carries auth requirements.
    pub fn any_method_requires_auth(&self) -> bool {
        self.methods.values().any(|method| method.require_auth)
    }

    /// Whether any method carries a backend-auth audience.
    pub fn any_backend_audience(&self) -> bool {
        self.methods
            .values()
            .any(|method| method.backend.as_ref().is_some_and(|b| b.jwt_audience.is_some()))
    }
}
