//! Input model: the declarative API description.
//!
//! These types mirror the structured service definition a loader hands to
//! the compiler. They are plain serde data; every semantic check happens in
//! the model builder so that a malformed description fails the compilation
//! with an error naming the offending selector or value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{Error, Result};

pub use crate::xds::filters::Base64Bytes;

/// Top-level API description for one service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDescription {
    /// Service name, e.g. `bookstore.endpoints.example.com`.
    pub name: String,
    /// Identifier of this revision of the description.
    pub config_id: String,
    /// Project that produces the service; forwarded to metering.
    pub producer_project_id: String,
    pub apis: Vec<ApiDescription>,
    pub http_rules: Vec<HttpRuleDescription>,
    pub backend_rules: Vec<BackendRuleDescription>,
    pub authentication: AuthenticationDescription,
    pub usage_rules: Vec<UsageRuleDescription>,
    pub metric_rules: Vec<MetricRuleDescription>,
    pub system_parameter_rules: Vec<SystemParameterRuleDescription>,
    pub endpoints: Vec<EndpointDescription>,
    /// Serialized `FileDescriptorSet` with the service's method descriptors,
    /// used by gRPC-JSON transcoding.
    pub proto_descriptor_bin: Option<Base64Bytes>,
}

/// One API (proto service) and its RPC methods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiDescription {
    /// Fully qualified API name, e.g. `endpoints.examples.bookstore.Bookstore`.
    pub name: String,
    pub methods: Vec<RpcDescription>,
}

/// One RPC method of an API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcDescription {
    pub name: String,
    pub request_streaming: bool,
    pub response_streaming: bool,
}

/// HTTP binding rule for one selector, plus additional bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRuleDescription {
    pub selector: String,
    #[serde(flatten)]
    pub binding: HttpBinding,
    #[serde(default)]
    pub additional_bindings: Vec<HttpBinding>,
}

/// A single HTTP method + path template binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBinding {
    pub pattern: HttpPatternKind,
    /// Request field bound to the HTTP body, `*` for the whole message.
    pub body: String,
}

impl Default for HttpBinding {
    fn default() -> Self {
        Self { pattern: HttpPatternKind::Get { path: String::new() }, body: String::new() }
    }
}

/// The HTTP method/path pair of a binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpPatternKind {
    Get { path: String },
    Put { path: String },
    Post { path: String },
    Delete { path: String },
    Patch { path: String },
    /// Custom method; `kind: "*"` matches any method.
    Custom { kind: String, path: String },
}

impl HttpPatternKind {
    /// HTTP method token of this binding (`*` for any-method).
    pub fn http_method(&self) -> Result<String> {
        match self {
            Self::Get { .. } => Ok("GET".to_string()),
            Self::Put { .. } => Ok("PUT".to_string()),
            Self::Post { .. } => Ok("POST".to_string()),
            Self::Delete { .. } => Ok("DELETE".to_string()),
            Self::Patch { .. } => Ok("PATCH".to_string()),
            Self::Custom { kind, .. } => {
                if kind == "*" {
                    return Ok(kind.clone());
                }
                let method = kind.to_ascii_uppercase();
                http::Method::from_bytes(method.as_bytes()).map_err(|_| {
                    Error::description(format!("invalid custom HTTP method '{}'", kind))
                })?;
                Ok(method)
            }
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Put { path }
            | Self::Post { path }
            | Self::Delete { path }
            | Self::Patch { path }
            | Self::Custom { path, .. } => path,
        }
    }
}

/// Path translation strategy toward a remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathTranslation {
    /// Keep the incoming path, prefixed with the backend address path.
    #[default]
    AppendPathToAddress,
    /// Replace the path with the backend address path, binding variables as
    /// query parameters.
    ConstantAddress,
}

/// Backend routing rule for one selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendRuleDescription {
    pub selector: String,
    /// Backend address URI, e.g. `https://billing.example.com:8443/v2`.
    pub address: String,
    /// Response deadline in seconds; non-positive values fall back to the
    /// compiler default.
    pub deadline_secs: Option<f64>,
    pub path_translation: PathTranslation,
    /// Explicit JWT audience for backend auth; wins over derivation.
    pub jwt_audience: Option<String>,
    /// Disable backend auth entirely for this method.
    pub disable_auth: bool,
}

/// Authentication section: providers and per-selector rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationDescription {
    pub providers: Vec<AuthProviderDescription>,
    pub rules: Vec<AuthRuleDescription>,
}

/// One JWT provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthProviderDescription {
    pub id: String,
    pub issuer: String,
    /// Key-set URI; when absent it is discovered from the issuer via OpenID
    /// Connect, and a discovery failure aborts the compilation.
    pub jwks_uri: Option<String>,
    pub audiences: Vec<String>,
}

/// Per-selector authentication requirements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRuleDescription {
    pub selector: String,
    pub requirements: Vec<AuthRequirementDescription>,
    /// Accept requests without credentials even when requirements exist.
    pub allow_without_credential: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRequirementDescription {
    pub provider_id: String,
    pub audiences: Vec<String>,
}

/// Per-selector usage policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageRuleDescription {
    pub selector: String,
    pub allow_unregistered_calls: bool,
    pub skip_service_control: bool,
}

/// Per-selector quota costs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricRuleDescription {
    pub selector: String,
    /// Metric name to cost; a BTreeMap keeps emission order stable.
    pub metric_costs: BTreeMap<String, i64>,
}

/// Per-selector system parameters (API key extraction points).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemParameterRuleDescription {
    pub selector: String,
    pub parameters: Vec<SystemParameterDescription>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemParameterDescription {
    pub name: String,
    pub http_header: Option<String>,
    pub url_query_parameter: Option<String>,
}

/// Endpoint-level switches for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointDescription {
    pub name: String,
    /// Pass CORS requests through to the backend instead of rejecting them.
    pub allow_cors: bool,
}
