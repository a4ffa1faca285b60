//! Crate-owned filter protos.
//!
//! The quota/metering, backend-auth and path-rewrite filters are proxy
//! extensions the compiler configures, not stock Envoy filters, so their
//! configuration messages are declared here the same way the proxy build
//! declares them. Hand-written prost derives keep the crate hermetic - no
//! protoc at build time.

use prost::Message;

pub const SERVICE_CONTROL_FILTER_NAME: &str = "portico.filters.http.service_control";
pub const SERVICE_CONTROL_TYPE_URL: &str =
    "type.googleapis.com/portico.filters.http.service_control.v1.FilterConfig";
pub const SERVICE_CONTROL_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/portico.filters.http.service_control.v1.PerRouteFilterConfig";

pub const BACKEND_AUTH_FILTER_NAME: &str = "portico.filters.http.backend_auth";
pub const BACKEND_AUTH_TYPE_URL: &str =
    "type.googleapis.com/portico.filters.http.backend_auth.v1.FilterConfig";
pub const BACKEND_AUTH_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/portico.filters.http.backend_auth.v1.PerRouteFilterConfig";

pub const PATH_REWRITE_FILTER_NAME: &str = "portico.filters.http.path_rewrite";
pub const PATH_REWRITE_TYPE_URL: &str =
    "type.googleapis.com/portico.filters.http.path_rewrite.v1.FilterConfig";
pub const PATH_REWRITE_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/portico.filters.http.path_rewrite.v1.PerRouteFilterConfig";

/// `portico.filters.http.service_control.v1.FilterConfig`
#[derive(Clone, PartialEq, Message)]
pub struct ServiceControlFilterConfig {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(string, tag = "2")]
    pub service_config_id: String,
    #[prost(string, tag = "3")]
    pub producer_project_id: String,
    /// Control-plane endpoint the proxy reports to at request time.
    #[prost(string, tag = "4")]
    pub service_control_uri: String,
    /// Let traffic through when the control plane is unreachable.
    #[prost(bool, tag = "5")]
    pub network_fail_open: bool,
}

/// `portico.filters.http.service_control.v1.PerRouteFilterConfig`
#[derive(Clone, PartialEq, Message)]
pub struct ServiceControlPerRoute {
    /// The selector reported as the operation name.
    #[prost(string, tag = "1")]
    pub operation_name: String,
    #[prost(bool, tag = "2")]
    pub skip_service_control: bool,
    #[prost(bool, tag = "3")]
    pub allow_unregistered_calls: bool,
    #[prost(message, repeated, tag = "4")]
    pub metric_costs: Vec<MetricCost>,
    #[prost(message, repeated, tag = "5")]
    pub api_key_locations: Vec<ApiKeyLocation>,
}

/// One quota metric and its per-call cost.
#[derive(Clone, PartialEq, Message)]
pub struct MetricCost {
    #[prost(string, tag = "1")]
    pub metric: String,
    #[prost(int64, tag = "2")]
    pub cost: i64,
}

/// Where an API key is extracted from.
#[derive(Clone, PartialEq, Message)]
pub struct ApiKeyLocation {
    #[prost(oneof = "api_key_location::Source", tags = "1, 2")]
    pub source: Option<api_key_location::Source>,
}

pub mod api_key_location {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Source {
        #[prost(string, tag = "1")]
        Header(String),
        #[prost(string, tag = "2")]
        Query(String),
    }
}

/// `portico.filters.http.backend_auth.v1.FilterConfig`
#[derive(Clone, PartialEq, Message)]
pub struct BackendAuthFilterConfig {
    /// Every audience a route may request a token for; sorted.
    #[prost(string, repeated, tag = "1")]
    pub jwt_audiences: Vec<String>,
    #[prost(oneof = "backend_auth_filter_config::IdTokenSource", tags = "2, 3")]
    pub id_token_source: Option<backend_auth_filter_config::IdTokenSource>,
}

pub mod backend_auth_filter_config {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum IdTokenSource {
        /// Fetch identity tokens from the instance metadata server.
        #[prost(string, tag = "2")]
        MetadataServerUri(String),
        /// Mint identity tokens through an IAM service account.
        #[prost(message, tag = "3")]
        Iam(super::IamIdTokenInfo),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct IamIdTokenInfo {
    #[prost(string, tag = "1")]
    pub service_account: String,
}

/// `portico.filters.http.backend_auth.v1.PerRouteFilterConfig`
#[derive(Clone, PartialEq, Message)]
pub struct BackendAuthPerRoute {
    #[prost(string, tag = "1")]
    pub jwt_audience: String,
}

/// `portico.filters.http.path_rewrite.v1.FilterConfig`
///
/// Listener-level marker; the behavior lives in per-route configs.
#[derive(Clone, PartialEq, Message)]
pub struct PathRewriteFilterConfig {}

/// `portico.filters.http.path_rewrite.v1.PerRouteFilterConfig`
#[derive(Clone, PartialEq, Message)]
pub struct PathRewritePerRoute {
    #[prost(oneof = "path_rewrite_per_route::Rewrite", tags = "1, 2")]
    pub rewrite: Option<path_rewrite_per_route::Rewrite>,
}

pub mod path_rewrite_per_route {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Rewrite {
        /// Prepend the backend address path to the incoming path.
        #[prost(string, tag = "1")]
        PathPrefix(String),
        /// Replace the path with a constant, binding variables as query
        /// parameters.
        #[prost(string, tag = "2")]
        ConstantPath(String),
    }
}
