//! Deployment options supplied by the caller.
//!
//! `Options` is pure data: construction never fails, and nothing here talks
//! to the network or filesystem. Enum-valued string fields are validated by
//! [`Options::validate`] at the start of a compilation run, so a bad value
//! aborts the whole run with a descriptive error rather than surfacing
//! halfway through generation.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Error, Result};

/// Deadline applied to a backend when the rule leaves it unspecified or
/// non-positive, in seconds.
pub const DEFAULT_BACKEND_DEADLINE_SECS: u64 = 15;

/// Immutable deployment options for one compilation run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Options {
    /// Address the proxy listens on.
    pub listener_address: String,
    pub listener_port: u32,

    /// Address of the service's own local backend, scheme selects protocol
    /// (`http`, `https`, `grpc`, `grpcs`).
    #[validate(length(min = 1, message = "backend_address cannot be empty"))]
    pub backend_address: String,

    /// Route every method to the local backend, ignoring per-method backend
    /// rules from the service description.
    pub enable_backend_address_override: bool,

    /// DNS lookup family for upstream clusters: `auto`, `v4only`, `v6only`,
    /// `v4preferred` or `all`.
    pub backend_dns_lookup_family: String,

    #[validate(range(min = 1, max = 300, message = "cluster_connect_timeout_secs must be between 1 and 300"))]
    pub cluster_connect_timeout_secs: u64,

    /// Global stream idle timeout, also the floor for per-route idle timeouts.
    pub stream_idle_timeout_secs: u64,

    /// CORS preset: `basic` (exact origin) or `cors_with_regex`.
    pub cors_preset: Option<String>,
    pub cors_allow_origin: String,
    pub cors_allow_origin_regex: String,
    pub cors_allow_methods: String,
    pub cors_allow_headers: String,
    pub cors_expose_headers: String,
    pub cors_allow_credentials: bool,
    pub cors_max_age_secs: u64,

    /// Emit gzip and brotli response compression filters.
    pub enable_response_compression: bool,

    /// Path answered by the proxy itself with its own health status.
    pub healthz_path: Option<String>,

    /// Downstream TLS material paths; loading the files is the proxy's job.
    pub ssl_server_cert_chain: Option<String>,
    pub ssl_server_private_key: Option<String>,
    /// Root certificates used to validate TLS backends.
    pub ssl_backend_root_certs_path: String,

    /// Bridge gRPC methods onto HTTP/1 downstreams.
    pub enable_grpc_http1_bridge: bool,

    /// JWT validation knobs.
    pub jwt_cache_size: u32,
    pub disable_jwks_async_fetch: bool,
    pub jwks_fetch_timeout_secs: u64,
    pub jwks_cache_duration_secs: Option<u64>,

    /// Retry policy for backend routes; retries are disabled when
    /// `backend_retry_on` is empty.
    pub backend_retry_on: String,
    pub backend_retry_num: u32,
    pub backend_retriable_status_codes: Vec<u32>,

    /// Quota/metering filter.
    pub disable_service_control: bool,
    pub service_control_uri: String,

    /// Credential source for backend token injection: `metadata` or `iam`.
    pub token_source: String,
    pub iam_service_account: Option<String>,
    pub metadata_server_url: String,

    /// Register methods of discovery-only APIs.
    pub allow_discovery_apis: bool,

    /// Reject `:` inside wildcard path segments so custom verbs stay
    /// unambiguous.
    pub disallow_colon_in_wildcard_path_segment: bool,

    /// Behavior when a filter's remote dependency is unavailable at request
    /// time: `block` or `fail_open`.
    pub dependency_error_behavior: String,

    /// gRPC-JSON transcoder knobs.
    pub transcoding_ignore_unknown_query_parameters: bool,
    pub transcoding_ignored_query_parameters: Vec<String>,
    pub transcoding_preserve_proto_field_names: bool,
    pub transcoding_always_print_primitive_fields: bool,
    pub transcoding_always_print_enums_as_ints: bool,
    pub transcoding_stream_newline_delimited: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            listener_address: "0.0.0.0".to_string(),
            listener_port: 8080,
            backend_address: "http://127.0.0.1:8082".to_string(),
            enable_backend_address_override: false,
            backend_dns_lookup_family: "v4preferred".to_string(),
            cluster_connect_timeout_secs: 20,
            stream_idle_timeout_secs: 300,
            cors_preset: None,
            cors_allow_origin: String::new(),
            cors_allow_origin_regex: String::new(),
            cors_allow_methods: String::new(),
            cors_allow_headers: String::new(),
            cors_expose_headers: String::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 1_728_000,
            enable_response_compression: false,
            healthz_path: None,
            ssl_server_cert_chain: None,
            ssl_server_private_key: None,
            ssl_backend_root_certs_path: "/etc/ssl/certs/ca-certificates.crt".to_string(),
            enable_grpc_http1_bridge: false,
            jwt_cache_size: 100,
            disable_jwks_async_fetch: false,
            jwks_fetch_timeout_secs: 5,
            jwks_cache_duration_secs: None,
            backend_retry_on: "reset,connect-failure,refused-stream".to_string(),
            backend_retry_num: 1,
            backend_retriable_status_codes: Vec::new(),
            disable_service_control: false,
            service_control_uri: "https://servicecontrol.example.com/v1/services".to_string(),
            token_source: "metadata".to_string(),
            iam_service_account: None,
            metadata_server_url: "http://169.254.169.254".to_string(),
            allow_discovery_apis: false,
            disallow_colon_in_wildcard_path_segment: false,
            dependency_error_behavior: "block".to_string(),
            transcoding_ignore_unknown_query_parameters: false,
            transcoding_ignored_query_parameters: Vec::new(),
            transcoding_preserve_proto_field_names: false,
            transcoding_always_print_primitive_fields: false,
            transcoding_always_print_enums_as_ints: false,
            transcoding_stream_newline_delimited: false,
        }
    }
}

/// DNS lookup family for upstream clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsLookupFamily {
    Auto,
    V4Only,
    V6Only,
    V4Preferred,
    All,
}

impl DnsLookupFamily {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "auto" => Ok(Self::Auto),
            "v4only" => Ok(Self::V4Only),
            "v6only" => Ok(Self::V6Only),
            "v4preferred" => Ok(Self::V4Preferred),
            "all" => Ok(Self::All),
            other => Err(Error::options(format!("unsupported DNS lookup family: {}", other))),
        }
    }
}

/// CORS handling preset selected by the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorsPreset {
    /// Exact origin matching against `cors_allow_origin`.
    Basic,
    /// Regex origin matching against `cors_allow_origin_regex`.
    WithRegex,
}

impl CorsPreset {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "basic" => Ok(Self::Basic),
            "cors_with_regex" => Ok(Self::WithRegex),
            other => Err(Error::options(format!("unsupported CORS preset: {}", other))),
        }
    }
}

/// Where the backend-auth filter obtains identity tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Metadata,
    Iam,
}

impl TokenSource {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "metadata" => Ok(Self::Metadata),
            "iam" => Ok(Self::Iam),
            other => Err(Error::options(format!("unsupported token source: {}", other))),
        }
    }
}

/// Behavior when a filter's remote dependency is unreachable at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyErrorBehavior {
    Block,
    FailOpen,
}

impl DependencyErrorBehavior {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "block" => Ok(Self::Block),
            "fail_open" => Ok(Self::FailOpen),
            other => {
                Err(Error::options(format!("unsupported dependency error behavior: {}", other)))
            }
        }
    }
}

impl Options {
    /// Validate every enum-valued and range-constrained field.
    ///
    /// Called once at the start of `compile`; any failure aborts the run.
    pub fn validate_options(&self) -> Result<()> {
        self.validate()
            .map_err(|err| Error::options(format!("option validation failed: {}", err)))?;

        DnsLookupFamily::parse(&self.backend_dns_lookup_family)?;
        let token_source = TokenSource::parse(&self.token_source)?;
        DependencyErrorBehavior::parse(&self.dependency_error_behavior)?;

        if token_source == TokenSource::Iam && self.iam_service_account.is_none() {
            return Err(Error::options("token_source 'iam' requires iam_service_account"));
        }

        if let Some(preset) = &self.cors_preset {
            let preset = CorsPreset::parse(preset)?;
            match preset {
                CorsPreset::Basic if self.cors_allow_origin.trim().is_empty() => {
                    return Err(Error::options("cors_preset 'basic' requires cors_allow_origin"));
                }
                CorsPreset::WithRegex if self.cors_allow_origin_regex.trim().is_empty() => {
                    return Err(Error::options(
                        "cors_preset 'cors_with_regex' requires cors_allow_origin_regex",
                    ));
                }
                _ => {}
            }
        }

        if let Some(path) = &self.healthz_path {
            if !path.starts_with('/') {
                return Err(Error::options("healthz_path must start with '/'"));
            }
        }

        for code in &self.backend_retriable_status_codes {
            if !(100..600).contains(code) {
                return Err(Error::options(format!(
                    "retriable status code {} is outside [100, 600)",
                    code
                )));
            }
        }

        if self.ssl_server_cert_chain.is_some() != self.ssl_server_private_key.is_some() {
            return Err(Error::options(
                "downstream TLS requires both ssl_server_cert_chain and ssl_server_private_key",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Options::default().validate_options().is_ok());
    }

    #[test]
    fn unknown_dns_family_is_fatal() {
        let options =
            Options { backend_dns_lookup_family: "v5only".to_string(), ..Default::default() };
        let err = options.validate_options().expect_err("bad family should fail");
        assert!(err.to_string().contains("v5only"));
    }

    #[test]
    fn unknown_dependency_error_behavior_is_fatal() {
        let options =
            Options { dependency_error_behavior: "shrug".to_string(), ..Default::default() };
        assert!(options.validate_options().is_err());
    }

    #[test]
    fn basic_preset_requires_origin() {
        let options = Options { cors_preset: Some("basic".to_string()), ..Default::default() };
        assert!(options.validate_options().is_err());

        let options = Options {
            cors_preset: Some("basic".to_string()),
            cors_allow_origin: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(options.validate_options().is_ok());
    }

    #[test]
    fn retriable_status_codes_are_bounded() {
        let options =
            Options { backend_retriable_status_codes: vec![503, 99], ..Default::default() };
        let err = options.validate_options().expect_err("99 is invalid");
        assert!(err.to_string().contains("99"));

        let options =
            Options { backend_retriable_status_codes: vec![503, 599], ..Default::default() };
        assert!(options.validate_options().is_ok());
    }

    #[test]
    fn tls_paths_must_come_in_pairs() {
        let options = Options {
            ssl_server_cert_chain: Some("/certs/chain.pem".to_string()),
            ..Default::default()
        };
        assert!(options.validate_options().is_err());
    }
}
