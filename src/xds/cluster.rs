//! Backend cluster resolution.
//!
//! Maps every method to a named upstream cluster and computes the per-route
//! deadline, idle timeout and retry policy. Cluster names are a pure
//! function of the target authority: two methods addressing the same
//! `host:port` share one cluster object regardless of scheme or path.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::cluster::v3::{
    circuit_breakers::Thresholds, cluster::ClusterDiscoveryType, cluster::DiscoveryType,
    cluster::DnsLookupFamily as EnvoyDnsLookupFamily, CircuitBreakers, Cluster,
};
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address::PortSpecifier,
    transport_socket::ConfigType as TransportSocketConfigType, Address, DataSource,
    Http2ProtocolOptions, SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::config::route::v3::RetryPolicy;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, CertificateValidationContext, CommonTlsContext,
    UpstreamTlsContext,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::{
    http_protocol_options::explicit_http_config::ProtocolConfig,
    http_protocol_options::ExplicitHttpConfig, http_protocol_options::UpstreamProtocolOptions,
    HttpProtocolOptions,
};
use envoy_types::pb::google::protobuf::{Duration as ProtoDuration, UInt32Value};
use url::Url;

use crate::config::{DnsLookupFamily, Options, DEFAULT_BACKEND_DEADLINE_SECS};
use crate::errors::{Error, Result};
use crate::model::{BackendAddress, BackendProtocol, MethodInfo, ServiceModel};
use crate::xds::filters::any_from_message;

const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";
const UPSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";
const HTTP_PROTOCOL_OPTIONS_KEY: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
const RETRIABLE_STATUS_CODES_CONDITION: &str = "retriable-status-codes";

/// Per-route timing computed from the method's deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTiming {
    /// Response deadline; zero disables the deadline (streaming methods).
    pub timeout: ProtoDuration,
    pub idle_timeout: ProtoDuration,
}

/// A key-set fetch cluster derived from a JWT provider.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JwksCluster {
    name: String,
    hostname: String,
    port: u32,
    use_tls: bool,
}

/// Resolves methods to clusters and builds the cluster list.
pub struct ClusterResolver<'a> {
    model: &'a ServiceModel,
    options: &'a Options,
    local_name: String,
    /// Distinct remote backends in first-use order (model order).
    remote: Vec<BackendAddress>,
    remote_names: Vec<String>,
    remote_by_authority: HashMap<String, usize>,
    /// Key-set clusters sorted by authority.
    jwks: Vec<JwksCluster>,
}

impl<'a> ClusterResolver<'a> {
    pub fn new(model: &'a ServiceModel, options: &'a Options) -> Result<Self> {
        let local_name = format!("backend-cluster-{}_local", model.service_name);

        let mut remote = Vec::new();
        let mut remote_by_authority = HashMap::new();
        if !options.enable_backend_address_override {
            for method in model.methods.values() {
                let Some(target) = &method.backend else { continue };
                let authority = target.address.authority();
                if !remote_by_authority.contains_key(&authority) {
                    remote_by_authority.insert(authority, remote.len());
                    remote.push(target.address.clone());
                }
            }
        }

        let mut jwks: Vec<JwksCluster> = Vec::new();
        for provider in model.auth_providers.values() {
            let cluster = jwks_cluster(&provider.id, &provider.jwks_uri)?;
            if !jwks.contains(&cluster) {
                jwks.push(cluster);
            }
        }
        jwks.sort_by(|a, b| a.name.cmp(&b.name));

        let remote_names = remote.iter().map(remote_cluster_name).collect();
        Ok(Self { model, options, local_name, remote, remote_names, remote_by_authority, jwks })
    }

    /// Cluster name serving this method's traffic.
    pub fn cluster_name_for(&self, method: &MethodInfo) -> &str {
        match &method.backend {
            Some(target) if !self.options.enable_backend_address_override => {
                let index = self.remote_by_authority[&target.address.authority()];
                &self.remote_names[index]
            }
            _ => &self.local_name,
        }
    }

    /// `:authority` rewrite for this method, remote backends only.
    pub fn host_rewrite(&self, method: &MethodInfo) -> Option<String> {
        match &method.backend {
            Some(target) if !self.options.enable_backend_address_override => {
                Some(target.address.hostname.clone())
            }
            _ => None,
        }
    }

    /// Name of the local backend cluster.
    pub fn local_cluster_name(&self) -> &str {
        &self.local_name
    }

    /// Name of the key-set fetch cluster for a provider.
    pub fn jwks_cluster_name(&self, provider_id: &str) -> Result<String> {
        let provider = self.model.auth_providers.get(provider_id).ok_or_else(|| {
            Error::description(format!("unknown authentication provider '{}'", provider_id))
        })?;
        Ok(jwks_cluster(&provider.id, &provider.jwks_uri)?.name)
    }

    /// Deadline and idle timeout for one method's routes.
    ///
    /// Unary: the idle timeout is `max(deadline + 1s, stream idle timeout)`
    /// so the deadline error fires before the idle-timeout error when both
    /// would trigger together. Streaming: the per-request deadline is
    /// disabled, and the idle timeout is the user deadline when one was
    /// supplied.
    pub fn route_timing(&self, method: &MethodInfo) -> RouteTiming {
        let global = self.options.stream_idle_timeout_secs as f64;
        let user_deadline = normalize_deadline(&method.selector, method.deadline_secs());

        if method.is_streaming() {
            let idle = match user_deadline {
                Some(deadline) => deadline,
                None => (DEFAULT_BACKEND_DEADLINE_SECS as f64).max(global),
            };
            return RouteTiming {
                timeout: ProtoDuration { seconds: 0, nanos: 0 },
                idle_timeout: duration_from_secs(idle),
            };
        }

        let deadline = user_deadline.unwrap_or(DEFAULT_BACKEND_DEADLINE_SECS as f64);
        RouteTiming {
            timeout: duration_from_secs(deadline),
            idle_timeout: duration_from_secs((deadline + 1.0).max(global)),
        }
    }

    /// Retry policy shared by backend routes; `None` when retries are off.
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        let retry_on = self.options.backend_retry_on.trim();
        if retry_on.is_empty() {
            return None;
        }

        let mut conditions = retry_on.to_string();
        let mut retriable_status_codes = self.options.backend_retriable_status_codes.clone();
        if !retriable_status_codes.is_empty() {
            retriable_status_codes.sort_unstable();
            retriable_status_codes.dedup();
            if !conditions.split(',').any(|c| c.trim() == RETRIABLE_STATUS_CODES_CONDITION) {
                conditions.push(',');
                conditions.push_str(RETRIABLE_STATUS_CODES_CONDITION);
            }
        }

        Some(RetryPolicy {
            retry_on: conditions,
            num_retries: Some(UInt32Value { value: self.options.backend_retry_num }),
            retriable_status_codes,
            ..Default::default()
        })
    }

    /// Build the full cluster list: local backend, remote backends in
    /// model order, key-set clusters sorted by name.
    pub fn clusters(&self) -> Result<Vec<Cluster>> {
        let family = DnsLookupFamily::parse(&self.options.backend_dns_lookup_family)?;

        let mut clusters = Vec::with_capacity(1 + self.remote.len() + self.jwks.len());
        clusters.push(self.build_cluster(
            &self.local_name,
            &self.model.local_backend,
            DiscoveryType::StrictDns,
            family,
        ));
        for (address, name) in self.remote.iter().zip(&self.remote_names) {
            clusters.push(self.build_cluster(name, address, DiscoveryType::LogicalDns, family));
        }
        for jwks in &self.jwks {
            let address = BackendAddress {
                protocol: BackendProtocol::Http1,
                use_tls: jwks.use_tls,
                hostname: jwks.hostname.clone(),
                port: jwks.port,
                path: String::new(),
            };
            clusters.push(self.build_cluster(
                &jwks.name,
                &address,
                DiscoveryType::LogicalDns,
                family,
            ));
        }
        Ok(clusters)
    }

    fn build_cluster(
        &self,
        name: &str,
        address: &BackendAddress,
        discovery: DiscoveryType,
        family: DnsLookupFamily,
    ) -> Cluster {
        let endpoint = LbEndpoint {
            host_identifier: Some(HostIdentifier::Endpoint(Endpoint {
                address: Some(Address {
                    address: Some(AddressType::SocketAddress(SocketAddress {
                        address: address.hostname.clone(),
                        port_specifier: Some(PortSpecifier::PortValue(address.port)),
                        ..Default::default()
                    })),
                }),
                ..Default::default()
            })),
            ..Default::default()
        };

        let mut cluster = Cluster {
            name: name.to_string(),
            connect_timeout: Some(ProtoDuration {
                seconds: self.options.cluster_connect_timeout_secs as i64,
                nanos: 0,
            }),
            cluster_discovery_type: Some(ClusterDiscoveryType::Type(discovery as i32)),
            dns_lookup_family: envoy_dns_lookup_family(family) as i32,
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: name.to_string(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: vec![endpoint],
                    ..Default::default()
                }],
                ..Default::default()
            }),
            circuit_breakers: Some(CircuitBreakers {
                thresholds: vec![Thresholds {
                    max_retries: Some(UInt32Value {
                        value: self.options.backend_retry_num.max(3),
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };

        if address.protocol.uses_http2() {
            let protocol_options = HttpProtocolOptions {
                upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(
                    ExplicitHttpConfig {
                        protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(
                            Http2ProtocolOptions::default(),
                        )),
                    },
                )),
                ..Default::default()
            };
            cluster.typed_extension_protocol_options.insert(
                HTTP_PROTOCOL_OPTIONS_KEY.to_string(),
                any_from_message(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &protocol_options),
            );
        }

        if address.use_tls {
            let tls_context = UpstreamTlsContext {
                sni: address.hostname.clone(),
                common_tls_context: Some(CommonTlsContext {
                    validation_context_type: Some(ValidationContextType::ValidationContext(
                        CertificateValidationContext {
                            trusted_ca: Some(DataSource {
                                specifier: Some(
                                    envoy_types::pb::envoy::config::core::v3::data_source::Specifier::Filename(
                                        self.options.ssl_backend_root_certs_path.clone(),
                                    ),
                                ),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    )),
                    ..Default::default()
                }),
                ..Default::default()
            };
            cluster.transport_socket = Some(TransportSocket {
                name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
                config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
                    UPSTREAM_TLS_TYPE_URL,
                    &tls_context,
                ))),
            });
        }

        cluster
    }
}

/// Remote cluster name from the target authority only, so equal
/// `host:port` targets collapse to one cluster.
pub fn remote_cluster_name(address: &BackendAddress) -> String {
    format!("backend-cluster-{}", address.authority())
}

fn jwks_cluster(provider_id: &str, jwks_uri: &str) -> Result<JwksCluster> {
    let url = Url::parse(jwks_uri).map_err(|err| {
        Error::description(format!(
            "provider '{}' has an invalid jwks_uri '{}': {}",
            provider_id, jwks_uri, err
        ))
    })?;

    let (use_tls, default_port) = match url.scheme() {
        "http" => (false, 80),
        "https" => (true, 443),
        other => {
            return Err(Error::description(format!(
                "provider '{}' jwks_uri has unsupported scheme '{}'",
                provider_id, other
            )))
        }
    };

    let hostname = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| {
            Error::description(format!("provider '{}' jwks_uri has no host", provider_id))
        })?
        .to_string();
    let port = url.port().map(u32::from).unwrap_or(default_port);

    Ok(JwksCluster {
        name: format!("jwt-provider-cluster-{}:{}", hostname, port),
        hostname,
        port,
        use_tls,
    })
}

/// Coerce a raw deadline: positive values pass through, negatives are
/// logged and treated as unspecified, zero silently falls back.
fn normalize_deadline(selector: &str, deadline: Option<f64>) -> Option<f64> {
    match deadline {
        Some(value) if value > 0.0 => Some(value),
        Some(value) if value < 0.0 => {
            tracing::warn!(
                selector,
                deadline = value,
                "negative backend deadline, using the default"
            );
            None
        }
        _ => None,
    }
}

fn duration_from_secs(secs: f64) -> ProtoDuration {
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round() as i32;
    ProtoDuration { seconds: whole, nanos }
}

fn envoy_dns_lookup_family(family: DnsLookupFamily) -> EnvoyDnsLookupFamily {
    match family {
        DnsLookupFamily::Auto => EnvoyDnsLookupFamily::Auto,
        DnsLookupFamily::V4Only => EnvoyDnsLookupFamily::V4Only,
        DnsLookupFamily::V6Only => EnvoyDnsLookupFamily::V6Only,
        DnsLookupFamily::V4Preferred => EnvoyDnsLookupFamily::V4Preferred,
        DnsLookupFamily::All => EnvoyDnsLookupFamily::All,
    }
}
