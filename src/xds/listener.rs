//! Listener assembly.
//!
//! Builds the HTTP connection manager around the generated route table and
//! filter chain, and wraps it in the ingress listener, with an optional
//! downstream TLS transport socket when the deployment supplies server
//! certificate paths. Certificate material is referenced by path; loading
//! it is the proxy's job.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, data_source::Specifier,
    socket_address::PortSpecifier, transport_socket::ConfigType as TransportSocketConfigType,
    Address, DataSource, SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType, Filter, FilterChain, Listener,
};
use envoy_types::pb::envoy::config::route::v3::{Route, RouteConfiguration, VirtualHost};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::CodecType, http_connection_manager::RouteSpecifier, HttpConnectionManager,
    HttpFilter,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext, TlsCertificate,
};
use envoy_types::pb::google::protobuf::Duration as ProtoDuration;

use crate::errors::Result;
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::cors;
use crate::xds::CompileContext;

/// Fixed name the route table is attached under.
pub const ROUTE_CONFIG_NAME: &str = "local_route";
/// The single virtual host carrying every generated route.
pub const VIRTUAL_HOST_NAME: &str = "backend";
pub const LISTENER_NAME: &str = "ingress_listener";

const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
const HCM_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";
const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// Assemble the ingress listener from the generated filter chain and routes.
pub fn build_listener(
    ctx: &CompileContext<'_>,
    http_filters: Vec<HttpFilter>,
    routes: Vec<Route>,
) -> Result<Listener> {
    let mut virtual_host = VirtualHost {
        name: VIRTUAL_HOST_NAME.to_string(),
        domains: vec!["*".to_string()],
        routes,
        ..Default::default()
    };
    if let Some((name, policy)) = cors::virtual_host_policy(ctx)? {
        virtual_host.typed_per_filter_config.insert(name, policy);
    }

    let route_config = RouteConfiguration {
        name: ROUTE_CONFIG_NAME.to_string(),
        virtual_hosts: vec![virtual_host],
        ..Default::default()
    };

    let hcm = HttpConnectionManager {
        stat_prefix: "ingress_http".to_string(),
        codec_type: CodecType::Auto as i32,
        route_specifier: Some(RouteSpecifier::RouteConfig(route_config)),
        http_filters,
        stream_idle_timeout: Some(ProtoDuration {
            seconds: ctx.options.stream_idle_timeout_secs as i64,
            nanos: 0,
        }),
        ..Default::default()
    };

    let filter_chain = FilterChain {
        filters: vec![Filter {
            name: HCM_FILTER_NAME.to_string(),
            config_type: Some(FilterConfigType::TypedConfig(any_from_message(
                HCM_TYPE_URL,
                &hcm,
            ))),
        }],
        transport_socket: downstream_tls(ctx),
        ..Default::default()
    };

    Ok(Listener {
        name: LISTENER_NAME.to_string(),
        address: Some(Address {
            address: Some(AddressType::SocketAddress(SocketAddress {
                address: ctx.options.listener_address.clone(),
                port_specifier: Some(PortSpecifier::PortValue(ctx.options.listener_port)),
                ..Default::default()
            })),
        }),
        filter_chains: vec![filter_chain],
        ..Default::default()
    })
}

fn downstream_tls(ctx: &CompileContext<'_>) -> Option<TransportSocket> {
    let cert_chain = ctx.options.ssl_server_cert_chain.as_ref()?;
    let private_key = ctx.options.ssl_server_private_key.as_ref()?;

    let tls_context = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificates: vec![TlsCertificate {
                certificate_chain: Some(DataSource {
                    specifier: Some(Specifier::Filename(cert_chain.clone())),
                    ..Default::default()
                }),
                private_key: Some(DataSource {
                    specifier: Some(Specifier::Filename(private_key.clone())),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    Some(TransportSocket {
        name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
            DOWNSTREAM_TLS_TYPE_URL,
            &tls_context,
        ))),
    })
}
