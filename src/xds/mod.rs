//! Envoy configuration generation.
//!
//! Everything under this module turns the immutable [`ServiceModel`] and
//! [`Options`] into Envoy protobuf resources: clusters, a route table and a
//! listener with its ordered HTTP filter chain. The top-level [`compile`]
//! entry point runs the whole pipeline and either returns a complete
//! configuration snapshot or an error; partial state is never exposed.

pub mod cluster;
pub mod filters;
pub mod listener;
pub mod route;

use std::time::Duration;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;

use crate::config::Options;
use crate::errors::Result;
use crate::model::discovery::{KeySetResolver, NoDiscovery, OpenIdDiscovery};
use crate::model::{builder, ServiceDescription, ServiceModel};
use crate::xds::cluster::ClusterResolver;
use crate::xds::filters::http::FilterPipeline;

/// Shared read-only inputs for route and filter generators.
pub struct CompileContext<'a> {
    pub model: &'a ServiceModel,
    pub options: &'a Options,
    pub clusters: &'a ClusterResolver<'a>,
}

/// The complete configuration produced by one compilation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub clusters: Vec<Cluster>,
    pub listener: Listener,
}

/// Compile an API description and options into proxy configuration.
///
/// Key-set discovery is performed over the network only when a provider
/// omits its `jwks_uri`; descriptions with explicit key-set locations never
/// touch the network.
pub fn compile(service: &ServiceDescription, options: &Options) -> Result<ProxyConfig> {
    let needs_discovery = service
        .authentication
        .providers
        .iter()
        .any(|provider| provider.jwks_uri.as_deref().unwrap_or_default().is_empty());

    if needs_discovery {
        let discovery = OpenIdDiscovery::new(Duration::from_secs(options.jwks_fetch_timeout_secs))?;
        compile_with_resolver(service, options, &discovery)
    } else {
        compile_with_resolver(service, options, &NoDiscovery)
    }
}

/// [`compile`] with an injected key-set resolver; the seam tests use.
pub fn compile_with_resolver(
    service: &ServiceDescription,
    options: &Options,
    resolver: &dyn KeySetResolver,
) -> Result<ProxyConfig> {
    options.validate_options()?;

    let model = builder::build(service, options, resolver)?;
    let cluster_resolver = ClusterResolver::new(&model, options)?;
    let ctx = CompileContext { model: &model, options, clusters: &cluster_resolver };

    let filter_pipeline = FilterPipeline::standard();
    let http_filters = filter_pipeline.http_filters(&ctx)?;
    let routes = route::generate_routes(&ctx, &filter_pipeline)?;
    let listener = listener::build_listener(&ctx, http_filters, routes)?;
    let clusters = cluster_resolver.clusters()?;

    tracing::info!(
        service = %model.service_name,
        clusters = clusters.len(),
        routes = listener_route_count(&listener),
        "compiled proxy configuration"
    );

    Ok(ProxyConfig { clusters, listener })
}

fn listener_route_count(listener: &Listener) -> usize {
    use envoy_types::pb::envoy::config::listener::v3::filter::ConfigType;
    use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
        http_connection_manager::RouteSpecifier, HttpConnectionManager,
    };
    use prost::Message;

    listener
        .filter_chains
        .iter()
        .flat_map(|chain| &chain.filters)
        .filter_map(|filter| match &filter.config_type {
            Some(ConfigType::TypedConfig(any)) => {
                HttpConnectionManager::decode(any.value.as_slice()).ok()
            }
            _ => None,
        })
        .filter_map(|hcm| match hcm.route_specifier {
            Some(RouteSpecifier::RouteConfig(config)) => Some(config),
            _ => None,
        })
        .flat_map(|config| config.virtual_hosts)
        .map(|vhost| vhost.routes.len())
        .sum()
}
