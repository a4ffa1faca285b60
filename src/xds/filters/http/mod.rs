//! HTTP filter generator pipeline.
//!
//! Each filter is a capability unit behind the [`FilterGenerator`] contract:
//! it may contribute a listener-level filter and, per matched route, an
//! override payload. The chain order is policy-significant - later filters
//! see the effects of earlier ones, and the router must come last so it
//! observes every upstream-bound header mutation - so the order lives in
//! one data list built by [`FilterPipeline::standard`].

pub mod backend_auth;
pub mod compressor;
pub mod cors;
pub mod grpc_bridge;
pub mod grpc_web;
pub mod health_check;
pub mod jwt_auth;
pub mod path_rewrite;
pub mod service_control;
pub mod transcoder;

use std::collections::BTreeMap;

use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterProto;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_filter::ConfigType as HttpFilterConfigType, HttpFilter,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use crate::errors::Result;
use crate::model::{HttpPattern, MethodInfo};
use crate::xds::filters::any_from_message;
use crate::xds::CompileContext;

/// Envoy's canonical router filter name.
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

/// One filter capability in the chain.
pub trait FilterGenerator {
    /// Filter name as it appears in the chain and in per-route config keys.
    fn name(&self) -> &'static str;

    /// Listener-level filter config; `None` contributes nothing to the
    /// chain.
    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>>;

    /// Per-route override for one method pattern.
    ///
    /// Implementations must return `None` whenever [`Self::filter`] would
    /// return `None` for the same context, so an override can never
    /// reference a filter absent from the chain.
    fn per_route(
        &self,
        _ctx: &CompileContext<'_>,
        _method: &MethodInfo,
        _pattern: &HttpPattern,
    ) -> Result<Option<EnvoyAny>> {
        Ok(None)
    }
}

/// The ordered filter chain.
pub struct FilterPipeline {
    generators: Vec<Box<dyn FilterGenerator>>,
}

impl FilterPipeline {
    /// The fixed chain: CORS, health check, compression (gzip then brotli),
    /// JWT authentication, quota/metering, gRPC-Web, gRPC-JSON transcoding,
    /// backend authentication, path rewrite, gRPC-HTTP/1 bridging; the
    /// router is appended by [`FilterPipeline::http_filters`].
    pub fn standard() -> Self {
        Self {
            generators: vec![
                Box::new(cors::CorsFilterGenerator),
                Box::new(health_check::HealthCheckFilterGenerator),
                Box::new(compressor::CompressorFilterGenerator::gzip()),
                Box::new(compressor::CompressorFilterGenerator::brotli()),
                Box::new(jwt_auth::JwtAuthnFilterGenerator),
                Box::new(service_control::ServiceControlFilterGenerator),
                Box::new(grpc_web::GrpcWebFilterGenerator),
                Box::new(transcoder::TranscoderFilterGenerator),
                Box::new(backend_auth::BackendAuthFilterGenerator),
                Box::new(path_rewrite::PathRewriteFilterGenerator),
                Box::new(grpc_bridge::GrpcHttp1BridgeFilterGenerator),
            ],
        }
    }

    /// Names of the generators in chain order, router excluded.
    pub fn generator_names(&self) -> Vec<&'static str> {
        self.generators.iter().map(|generator| generator.name()).collect()
    }

    /// Build the listener filter chain, router always last.
    pub fn http_filters(&self, ctx: &CompileContext<'_>) -> Result<Vec<HttpFilter>> {
        let mut filters = Vec::with_capacity(self.generators.len() + 1);
        for generator in &self.generators {
            if let Some(filter) = generator.filter(ctx)? {
                filters.push(filter);
            }
        }
        filters.push(router_filter());
        Ok(filters)
    }

    /// Collect per-route overrides for one method pattern, keyed by filter
    /// name.
    pub fn per_route_overrides(
        &self,
        ctx: &CompileContext<'_>,
        method: &MethodInfo,
        pattern: &HttpPattern,
    ) -> Result<BTreeMap<String, EnvoyAny>> {
        let mut overrides = BTreeMap::new();
        for generator in &self.generators {
            if let Some(config) = generator.per_route(ctx, method, pattern)? {
                overrides.insert(generator.name().to_string(), config);
            }
        }
        Ok(overrides)
    }
}

/// Build an `HttpFilter` entry with a typed config.
pub(crate) fn http_filter(name: &str, config: EnvoyAny) -> HttpFilter {
    HttpFilter {
        name: name.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(config)),
        ..Default::default()
    }
}

fn router_filter() -> HttpFilter {
    http_filter(ROUTER_FILTER_NAME, any_from_message(ROUTER_TYPE_URL, &RouterProto::default()))
}
