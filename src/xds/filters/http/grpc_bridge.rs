//! gRPC-HTTP/1 bridge filter generator.
//!
//! Keeps gRPC metadata usable when gRPC methods are bridged onto HTTP/1
//! downstreams. Only present when the deployment opts into bridging and
//! the local backend actually speaks gRPC.

use envoy_types::pb::envoy::extensions::filters::http::grpc_http1_bridge::v3::Config as BridgeProto;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;

use crate::errors::Result;
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub const GRPC_HTTP1_BRIDGE_FILTER_NAME: &str = "envoy.filters.http.grpc_http1_bridge";
const GRPC_HTTP1_BRIDGE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.grpc_http1_bridge.v3.Config";

pub struct GrpcHttp1BridgeFilterGenerator;

impl FilterGenerator for GrpcHttp1BridgeFilterGenerator {
    fn name(&self) -> &'static str {
        GRPC_HTTP1_BRIDGE_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        if !ctx.options.enable_grpc_http1_bridge || !ctx.model.local_backend.protocol.is_grpc() {
            return Ok(None);
        }
        Ok(Some(http_filter(
            GRPC_HTTP1_BRIDGE_FILTER_NAME,
            any_from_message(GRPC_HTTP1_BRIDGE_TYPE_URL, &BridgeProto::default()),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::model::discovery::NoDiscovery;
    use crate::model::service::{ApiDescription, RpcDescription, ServiceDescription};
    use crate::model::builder;
    use crate::xds::cluster::ClusterResolver;

    #[test]
    fn requires_both_the_option_and_a_grpc_backend() {
        let service = ServiceDescription {
            name: "svc.example.com".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![RpcDescription { name: "Call".into(), ..Default::default() }],
            }],
            ..Default::default()
        };

        let options = Options {
            enable_grpc_http1_bridge: true,
            backend_address: "http://127.0.0.1:8082".into(),
            ..Default::default()
        };
        let model = builder::build(&service, &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };
        assert!(GrpcHttp1BridgeFilterGenerator.filter(&ctx).expect("ok").is_none());

        let options = Options {
            enable_grpc_http1_bridge: true,
            backend_address: "grpc://127.0.0.1:8082".into(),
            ..Default::default()
        };
        let model = builder::build(&service, &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };
        assert!(GrpcHttp1BridgeFilterGenerator.filter(&ctx).expect("ok").is_some());
    }
}
