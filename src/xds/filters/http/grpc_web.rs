//! gRPC-Web filter generator.
//!
//! Translates gRPC-Web browser traffic onto the gRPC backend. Present
//! whenever the local backend speaks gRPC.

use envoy_types::pb::envoy::extensions::filters::http::grpc_web::v3::GrpcWeb as GrpcWebProto;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;

use crate::errors::Result;
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub const GRPC_WEB_FILTER_NAME: &str = "envoy.filters.http.grpc_web";
const GRPC_WEB_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.grpc_web.v3.GrpcWeb";

pub struct GrpcWebFilterGenerator;

impl FilterGenerator for GrpcWebFilterGenerator {
    fn name(&self) -> &'static str {
        GRPC_WEB_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        if !ctx.model.local_backend.protocol.is_grpc() {
            return Ok(None);
        }
        Ok(Some(http_filter(
            GRPC_WEB_FILTER_NAME,
            any_from_message(GRPC_WEB_TYPE_URL, &GrpcWebProto::default()),
        )))
    }
}
