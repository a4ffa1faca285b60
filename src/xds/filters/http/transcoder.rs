//! gRPC-JSON transcoder filter generator.
//!
//! Only meaningful for gRPC local backends. The embedded method descriptor
//! is rewritten before emission so that a service-config HTTP rule override
//! never disables the method's proto-declared binding (it is re-added as an
//! additional binding, at most once). A missing descriptor degrades the
//! feature with a warning instead of failing the compilation.

use std::collections::BTreeSet;

use envoy_types::pb::envoy::extensions::filters::http::grpc_json_transcoder::v3::{
    grpc_json_transcoder::DescriptorSet, grpc_json_transcoder::PrintOptions, GrpcJsonTranscoder,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;

use crate::errors::Result;
use crate::model::descriptor;
use crate::model::ApiKeyLocation;
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub const TRANSCODER_FILTER_NAME: &str = "envoy.filters.http.grpc_json_transcoder";
const TRANSCODER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.grpc_json_transcoder.v3.GrpcJsonTranscoder";

pub struct TranscoderFilterGenerator;

impl FilterGenerator for TranscoderFilterGenerator {
    fn name(&self) -> &'static str {
        TRANSCODER_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        if !ctx.model.local_backend.protocol.is_grpc() {
            return Ok(None);
        }
        let Some(descriptor_bytes) = ctx.model.proto_descriptor.as_deref() else {
            tracing::warn!(
                service = %ctx.model.service_name,
                "no proto descriptor in the service description, transcoding disabled"
            );
            return Ok(None);
        };

        let rewritten =
            descriptor::apply_service_config_bindings(descriptor_bytes, &ctx.model.http_rules)?;

        let mut services: Vec<String> = ctx.model.api_names.clone();
        services.sort_unstable();

        let proto = GrpcJsonTranscoder {
            descriptor_set: Some(DescriptorSet::ProtoDescriptorBin(rewritten)),
            services,
            print_options: Some(PrintOptions {
                add_whitespace: false,
                always_print_primitive_fields: ctx
                    .options
                    .transcoding_always_print_primitive_fields,
                always_print_enums_as_ints: ctx.options.transcoding_always_print_enums_as_ints,
                preserve_proto_field_names: ctx.options.transcoding_preserve_proto_field_names,
                stream_newline_delimited: ctx.options.transcoding_stream_newline_delimited,
                stream_sse_style_delimited: false,
            }),
            auto_mapping: true,
            ignored_query_parameters: ignored_query_parameters(ctx),
            ignore_unknown_query_parameters: ctx
                .options
                .transcoding_ignore_unknown_query_parameters,
            convert_grpc_status: true,
            ..Default::default()
        };

        Ok(Some(http_filter(TRANSCODER_FILTER_NAME, any_from_message(TRANSCODER_TYPE_URL, &proto))))
    }
}

/// Query parameters the transcoder must not bind to request fields:
/// API key parameters, the JWT query parameter when authentication is in
/// play, plus configured extras. Lexicographically sorted.
fn ignored_query_parameters(ctx: &CompileContext<'_>) -> Vec<String> {
    let mut parameters = BTreeSet::new();
    for method in ctx.model.methods.values() {
        for location in &method.api_key_locations {
            if let ApiKeyLocation::Query(name) = location {
                parameters.insert(name.clone());
            }
        }
    }
    if ctx.model.any_method_requires_auth() {
        parameters.insert("access_token".to_string());
    }
    for extra in &ctx.options.transcoding_ignored_query_parameters {
        parameters.insert(extra.clone());
    }
    parameters.into_iter().collect()
}
