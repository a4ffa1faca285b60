//! Response compression filter generators.
//!
//! When compression is enabled the chain carries two compressor filters,
//! gzip first and brotli second, each under its own name with its library
//! plugged in as a typed extension. Response direction only.

use envoy_types::pb::envoy::config::core::v3::{RuntimeFeatureFlag, TypedExtensionConfig};
use envoy_types::pb::envoy::extensions::compression::brotli::compressor::v3::Brotli as BrotliProto;
use envoy_types::pb::envoy::extensions::compression::gzip::compressor::v3::Gzip as GzipProto;
use envoy_types::pb::envoy::extensions::filters::http::compressor::v3::{
    compressor::CommonDirectionConfig, compressor::ResponseDirectionConfig,
    Compressor as CompressorProto,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::BoolValue;

use crate::errors::Result;
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub const GZIP_COMPRESSOR_FILTER_NAME: &str = "envoy.filters.http.compressor.gzip";
pub const BROTLI_COMPRESSOR_FILTER_NAME: &str = "envoy.filters.http.compressor.brotli";
const COMPRESSOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.compressor.v3.Compressor";
const GZIP_LIBRARY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.compression.gzip.compressor.v3.Gzip";
const BROTLI_LIBRARY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.compression.brotli.compressor.v3.Brotli";

/// Compression library variants the chain knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Library {
    Gzip,
    Brotli,
}

pub struct CompressorFilterGenerator {
    library: Library,
}

impl CompressorFilterGenerator {
    pub fn gzip() -> Self {
        Self { library: Library::Gzip }
    }

    pub fn brotli() -> Self {
        Self { library: Library::Brotli }
    }

    fn library_config(&self) -> TypedExtensionConfig {
        match self.library {
            Library::Gzip => TypedExtensionConfig {
                name: "gzip".to_string(),
                typed_config: Some(any_from_message(GZIP_LIBRARY_TYPE_URL, &GzipProto::default())),
            },
            Library::Brotli => TypedExtensionConfig {
                name: "brotli".to_string(),
                typed_config: Some(any_from_message(
                    BROTLI_LIBRARY_TYPE_URL,
                    &BrotliProto::default(),
                )),
            },
        }
    }
}

impl FilterGenerator for CompressorFilterGenerator {
    fn name(&self) -> &'static str {
        match self.library {
            Library::Gzip => GZIP_COMPRESSOR_FILTER_NAME,
            Library::Brotli => BROTLI_COMPRESSOR_FILTER_NAME,
        }
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        if !ctx.options.enable_response_compression {
            return Ok(None);
        }

        let proto = CompressorProto {
            response_direction_config: Some(ResponseDirectionConfig {
                common_config: Some(CommonDirectionConfig {
                    enabled: Some(RuntimeFeatureFlag {
                        default_value: Some(BoolValue { value: true }),
                        runtime_key: String::new(),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            compressor_library: Some(self.library_config()),
            ..Default::default()
        };

        Ok(Some(http_filter(self.name(), any_from_message(COMPRESSOR_TYPE_URL, &proto))))
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
    use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType;
    use prost::Message;

    #[test]
    fn emits_both_libraries_when_enabled() {
        let service = ServiceDescription {
            name: "svc.example.com".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![RpcDescription { name: "Call".into(), ..Default::default() }],
            }],
            ..Default::default()
        };
        let options = Options { enable_response_compression: true, ..Default::default() };
        let model = builder::build(&service, &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let gzip = CompressorFilterGenerator::gzip().filter(&ctx).expect("ok").expect("gzip");
        let brotli = CompressorFilterGenerator::brotli().filter(&ctx).expect("ok").expect("brotli");
        assert_eq!(gzip.name, GZIP_COMPRESSOR_FILTER_NAME);
        assert_eq!(brotli.name, BROTLI_COMPRESSOR_FILTER_NAME);

        let Some(ConfigType::TypedConfig(any)) = brotli.config_type else {
            panic!("typed config expected");
        };
        let proto = CompressorProto::decode(any.value.as_slice()).expect("decode");
        let library = proto.compressor_library.expect("library");
        assert_eq!(library.name, "brotli");
        assert_eq!(library.typed_config.expect("any").type_url, BROTLI_LIBRARY_TYPE_URL);
        assert!(proto.request_direction_config.is_none());
    }

    #[test]
    fn disabled_by_default() {
        let service = ServiceDescription {
            name: "svc.example.com".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![RpcDescription { name: "Call".into(), ..Default::default() }],
            }],
            ..Default::default()
        };
        let options = Options::default();
        let model = builder::build(&service, &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        assert!(CompressorFilterGenerator::gzip().filter(&ctx).expect("ok").is_none());
    }
}
