//! Backend authentication (token injection) filter generator.
//!
//! Injects identity tokens toward remote backends. The listener config
//! lists every audience a route may request, sorted for deterministic
//! emission, plus the credential source; per-route configs name the
//! matched method's audience. Omitted entirely when no method carries an
//! audience, even though the capability itself is always enabled.

use std::collections::BTreeSet;

use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use crate::config::TokenSource;
use crate::errors::{Error, Result};
use crate::model::{HttpPattern, MethodInfo};
use crate::proto::{
    backend_auth_filter_config::IdTokenSource, BackendAuthFilterConfig, BackendAuthPerRoute,
    IamIdTokenInfo, BACKEND_AUTH_FILTER_NAME, BACKEND_AUTH_PER_ROUTE_TYPE_URL,
    BACKEND_AUTH_TYPE_URL,
};
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

/// Identity-token path on the metadata server.
const METADATA_IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

pub struct BackendAuthFilterGenerator;

impl FilterGenerator for BackendAuthFilterGenerator {
    fn name(&self) -> &'static str {
        BACKEND_AUTH_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        let audiences: BTreeSet<String> = ctx
            .model
            .methods
            .values()
            .filter_map(|method| method.backend.as_ref())
            .filter_map(|backend| backend.jwt_audience.clone())
            .collect();
        if audiences.is_empty() {
            return Ok(None);
        }

        let id_token_source = match TokenSource::parse(&ctx.options.token_source)? {
            TokenSource::Metadata => IdTokenSource::MetadataServerUri(format!(
                "{}{}",
                ctx.options.metadata_server_url.trim_end_matches('/'),
                METADATA_IDENTITY_PATH
            )),
            TokenSource::Iam => {
                let service_account =
                    ctx.options.iam_service_account.clone().ok_or_else(|| {
                        Error::options("token_source 'iam' requires iam_service_account")
                    })?;
                IdTokenSource::Iam(IamIdTokenInfo { service_account })
            }
        };

        let proto = BackendAuthFilterConfig {
            jwt_audiences: audiences.into_iter().collect(),
            id_token_source: Some(id_token_source),
        };

        Ok(Some(http_filter(
            BACKEND_AUTH_FILTER_NAME,
            any_from_message(BACKEND_AUTH_TYPE_URL, &proto),
        )))
    }

    fn per_route(
        &self,
        _ctx: &CompileContext<'_>,
        method: &MethodInfo,
        _pattern: &HttpPattern,
    ) -> Result<Option<EnvoyAny>> {
        let Some(audience) =
            method.backend.as_ref().and_then(|backend| backend.jwt_audience.clone())
        else {
            return Ok(None);
        };

        let proto = BackendAuthPerRoute { jwt_audience: audience };
        Ok(Some(any_from_message(BACKEND_AUTH_PER_ROUTE_TYPE_URL, &proto)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::model::discovery::NoDiscovery;
    use crate::model::service::*;
    use crate::model::builder;
    use crate::xds::cluster::ClusterResolver;
    use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType;
    use prost::Message;

    fn service_with_backends() -> ServiceDescription {
        ServiceDescription {
            name: "svc.example.com".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![
                    RpcDescription { name: "A".into(), ..Default::default() },
                    RpcDescription { name: "B".into(), ..Default::default() },
                    RpcDescription { name: "Local".into(), ..Default::default() },
                ],
            }],
            backend_rules: vec![
                BackendRuleDescription {
                    selector: "svc.Api.A".into(),
                    address: "https://z-backend.example.com".into(),
                    ..Default::default()
                },
                BackendRuleDescription {
                    selector: "svc.Api.B".into(),
                    address: "https://a-backend.example.com".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn audiences_are_sorted_and_distinct() {
        let options = Options::default();
        let model = builder::build(&service_with_backends(), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let filter = BackendAuthFilterGenerator.filter(&ctx).expect("ok").expect("filter");
        let Some(ConfigType::TypedConfig(any)) = filter.config_type else {
            panic!("typed config expected");
        };
        let proto = BackendAuthFilterConfig::decode(any.value.as_slice()).expect("decode");
        assert_eq!(
            proto.jwt_audiences,
            vec![
                "https://a-backend.example.com/".to_string(),
                "https://z-backend.example.com/".to_string(),
            ]
        );
        match proto.id_token_source.expect("source") {
            IdTokenSource::MetadataServerUri(uri) => {
                assert_eq!(
                    uri,
                    "http://169.254.169.254/computeMetadata/v1/instance/service-accounts/default/identity"
                );
            }
            other => panic!("unexpected token source: {:?}", other),
        }
    }

    #[test]
    fn omitted_without_audiences() {
        let mut service = service_with_backends();
        service.backend_rules.clear();
        let options = Options::default();
        let model = builder::build(&service, &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        assert!(BackendAuthFilterGenerator.filter(&ctx).expect("ok").is_none());
    }

    #[test]
    fn iam_source_names_the_service_account() {
        let options = Options {
            token_source: "iam".into(),
            iam_service_account: Some("proxy@project.iam.example.com".into()),
            ..Default::default()
        };
        let model = builder::build(&service_with_backends(), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let filter = BackendAuthFilterGenerator.filter(&ctx).expect("ok").expect("filter");
        let Some(ConfigType::TypedConfig(any)) = filter.config_type else {
            panic!("typed config expected");
        };
        let proto = BackendAuthFilterConfig::decode(any.value.as_slice()).expect("decode");
        assert_eq!(
            proto.id_token_source,
            Some(IdTokenSource::Iam(IamIdTokenInfo {
                service_account: "proxy@project.iam.example.com".into()
            }))
        );
    }

    #[test]
    fn per_route_names_the_method_audience() {
        let options = Options::default();
        let model = builder::build(&service_with_backends(), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let method = &model.methods["svc.Api.A"];
        let pattern = HttpPattern {
            http_method: "GET".into(),
            template: crate::template::UriTemplate::parse("/v1/a").expect("template"),
        };
        let any = BackendAuthFilterGenerator
            .per_route(&ctx, method, &pattern)
            .expect("ok")
            .expect("override");
        let proto = BackendAuthPerRoute::decode(any.value.as_slice()).expect("decode");
        assert_eq!(proto.jwt_audience, "https://z-backend.example.com/");

        let local = &model.methods["svc.Api.Local"];
        assert!(BackendAuthFilterGenerator
            .per_route(&ctx, local, &pattern)
            .expect("ok")
            .is_none());
    }
}
