//! JWT authentication filter generator.
//!
//! Providers come from the model's authentication section; each gets a
//! remote JWKS source pointed at its key-set fetch cluster. Requirements
//! are keyed by selector in the filter's requirement map, and routes of
//! auth-requiring methods reference their selector through a per-route
//! config. The filter is omitted entirely when no method requires
//! authentication, even if providers are declared.

use envoy_types::pb::envoy::config::core::v3::{http_uri::HttpUpstreamType, HttpUri};
use envoy_types::pb::envoy::extensions::filters::http::jwt_authn::v3::{
    jwt_provider::JwksSourceSpecifier, jwt_requirement::RequiresType, per_route_config,
    JwksAsyncFetch, JwtAuthentication, JwtCacheConfig, JwtHeader, JwtProvider, JwtRequirement,
    JwtRequirementOrList, PerRouteConfig, ProviderWithAudiences, RemoteJwks,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration as ProtoDuration, Empty};

use crate::errors::Result;
use crate::model::{HttpPattern, MethodInfo};
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub const JWT_AUTHN_FILTER_NAME: &str = "envoy.filters.http.jwt_authn";
const JWT_AUTHN_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.JwtAuthentication";
const JWT_AUTHN_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.PerRouteConfig";

/// Metadata namespace the proxy reads verified payloads from.
const PAYLOAD_METADATA_KEY: &str = "jwt_payloads";

pub struct JwtAuthnFilterGenerator;

impl FilterGenerator for JwtAuthnFilterGenerator {
    fn name(&self) -> &'static str {
        JWT_AUTHN_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        if !ctx.model.any_method_requires_auth() {
            return Ok(None);
        }

        let mut proto = JwtAuthentication { bypass_cors_preflight: true, ..Default::default() };

        for provider in ctx.model.auth_providers.values() {
            let cluster = ctx.clusters.jwks_cluster_name(&provider.id)?;
            proto.providers.insert(provider.id.clone(), build_provider(ctx, provider, cluster));
        }

        for method in ctx.model.methods.values().filter(|method| method.require_auth) {
            proto.requirement_map.insert(method.selector.clone(), method_requirement(method));
        }

        Ok(Some(http_filter(
            JWT_AUTHN_FILTER_NAME,
            any_from_message(JWT_AUTHN_TYPE_URL, &proto),
        )))
    }

    fn per_route(
        &self,
        ctx: &CompileContext<'_>,
        method: &MethodInfo,
        _pattern: &HttpPattern,
    ) -> Result<Option<EnvoyAny>> {
        if !ctx.model.any_method_requires_auth() || !method.require_auth {
            return Ok(None);
        }

        let proto = PerRouteConfig {
            requirement_specifier: Some(per_route_config::RequirementSpecifier::RequirementName(
                method.selector.clone(),
            )),
        };
        Ok(Some(any_from_message(JWT_AUTHN_PER_ROUTE_TYPE_URL, &proto)))
    }
}

fn build_provider(
    ctx: &CompileContext<'_>,
    provider: &crate::model::AuthProvider,
    cluster: String,
) -> JwtProvider {
    let remote_jwks = RemoteJwks {
        http_uri: Some(HttpUri {
            uri: provider.jwks_uri.clone(),
            timeout: Some(ProtoDuration {
                seconds: ctx.options.jwks_fetch_timeout_secs as i64,
                nanos: 0,
            }),
            http_upstream_type: Some(HttpUpstreamType::Cluster(cluster)),
        }),
        cache_duration: ctx
            .options
            .jwks_cache_duration_secs
            .map(|secs| ProtoDuration { seconds: secs as i64, nanos: 0 }),
        async_fetch: if ctx.options.disable_jwks_async_fetch {
            None
        } else {
            Some(JwksAsyncFetch::default())
        },
        ..Default::default()
    };

    JwtProvider {
        issuer: provider.issuer.clone(),
        audiences: provider.audiences.clone(),
        forward: true,
        from_headers: vec![JwtHeader {
            name: "Authorization".to_string(),
            value_prefix: "Bearer ".to_string(),
        }],
        from_params: vec!["access_token".to_string()],
        payload_in_metadata: PAYLOAD_METADATA_KEY.to_string(),
        jwt_cache_config: Some(JwtCacheConfig {
            jwt_cache_size: ctx.options.jwt_cache_size,
            ..Default::default()
        }),
        jwks_source_specifier: Some(JwksSourceSpecifier::RemoteJwks(remote_jwks)),
        ..Default::default()
    }
}

fn method_requirement(method: &MethodInfo) -> JwtRequirement {
    let mut requirements: Vec<JwtRequirement> = method
        .auth_requirements
        .iter()
        .map(|requirement| {
            let requires_type = if requirement.audiences.is_empty() {
                RequiresType::ProviderName(requirement.provider_id.clone())
            } else {
                RequiresType::ProviderAndAudiences(ProviderWithAudiences {
                    provider_name: requirement.provider_id.clone(),
                    audiences: requirement.audiences.clone(),
                })
            };
            JwtRequirement { requires_type: Some(requires_type) }
        })
        .collect();

    if method.allow_without_credential {
        requirements.push(JwtRequirement {
            requires_type: Some(RequiresType::AllowMissing(Empty::default())),
        });
    }

    if requirements.len() == 1 {
        requirements.remove(0)
    } else {
        JwtRequirement {
            requires_type: Some(RequiresType::RequiresAny(JwtRequirementOrList {
                requirements,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::model::discovery::NoDiscovery;
    use crate::model::service::*;
    use crate::model::{builder, ServiceModel};
    use crate::xds::cluster::ClusterResolver;
    use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType;
    use prost::Message;

    fn service_with_auth(require: bool) -> ServiceDescription {
        ServiceDescription {
            name: "svc.example.com".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![
                    RpcDescription { name: "Open".into(), ..Default::default() },
                    RpcDescription { name: "Secure".into(), ..Default::default() },
                ],
            }],
            authentication: AuthenticationDescription {
                providers: vec![AuthProviderDescription {
                    id: "firebase".into(),
                    issuer: "https://issuer.example.com".into(),
                    jwks_uri: Some("https://issuer.example.com/keys".into()),
                    audiences: vec!["aud-b".into(), "aud-a".into()],
                }],
                rules: if require {
                    vec![AuthRuleDescription {
                        selector: "svc.Api.Secure".into(),
                        requirements: vec![AuthRequirementDescription {
                            provider_id: "firebase".into(),
                            audiences: Vec::new(),
                        }],
                        allow_without_credential: false,
                    }]
                } else {
                    Vec::new()
                },
            },
            ..Default::default()
        }
    }

    fn build_ctx(service: &ServiceDescription, options: &Options) -> (ServiceModel, Options) {
        let model = builder::build(service, options, &NoDiscovery).expect("model");
        (model, options.clone())
    }

    #[test]
    fn omitted_when_no_method_requires_auth() {
        let service = service_with_auth(false);
        let (model, options) = build_ctx(&service, &Options::default());
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        assert!(JwtAuthnFilterGenerator.filter(&ctx).expect("ok").is_none());
        let method = &model.methods["svc.Api.Open"];
        let pattern = HttpPattern {
            http_method: "GET".into(),
            template: crate::template::UriTemplate::parse("/v1/open").expect("template"),
        };
        assert!(JwtAuthnFilterGenerator
            .per_route(&ctx, method, &pattern)
            .expect("ok")
            .is_none());
    }

    #[test]
    fn builds_providers_and_requirement_map() {
        let service = service_with_auth(true);
        let (model, options) = build_ctx(&service, &Options::default());
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let filter = JwtAuthnFilterGenerator.filter(&ctx).expect("ok").expect("filter");
        let Some(ConfigType::TypedConfig(any)) = filter.config_type else {
            panic!("typed config expected");
        };
        let proto = JwtAuthentication::decode(any.value.as_slice()).expect("decode");

        let provider = &proto.providers["firebase"];
        // sorted for deterministic emission
        assert_eq!(provider.audiences, vec!["aud-a".to_string(), "aud-b".to_string()]);
        assert!(provider.forward);
        match provider.jwks_source_specifier.as_ref().expect("jwks") {
            JwksSourceSpecifier::RemoteJwks(remote) => {
                let uri = remote.http_uri.as_ref().expect("http_uri");
                assert_eq!(uri.uri, "https://issuer.example.com/keys");
                assert_eq!(
                    uri.http_upstream_type,
                    Some(HttpUpstreamType::Cluster(
                        "jwt-provider-cluster-issuer.example.com:443".into()
                    ))
                );
                assert!(remote.async_fetch.is_some());
            }
            other => panic!("unexpected jwks source: {:?}", other),
        }

        assert!(proto.requirement_map.contains_key("svc.Api.Secure"));
        assert!(!proto.requirement_map.contains_key("svc.Api.Open"));
        assert!(proto.bypass_cors_preflight);
    }

    #[test]
    fn per_route_references_the_selector() {
        let service = service_with_auth(true);
        let (model, options) = build_ctx(&service, &Options::default());
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let method = &model.methods["svc.Api.Secure"];
        let pattern = HttpPattern {
            http_method: "GET".into(),
            template: crate::template::UriTemplate::parse("/v1/secure").expect("template"),
        };
        let any = JwtAuthnFilterGenerator
            .per_route(&ctx, method, &pattern)
            .expect("ok")
            .expect("override");
        assert_eq!(any.type_url, JWT_AUTHN_PER_ROUTE_TYPE_URL);

        let proto = PerRouteConfig::decode(any.value.as_slice()).expect("decode");
        assert_eq!(
            proto.requirement_specifier,
            Some(per_route_config::RequirementSpecifier::RequirementName(
                "svc.Api.Secure".into()
            ))
        );
    }

    #[test]
    fn allow_without_credential_becomes_requires_any() {
        let mut service = service_with_auth(true);
        service.authentication.rules[0].allow_without_credential = true;
        let model = builder::build(&service, &Options::default(), &NoDiscovery).expect("model");

        let requirement = method_requirement(&model.methods["svc.Api.Secure"]);
        match requirement.requires_type.expect("type") {
            RequiresType::RequiresAny(list) => {
                assert_eq!(list.requirements.len(), 2);
                assert!(matches!(
                    list.requirements[1].requires_type,
                    Some(RequiresType::AllowMissing(_))
                ));
            }
            other => panic!("unexpected requirement: {:?}", other),
        }
    }
}
