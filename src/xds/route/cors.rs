//! CORS route generators.
//!
//! Two distinct strategies share this module:
//!
//! * **Pass-through** (`allow_cors` on the service endpoint): every
//!   non-OPTIONS backend pattern is cloned into a synthetic `OPTIONS`
//!   route proxied to the same cluster, deduplicated by rendered path, so
//!   the backend answers its own preflights.
//! * **Presets** (`basic` / `cors_with_regex`): a catch-all preflight
//!   route sends OPTIONS requests carrying an allowed `Origin` and
//!   `Access-Control-Request-Method` through the CORS filter to the local
//!   backend cluster, and a second catch-all answers malformed preflights
//!   with a 400 diagnostic.

use std::collections::HashSet;

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, route::Action, route_action::ClusterSpecifier,
    route_match::PathSpecifier, DirectResponseAction, HeaderMatcher, Route, RouteAction,
    RouteMatch,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};

use crate::config::CorsPreset;
use crate::errors::{Error, Result};
use crate::xds::filters::http::FilterPipeline;
use crate::xds::route::{
    exact_header_matcher, ordered_patterns, pattern_matchers, route_match, RouteGenerator,
};
use crate::xds::CompileContext;

const PREFLIGHT_MISSING_HEADERS_BODY: &str = "The CORS preflight request is missing one or more \
     required headers (Origin, Access-Control-Request-Method) or the origin is not allowed.";

/// Synthetic OPTIONS routes for pass-through deployments.
pub struct ProxiedCorsRouteGenerator;

impl RouteGenerator for ProxiedCorsRouteGenerator {
    fn name(&self) -> &'static str {
        "proxied_cors_routes"
    }

    fn generate(
        &self,
        ctx: &CompileContext<'_>,
        _filters: &FilterPipeline,
    ) -> Result<Vec<Route>> {
        if !ctx.model.cors_pass_through {
            return Ok(Vec::new());
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut routes = Vec::new();

        for (method, pattern) in ordered_patterns(ctx.model) {
            if method.generated || pattern.http_method == "OPTIONS" {
                continue;
            }

            let timing = ctx.clusters.route_timing(method);
            let cluster = ctx.clusters.cluster_name_for(method).to_string();

            for matcher in pattern_matchers(pattern, ctx.options) {
                if !seen.insert(matcher.rendered().to_string()) {
                    continue;
                }

                let action = RouteAction {
                    cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.clone())),
                    timeout: Some(timing.timeout.clone()),
                    idle_timeout: Some(timing.idle_timeout.clone()),
                    ..Default::default()
                };
                routes.push(Route {
                    r#match: Some(route_match(&matcher, "OPTIONS")),
                    action: Some(Action::Route(action)),
                    ..Default::default()
                });
            }
        }

        Ok(routes)
    }
}

/// Catch-all preflight routes for preset deployments.
pub struct CorsPreflightRouteGenerator;

impl RouteGenerator for CorsPreflightRouteGenerator {
    fn name(&self) -> &'static str {
        "cors_preflight_routes"
    }

    fn generate(
        &self,
        ctx: &CompileContext<'_>,
        _filters: &FilterPipeline,
    ) -> Result<Vec<Route>> {
        let Some(raw_preset) = ctx.options.cors_preset.as_ref() else {
            return Ok(Vec::new());
        };
        let preset = CorsPreset::parse(raw_preset)?;

        let origin_matcher = match preset {
            CorsPreset::Basic => HeaderMatchSpecifier::StringMatch(StringMatcher {
                match_pattern: Some(MatchPattern::Exact(ctx.options.cors_allow_origin.clone())),
                ignore_case: false,
            }),
            CorsPreset::WithRegex => {
                let raw = &ctx.options.cors_allow_origin_regex;
                regex::Regex::new(raw).map_err(|err| {
                    Error::options(format!("invalid cors_allow_origin_regex '{}': {}", raw, err))
                })?;
                HeaderMatchSpecifier::StringMatch(StringMatcher {
                    match_pattern: Some(MatchPattern::SafeRegex(RegexMatcher {
                        regex: raw.clone(),
                        ..Default::default()
                    })),
                    ignore_case: false,
                })
            }
        };

        // Well-formed preflights go upstream so the CORS filter answers
        // them with the configured policy.
        let preflight = Route {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
                headers: vec![
                    exact_header_matcher(":method", "OPTIONS"),
                    HeaderMatcher {
                        name: "origin".to_string(),
                        header_match_specifier: Some(origin_matcher),
                        ..Default::default()
                    },
                    HeaderMatcher {
                        name: "access-control-request-method".to_string(),
                        header_match_specifier: Some(HeaderMatchSpecifier::PresentMatch(true)),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            action: Some(Action::Route(RouteAction {
                cluster_specifier: Some(ClusterSpecifier::Cluster(
                    ctx.clusters.local_cluster_name().to_string(),
                )),
                ..Default::default()
            })),
            ..Default::default()
        };

        // Anything else that is OPTIONS gets a diagnostic instead of a
        // confusing 404 from the deny-all route.
        let malformed = Route {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
                headers: vec![exact_header_matcher(":method", "OPTIONS")],
                ..Default::default()
            }),
            action: Some(Action::DirectResponse(DirectResponseAction {
                status: 400,
                body: Some(DataSource {
                    specifier: Some(Specifier::InlineString(
                        PREFLIGHT_MISSING_HEADERS_BODY.to_string(),
                    )),
                    ..Default::default()
                }),
                body_format: None,
            })),
            ..Default::default()
        };

        Ok(vec![preflight, malformed])
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

    fn service(allow_cors: bool) -> ServiceDescription {
        ServiceDescription {
            name: "svc.example.com".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![
                    RpcDescription { name: "Get".into(), ..Default::default() },
                    RpcDescription { name: "Create".into(), ..Default::default() },
                ],
            }],
            http_rules: vec![
                HttpRuleDescription {
                    selector: "svc.Api.Get".into(),
                    binding: HttpBinding {
                        pattern: HttpPatternKind::Get { path: "/v1/items".into() },
                        body: String::new(),
                    },
                    additional_bindings: Vec::new(),
                },
                HttpRuleDescription {
                    selector: "svc.Api.Create".into(),
                    binding: HttpBinding {
                        pattern: HttpPatternKind::Post { path: "/v1/items".into() },
                        body: "*".into(),
                    },
                    additional_bindings: Vec::new(),
                },
            ],
            endpoints: if allow_cors {
                vec![EndpointDescription { name: "svc.example.com".into(), allow_cors: true }]
            } else {
                Vec::new()
            },
            ..Default::default()
        }
    }

    #[test]
    fn pass_through_clones_each_path_once() {
        let options = Options::default();
        let model = builder::build(&service(true), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let routes = ProxiedCorsRouteGenerator
            .generate(&ctx, &FilterPipeline::standard())
            .expect("routes");

        // two methods bind the same path; the clone is deduplicated, so
        // only the two slash forms remain
        assert_eq!(routes.len(), 2);
        for route in &routes {
            let matched = route.r#match.as_ref().expect("match");
            assert_eq!(matched.headers.len(), 1);
            assert_eq!(matched.headers[0].name, ":method");
        }
    }

    #[test]
    fn pass_through_disabled_without_endpoint_flag() {
        let options = Options::default();
        let model = builder::build(&service(false), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let routes = ProxiedCorsRouteGenerator
            .generate(&ctx, &FilterPipeline::standard())
            .expect("routes");
        assert!(routes.is_empty());
    }

    #[test]
    fn basic_preset_emits_preflight_and_diagnostic_routes() {
        let options = Options {
            cors_preset: Some("basic".into()),
            cors_allow_origin: "http://example.com".into(),
            ..Default::default()
        };
        let model = builder::build(&service(false), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let routes = CorsPreflightRouteGenerator
            .generate(&ctx, &FilterPipeline::standard())
            .expect("routes");
        assert_eq!(routes.len(), 2);

        let preflight = routes[0].r#match.as_ref().expect("match");
        assert_eq!(preflight.headers.len(), 3);
        let origin = &preflight.headers[1];
        assert_eq!(origin.name, "origin");
        assert_eq!(
            origin.header_match_specifier,
            Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                match_pattern: Some(MatchPattern::Exact("http://example.com".into())),
                ignore_case: false,
            }))
        );
        assert!(matches!(routes[0].action, Some(Action::Route(_))));

        let malformed = routes[1].r#match.as_ref().expect("match");
        assert_eq!(malformed.headers.len(), 1);
        match &routes[1].action {
            Some(Action::DirectResponse(response)) => assert_eq!(response.status, 400),
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn regex_preset_uses_a_safe_regex_origin() {
        let options = Options {
            cors_preset: Some("cors_with_regex".into()),
            cors_allow_origin_regex: r"^https?://.*\.example\.com$".into(),
            ..Default::default()
        };
        let model = builder::build(&service(false), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let routes = CorsPreflightRouteGenerator
            .generate(&ctx, &FilterPipeline::standard())
            .expect("routes");
        let origin = &routes[0].r#match.as_ref().expect("match").headers[1];
        match origin.header_match_specifier.as_ref().expect("specifier") {
            HeaderMatchSpecifier::StringMatch(matcher) => {
                assert!(matches!(matcher.match_pattern, Some(MatchPattern::SafeRegex(_))));
            }
            other => panic!("unexpected matcher: {:?}", other),
        }
    }
}
