//! Deny routes: per-path 405s and the catch-all 404.
//!
//! The deny-invalid-method generator wraps the backend and health-check
//! generators and re-harvests their affected paths on every run rather
//! than caching routes emitted earlier in the pipeline; the recomputation
//! is intentionally identical. For every distinct rendered path bound by a
//! specific HTTP method it emits one 405 direct-response route naming the
//! original template. The deny-all generator is always last so that
//! anything unmatched falls through to a diagnostic 404.

use std::collections::HashSet;

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_match::PathSpecifier, DirectResponseAction, Route, RouteMatch,
};

use crate::errors::Result;
use crate::xds::filters::http::FilterPipeline;
use crate::xds::route::{backend, health_check, RouteGenerator};
use crate::xds::CompileContext;

const NOT_DEFINED_BODY: &str = "The requested path is not defined by this API.";

fn method_not_allowed_body(template: &str) -> String {
    format!(
        "The current request matches path template \"{}\" but its HTTP method is not allowed.",
        template
    )
}

/// Per-path 405 routes for specifically-bound paths.
pub struct DenyInvalidMethodGenerator {
    wrapped: Vec<Box<dyn RouteGenerator>>,
}

impl DenyInvalidMethodGenerator {
    /// Wrap the generators whose paths are method-bound: backend routes and
    /// the health-check route.
    pub fn standard() -> Self {
        Self {
            wrapped: vec![
                Box::new(backend::BackendRouteGenerator),
                Box::new(health_check::HealthCheckRouteGenerator),
            ],
        }
    }
}

impl RouteGenerator for DenyInvalidMethodGenerator {
    fn name(&self) -> &'static str {
        "deny_invalid_method"
    }

    fn generate(
        &self,
        ctx: &CompileContext<'_>,
        _filters: &FilterPipeline,
    ) -> Result<Vec<Route>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut routes = Vec::new();

        for generator in &self.wrapped {
            for affected in generator.affected_paths(ctx)? {
                if !affected.specific_method {
                    continue;
                }
                if !seen.insert(affected.matcher.rendered().to_string()) {
                    continue;
                }

                routes.push(Route {
                    r#match: Some(RouteMatch {
                        path_specifier: Some(affected.matcher.to_path_specifier()),
                        ..Default::default()
                    }),
                    action: Some(Action::DirectResponse(DirectResponseAction {
                        status: 405,
                        body: Some(DataSource {
                            specifier: Some(Specifier::InlineString(method_not_allowed_body(
                                &affected.template,
                            ))),
                            ..Default::default()
                        }),
                        body_format: None,
                    })),
                    ..Default::default()
                });
            }
        }

        Ok(routes)
    }
}

/// The final catch-all 404.
pub struct DenyAllGenerator;

impl RouteGenerator for DenyAllGenerator {
    fn name(&self) -> &'static str {
        "deny_all"
    }

    fn generate(
        &self,
        _ctx: &CompileContext<'_>,
        _filters: &FilterPipeline,
    ) -> Result<Vec<Route>> {
        Ok(vec![Route {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
                ..Default::default()
            }),
            action: Some(Action::DirectResponse(DirectResponseAction {
                status: 404,
                body: Some(DataSource {
                    specifier: Some(Specifier::InlineString(NOT_DEFINED_BODY.to_string())),
                    ..Default::default()
                }),
                body_format: None,
            })),
            ..Default::default()
        }])
    }
}
