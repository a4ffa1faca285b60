//! Health-check route.
//!
//! An exact-match route answering the configured health path with the
//! proxy's own status instead of forwarding upstream. The path counts as a
//! specific-method binding for the deny-invalid-method generator.

use envoy_types::pb::envoy::config::route::v3::{route::Action, DirectResponseAction, Route};

use crate::errors::Result;
use crate::model::HEALTH_CHECK_SELECTOR;
use crate::template::sort::ANY_METHOD;
use crate::xds::filters::http::FilterPipeline;
use crate::xds::route::{pattern_matchers, route_match, AffectedPath, RouteGenerator};
use crate::xds::CompileContext;

pub struct HealthCheckRouteGenerator;

impl RouteGenerator for HealthCheckRouteGenerator {
    fn name(&self) -> &'static str {
        "health_check_route"
    }

    fn generate(
        &self,
        ctx: &CompileContext<'_>,
        _filters: &FilterPipeline,
    ) -> Result<Vec<Route>> {
        let Some(method) = ctx.model.methods.get(HEALTH_CHECK_SELECTOR) else {
            return Ok(Vec::new());
        };

        let mut routes = Vec::new();
        for pattern in &method.patterns {
            for matcher in pattern_matchers(pattern, ctx.options) {
                routes.push(Route {
                    r#match: Some(route_match(&matcher, &pattern.http_method)),
                    action: Some(Action::DirectResponse(DirectResponseAction {
                        status: 200,
                        body: None,
                        body_format: None,
                    })),
                    ..Default::default()
                });
            }
        }
        Ok(routes)
    }

    fn affected_paths(&self, ctx: &CompileContext<'_>) -> Result<Vec<AffectedPath>> {
        let Some(method) = ctx.model.methods.get(HEALTH_CHECK_SELECTOR) else {
            return Ok(Vec::new());
        };

        let mut affected = Vec::new();
        for pattern in &method.patterns {
            for matcher in pattern_matchers(pattern, ctx.options) {
                affected.push(AffectedPath {
                    matcher,
                    template: pattern.template.to_string(),
                    specific_method: pattern.http_method != ANY_METHOD,
                });
            }
        }
        Ok(affected)
    }
}
