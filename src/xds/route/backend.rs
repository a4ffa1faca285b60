//! Backend proxy routes.
//!
//! One or more routes per method pattern, emitted most-specific-first.
//! Exact templates produce two routes (with and without a trailing slash),
//! wildcard templates one safe-regex route. Each route proxies to the
//! method's resolved cluster with its host rewrite, timing and retry
//! policy, and carries the per-route filter overrides.

use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_action::HostRewriteSpecifier, Route,
    RouteAction,
};

use crate::errors::Result;
use crate::template::sort::ANY_METHOD;
use crate::xds::filters::http::FilterPipeline;
use crate::xds::route::{
    ordered_patterns, pattern_matchers, route_match, AffectedPath, RouteGenerator,
};
use crate::xds::CompileContext;

pub struct BackendRouteGenerator;

impl RouteGenerator for BackendRouteGenerator {
    fn name(&self) -> &'static str {
        "backend_routes"
    }

    fn generate(
        &self,
        ctx: &CompileContext<'_>,
        filters: &FilterPipeline,
    ) -> Result<Vec<Route>> {
        let retry_policy = ctx.clusters.retry_policy();
        let mut routes = Vec::new();

        for (method, pattern) in ordered_patterns(ctx.model) {
            if method.generated {
                continue;
            }

            let timing = ctx.clusters.route_timing(method);
            let cluster = ctx.clusters.cluster_name_for(method).to_string();
            let host_rewrite = ctx.clusters.host_rewrite(method);
            let overrides = filters.per_route_overrides(ctx, method, pattern)?;

            for matcher in pattern_matchers(pattern, ctx.options) {
                let action = RouteAction {
                    cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.clone())),
                    host_rewrite_specifier: host_rewrite
                        .clone()
                        .map(HostRewriteSpecifier::HostRewriteLiteral),
                    timeout: Some(timing.timeout.clone()),
                    idle_timeout: Some(timing.idle_timeout.clone()),
                    retry_policy: retry_policy.clone(),
                    ..Default::default()
                };

                routes.push(Route {
                    r#match: Some(route_match(&matcher, &pattern.http_method)),
                    action: Some(Action::Route(action)),
                    typed_per_filter_config: overrides
                        .iter()
                        .map(|(name, any)| (name.clone(), any.clone()))
                        .collect(),
                    ..Default::default()
                });
            }
        }

        Ok(routes)
    }

    fn affected_paths(&self, ctx: &CompileContext<'_>) -> Result<Vec<AffectedPath>> {
        let mut affected = Vec::new();
        for (method, pattern) in ordered_patterns(ctx.model) {
            if method.generated {
                continue;
            }
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
