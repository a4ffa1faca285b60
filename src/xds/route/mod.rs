//! Route generator pipeline.
//!
//! The route table is assembled by an ordered list of generators; the order
//! is a correctness invariant because the proxy matches first-match-wins.
//! Backend routes come first (most-specific-first within, see
//! [`crate::template::sort`]), then proxied CORS clones, the health-check
//! route, CORS preflight routes, the per-path 405 deny routes, and the
//! catch-all 404 last.

pub mod backend;
pub mod cors;
pub mod deny;
pub mod health_check;

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, route_match::PathSpecifier, HeaderMatcher, Route,
    RouteMatch,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};

use crate::config::Options;
use crate::errors::Result;
use crate::model::{HttpPattern, MethodInfo, ServiceModel};
use crate::template::sort::{self, OrderedPattern, ANY_METHOD};
use crate::xds::filters::http::FilterPipeline;
use crate::xds::CompileContext;

/// One rendered path match form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    Exact(String),
    Regex(String),
}

impl PathMatcher {
    /// The rendered string; the dedup key for CORS clones and deny routes.
    pub fn rendered(&self) -> &str {
        match self {
            Self::Exact(path) => path,
            Self::Regex(regex) => regex,
        }
    }

    pub fn to_path_specifier(&self) -> PathSpecifier {
        match self {
            Self::Exact(path) => PathSpecifier::Path(path.clone()),
            Self::Regex(regex) => PathSpecifier::SafeRegex(RegexMatcher {
                regex: regex.clone(),
                ..Default::default()
            }),
        }
    }
}

/// A path affected by a generator, as consumed by the deny-invalid-method
/// generator.
#[derive(Debug, Clone)]
pub struct AffectedPath {
    pub matcher: PathMatcher,
    /// Source template, for the 405 diagnostic body.
    pub template: String,
    /// Whether the path was bound by a specific HTTP method rather than the
    /// wildcard method.
    pub specific_method: bool,
}

/// One stage of the route pipeline.
pub trait RouteGenerator {
    fn name(&self) -> &'static str;

    fn generate(
        &self,
        ctx: &CompileContext<'_>,
        filters: &FilterPipeline,
    ) -> Result<Vec<Route>>;

    /// Paths this generator binds, recomputed on every call; only the
    /// deny-invalid-method generator consumes this.
    fn affected_paths(&self, _ctx: &CompileContext<'_>) -> Result<Vec<AffectedPath>> {
        Ok(Vec::new())
    }
}

/// The fixed pipeline order.
pub fn route_pipeline() -> Vec<Box<dyn RouteGenerator>> {
    vec![
        Box::new(backend::BackendRouteGenerator),
        Box::new(cors::ProxiedCorsRouteGenerator),
        Box::new(health_check::HealthCheckRouteGenerator),
        Box::new(cors::CorsPreflightRouteGenerator),
        Box::new(deny::DenyInvalidMethodGenerator::standard()),
        Box::new(deny::DenyAllGenerator),
    ]
}

/// Run the pipeline and concatenate the output in order.
pub fn generate_routes(
    ctx: &CompileContext<'_>,
    filters: &FilterPipeline,
) -> Result<Vec<Route>> {
    let mut routes = Vec::new();
    for generator in route_pipeline() {
        let mut generated = generator.generate(ctx, filters)?;
        tracing::debug!(generator = generator.name(), routes = generated.len(), "routes generated");
        routes.append(&mut generated);
    }
    Ok(routes)
}

/// All (method, pattern) pairs of the model under the strict total order.
pub fn ordered_patterns(model: &ServiceModel) -> Vec<(&MethodInfo, &HttpPattern)> {
    let mut entries: Vec<(OrderedPattern<'_>, &MethodInfo, &HttpPattern)> = model
        .methods
        .values()
        .flat_map(|method| {
            method.patterns.iter().enumerate().map(move |(index, pattern)| {
                (
                    OrderedPattern {
                        template: &pattern.template,
                        http_method: &pattern.http_method,
                        selector: &method.selector,
                        declaration_index: index,
                    },
                    method,
                    pattern,
                )
            })
        })
        .collect();
    entries.sort_by(|a, b| sort::compare(&a.0, &b.0));
    entries.into_iter().map(|(_, method, pattern)| (method, pattern)).collect()
}

/// Render the proxy match forms for one pattern: two exact matchers (with
/// and without trailing slash) for wildcard-free templates, one regex
/// otherwise. Shared by the backend and deny-invalid-method paths so the
/// colon-in-wildcard option can never diverge between them.
pub fn pattern_matchers(pattern: &HttpPattern, options: &Options) -> Vec<PathMatcher> {
    if pattern.template.is_exact() {
        let path = pattern.template.exact_path();
        let with_slash = format!("{}/", path);
        vec![PathMatcher::Exact(path), PathMatcher::Exact(with_slash)]
    } else {
        vec![PathMatcher::Regex(
            pattern.template.matching_regex(options.disallow_colon_in_wildcard_path_segment),
        )]
    }
}

/// Exact-match header matcher.
pub(crate) fn exact_header_matcher(name: &str, value: &str) -> HeaderMatcher {
    HeaderMatcher {
        name: name.to_string(),
        header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Exact(value.to_string())),
            ignore_case: false,
        })),
        ..Default::default()
    }
}

/// `:method` header matcher; `None` for the wildcard method.
pub(crate) fn method_header_matcher(http_method: &str) -> Option<HeaderMatcher> {
    (http_method != ANY_METHOD).then(|| exact_header_matcher(":method", http_method))
}

/// A `RouteMatch` for one path form plus an optional method matcher.
pub(crate) fn route_match(matcher: &PathMatcher, http_method: &str) -> RouteMatch {
    RouteMatch {
        path_specifier: Some(matcher.to_path_specifier()),
        headers: method_header_matcher(http_method).into_iter().collect(),
        ..Default::default()
    }
}
