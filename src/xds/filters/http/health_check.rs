//! Health check filter generator.
//!
//! Answers the configured health path with the proxy's own health status
//! instead of forwarding upstream. Matches on the `:path` pseudo-header.

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, HeaderMatcher,
};
use envoy_types::pb::envoy::extensions::filters::http::health_check::v3::HealthCheck as HealthCheckProto;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::BoolValue;

use crate::errors::Result;
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub const HEALTH_CHECK_FILTER_NAME: &str = "envoy.filters.http.health_check";
const HEALTH_CHECK_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.health_check.v3.HealthCheck";

pub struct HealthCheckFilterGenerator;

impl FilterGenerator for HealthCheckFilterGenerator {
    fn name(&self) -> &'static str {
        HEALTH_CHECK_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        let Some(path) = ctx.options.healthz_path.as_ref() else {
            return Ok(None);
        };

        let proto = HealthCheckProto {
            pass_through_mode: Some(BoolValue { value: false }),
            headers: vec![HeaderMatcher {
                name: ":path".to_string(),
                header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                    match_pattern: Some(MatchPattern::Exact(path.clone())),
                    ignore_case: false,
                })),
                ..Default::default()
            }],
            ..Default::default()
        };

        Ok(Some(http_filter(
            HEALTH_CHECK_FILTER_NAME,
            any_from_message(HEALTH_CHECK_TYPE_URL, &proto),
        )))
    }
}
