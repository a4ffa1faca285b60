//! CORS filter generator.
//!
//! The listener chain carries the empty `Cors` marker; the effective policy
//! is attached to the virtual host as a `CorsPolicy` per-filter config,
//! built from the deployment's CORS preset. Pass-through deployments keep
//! the marker only and let the backend answer preflights (see the proxied
//! CORS route generator).

use envoy_types::pb::envoy::extensions::filters::http::cors::v3::{
    Cors as CorsMarkerProto, CorsPolicy as CorsPolicyProto,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue};

use crate::config::CorsPreset;
use crate::errors::{Error, Result};
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub const CORS_FILTER_NAME: &str = "envoy.filters.http.cors";
pub const CORS_MARKER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.cors.v3.Cors";
pub const CORS_POLICY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.cors.v3.CorsPolicy";

pub struct CorsFilterGenerator;

impl CorsFilterGenerator {
    fn enabled(ctx: &CompileContext<'_>) -> bool {
        ctx.options.cors_preset.is_some() || ctx.model.cors_pass_through
    }
}

impl FilterGenerator for CorsFilterGenerator {
    fn name(&self) -> &'static str {
        CORS_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        if !Self::enabled(ctx) {
            return Ok(None);
        }
        Ok(Some(http_filter(
            CORS_FILTER_NAME,
            any_from_message(CORS_MARKER_TYPE_URL, &CorsMarkerProto::default()),
        )))
    }
}

/// Virtual-host-level CORS policy for preset deployments.
///
/// Returns the `(filter name, Any)` pair the route configuration attaches
/// as `typed_per_filter_config`, or `None` without a preset.
pub fn virtual_host_policy(ctx: &CompileContext<'_>) -> Result<Option<(String, EnvoyAny)>> {
    let Some(raw_preset) = ctx.options.cors_preset.as_ref() else {
        return Ok(None);
    };
    let preset = CorsPreset::parse(raw_preset)?;

    let origin_matcher = match preset {
        CorsPreset::Basic => StringMatcher {
            match_pattern: Some(MatchPattern::Exact(ctx.options.cors_allow_origin.clone())),
            ..Default::default()
        },
        CorsPreset::WithRegex => {
            let raw = &ctx.options.cors_allow_origin_regex;
            regex::Regex::new(raw).map_err(|err| {
                Error::options(format!("invalid cors_allow_origin_regex '{}': {}", raw, err))
            })?;
            StringMatcher {
                match_pattern: Some(MatchPattern::SafeRegex(RegexMatcher {
                    regex: raw.clone(),
                    ..Default::default()
                })),
                ..Default::default()
            }
        }
    };

    let mut policy = CorsPolicyProto {
        allow_origin_string_match: vec![origin_matcher],
        allow_methods: ctx.options.cors_allow_methods.clone(),
        allow_headers: ctx.options.cors_allow_headers.clone(),
        expose_headers: ctx.options.cors_expose_headers.clone(),
        max_age: ctx.options.cors_max_age_secs.to_string(),
        ..Default::default()
    };
    if ctx.options.cors_allow_credentials {
        policy.allow_credentials = Some(BoolValue { value: true });
    }

    Ok(Some((CORS_FILTER_NAME.to_string(), any_from_message(CORS_POLICY_TYPE_URL, &policy))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::model::discovery::NoDiscovery;
    use crate::model::service::{ApiDescription, EndpointDescription, RpcDescription, ServiceDescription};
    use crate::model::{builder, ServiceModel};
    use crate::xds::cluster::ClusterResolver;
    use prost::Message;

    fn model(allow_cors: bool, options: &Options) -> ServiceModel {
        let service = ServiceDescription {
            name: "svc.example.com".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![RpcDescription { name: "Call".into(), ..Default::default() }],
            }],
            endpoints: if allow_cors {
                vec![EndpointDescription { name: "svc.example.com".into(), allow_cors: true }]
            } else {
                Vec::new()
            },
            ..Default::default()
        };
        builder::build(&service, options, &NoDiscovery).expect("model")
    }

    #[test]
    fn disabled_without_preset_or_pass_through() {
        let options = Options::default();
        let model = model(false, &options);
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        assert!(CorsFilterGenerator.filter(&ctx).expect("filter").is_none());
        assert!(virtual_host_policy(&ctx).expect("policy").is_none());
    }

    #[test]
    fn pass_through_emits_marker_without_policy() {
        let options = Options::default();
        let model = model(true, &options);
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let filter = CorsFilterGenerator.filter(&ctx).expect("filter").expect("enabled");
        assert_eq!(filter.name, CORS_FILTER_NAME);
        assert!(virtual_host_policy(&ctx).expect("policy").is_none());
    }

    #[test]
    fn basic_preset_builds_exact_origin_policy() {
        let options = Options {
            cors_preset: Some("basic".into()),
            cors_allow_origin: "http://example.com".into(),
            cors_allow_methods: "GET,POST".into(),
            cors_allow_credentials: true,
            ..Default::default()
        };
        let model = model(false, &options);
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let (name, any) = virtual_host_policy(&ctx).expect("ok").expect("policy");
        assert_eq!(name, CORS_FILTER_NAME);
        assert_eq!(any.type_url, CORS_POLICY_TYPE_URL);

        let policy = CorsPolicyProto::decode(any.value.as_slice()).expect("decode");
        assert_eq!(
            policy.allow_origin_string_match[0].match_pattern,
            Some(MatchPattern::Exact("http://example.com".into()))
        );
        assert_eq!(policy.allow_methods, "GET,POST");
        assert_eq!(policy.allow_credentials, Some(BoolValue { value: true }));
    }

    #[test]
    fn regex_preset_validates_the_pattern() {
        let options = Options {
            cors_preset: Some("cors_with_regex".into()),
            cors_allow_origin_regex: "(".into(),
            ..Default::default()
        };
        let model = model(false, &options);
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        assert!(virtual_host_policy(&ctx).is_err());
    }
}
