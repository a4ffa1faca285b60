//! Quota/metering ("service control") filter generator.
//!
//! Reports every non-generated method's traffic to the control plane and
//! enforces API keys and quota. The listener config identifies the service
//! revision; per-route configs carry the operation name, API key locations
//! and metric costs of the matched method.

use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use crate::config::DependencyErrorBehavior;
use crate::errors::Result;
use crate::model::{ApiKeyLocation, HttpPattern, MethodInfo};
use crate::proto::{
    self, MetricCost, ServiceControlFilterConfig, ServiceControlPerRoute,
    SERVICE_CONTROL_FILTER_NAME, SERVICE_CONTROL_PER_ROUTE_TYPE_URL, SERVICE_CONTROL_TYPE_URL,
};
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub struct ServiceControlFilterGenerator;

impl FilterGenerator for ServiceControlFilterGenerator {
    fn name(&self) -> &'static str {
        SERVICE_CONTROL_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        if ctx.options.disable_service_control {
            return Ok(None);
        }

        let behavior = DependencyErrorBehavior::parse(&ctx.options.dependency_error_behavior)?;
        let proto = ServiceControlFilterConfig {
            service_name: ctx.model.service_name.clone(),
            service_config_id: ctx.model.config_id.clone(),
            producer_project_id: ctx.model.producer_project_id.clone(),
            service_control_uri: ctx.options.service_control_uri.clone(),
            network_fail_open: behavior == DependencyErrorBehavior::FailOpen,
        };

        Ok(Some(http_filter(
            SERVICE_CONTROL_FILTER_NAME,
            any_from_message(SERVICE_CONTROL_TYPE_URL, &proto),
        )))
    }

    fn per_route(
        &self,
        ctx: &CompileContext<'_>,
        method: &MethodInfo,
        _pattern: &HttpPattern,
    ) -> Result<Option<EnvoyAny>> {
        if ctx.options.disable_service_control || method.generated {
            return Ok(None);
        }

        let proto = ServiceControlPerRoute {
            operation_name: method.selector.clone(),
            skip_service_control: method.skip_service_control,
            allow_unregistered_calls: method.allow_unregistered_calls,
            metric_costs: method
                .metric_costs
                .iter()
                .map(|(metric, cost)| MetricCost { metric: metric.clone(), cost: *cost })
                .collect(),
            api_key_locations: method
                .api_key_locations
                .iter()
                .map(|location| proto::ApiKeyLocation {
                    source: Some(match location {
                        ApiKeyLocation::Header(name) => {
                            proto::api_key_location::Source::Header(name.clone())
                        }
                        ApiKeyLocation::Query(name) => {
                            proto::api_key_location::Source::Query(name.clone())
                        }
                    }),
                })
                .collect(),
        };

        Ok(Some(any_from_message(SERVICE_CONTROL_PER_ROUTE_TYPE_URL, &proto)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::model::discovery::NoDiscovery;
    use crate::model::service::*;
    use crate::model::builder;
    use crate::template::UriTemplate;
    use crate::xds::cluster::ClusterResolver;
    use prost::Message;
    use std::collections::BTreeMap;

    fn service() -> ServiceDescription {
        ServiceDescription {
            name: "svc.example.com".into(),
            config_id: "2024-05-01r1".into(),
            producer_project_id: "producer-project".into(),
            apis: vec![ApiDescription {
                name: "svc.Api".into(),
                methods: vec![RpcDescription { name: "Call".into(), ..Default::default() }],
            }],
            metric_rules: vec![MetricRuleDescription {
                selector: "svc.Api.Call".into(),
                metric_costs: BTreeMap::from([("zebra".into(), 1), ("alpha".into(), 3)]),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn listener_config_identifies_the_service() {
        let options =
            Options { dependency_error_behavior: "fail_open".into(), ..Default::default() };
        let model = builder::build(&service(), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let filter =
            ServiceControlFilterGenerator.filter(&ctx).expect("ok").expect("filter");
        let any = match filter.config_type.expect("config") {
            envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType::TypedConfig(any) => any,
            other => panic!("unexpected config: {:?}", other),
        };
        let proto = ServiceControlFilterConfig::decode(any.value.as_slice()).expect("decode");
        assert_eq!(proto.service_name, "svc.example.com");
        assert_eq!(proto.service_config_id, "2024-05-01r1");
        assert!(proto.network_fail_open);
    }

    #[test]
    fn per_route_carries_sorted_metric_costs() {
        let options = Options::default();
        let model = builder::build(&service(), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let method = &model.methods["svc.Api.Call"];
        let pattern = HttpPattern {
            http_method: "GET".into(),
            template: UriTemplate::parse("/v1/call").expect("template"),
        };
        let any = ServiceControlFilterGenerator
            .per_route(&ctx, method, &pattern)
            .expect("ok")
            .expect("override");
        let proto = ServiceControlPerRoute::decode(any.value.as_slice()).expect("decode");

        assert_eq!(proto.operation_name, "svc.Api.Call");
        let metrics: Vec<&str> = proto.metric_costs.iter().map(|m| m.metric.as_str()).collect();
        assert_eq!(metrics, vec!["alpha", "zebra"]);
        assert_eq!(proto.api_key_locations.len(), 2);
    }

    #[test]
    fn disabled_option_suppresses_everything() {
        let options = Options { disable_service_control: true, ..Default::default() };
        let model = builder::build(&service(), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        assert!(ServiceControlFilterGenerator.filter(&ctx).expect("ok").is_none());
        let method = &model.methods["svc.Api.Call"];
        let pattern = HttpPattern {
            http_method: "GET".into(),
            template: UriTemplate::parse("/v1/call").expect("template"),
        };
        assert!(ServiceControlFilterGenerator
            .per_route(&ctx, method, &pattern)
            .expect("ok")
            .is_none());
    }

    #[test]
    fn generated_methods_are_skipped() {
        let options = Options { healthz_path: Some("/healthz".into()), ..Default::default() };
        let model = builder::build(&service(), &options, &NoDiscovery).expect("model");
        let clusters = ClusterResolver::new(&model, &options).expect("resolver");
        let ctx = CompileContext { model: &model, options: &options, clusters: &clusters };

        let method = &model.methods[crate::model::HEALTH_CHECK_SELECTOR];
        let pattern = &method.patterns[0];
        assert!(ServiceControlFilterGenerator
            .per_route(&ctx, method, pattern)
            .expect("ok")
            .is_none());
    }
}
