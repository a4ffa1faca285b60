//! Service model construction.
//!
//! The builder is an explicitly ordered list of pure stages. Each stage
//! takes the previous model snapshot plus the immutable inputs and returns a
//! new snapshot or fails the compilation. Stage order is data, not code
//! structure: later stages depend on information attached by earlier ones
//! (HTTP rule synthesis needs backend protocols, auth needs registered
//! methods), and the list itself is unit-tested.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::config::Options;
use crate::errors::{Error, Result};
use crate::model::discovery::KeySetResolver;
use crate::model::service::{HttpBinding, ServiceDescription};
use crate::model::{
    ApiKeyLocation, AuthProvider, AuthRequirement, BackendAddress, BackendTarget, HttpPattern,
    MethodInfo, ServiceModel, DISCOVERY_API_NAME, HEALTH_CHECK_SELECTOR,
};
use crate::template::UriTemplate;

/// Default API key extraction points when no system parameter names any.
const DEFAULT_API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_API_KEY_QUERY: &str = "key";

type Stage = fn(ServiceModel, &ServiceDescription, &Options, &dyn KeySetResolver)
    -> Result<ServiceModel>;

/// The ordered build pipeline.
pub(crate) const STAGES: &[(&str, Stage)] = &[
    ("register_methods", register_methods),
    ("apply_endpoint_cors", apply_endpoint_cors),
    ("apply_backend_rules", apply_backend_rules),
    ("apply_http_rules", apply_http_rules),
    ("apply_usage_rules", apply_usage_rules),
    ("apply_metric_rules", apply_metric_rules),
    ("apply_system_parameters", apply_system_parameters),
    ("apply_auth", apply_auth),
    ("add_health_method", add_health_method),
];

/// Build the normalized service model.
pub fn build(
    service: &ServiceDescription,
    options: &Options,
    resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    if service.name.trim().is_empty() {
        return Err(Error::description("service name cannot be empty"));
    }

    let local_backend = BackendAddress::parse(&options.backend_address)
        .map_err(|err| Error::options(format!("backend_address: {}", err)))?;

    let mut model = ServiceModel {
        service_name: service.name.clone(),
        config_id: service.config_id.clone(),
        producer_project_id: service.producer_project_id.clone(),
        api_names: Vec::new(),
        methods: BTreeMap::new(),
        auth_providers: BTreeMap::new(),
        cors_pass_through: false,
        local_backend,
        proto_descriptor: service.proto_descriptor_bin.as_ref().map(|bytes| bytes.0.clone()),
        http_rules: BTreeMap::new(),
    };

    for (name, stage) in STAGES {
        model = stage(model, service, options, resolver)?;
        tracing::debug!(stage = name, methods = model.methods.len(), "model stage applied");
    }

    Ok(model)
}

fn register_methods(
    mut model: ServiceModel,
    service: &ServiceDescription,
    options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    for api in &service.apis {
        if api.name.trim().is_empty() {
            return Err(Error::description("API name cannot be empty"));
        }
        if api.name == DISCOVERY_API_NAME && !options.allow_discovery_apis {
            tracing::debug!(api = %api.name, "skipping discovery-only API");
            continue;
        }

        model.api_names.push(api.name.clone());
        for rpc in &api.methods {
            if rpc.name.trim().is_empty() {
                return Err(Error::description(format!(
                    "API '{}' declares a method with an empty name",
                    api.name
                )));
            }
            let mut method = MethodInfo::new(&api.name, &rpc.name);
            method.request_streaming = rpc.request_streaming;
            method.response_streaming = rpc.response_streaming;

            let selector = method.selector.clone();
            if model.methods.insert(selector.clone(), method).is_some() {
                return Err(Error::description_for(selector, "duplicate method declaration"));
            }
        }
    }

    if model.methods.is_empty() {
        return Err(Error::description("service declares no methods"));
    }

    Ok(model)
}

fn apply_endpoint_cors(
    mut model: ServiceModel,
    service: &ServiceDescription,
    _options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    model.cors_pass_through = service
        .endpoints
        .iter()
        .any(|endpoint| endpoint.name == service.name && endpoint.allow_cors);
    Ok(model)
}

fn apply_backend_rules(
    mut model: ServiceModel,
    service: &ServiceDescription,
    _options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    for rule in &service.backend_rules {
        let method = model.methods.get_mut(&rule.selector).ok_or_else(|| {
            Error::description_for(&rule.selector, "backend rule references an unknown method")
        })?;

        if rule.address.trim().is_empty() {
            return Err(Error::description_for(&rule.selector, "backend rule has no address"));
        }
        let address = BackendAddress::parse(&rule.address)
            .map_err(|err| Error::description_for(&rule.selector, err.to_string()))?;

        // Explicit audience wins; disabled auth suppresses; otherwise the
        // audience is derived from the target scheme and host.
        let jwt_audience = match (&rule.jwt_audience, rule.disable_auth) {
            (Some(audience), _) => Some(audience.clone()),
            (None, true) => None,
            (None, false) => {
                let scheme = if address.use_tls { "https" } else { "http" };
                Some(format!("{}://{}/", scheme, address.hostname))
            }
        };

        method.backend = Some(BackendTarget {
            address,
            path_translation: rule.path_translation,
            deadline_secs: rule.deadline_secs,
            jwt_audience,
        });
    }
    Ok(model)
}

fn apply_http_rules(
    mut model: ServiceModel,
    service: &ServiceDescription,
    _options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    for rule in &service.http_rules {
        let method = model.methods.get_mut(&rule.selector).ok_or_else(|| {
            Error::description_for(&rule.selector, "HTTP rule references an unknown method")
        })?;

        attach_binding(method, &rule.binding)?;
        for binding in &rule.additional_bindings {
            attach_binding(method, binding)?;
        }

        model
            .http_rules
            .insert(rule.selector.clone(), crate::model::descriptor::http_rule_from_description(rule));
    }

    // gRPC methods are always reachable on their canonical POST path, even
    // when the description binds them elsewhere.
    let local = model.local_backend.clone();
    for method in model.methods.values_mut() {
        if !method.backend_protocol(&local).is_grpc() {
            continue;
        }
        let template =
            UriTemplate::parse(&format!("/{}/{}", method.api_name, method.name)).map_err(
                |err| Error::description_for(&method.selector, format!("implicit gRPC path: {}", err)),
            )?;
        let implicit = HttpPattern { http_method: "POST".to_string(), template };
        if !method.patterns.contains(&implicit) {
            method.patterns.push(implicit);
        }
    }

    Ok(model)
}

fn attach_binding(method: &mut MethodInfo, binding: &HttpBinding) -> Result<()> {
    let http_method = binding
        .pattern
        .http_method()
        .map_err(|err| Error::description_for(&method.selector, err.to_string()))?;
    let template = UriTemplate::parse(binding.pattern.path())
        .map_err(|err| Error::description_for(&method.selector, err.to_string()))?;

    let pattern = HttpPattern { http_method, template };
    if method.patterns.contains(&pattern) {
        return Err(Error::description_for(
            &method.selector,
            format!(
                "duplicate HTTP binding {} {}",
                pattern.http_method, pattern.template
            ),
        ));
    }

    method.patterns.push(pattern);
    Ok(())
}

fn apply_usage_rules(
    mut model: ServiceModel,
    service: &ServiceDescription,
    _options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    for rule in &service.usage_rules {
        let method = model.methods.get_mut(&rule.selector).ok_or_else(|| {
            Error::description_for(&rule.selector, "usage rule references an unknown method")
        })?;
        method.allow_unregistered_calls = rule.allow_unregistered_calls;
        method.skip_service_control = rule.skip_service_control;
    }
    Ok(model)
}

fn apply_metric_rules(
    mut model: ServiceModel,
    service: &ServiceDescription,
    _options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    for rule in &service.metric_rules {
        let method = model.methods.get_mut(&rule.selector).ok_or_else(|| {
            Error::description_for(&rule.selector, "metric rule references an unknown method")
        })?;
        // BTreeMap iteration keeps the cost list sorted by metric name.
        method.metric_costs =
            rule.metric_costs.iter().map(|(name, cost)| (name.clone(), *cost)).collect();
    }
    Ok(model)
}

fn apply_system_parameters(
    mut model: ServiceModel,
    service: &ServiceDescription,
    _options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    for rule in &service.system_parameter_rules {
        let method = model.methods.get_mut(&rule.selector).ok_or_else(|| {
            Error::description_for(
                &rule.selector,
                "system parameter rule references an unknown method",
            )
        })?;
        for parameter in &rule.parameters {
            if let Some(header) = parameter.http_header.as_ref().filter(|h| !h.is_empty()) {
                method.api_key_locations.push(ApiKeyLocation::Header(header.clone()));
            }
            if let Some(query) = parameter.url_query_parameter.as_ref().filter(|q| !q.is_empty()) {
                method.api_key_locations.push(ApiKeyLocation::Query(query.clone()));
            }
        }
    }

    for method in model.methods.values_mut() {
        if method.api_key_locations.is_empty() {
            method.api_key_locations = vec![
                ApiKeyLocation::Header(DEFAULT_API_KEY_HEADER.to_string()),
                ApiKeyLocation::Query(DEFAULT_API_KEY_QUERY.to_string()),
            ];
        }
    }

    Ok(model)
}

fn apply_auth(
    mut model: ServiceModel,
    service: &ServiceDescription,
    _options: &Options,
    resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    for provider in &service.authentication.providers {
        if provider.id.trim().is_empty() {
            return Err(Error::description("authentication provider has an empty id"));
        }
        if provider.issuer.trim().is_empty() {
            return Err(Error::description(format!(
                "authentication provider '{}' has no issuer",
                provider.id
            )));
        }

        // Discovery is the single blocking lookup in the compiler; failure
        // is fatal because the provider cannot be configured without it.
        let jwks_uri = match provider.jwks_uri.as_ref().filter(|uri| !uri.is_empty()) {
            Some(uri) => uri.clone(),
            None => resolver.jwks_uri(&provider.issuer)?,
        };

        let audiences: BTreeSet<String> = provider.audiences.iter().cloned().collect();
        let entry = AuthProvider {
            id: provider.id.clone(),
            issuer: provider.issuer.clone(),
            jwks_uri,
            audiences: audiences.into_iter().collect(),
        };
        if model.auth_providers.insert(entry.id.clone(), entry).is_some() {
            return Err(Error::description(format!(
                "duplicate authentication provider '{}'",
                provider.id
            )));
        }
    }

    for rule in &service.authentication.rules {
        let method = model.methods.get_mut(&rule.selector).ok_or_else(|| {
            Error::description_for(
                &rule.selector,
                "authentication rule references an unknown method",
            )
        })?;

        for requirement in &rule.requirements {
            if !model.auth_providers.contains_key(&requirement.provider_id) {
                return Err(Error::description_for(
                    &rule.selector,
                    format!(
                        "authentication rule references unknown provider '{}'",
                        requirement.provider_id
                    ),
                ));
            }
            let audiences: BTreeSet<String> = requirement.audiences.iter().cloned().collect();
            method.auth_requirements.push(AuthRequirement {
                provider_id: requirement.provider_id.clone(),
                audiences: audiences.into_iter().collect(),
            });
        }

        method.allow_without_credential = rule.allow_without_credential;
        method.require_auth = !method.auth_requirements.is_empty();
    }

    Ok(model)
}

fn add_health_method(
    mut model: ServiceModel,
    _service: &ServiceDescription,
    options: &Options,
    _resolver: &dyn KeySetResolver,
) -> Result<ServiceModel> {
    let Some(path) = options.healthz_path.as_ref() else {
        return Ok(model);
    };

    let template = UriTemplate::parse(path)
        .map_err(|err| Error::options(format!("healthz_path: {}", err)))?;

    let mut method = MethodInfo::new("portico.health", "Check");
    debug_assert_eq!(method.selector, HEALTH_CHECK_SELECTOR);
    method.patterns.push(HttpPattern { http_method: "GET".to_string(), template });
    method.skip_service_control = true;
    method.generated = true;

    model.methods.insert(method.selector.clone(), method);
    Ok(model)
}
