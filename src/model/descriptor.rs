//! Method descriptor rewriting for gRPC-JSON transcoding.
//!
//! The transcoder filter reads HTTP bindings out of the service's embedded
//! `FileDescriptorSet`. When the service description overrides a method's
//! binding, the proto-declared (canonical) binding must survive as an
//! additional binding, otherwise the override silently disables the
//! method's default path.
//!
//! The mirror types below declare only the descriptor fields the rewrite
//! touches. Every other field is carried as raw length-delimited bytes -
//! embedded messages and `bytes` share a wire representation, so unrelated
//! descriptor content (message types, enums, options) round-trips
//! untouched without a full descriptor.proto dependency.

use std::collections::BTreeMap;

use prost::Message;

use crate::errors::{Error, Result};
use crate::model::service::{HttpPatternKind, HttpRuleDescription};

/// `google.protobuf.FileDescriptorSet`
#[derive(Clone, PartialEq, Message)]
pub struct FileDescriptorSet {
    #[prost(message, repeated, tag = "1")]
    pub file: Vec<FileDescriptorProto>,
}

/// `google.protobuf.FileDescriptorProto`, services decoded, the rest opaque.
#[derive(Clone, PartialEq, Message)]
pub struct FileDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub package: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub dependency: Vec<String>,
    #[prost(bytes = "vec", repeated, tag = "4")]
    pub message_type: Vec<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub enum_type: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "6")]
    pub service: Vec<ServiceDescriptorProto>,
    #[prost(bytes = "vec", repeated, tag = "7")]
    pub extension: Vec<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub options: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub source_code_info: Option<Vec<u8>>,
    #[prost(int32, repeated, packed = "false", tag = "10")]
    pub public_dependency: Vec<i32>,
    #[prost(int32, repeated, packed = "false", tag = "11")]
    pub weak_dependency: Vec<i32>,
    #[prost(string, optional, tag = "12")]
    pub syntax: Option<String>,
}

/// `google.protobuf.ServiceDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct ServiceDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub method: Vec<MethodDescriptorProto>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub options: Option<Vec<u8>>,
}

/// `google.protobuf.MethodDescriptorProto`
#[derive(Clone, PartialEq, Message)]
pub struct MethodDescriptorProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub input_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub output_type: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub options: Option<MethodOptions>,
    #[prost(bool, optional, tag = "5")]
    pub client_streaming: Option<bool>,
    #[prost(bool, optional, tag = "6")]
    pub server_streaming: Option<bool>,
}

/// `google.protobuf.MethodOptions` with the `google.api.http` extension.
#[derive(Clone, PartialEq, Message)]
pub struct MethodOptions {
    #[prost(bool, optional, tag = "33")]
    pub deprecated: Option<bool>,
    #[prost(enumeration = "IdempotencyLevel", optional, tag = "34")]
    pub idempotency_level: Option<i32>,
    #[prost(bytes = "vec", repeated, tag = "999")]
    pub uninterpreted_option: Vec<Vec<u8>>,
    #[prost(message, optional, tag = "72295728")]
    pub http: Option<HttpRule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum IdempotencyLevel {
    IdempotencyUnknown = 0,
    NoSideEffects = 1,
    Idempotent = 2,
}

/// `google.api.HttpRule`
#[derive(Clone, PartialEq, Message)]
pub struct HttpRule {
    #[prost(string, tag = "1")]
    pub selector: String,
    #[prost(string, tag = "7")]
    pub body: String,
    #[prost(string, tag = "12")]
    pub response_body: String,
    #[prost(message, repeated, tag = "11")]
    pub additional_bindings: Vec<HttpRule>,
    #[prost(oneof = "http_rule::Pattern", tags = "2, 3, 4, 5, 6, 8")]
    pub pattern: Option<http_rule::Pattern>,
}

pub mod http_rule {
    /// The method/path pair of a `google.api.HttpRule`.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Pattern {
        #[prost(string, tag = "2")]
        Get(String),
        #[prost(string, tag = "3")]
        Put(String),
        #[prost(string, tag = "4")]
        Post(String),
        #[prost(string, tag = "5")]
        Delete(String),
        #[prost(string, tag = "6")]
        Patch(String),
        #[prost(message, tag = "8")]
        Custom(super::CustomHttpPattern),
    }
}

/// `google.api.CustomHttpPattern`
#[derive(Clone, PartialEq, Message)]
pub struct CustomHttpPattern {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(string, tag = "2")]
    pub path: String,
}

/// Convert a description rule into its descriptor form.
pub fn http_rule_from_description(rule: &HttpRuleDescription) -> HttpRule {
    HttpRule {
        selector: rule.selector.clone(),
        body: rule.binding.body.clone(),
        response_body: String::new(),
        additional_bindings: rule
            .additional_bindings
            .iter()
            .map(|binding| HttpRule {
                selector: String::new(),
                body: binding.body.clone(),
                response_body: String::new(),
                additional_bindings: Vec::new(),
                pattern: Some(pattern_from_kind(&binding.pattern)),
            })
            .collect(),
        pattern: Some(pattern_from_kind(&rule.binding.pattern)),
    }
}

fn pattern_from_kind(kind: &HttpPatternKind) -> http_rule::Pattern {
    match kind {
        HttpPatternKind::Get { path } => http_rule::Pattern::Get(path.clone()),
        HttpPatternKind::Put { path } => http_rule::Pattern::Put(path.clone()),
        HttpPatternKind::Post { path } => http_rule::Pattern::Post(path.clone()),
        HttpPatternKind::Delete { path } => http_rule::Pattern::Delete(path.clone()),
        HttpPatternKind::Patch { path } => http_rule::Pattern::Patch(path.clone()),
        HttpPatternKind::Custom { kind, path } => http_rule::Pattern::Custom(CustomHttpPattern {
            kind: kind.clone(),
            path: path.clone(),
        }),
    }
}

/// Structural equality of two rules, ignoring selector and additional
/// bindings.
fn bindings_equal(a: &HttpRule, b: &HttpRule) -> bool {
    a.pattern == b.pattern && a.body == b.body && a.response_body == b.response_body
}

/// A copy suitable for use as an additional binding: no selector, no nested
/// additional bindings.
fn as_additional_binding(rule: &HttpRule) -> HttpRule {
    HttpRule {
        selector: String::new(),
        body: rule.body.clone(),
        response_body: rule.response_body.clone(),
        additional_bindings: Vec::new(),
        pattern: rule.pattern.clone(),
    }
}

/// Rewrite the embedded descriptor so service-config bindings replace the
/// proto-declared ones while the proto-declared (default) binding survives
/// as an additional binding, added at most once.
pub fn apply_service_config_bindings(
    descriptor: &[u8],
    rules: &BTreeMap<String, HttpRule>,
) -> Result<Vec<u8>> {
    let mut set = FileDescriptorSet::decode(descriptor)
        .map_err(|err| Error::description(format!("invalid proto descriptor: {}", err)))?;

    for file in &mut set.file {
        let package = file.package.clone().unwrap_or_default();
        for service in &mut file.service {
            let service_name = service.name.clone().unwrap_or_default();
            let api_name = if package.is_empty() {
                service_name.clone()
            } else {
                format!("{}.{}", package, service_name)
            };

            for method in &mut service.method {
                let selector = format!("{}.{}", api_name, method.name());
                let Some(config_rule) = rules.get(&selector) else {
                    continue;
                };

                let options = method.options.get_or_insert_with(MethodOptions::default);
                let mut replacement = as_primary_rule(config_rule);

                if let Some(original) = options.http.take() {
                    if bindings_equal(&original, &replacement) {
                        options.http = Some(original);
                        continue;
                    }
                    let default_present = bindings_equal(&replacement, &original)
                        || replacement
                            .additional_bindings
                            .iter()
                            .any(|binding| bindings_equal(binding, &original));
                    if !default_present {
                        replacement.additional_bindings.push(as_additional_binding(&original));
                    }
                }
                options.http = Some(replacement);
            }
        }
    }

    Ok(set.encode_to_vec())
}

fn as_primary_rule(rule: &HttpRule) -> HttpRule {
    let mut primary = rule.clone();
    primary.selector = String::new();
    primary
}
