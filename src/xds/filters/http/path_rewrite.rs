//! Path rewrite filter generator.
//!
//! Remote backend rules may carry a path component and a translation
//! strategy; the per-route config tells the proxy how to rewrite the
//! incoming path before forwarding. The listener entry is a bare marker
//! and is omitted when no route needs rewriting.

use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use crate::errors::Result;
use crate::model::{HttpPattern, MethodInfo, PathTranslation};
use crate::proto::{
    path_rewrite_per_route::Rewrite, PathRewriteFilterConfig, PathRewritePerRoute,
    PATH_REWRITE_FILTER_NAME, PATH_REWRITE_PER_ROUTE_TYPE_URL, PATH_REWRITE_TYPE_URL,
};
use crate::xds::filters::any_from_message;
use crate::xds::filters::http::{http_filter, FilterGenerator};
use crate::xds::CompileContext;

pub struct PathRewriteFilterGenerator;

/// Rewrite behavior for one method, `None` when the path is forwarded
/// untouched.
fn method_rewrite(method: &MethodInfo) -> Option<Rewrite> {
    let backend = method.backend.as_ref()?;
    match backend.path_translation {
        PathTranslation::AppendPathToAddress => {
            if backend.address.path.is_empty() {
                None
            } else {
                Some(Rewrite::PathPrefix(backend.address.path.clone()))
            }
        }
        PathTranslation::ConstantAddress => {
            let path = if backend.address.path.is_empty() {
                "/".to_string()
            } else {
                backend.address.path.clone()
            };
            Some(Rewrite::ConstantPath(path))
        }
    }
}

impl FilterGenerator for PathRewriteFilterGenerator {
    fn name(&self) -> &'static str {
        PATH_REWRITE_FILTER_NAME
    }

    fn filter(&self, ctx: &CompileContext<'_>) -> Result<Option<HttpFilter>> {
        let needed = ctx.model.methods.values().any(|method| method_rewrite(method).is_some());
        if !needed {
            return Ok(None);
        }
        Ok(Some(http_filter(
            PATH_REWRITE_FILTER_NAME,
            any_from_message(PATH_REWRITE_TYPE_URL, &PathRewriteFilterConfig {}),
        )))
    }

    fn per_route(
        &self,
        _ctx: &CompileContext<'_>,
        method: &MethodInfo,
        _pattern: &HttpPattern,
    ) -> Result<Option<EnvoyAny>> {
        let Some(rewrite) = method_rewrite(method) else {
            return Ok(None);
        };
        let proto = PathRewritePerRoute { rewrite: Some(rewrite) };
        Ok(Some(any_from_message(PATH_REWRITE_PER_ROUTE_TYPE_URL, &proto)))
    }
}
