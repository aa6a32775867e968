use std::future::Future;
use std::sync::Arc;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{web, Error, HttpMessage, HttpRequest};
use log::{error, warn};

use crate::catalog::PolicyCatalog;
use crate::header::CacheHeaders;
use crate::measurable::{RequestAttributes, TimeMeasurable};

/// Exposes `value` to cache policies under `field` for the rest of the request.
pub fn attach_measurable(req: &HttpRequest, field: &str, value: Arc<dyn TimeMeasurable + Send + Sync>) {
    let mut extensions = req.extensions_mut();
    if let Some(attributes) = extensions.get_mut::<RequestAttributes>() {
        attributes.insert(field, value);
        return;
    }
    let mut attributes = RequestAttributes::new();
    attributes.insert(field, value);
    extensions.insert(attributes);
}

/// Resolves the policies applying to the response's route and writes the cache headers.
pub fn apply_cache_policy<B>(response: &mut ServiceResponse<B>) {
    let catalog = match response.request().app_data::<web::Data<PolicyCatalog>>() {
        Some(catalog) => catalog.clone(),
        None => {
            warn!("No policy catalog registered, response left untouched");
            return;
        }
    };
    let status = response.status().as_u16();
    let pattern = response.request().match_pattern();
    let attributes = response
        .request()
        .extensions()
        .get::<RequestAttributes>()
        .cloned()
        .unwrap_or_default();

    let resolver = match catalog.resolver_for(pattern.as_deref(), status) {
        Some(resolver) => resolver,
        None => return,
    };
    match resolver.resolve(&attributes) {
        Ok(rule) => CacheHeaders::from_directives(&rule.directives).apply(response.headers_mut()),
        Err(e) => error!("Failed to resolve cache policy for {:?}: {}", pattern, e),
    }
}

/// Middleware for `App::wrap_fn`.
pub fn cache_policy_middleware<S, B>(req: ServiceRequest, srv: &S) -> impl Future<Output = Result<ServiceResponse<B>, Error>>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    let response = srv.call(req);
    async move {
        let mut response = response.await?;
        apply_cache_policy(&mut response);
        Ok(response)
    }
}
