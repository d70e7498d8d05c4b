//! Axum authorization middleware that scopes resource requests.
//!
//! The routing layer inserts an [`AccessRequest`] and, for authenticated
//! callers, a [`Caller`] into request extensions. This middleware evaluates them
//! and either answers with the 401/403 body or hands the resulting
//! [`ScopeFilter`] to the handler as a [`ResourceScope`].

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::models::{AccessRequest, Caller};
use super::policy::PolicyEngine;
use super::scope::ScopeFilter;
use crate::error::AppguardError;

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Scope (extracted in handlers)
// ═══════════════════════════════════════════════════════════════════════════════

/// The permitted scope of the current request.
///
/// Never holds `ScopeFilter::Deny`; denied requests don't reach the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope(pub ScopeFilter);

impl ResourceScope {
    pub fn filter(&self) -> &ScopeFilter {
        &self.0
    }
}

/// Axum extractor for `ResourceScope`.
#[axum::async_trait]
impl<S> FromRequestParts<S> for ResourceScope
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResourceScope>()
            .cloned()
            .ok_or_else(|| {
                let body = serde_json::json!({
                    "error": "Internal Server Error",
                    "message": "Resource scope not available. Ensure RequireScopeLayer is applied.",
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that evaluates every request against the policy engine.
///
/// # Example
///
/// ```rust,ignore
/// use appguard_core::rbac::{PolicyEngine, RequireScopeLayer, ResourceScope};
///
/// async fn list_notes(ResourceScope(filter): ResourceScope) -> String {
///     format!("{:?}", filter)
/// }
///
/// let app = Router::new()
///     .route("/apps/:app/resources/note", get(list_notes))
///     .layer(RequireScopeLayer::new(Arc::new(engine)));
/// ```
#[derive(Clone)]
pub struct RequireScopeLayer {
    engine: Arc<PolicyEngine>,
}

impl RequireScopeLayer {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self { engine }
    }
}

impl<S> Layer<S> for RequireScopeLayer {
    type Service = RequireScopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireScopeService {
            inner,
            engine: self.engine.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct RequireScopeService<S> {
    inner: S,
    engine: Arc<PolicyEngine>,
}

impl<S> Service<Request<Body>> for RequireScopeService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let engine = self.engine.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(access) = request.extensions().get::<AccessRequest>().cloned() else {
                warn!(uri = %request.uri(), "Request reached RequireScopeLayer without an AccessRequest");
                return Ok(
                    AppguardError::internal("AccessRequest missing from request extensions")
                        .into_response(),
                );
            };
            let caller = request
                .extensions()
                .get::<Caller>()
                .cloned()
                .unwrap_or_default();

            let filter = match engine.enforce(&access, &caller).await {
                Ok(filter) => filter,
                Err(e) => return Ok(e.into_response()),
            };

            request.extensions_mut().insert(ResourceScope(filter));
            inner.call(request).await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
