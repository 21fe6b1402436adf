//! Tenant context resolution.
//!
//! Turns the inbound `Host` into a tenant and binds that tenant's connection to
//! the request:
//!
//! ```text
//! Request → extract_host → central? ──yes──→ rejected (central router only)
//!                              │ no
//!                              ↓
//!                  Registry::find_by_domain ──none──→ 404
//!                              │
//!                              ↓
//!                  Pool::acquire (per-tenant permit) ──timeout──→ 503
//!                              │
//!                              ↓
//!          extensions: ResolvedTenant + TenantConnection → handler
//!                              │
//!                              ↓
//!                     connection released
//! ```
//!
//! The binding lives in the request's extensions only. The connection is
//! released when the handler returns, on error paths as well.

use crate::error::ApiError;
use crate::routes::AppState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use storefront_tenancy_core::{Domain, TenancyError, Tenant};
use storefront_tenancy_storage::TenantContext;
use tracing::{debug, warn};

/// A tenant resolved from the request host.
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    pub context: TenantContext,
    pub tenant: Tenant,
    /// Hostname the request arrived on
    pub domain: Domain,
}

impl ResolvedTenant {
    pub fn tenant_id(&self) -> &str {
        self.context.tenant_id()
    }
}

/// How a host is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostClass {
    /// A configured central (platform) domain
    Central,
    /// Anything else, looked up in the registry
    Tenant(String),
}

/// Host of the request, lowercased, without port or trailing dot.
///
/// Falls back to the URI authority when there is no `Host` header (HTTP/2).
pub fn extract_host(req: &Request) -> Option<String> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))?;

    let raw = raw.trim();
    // Drop userinfo if an authority slipped through.
    let raw = raw.rsplit('@').next().unwrap_or(raw);

    let host = if let Some(rest) = raw.strip_prefix('[') {
        // IPv6 literal: keep the brackets, drop the port.
        let end = rest.find(']')?;
        &raw[..end + 2]
    } else {
        raw.split(':').next().unwrap_or(raw)
    };

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Classify a normalized host against the configured central domains.
pub fn classify_host(state: &AppState, host: &str) -> HostClass {
    if state.config.is_central_host(host) {
        HostClass::Central
    } else {
        HostClass::Tenant(host.to_string())
    }
}

/// Resolve the tenant for this request and bind its connection.
///
/// Central hosts and unknown hosts are rejected with 404 before any
/// tenant-scoped handler runs.
pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(host) = extract_host(&req) else {
        return ApiError(TenancyError::ResolutionFailed("missing host".to_string())).into_response();
    };

    let host = match classify_host(&state, &host) {
        HostClass::Central => {
            warn!(host = %host, "Central host reached tenant routes");
            return ApiError(TenancyError::ResolutionFailed(host)).into_response();
        }
        HostClass::Tenant(host) => host,
    };

    let tenant = match state.registry.find_by_domain(&host).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => {
            debug!(host = %host, "No tenant for host");
            return ApiError(TenancyError::ResolutionFailed(host)).into_response();
        }
        Err(e) => return ApiError(e).into_response(),
    };

    let context = match TenantContext::new(&tenant.id) {
        Ok(ctx) => ctx,
        Err(e) => return ApiError(e).into_response(),
    };

    let conn = match state.pool.acquire(&context).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(tenant_id = %context, error = %e, "Failed to bind tenant connection");
            let e = match e {
                // Registry row without a database: treat as unresolvable.
                TenancyError::NotFound(_) => TenancyError::ResolutionFailed(host),
                other => other,
            };
            return ApiError(e).into_response();
        }
    };

    debug!(tenant_id = %context, host = %host, "Resolved tenant");

    req.extensions_mut().insert(ResolvedTenant {
        domain: Domain {
            domain: host,
            tenant_id: tenant.id.clone(),
        },
        context,
        tenant,
    });
    req.extensions_mut().insert(conn.clone());

    let response = next.run(req).await;
    conn.release();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_host(host: Option<&str>, uri: &str) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_host_normalizes() {
        let cases = [
            (Some("Alpha.Localhost:8000"), "/", Some("alpha.localhost")),
            (Some("alpha.localhost."), "/", Some("alpha.localhost")),
            (Some("shop.example.com"), "/", Some("shop.example.com")),
            (Some("[::1]:8000"), "/", Some("[::1]")),
            (None, "http://beta.localhost:9000/cart", Some("beta.localhost")),
            (None, "/", None),
            (Some(""), "/", None),
        ];
        for (host, uri, expected) in cases {
            assert_eq!(
                extract_host(&request_with_host(host, uri)).as_deref(),
                expected,
                "host={:?} uri={}",
                host,
                uri
            );
        }
    }
}
