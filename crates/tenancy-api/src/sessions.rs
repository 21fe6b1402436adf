//! Bearer-token sessions.
//!
//! A session is scoped either to the central site (an owner) or to one tenant
//! (a store user). Tenant sessions are only honoured on a host that resolves
//! to the same tenant, so a token issued by store A is useless on store B.

use crate::error::ApiError;
use crate::resolver::ResolvedTenant;
use crate::routes::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use rand::RngCore;
use std::time::{Duration, Instant};
use storefront_tenancy_core::{TenancyError, Tenant, UserRole};
use tracing::debug;

const TOKEN_BYTES: usize = 32;

/// Table size past which `issue` sweeps expired sessions first.
const DEFAULT_PURGE_THRESHOLD: usize = 10_000;

/// What a session token grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    Central {
        owner_id: i64,
    },
    Tenant {
        tenant_id: String,
        /// `created_at` of the tenant that issued the session. A tenant later
        /// re-created under the same id does not honour it.
        tenant_created_at: String,
        user_id: i64,
        role: UserRole,
    },
}

impl SessionScope {
    /// Scope for a store user of `tenant`.
    pub fn tenant_user(tenant: &Tenant, user_id: i64, role: UserRole) -> Self {
        SessionScope::Tenant {
            tenant_id: tenant.id.clone(),
            tenant_created_at: tenant.created_at.clone(),
            user_id,
            role,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    scope: SessionScope,
    expires_at: Instant,
}

/// In-memory session table.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, SessionEntry>,
    ttl: Duration,
    purge_threshold: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            purge_threshold: DEFAULT_PURGE_THRESHOLD,
        }
    }

    /// Sweep expired sessions whenever the table holds at least `threshold` entries.
    pub fn with_purge_threshold(mut self, threshold: usize) -> Self {
        self.purge_threshold = threshold.max(1);
        self
    }

    /// Create a session and return its token.
    ///
    /// Expired sessions whose tokens are never presented again are swept here
    /// once the table reaches the purge threshold.
    pub fn issue(&self, scope: SessionScope) -> String {
        if self.sessions.len() >= self.purge_threshold {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = self.sessions.len(), "Purged expired sessions");
            }
        }

        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.sessions.insert(
            token.clone(),
            SessionEntry {
                scope,
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    /// Scope of a live session. Expired sessions are removed on lookup.
    pub fn lookup(&self, token: &str) -> Option<SessionScope> {
        let entry = self.sessions.get(token)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.sessions.remove(token);
            return None;
        }
        Some(entry.scope.clone())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every session of one tenant. Returns how many were removed.
    pub fn revoke_tenant(&self, tenant_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            !matches!(&entry.scope, SessionScope::Tenant { tenant_id: t, .. } if t == tenant_id)
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authenticated owner on a central route.
#[derive(Debug, Clone)]
pub struct CurrentOwner {
    pub owner: storefront_tenancy_core::CentralOwner,
    pub token: String,
}

/// Authenticated user on a tenant route.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: i64,
    pub role: UserRole,
    pub token: String,
}

fn unauthenticated() -> ApiError {
    ApiError(TenancyError::AuthenticationFailed {
        field: "session".to_string(),
    })
}

/// Require a central session and load its owner.
pub async fn require_owner(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(token) = bearer_token(req.headers()).map(str::to_string) else {
        return unauthenticated().into_response();
    };

    let owner_id = match state.sessions.lookup(&token) {
        Some(SessionScope::Central { owner_id }) => owner_id,
        _ => return unauthenticated().into_response(),
    };

    let owner = match state.accounts.get_owner(owner_id).await {
        Ok(Some(owner)) => owner,
        Ok(None) => {
            state.sessions.revoke(&token);
            return unauthenticated().into_response();
        }
        Err(e) => return ApiError(e).into_response(),
    };

    req.extensions_mut().insert(CurrentOwner { owner, token });
    next.run(req).await
}

/// Require a session issued by the tenant this request resolved to.
///
/// Must run inside the tenant context middleware.
pub async fn require_tenant_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some((request_tenant, request_created_at)) = req
        .extensions()
        .get::<ResolvedTenant>()
        .map(|r| (r.tenant_id().to_string(), r.tenant.created_at.clone()))
    else {
        return ApiError(TenancyError::ResolutionFailed("no tenant bound".to_string()))
            .into_response();
    };
    let Some(token) = bearer_token(req.headers()).map(str::to_string) else {
        return unauthenticated().into_response();
    };

    match state.sessions.lookup(&token) {
        Some(SessionScope::Tenant {
            tenant_id,
            tenant_created_at,
            user_id,
            role,
        }) if tenant_id == request_tenant && tenant_created_at == request_created_at => {
            req.extensions_mut().insert(CurrentUser {
                user_id,
                role,
                token,
            });
            next.run(req).await
        }
        Some(SessionScope::Tenant { tenant_id, .. }) => {
            debug!(
                session_tenant = %tenant_id,
                request_tenant = %request_tenant,
                "Rejected session from another tenant"
            );
            // Tokens of a dropped or re-created tenant never become valid again.
            if tenant_id == request_tenant {
                state.sessions.revoke(&token);
            }
            unauthenticated().into_response()
        }
        _ => unauthenticated().into_response(),
    }
}

/// Require the current user to be allowed to manage products.
///
/// Must run inside [`require_tenant_user`].
pub async fn require_admin(req: Request, next: Next) -> Response {
    let role = req.extensions().get::<CurrentUser>().map(|user| user.role);
    match role {
        Some(role) if role.can_manage_products() => next.run(req).await,
        Some(_) => ApiError(TenancyError::Forbidden("admin role required".to_string())).into_response(),
        None => unauthenticated().into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant_scope(tenant_id: &str) -> SessionScope {
        let tenant = Tenant {
            id: tenant_id.to_string(),
            store_name: "Store".to_string(),
            created_at: "2025-01-01T00:00:00.000000Z".to_string(),
        };
        SessionScope::tenant_user(&tenant, 1, UserRole::Customer)
    }

    #[test]
    fn test_issue_lookup_revoke() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.issue(SessionScope::Central { owner_id: 3 });
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert_eq!(store.lookup(&token), Some(SessionScope::Central { owner_id: 3 }));

        assert!(store.revoke(&token));
        assert!(store.lookup(&token).is_none());
        assert!(!store.revoke(&token));
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.issue(tenant_scope("alpha"));
        let b = store.issue(tenant_scope("alpha"));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expired_sessions_are_rejected() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.issue(tenant_scope("alpha"));
        assert!(store.lookup(&token).is_none());
        assert!(store.is_empty());

        store.issue(tenant_scope("alpha"));
        assert_eq!(store.purge_expired(), 1);
    }

    #[test]
    fn test_issue_sweeps_expired_sessions_past_threshold() {
        let store = SessionStore::new(Duration::ZERO).with_purge_threshold(3);
        for _ in 0..10 {
            store.issue(tenant_scope("alpha"));
        }
        // Never more than the threshold of dead entries plus the new one
        assert!(store.len() <= 3, "len = {}", store.len());

        let live = SessionStore::new(Duration::from_secs(60)).with_purge_threshold(3);
        for _ in 0..5 {
            live.issue(tenant_scope("alpha"));
        }
        assert_eq!(live.len(), 5);
    }

    #[test]
    fn test_revoke_tenant_keeps_others() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.issue(tenant_scope("alpha"));
        store.issue(tenant_scope("alpha"));
        let beta = store.issue(tenant_scope("beta"));
        let owner = store.issue(SessionScope::Central { owner_id: 1 });

        assert_eq!(store.revoke_tenant("alpha"), 2);
        assert!(store.lookup(&beta).is_some());
        assert!(store.lookup(&owner).is_some());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
