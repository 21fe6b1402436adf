//! Validated tenant identity.
//!
//! Every storage operation that touches a tenant database or a tenant cache
//! partition takes a [`TenantContext`]. Construction validates the id as a
//! lowercase alphanumeric slug, so anything holding a `TenantContext` can
//! safely splice the id into file names and cache tags.
//!
//! ```rust,ignore
//! use storefront_tenancy_storage::TenantContext;
//!
//! let ctx = TenantContext::new("alpha")?;
//! assert_eq!(ctx.cache_tag(), "tenant_alpha");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use storefront_tenancy_core::{validation, Result};

/// Prefix for a tenant's cache partition tag.
pub const CACHE_TAG_PREFIX: &str = "tenant_";

/// Validated tenant context.
///
/// Passed explicitly through every call that needs to know which tenant it
/// is acting for. There is no ambient "current tenant".
#[derive(Debug, Clone)]
pub struct TenantContext {
    tenant_id: String,
}

impl TenantContext {
    /// Create a new validated tenant context.
    ///
    /// # Errors
    ///
    /// Returns `TenancyError::InvalidTenantId` unless the id is 1-63
    /// lowercase ASCII letters or digits.
    pub fn new(tenant_id: impl Into<String>) -> Result<Self> {
        let id = tenant_id.into();
        validation::validate_tenant_id(&id)?;
        Ok(Self { tenant_id: id })
    }

    /// Get the tenant identifier.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Convert to owned String.
    pub fn into_tenant_id(self) -> String {
        self.tenant_id
    }

    /// Tag naming this tenant's cache partition (`tenant_{id}`).
    pub fn cache_tag(&self) -> String {
        format!("{}{}", CACHE_TAG_PREFIX, self.tenant_id)
    }
}

impl PartialEq for TenantContext {
    fn eq(&self, other: &Self) -> bool {
        self.tenant_id == other.tenant_id
    }
}

impl Eq for TenantContext {}

impl Hash for TenantContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tenant_id.hash(state);
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tenant_id)
    }
}

impl AsRef<str> for TenantContext {
    fn as_ref(&self) -> &str {
        &self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_tenancy_core::TenancyError;

    #[test]
    fn test_valid_tenant_ids() {
        assert!(TenantContext::new("alpha").is_ok());
        assert!(TenantContext::new("beta2").is_ok());
        assert!(TenantContext::new("a".repeat(63)).is_ok());
    }

    #[test]
    fn test_invalid_tenant_ids() {
        for bad in ["", "user-a", "My Store", "a/b", "..", "x;DROP", "tenant_1"] {
            let err = TenantContext::new(bad).unwrap_err();
            assert!(
                matches!(err, TenancyError::InvalidTenantId(_)),
                "expected InvalidTenantId for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_tenant_context_equality_and_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(TenantContext::new("alpha").unwrap());
        set.insert(TenantContext::new("alpha").unwrap());
        assert_eq!(set.len(), 1);

        set.insert(TenantContext::new("beta").unwrap());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_cache_tags_are_distinct() {
        let a = TenantContext::new("alpha").unwrap();
        let b = TenantContext::new("beta").unwrap();
        assert_eq!(a.cache_tag(), "tenant_alpha");
        assert_ne!(a.cache_tag(), b.cache_tag());
        assert_eq!(format!("{}", a), "alpha");
    }
}
