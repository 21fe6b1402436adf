//! Input validation for Storefront tenancy
//!
//! Provides validation functions to prevent:
//! - SQL injection or path traversal through tenant identifiers
//! - Malformed hostnames reaching the domain table
//! - Excessively long free-text inputs
//!
//! Tenant ids double as database name suffixes and DNS labels, so they are
//! restricted to lowercase ASCII alphanumerics only.

use crate::{Result, TenancyError};

/// Maximum length for tenant ids (one DNS label)
pub const MAX_TENANT_ID_LEN: usize = 63;

/// Maximum length for a fully-qualified hostname
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length for store names, user names, product names
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length for email addresses
pub const MAX_EMAIL_LEN: usize = 255;

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum length for product descriptions
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

/// Validate a tenant id slug.
///
/// Requirements:
/// - Not empty
/// - <= 63 characters
/// - Lowercase ASCII letters and digits only
pub fn validate_tenant_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(TenancyError::InvalidTenantId(
            "tenant id cannot be empty".to_string(),
        ));
    }

    if id.len() > MAX_TENANT_ID_LEN {
        return Err(TenancyError::InvalidTenantId(format!(
            "tenant id too long: {} > {} characters",
            id.len(),
            MAX_TENANT_ID_LEN
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(TenancyError::InvalidTenantId(format!(
            "'{}' may only contain lowercase letters and digits",
            id
        )));
    }

    Ok(())
}

/// Normalize and validate a hostname.
///
/// Lowercases the input, strips one trailing dot, and checks each label.
/// Returns the normalized hostname.
pub fn normalize_hostname(host: &str) -> Result<String> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();

    if host.is_empty() {
        return Err(TenancyError::invalid("domain", "hostname cannot be empty"));
    }

    if host.len() > MAX_HOSTNAME_LEN {
        return Err(TenancyError::invalid(
            "domain",
            format!(
                "hostname too long: {} > {} characters",
                host.len(),
                MAX_HOSTNAME_LEN
            ),
        ));
    }

    for label in host.split('.') {
        if label.is_empty() || label.len() > MAX_TENANT_ID_LEN {
            return Err(TenancyError::invalid(
                "domain",
                format!("invalid hostname label in '{}'", host),
            ));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(TenancyError::invalid(
                "domain",
                format!("hostname '{}' contains invalid characters", host),
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(TenancyError::invalid(
                "domain",
                "hostname labels cannot start or end with hyphen",
            ));
        }
    }

    Ok(host)
}

/// Validate a required display name (store name, user name, product name).
pub fn validate_name(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TenancyError::invalid(field, format!("{} is required", field)));
    }

    if value.chars().count() > MAX_NAME_LEN {
        return Err(TenancyError::invalid(
            field,
            format!("{} may not exceed {} characters", field, MAX_NAME_LEN),
        ));
    }

    Ok(())
}

/// Validate an email address (shape only, uniqueness is enforced by the database).
pub fn validate_email(email: &str) -> Result<()> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(TenancyError::invalid(
            "email",
            format!("email may not exceed {} characters", MAX_EMAIL_LEN),
        ));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if !valid {
        return Err(TenancyError::invalid(
            "email",
            "email must be a valid email address",
        ));
    }

    Ok(())
}

/// Validate a new password and its confirmation.
pub fn validate_password(password: &str, confirmation: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(TenancyError::invalid(
            "password",
            format!("password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }

    if password != confirmation {
        return Err(TenancyError::invalid(
            "password",
            "password confirmation does not match",
        ));
    }

    Ok(())
}

/// Validate product fields shared by create and update.
pub fn validate_product(
    name: &str,
    description: Option<&str>,
    price_cents: i64,
    stock: i64,
) -> Result<()> {
    validate_name(name, "name")?;

    if let Some(desc) = description {
        if desc.len() > MAX_DESCRIPTION_LEN {
            return Err(TenancyError::invalid(
                "description",
                format!("description may not exceed {} bytes", MAX_DESCRIPTION_LEN),
            ));
        }
    }

    if price_cents < 0 {
        return Err(TenancyError::invalid("price", "price cannot be negative"));
    }

    if stock < 0 {
        return Err(TenancyError::invalid("stock", "stock cannot be negative"));
    }

    Ok(())
}

/// Validate a relative file path used in a database location template.
///
/// Rejects parent directory traversal and null bytes.
pub fn validate_file_path(path: &str) -> Result<()> {
    if path.contains('\0') {
        return Err(TenancyError::invalid("path", "path cannot contain null bytes"));
    }

    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(TenancyError::invalid(
            "path",
            "path cannot contain '..' segments",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tenant_ids() {
        assert!(validate_tenant_id("alpha").is_ok());
        assert!(validate_tenant_id("store42").is_ok());
        assert!(validate_tenant_id("a").is_ok());
        assert!(validate_tenant_id(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_invalid_tenant_ids() {
        assert!(validate_tenant_id("").is_err()); // Empty
        assert!(validate_tenant_id(&"a".repeat(64)).is_err()); // Too long
        assert!(validate_tenant_id("user-a").is_err()); // Hyphen
        assert!(validate_tenant_id("my_store").is_err()); // Underscore
        assert!(validate_tenant_id("Alpha").is_err()); // Uppercase
        assert!(validate_tenant_id("../etc").is_err()); // Traversal
        assert!(validate_tenant_id("a;drop").is_err()); // SQL metachar
        assert!(validate_tenant_id("café").is_err()); // Non-ASCII
    }

    #[test]
    fn test_invalid_tenant_id_kind() {
        let err = validate_tenant_id("bad id").unwrap_err();
        assert!(matches!(err, TenancyError::InvalidTenantId(_)));
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(
            normalize_hostname("Alpha.LocalHost.").unwrap(),
            "alpha.localhost"
        );
        assert_eq!(normalize_hostname("shop-1.example.com").unwrap(), "shop-1.example.com");
        assert!(normalize_hostname("").is_err());
        assert!(normalize_hostname("bad..host").is_err());
        assert!(normalize_hostname("-bad.host").is_err());
        assert!(normalize_hostname("bad_host.com").is_err());
        assert!(normalize_hostname(&format!("{}.com", "a".repeat(64))).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Alpha Store", "store_name").is_ok());
        assert!(validate_name("   ", "store_name").is_err());
        assert!(validate_name(&"x".repeat(256), "store_name").is_err());
        let err = validate_name("", "store_name").unwrap_err();
        assert_eq!(err.field(), Some("store_name"));
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("test@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("with space@example.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("password123", "password123").is_ok());
        assert!(validate_password("short", "short").is_err());
        assert!(validate_password("password123", "password124").is_err());
    }

    #[test]
    fn test_validate_product() {
        assert!(validate_product("Alpha Item", Some("desc"), 1999, 5).is_ok());
        assert!(validate_product("", None, 100, 1).is_err());
        assert!(validate_product("Item", None, -1, 1).is_err());
        assert!(validate_product("Item", None, 1, -1).is_err());
    }

    #[test]
    fn test_validate_file_path() {
        assert!(validate_file_path("tenants/tenant{tenant_id}.db").is_ok());
        assert!(validate_file_path("../../../etc/passwd").is_err());
        assert!(validate_file_path("data/../x.db").is_err());
        assert!(validate_file_path("data\0hidden").is_err());
    }
}
