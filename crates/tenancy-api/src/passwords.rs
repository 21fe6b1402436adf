//! bcrypt hashing on the blocking pool.

use storefront_tenancy_core::{Result, TenancyError};

/// Hash a plaintext password.
pub async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        bcrypt::hash(&password, cost)
            .map_err(|e| TenancyError::Other(format!("Failed to hash password: {}", e)))
    })
    .await
    .map_err(|e| TenancyError::Other(format!("Task join error: {}", e)))?
}

/// Check a plaintext password against a stored hash.
///
/// A malformed hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || Ok(bcrypt::verify(&password, &hash).unwrap_or(false)))
        .await
        .map_err(|e| TenancyError::Other(format!("Task join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("password123", 4).await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("password123", &hash).await.unwrap());
        assert!(!verify_password("password124", &hash).await.unwrap());
        assert!(!verify_password("password123", "not-a-hash").await.unwrap());
    }
}
