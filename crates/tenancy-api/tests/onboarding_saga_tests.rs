//! Onboarding Saga Integration Tests
//!
//! Store creation across the registry and the tenant databases:
//! - the owner HTTP flow (register, log in, create store, sign in to store)
//! - duplicate ids and domain conflicts leave existing state untouched
//! - failures after the registry insert roll back every prior step
//!
//! Run with: `cargo test -p storefront-tenancy-api --test onboarding_saga_tests`

#![cfg(feature = "test-utils")]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use storefront_tenancy_api::registry::audit_actions;
use storefront_tenancy_api::sessions::SessionScope;
use storefront_tenancy_api::test_utils::{TestPlatform, TestRequest, TEST_PASSWORD};
use storefront_tenancy_core::migrations::Migration;
use storefront_tenancy_core::{TenancyError, UserRole};
use tower::ServiceExt;

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn register_owner(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        TestRequest::post("localhost", "/register")
            .json(json!({
                "name": "Store Owner",
                "email": email,
                "password": TEST_PASSWORD,
                "password_confirmation": TEST_PASSWORD,
            }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

fn users_table_missing() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "products only",
        sql: "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    }]
}

// ============================================================================
// HTTP flow
// ============================================================================

#[tokio::test]
async fn test_owner_creates_store_over_http() {
    let platform = TestPlatform::new().await.unwrap();
    let app = platform.app();

    let token = register_owner(&app, "owner@example.com").await;

    let (status, body) = send(
        &app,
        TestRequest::post("localhost", "/tenants")
            .token(&token)
            .json(json!({ "store_name": "Gamma Goods", "subdomain": "gamma" }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["tenant"]["id"], "gamma");
    assert_eq!(body["domain"]["domain"], "gamma.localhost");
    assert_eq!(body["url"], "http://gamma.localhost");

    let (status, body) = send(
        &app,
        TestRequest::get("localhost", "/dashboard").token(&token).build(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenants"][0]["id"], "gamma");
    assert_eq!(body["tenants"][0]["domains"][0], "gamma.localhost");

    // Same password on the new store, now as admin.
    let (status, body) = send(
        &app,
        TestRequest::post("gamma.localhost", "/login")
            .json(json!({ "email": "owner@example.com", "password": TEST_PASSWORD }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "admin");
}

#[tokio::test]
async fn test_store_creation_requires_owner_session() {
    let platform = TestPlatform::new().await.unwrap();
    let app = platform.app();

    let (status, _) = send(
        &app,
        TestRequest::post("localhost", "/tenants")
            .json(json!({ "store_name": "Gamma", "subdomain": "gamma" }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = register_owner(&app, "owner@example.com").await;
    let (status, _) = send(&app, TestRequest::post("localhost", "/logout").token(&token).build()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        TestRequest::post("localhost", "/tenants")
            .token(&token)
            .json(json!({ "store_name": "Gamma", "subdomain": "gamma" }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(platform.state().registry.get_tenant("gamma").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_requests_are_field_errors() {
    let platform = TestPlatform::new().await.unwrap();
    let app = platform.app();
    let token = register_owner(&app, "owner@example.com").await;

    let cases = [
        (json!({ "store_name": "X", "subdomain": "my-store" }), "invalid_tenant_id", "subdomain"),
        (json!({ "store_name": "X", "subdomain": "MyStore" }), "invalid_tenant_id", "subdomain"),
        (json!({ "store_name": "", "subdomain": "mystore" }), "validation_error", "store_name"),
    ];
    for (payload, code, field) in cases {
        let (status, body) = send(
            &app,
            TestRequest::post("localhost", "/tenants")
                .token(&token)
                .json(payload.clone())
                .build(),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", payload);
        assert_eq!(body["code"], code, "{}", payload);
        assert_eq!(body["field"], field, "{}", payload);
    }

    assert!(platform.state().registry.list_tenants().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_owner_email_is_field_error() {
    let platform = TestPlatform::new().await.unwrap();
    let app = platform.app();
    register_owner(&app, "owner@example.com").await;

    let (status, body) = send(
        &app,
        TestRequest::post("localhost", "/register")
            .json(json!({
                "name": "Someone Else",
                "email": "OWNER@example.com",
                "password": TEST_PASSWORD,
                "password_confirmation": TEST_PASSWORD,
            }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "email");
}

// ============================================================================
// Duplicates and conflicts
// ============================================================================

#[tokio::test]
async fn test_duplicate_id_creates_no_database() {
    let platform = TestPlatform::new().await.unwrap();
    let first = platform.tenant("alpha").build().await.unwrap();
    let alpha_db = platform.tenant_db_path("alpha").unwrap();
    let modified = std::fs::metadata(&alpha_db).unwrap().modified().unwrap();

    let err = platform
        .tenant("alpha")
        .owner(first.owner.clone())
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::DuplicateId(_)));

    // Only the first tenant's database exists and it was not touched.
    let entries: Vec<_> = std::fs::read_dir(alpha_db.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".db"))
        .collect();
    assert_eq!(entries, vec!["tenantalpha.db".to_string()]);
    assert_eq!(std::fs::metadata(&alpha_db).unwrap().modified().unwrap(), modified);

    // The original store keeps working.
    let app = platform.app();
    let (status, _) = send(
        &app,
        TestRequest::get(&first.domain, "/admin/products")
            .token(&first.admin_token)
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_duplicate_id_over_http() {
    let platform = TestPlatform::new().await.unwrap();
    platform.tenant("alpha").build().await.unwrap();
    let app = platform.app();
    let token = register_owner(&app, "second@example.com").await;

    let (status, body) = send(
        &app,
        TestRequest::post("localhost", "/tenants")
            .token(&token)
            .json(json!({ "store_name": "Another Alpha", "subdomain": "alpha" }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "duplicate_id");
    assert_eq!(body["field"], "subdomain");

    let tenant = platform.state().registry.get_tenant("alpha").await.unwrap().unwrap();
    assert_eq!(tenant.store_name, "alpha store");
}

#[tokio::test]
async fn test_domain_conflict_keeps_existing_mapping() {
    let platform = TestPlatform::new().await.unwrap();
    platform.tenant("alpha").build().await.unwrap();
    platform.tenant("beta").build().await.unwrap();
    let registry = &platform.state().registry;

    let err = registry.add_domain("beta", "alpha.localhost").await.unwrap_err();
    assert!(matches!(err, TenancyError::DomainConflict(_)));

    let owner = registry.find_by_domain("alpha.localhost").await.unwrap().unwrap();
    assert_eq!(owner.id, "alpha");
    assert_eq!(registry.domains_for("beta").await.unwrap(), vec!["beta.localhost"]);

    let app = platform.app();
    let (status, body) = send(&app, TestRequest::get("alpha.localhost", "/").build()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store_name"], "alpha store");
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_bootstrap_failure_rolls_back_every_step() {
    let platform = TestPlatform::with_tenant_migrations(users_table_missing())
        .await
        .unwrap();

    let err = platform.tenant("alpha").build().await.unwrap_err();
    assert!(matches!(err, TenancyError::ProvisionFailed(_)));

    let state = platform.state();
    assert!(!platform.tenant_db_path("alpha").unwrap().exists());
    assert!(state.registry.get_tenant("alpha").await.unwrap().is_none());
    assert!(state.registry.find_by_domain("alpha.localhost").await.unwrap().is_none());
    assert!(state.registry.list_tenants().await.unwrap().is_empty());
    assert_eq!(state.pool.active_connections("alpha"), 0);

    let audit = state.registry.get_audit_log(Some("alpha"), 10).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, audit_actions::ROLLBACK);

    let app = platform.app();
    let (status, _) = send(&app, TestRequest::get("alpha.localhost", "/").build()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_creation_is_opaque_over_http() {
    let platform = TestPlatform::with_tenant_migrations(users_table_missing())
        .await
        .unwrap();
    let app = platform.app();
    let token = register_owner(&app, "owner@example.com").await;

    let (status, body) = send(
        &app,
        TestRequest::post("localhost", "/tenants")
            .token(&token)
            .json(json!({ "store_name": "Alpha", "subdomain": "alpha" }))
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "provision_failed");
    assert!(body.get("tenant").is_none());
    assert!(!body["error"].as_str().unwrap().contains("users"));

    // The id is free again once the rollback finished.
    assert!(platform.state().registry.get_tenant("alpha").await.unwrap().is_none());
}

#[tokio::test]
async fn test_destroy_removes_store() {
    let platform = TestPlatform::new().await.unwrap();
    let alpha = platform.tenant("alpha").build().await.unwrap();
    let state = platform.state();

    state
        .onboarding
        .destroy("alpha", &alpha.owner.email)
        .await
        .unwrap();

    assert!(!platform.tenant_db_path("alpha").unwrap().exists());
    assert!(state.registry.get_tenant("alpha").await.unwrap().is_none());

    let app = platform.app();
    let (status, _) = send(&app, TestRequest::get(&alpha.domain, "/").build()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The id can be onboarded again from scratch.
    let again = platform.tenant("alpha").owner(alpha.owner.clone()).build().await.unwrap();
    assert_eq!(again.tenant_id, "alpha");
}

#[tokio::test]
async fn test_sessions_do_not_survive_recreated_store() {
    let platform = TestPlatform::new().await.unwrap();
    let first = platform.tenant("alpha").build().await.unwrap();
    let state = platform.state();

    state
        .onboarding
        .destroy("alpha", &first.owner.email)
        .await
        .unwrap();

    let second_owner = platform
        .owner("Second Owner", "second@example.com")
        .await
        .unwrap();
    let second = platform
        .tenant("alpha")
        .owner(second_owner)
        .build()
        .await
        .unwrap();

    let app = platform.app();
    let product = json!({ "name": "Widget", "price_cents": 500, "stock": 3 });

    let (status, _) = send(
        &app,
        TestRequest::post(&second.domain, "/admin/products")
            .token(&first.admin_token)
            .json(product.clone())
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        TestRequest::post(&second.domain, "/admin/products")
            .token(&second.admin_token)
            .json(product)
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_session_bound_to_store_generation() {
    let platform = TestPlatform::new().await.unwrap();
    let alpha = platform.tenant("alpha").build().await.unwrap();
    let state = platform.state();

    // Same id and role, issued for an earlier store that reused the id.
    let tenant = state.registry.get_tenant("alpha").await.unwrap().unwrap();
    let stale = state.sessions.issue(SessionScope::Tenant {
        tenant_id: tenant.id.clone(),
        tenant_created_at: "2000-01-01T00:00:00.000000Z".to_string(),
        user_id: 1,
        role: UserRole::Admin,
    });

    let app = platform.app();
    let (status, _) = send(
        &app,
        TestRequest::get(&alpha.domain, "/admin/products").token(&stale).build(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(state.sessions.lookup(&stale).is_none());

    let (status, _) = send(
        &app,
        TestRequest::get(&alpha.domain, "/admin/products")
            .token(&alpha.admin_token)
            .build(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
