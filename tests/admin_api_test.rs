mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;

use common::{admin_request, order_paid, spawn_app, ADMIN_TOKEN, MEMBER_TOKEN};

#[tokio::test]
async fn pricing_lists_active_products_in_dollars() {
    let app = spawn_app().await;
    let request = Request::builder()
        .uri("/api/pricing")
        .body(Body::empty())
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["slug"], "basic");
    assert_eq!(entries[0]["id"], "prod_basic");
    assert_eq!(entries[0]["credits"], 30);
    assert_eq!(entries[0]["price"].as_f64(), Some(9.0));
}

#[tokio::test]
async fn inactive_products_drop_out_of_pricing() {
    let app = spawn_app().await;
    let product = app.state.catalog.get_by_slug("pro").await.unwrap();

    let (status, _) = app
        .send(admin_request(
            "PATCH",
            &format!("/api/admin/products/{}", product.id),
            ADMIN_TOKEN,
            Some(json!({ "isActive": false })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .send(Request::builder().uri("/api/pricing").body(Body::empty()).unwrap())
        .await;
    let slugs: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["slug"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(slugs, vec!["basic", "premium"]);
}

#[tokio::test]
async fn admin_routes_require_a_session() {
    let app = spawn_app().await;
    let request = Request::builder()
        .uri("/api/admin/products")
        .body(Body::empty())
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn admin_routes_reject_non_admins() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(admin_request("GET", "/api/admin/products", MEMBER_TOKEN, None))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Admin access required");
}

#[tokio::test]
async fn admin_can_create_and_fetch_a_product() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(admin_request(
            "POST",
            "/api/admin/products",
            ADMIN_TOKEN,
            Some(json!({
                "slug": "starter",
                "polarProductId": "prod_starter",
                "name": "Starter",
                "credits": 10,
                "priceUsd": 300,
                "displayOrder": 0
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(admin_request("GET", &format!("/api/admin/products/{}", id), ADMIN_TOKEN, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slug"], "starter");
    assert_eq!(body["data"]["creditGrant"], 10);

    let (_, body) = app
        .send(admin_request("GET", "/api/admin/products", ADMIN_TOKEN, None))
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn zero_credit_product_is_rejected() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(admin_request(
            "POST",
            "/api/admin/products",
            ADMIN_TOKEN,
            Some(json!({
                "slug": "free",
                "polarProductId": "prod_free",
                "name": "Free",
                "creditGrant": 0,
                "priceUsd": 100
            })),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Credits and price must be positive numbers");
    assert!(app.state.catalog.get_by_slug("free").await.is_err());
}

#[tokio::test]
async fn duplicate_slug_is_a_conflict() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(admin_request(
            "POST",
            "/api/admin/products",
            ADMIN_TOKEN,
            Some(json!({
                "slug": "basic",
                "polarProductId": "prod_other",
                "name": "Other",
                "credits": 5,
                "priceUsd": 100
            })),
        ))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Product slug already exists");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = spawn_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/products")
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request body");
}

#[tokio::test]
async fn unknown_product_id_is_not_found() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(admin_request(
            "DELETE",
            &format!("/api/admin/products/{}", uuid::Uuid::new_v4()),
            ADMIN_TOKEN,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Product not found");

    let (status, _) = app
        .send(admin_request("GET", "/api/admin/products/not-a-uuid", ADMIN_TOKEN, None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_product_keeps_ledger_history() {
    let app = spawn_app().await;
    app.deliver(&order_paid("ord_1", Some("u1"), "prod_basic")).await;
    app.drain().await;

    let product = app.state.catalog.get_by_slug("basic").await.unwrap();
    let (status, _) = app
        .send(admin_request(
            "DELETE",
            &format!("/api/admin/products/{}", product.id),
            ADMIN_TOKEN,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(admin_request("GET", "/api/users/u1/ledger", ADMIN_TOKEN, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["externalProductId"], "prod_basic");
    assert_eq!(entries[0]["creditsGranted"], 30);
}

#[tokio::test]
async fn seeding_twice_inserts_nothing_new() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(admin_request("POST", "/api/admin/products/seed", ADMIN_TOKEN, None))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn dead_lettered_event_can_be_requeued_after_fixing_the_catalog() {
    let app = spawn_app().await;
    app.deliver(&order_paid("ord_9", Some("u1"), "prod_new")).await;
    app.drain().await;

    let (status, body) = app
        .send(admin_request("GET", "/api/admin/fulfillment/failures", ADMIN_TOKEN, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let failures = body["data"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    let id = failures[0]["id"].as_str().unwrap().to_string();

    app.send(admin_request(
        "POST",
        "/api/admin/products",
        ADMIN_TOKEN,
        Some(json!({
            "slug": "new",
            "polarProductId": "prod_new",
            "name": "New",
            "credits": 50,
            "priceUsd": 1200
        })),
    ))
    .await;

    let (status, _) = app
        .send(admin_request(
            "POST",
            &format!("/api/admin/fulfillment/failures/{}/requeue", id),
            ADMIN_TOKEN,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    app.drain().await;

    assert_eq!(app.store.balance("u1").await, Some(55));
    let (status, _) = app
        .send(admin_request(
            "POST",
            &format!("/api/admin/fulfillment/failures/{}/requeue", id),
            ADMIN_TOKEN,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn alerts_are_visible_to_admins() {
    let app = spawn_app().await;
    app.deliver(&order_paid("ord_5", Some("ghost"), "prod_basic")).await;

    let (status, body) = app
        .send(admin_request("GET", "/api/admin/alerts?limit=10", ADMIN_TOKEN, None))
        .await;

    assert_eq!(status, StatusCode::OK);
    let alerts = body["data"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["orderId"], "ord_5");
}

#[tokio::test]
async fn bad_list_query_uses_the_action_result_shape() {
    let app = spawn_app().await;

    for uri in [
        "/api/admin/fulfillment/failures?limit=abc",
        "/api/admin/alerts?limit=-x",
    ] {
        let (status, body) = app.send(admin_request("GET", uri, ADMIN_TOKEN, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Invalid query parameters");
    }

    let (status, _) = app
        .send(admin_request(
            "GET",
            "/api/admin/alerts?limit=abc",
            MEMBER_TOKEN,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_reports_queue_depth() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["status"].is_string());

    let (status, _) = app
        .send(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
}
