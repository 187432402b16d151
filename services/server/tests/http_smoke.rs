//! End-to-end CRUD, auth, and CORS behavior through the full router.


use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_helpers::{bare_request, form_request, json_request, read_json, test_app};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn customer_crud_roundtrip() {
    let app = test_app().router.into_service::<Body>();

    // Create with nested metadata via bracket notation.
    let response = app
        .clone()
        .oneshot(form_request(
            "POST",
            "/v1/customers",
            "email=a%40b.com&name=Alice&metadata[plan]=pro",
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::OK);
    let created = read_json(response).await;
    let id = created["id"].as_str().expect("id").to_string();
    assert!(id.starts_with("cus_"));
    assert_eq!(created["object"], json!("customer"));
    assert_eq!(created["email"], json!("a@b.com"));
    assert_eq!(created["name"], json!("Alice"));
    assert_eq!(created["metadata"]["plan"], json!("pro"));
    assert_eq!(created["livemode"], json!(false));
    let created_at = created["created"].as_i64().expect("created");

    // Retrieve echoes the stored body.
    let response = app
        .clone()
        .oneshot(bare_request("GET", &format!("/v1/customers/{id}")))
        .await
        .expect("retrieve");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, created);

    // Update overlays fields; id and created are immutable.
    let response = app
        .clone()
        .oneshot(form_request(
            "POST",
            &format!("/v1/customers/{id}?created=999"),
            "email=alice%40b.com",
        ))
        .await
        .expect("update");
    assert_eq!(response.status(), StatusCode::OK);
    let updated = read_json(response).await;
    assert_eq!(updated["email"], json!("alice@b.com"));
    assert_eq!(updated["name"], json!("Alice"));
    assert_eq!(updated["id"], json!(id.clone()));
    assert_eq!(updated["created"], json!(created_at));

    // Delete responds with the deletion envelope.
    let response = app
        .clone()
        .oneshot(bare_request("DELETE", &format!("/v1/customers/{id}")))
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await,
        json!({"deleted": true, "id": id, "object": "customer"})
    );

    // Subsequent retrieve is the canonical not-found envelope.
    let response = app
        .clone()
        .oneshot(bare_request("GET", &format!("/v1/customers/{id}")))
        .await
        .expect("missing");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["error"]["type"], json!("invalid_request_error"));
    assert_eq!(
        body["error"]["message"],
        json!(format!("No such customer: '{id}'"))
    );
}

#[tokio::test]
async fn null_valued_update_fields_are_dropped() {
    let app = test_app().router.into_service::<Body>();
    let created = read_json(
        app.clone()
            .oneshot(json_request(
                "POST",
                "/v1/customers",
                json!({"email": "a@b.com", "name": "Alice"}),
            ))
            .await
            .expect("create"),
    )
    .await;
    let id = created["id"].as_str().expect("id");

    let updated = read_json(
        app.clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/customers/{id}"),
                json!({"name": null}),
            ))
            .await
            .expect("update"),
    )
    .await;
    assert!(updated.get("name").is_none());
    assert_eq!(updated["email"], json!("a@b.com"));
}

#[tokio::test]
async fn missing_auth_is_rejected_with_the_error_envelope() {
    let app = test_app().router.into_service::<Body>();
    let request = Request::builder()
        .method("GET")
        .uri("/v1/customers")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // CORS headers land on error responses too.
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
    let body = read_json(response).await;
    assert_eq!(body["error"]["type"], json!("invalid_request_error"));
}

#[tokio::test]
async fn basic_auth_and_bearer_auth_are_accepted() {
    let app = test_app().router.into_service::<Body>();
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode("sk_test_abc:");
    let request = Request::builder()
        .method("GET")
        .uri("/v1/customers")
        .header("authorization", format!("Basic {encoded}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn options_preflight_short_circuits() {
    let app = test_app().router.into_service::<Body>();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/v1/customers")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get("access-control-allow-methods").and_then(|v| v.to_str().ok()),
        Some("GET, POST, DELETE, OPTIONS")
    );
    assert_eq!(
        headers.get("access-control-allow-headers").and_then(|v| v.to_str().ok()),
        Some("Authorization, Content-Type, Idempotency-Key")
    );
    assert_eq!(
        headers.get("access-control-max-age").and_then(|v| v.to_str().ok()),
        Some("86400")
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn malformed_bracket_params_produce_400() {
    let app = test_app().router.into_service::<Body>();
    for body in ["k[999999]=v", "k[a][b][c][d][e][f][g][h][i][j]=v"] {
        let response = app
            .clone()
            .oneshot(form_request("POST", "/v1/customers", body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let parsed = read_json(response).await;
        assert_eq!(parsed["error"]["type"], json!("invalid_request_error"));
    }
}

#[tokio::test]
async fn expansion_hydrates_referenced_records() {
    let app = test_app().router.into_service::<Body>();
    let customer = read_json(
        app.clone()
            .oneshot(form_request("POST", "/v1/customers", "email=a%40b.com"))
            .await
            .expect("customer"),
    )
    .await;
    let customer_id = customer["id"].as_str().expect("id");

    let subscription = read_json(
        app.clone()
            .oneshot(form_request(
                "POST",
                "/v1/subscriptions",
                &format!("customer={customer_id}"),
            ))
            .await
            .expect("subscription"),
    )
    .await;
    let sub_id = subscription["id"].as_str().expect("id");
    assert_eq!(subscription["customer"], json!(customer_id), "stored by id");

    let hydrated = read_json(
        app.clone()
            .oneshot(bare_request(
                "GET",
                &format!("/v1/subscriptions/{sub_id}?expand[]=customer"),
            ))
            .await
            .expect("hydrated"),
    )
    .await;
    assert_eq!(hydrated["customer"]["object"], json!("customer"));
    assert_eq!(hydrated["customer"]["email"], json!("a@b.com"));
}

#[tokio::test]
async fn seeded_fixtures_resolve_and_survive_flush() {
    let app = test_app().router.into_service::<Body>();
    let response = app
        .clone()
        .oneshot(bare_request("GET", "/v1/payment_methods/pm_card_visa"))
        .await
        .expect("fixture");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(bare_request("DELETE", "/_config/data"))
        .await
        .expect("flush");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(bare_request("GET", "/v1/payment_methods/pm_card_visa"))
        .await
        .expect("fixture after flush");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn subscription_delete_is_a_cancel_transition() {
    let app = test_app().router.into_service::<Body>();
    let customer = read_json(
        app.clone()
            .oneshot(form_request("POST", "/v1/customers", "email=c%40b.com"))
            .await
            .expect("customer"),
    )
    .await;
    let subscription = read_json(
        app.clone()
            .oneshot(form_request(
                "POST",
                "/v1/subscriptions",
                &format!("customer={}", customer["id"].as_str().expect("id")),
            ))
            .await
            .expect("subscription"),
    )
    .await;
    let sub_id = subscription["id"].as_str().expect("id");

    let canceled = read_json(
        app.clone()
            .oneshot(bare_request("DELETE", &format!("/v1/subscriptions/{sub_id}")))
            .await
            .expect("cancel"),
    )
    .await;
    assert_eq!(canceled["status"], json!("canceled"));
    assert!(canceled["canceled_at"].is_i64());

    // Still retrievable: cancellation is not physical removal.
    let response = app
        .clone()
        .oneshot(bare_request("GET", &format!("/v1/subscriptions/{sub_id}")))
        .await
        .expect("retrieve");
    assert_eq!(response.status(), StatusCode::OK);
}
