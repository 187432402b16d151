//! Billing cycles driven end-to-end over the wire: manual clock, explicit
//! billing runs, dunning to past_due.


use axum::body::Body;
use axum::http::StatusCode;
use http_helpers::{bare_request, form_request, json_request, read_json, test_app};
use serde_json::{json, Value};
use tower::ServiceExt;

type Router = axum::routing::RouterIntoService<Body, ()>;

async fn post_json(router: &Router, uri: &str, body: Value) -> Value {
    let response = router
        .clone()
        .oneshot(json_request("POST", uri, body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK, "{uri}");
    read_json(response).await
}

async fn get_json(router: &Router, uri: &str) -> Value {
    let response = router
        .clone()
        .oneshot(bare_request("GET", uri))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK, "{uri}");
    read_json(response).await
}

/// Manual clock + product/price/customer/subscription. Returns
/// `(customer_id, subscription_id)`.
async fn seed_billing_fixture(router: &Router) -> (String, String) {
    post_json(router, "/_config/time/mode", json!({"mode": "manual"})).await;

    let product = post_json(router, "/v1/products", json!({"name": "Pro"})).await;
    let price = post_json(
        router,
        "/v1/prices",
        json!({
            "unit_amount": 2000,
            "currency": "usd",
            "product": product["id"],
            "recurring": {"interval": "month", "interval_count": 1}
        }),
    )
    .await;
    let customer = post_json(router, "/v1/customers", json!({"email": "bill@b.com"})).await;
    let customer_id = customer["id"].as_str().expect("id").to_string();

    let response = router
        .clone()
        .oneshot(form_request(
            "POST",
            "/v1/subscriptions",
            &format!(
                "customer={customer_id}&items[0][price]={}",
                price["id"].as_str().expect("id")
            ),
        ))
        .await
        .expect("subscription");
    assert_eq!(response.status(), StatusCode::OK);
    let subscription = read_json(response).await;
    let subscription_id = subscription["id"].as_str().expect("id").to_string();
    assert_eq!(subscription["status"], json!("active"));

    // Make the period elapse.
    post_json(router, "/_config/time/advance", json!({"days": 31})).await;
    (customer_id, subscription_id)
}

async fn wait_for_event_types(router: &Router, expected: &[&str]) -> Vec<String> {
    for _ in 0..200 {
        let events = get_json(router, "/v1/events?limit=100").await;
        let types: Vec<String> = events["data"]
            .as_array()
            .expect("data")
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        if expected.iter().all(|wanted| types.iter().any(|t| t == wanted)) {
            return types;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("events {expected:?} never materialized");
}

#[tokio::test]
async fn successful_cycle_over_the_wire() {
    let router = test_app().router.into_service::<Body>();
    let (_, subscription_id) = seed_billing_fixture(&router).await;

    let before = get_json(&router, &format!("/v1/subscriptions/{subscription_id}")).await;
    let old_end = before["current_period_end"].as_i64().expect("end");

    let summary = post_json(&router, "/_config/billing/run", json!({})).await;
    assert_eq!(summary["processed"], json!(1));
    assert_eq!(summary["paid"], json!(1));
    assert_eq!(summary["failed"], json!(0));

    let invoices = get_json(
        &router,
        &format!("/v1/invoices?subscription={subscription_id}"),
    )
    .await;
    let invoice = &invoices["data"].as_array().expect("data")[0];
    assert!(invoice["id"].as_str().expect("id").starts_with("in_"));
    assert_eq!(invoice["status"], json!("paid"));
    assert_eq!(invoice["amount_due"], json!(2000));
    assert_eq!(invoice["amount_paid"], json!(2000));
    assert_eq!(invoice["amount_remaining"], json!(0));
    assert_eq!(invoice["billing_reason"], json!("subscription_cycle"));

    let charges = get_json(&router, "/v1/charges").await;
    let charge = &charges["data"].as_array().expect("data")[0];
    assert!(charge["id"].as_str().expect("id").starts_with("ch_"));
    assert_eq!(charge["status"], json!("succeeded"));
    assert_eq!(charge["amount"], json!(2000));

    let txns = get_json(&router, "/v1/balance_transactions").await;
    let txn = &txns["data"].as_array().expect("data")[0];
    assert!(txn["id"].as_str().expect("id").starts_with("txn_"));
    assert_eq!(txn["fee"], json!(88));
    assert_eq!(txn["net"], json!(1912));
    assert_eq!(txn["source"], charge["id"]);

    let after = get_json(&router, &format!("/v1/subscriptions/{subscription_id}")).await;
    assert_eq!(after["current_period_start"], json!(old_end));
    assert_eq!(
        after["current_period_end"],
        json!(old_end + 2_592_000),
        "one month beyond the old period end"
    );

    wait_for_event_types(
        &router,
        &[
            "invoice.created",
            "payment_intent.created",
            "payment_intent.succeeded",
            "charge.succeeded",
            "invoice.finalized",
            "invoice.paid",
            "invoice.payment_succeeded",
            "subscription.updated",
        ],
    )
    .await;
}

#[tokio::test]
async fn dunning_over_the_wire_reaches_past_due() {
    let router = test_app().router.into_service::<Body>();
    let (customer_id, subscription_id) = seed_billing_fixture(&router).await;

    let mut overrides = serde_json::Map::new();
    overrides.insert(customer_id.clone(), json!("card_declined"));
    post_json(
        &router,
        "/_config/chaos",
        json!({"customer_overrides": overrides}),
    )
    .await;

    for call in 1..=4_i64 {
        let summary = post_json(&router, "/_config/billing/run", json!({})).await;
        assert_eq!(summary["processed"], json!(1), "call {call}");
        assert_eq!(summary["failed"], json!(1), "call {call}");

        let invoices = get_json(
            &router,
            &format!("/v1/invoices?subscription={subscription_id}"),
        )
        .await;
        let data = invoices["data"].as_array().expect("data");
        assert_eq!(data.len(), 1, "single invoice reused, call {call}");
        assert_eq!(data[0]["status"], json!("open"));
        assert_eq!(data[0]["attempt_count"], json!(call));

        let subscription =
            get_json(&router, &format!("/v1/subscriptions/{subscription_id}")).await;
        let expected = if call < 4 { "active" } else { "past_due" };
        assert_eq!(subscription["status"], json!(expected), "call {call}");
    }

    let charges = get_json(&router, "/v1/charges?limit=100").await;
    let data = charges["data"].as_array().expect("data");
    assert_eq!(data.len(), 4);
    assert!(data.iter().all(|charge| charge["status"] == json!("failed")));
    assert!(data
        .iter()
        .all(|charge| charge["failure_code"] == json!("card_declined")));

    wait_for_event_types(&router, &["invoice.payment_failed", "charge.failed"]).await;

    let stats = get_json(&router, "/_config/chaos/stats").await;
    assert_eq!(stats["payments_failed"], json!(4));
}

#[tokio::test]
async fn advance_rejected_in_real_mode() {
    let router = test_app().router.into_service::<Body>();
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/_config/time/advance",
            json!({"days": 1}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
