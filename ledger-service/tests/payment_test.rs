mod common;

use axum::http::{Method, StatusCode};
use common::*;
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn create_payment_applies_net_amount_to_balance() {
    let app = spawn_app();

    let payment = app
        .create_payment(json!({
            "studentId": STUDENT_ID,
            "amount": 1000,
            "paymentMethod": "payme",
            "paymentFor": { "type": "tuition", "month": "2024-01" },
            "discount": { "amount": 100, "reason": "sibling" },
            "lateFee": { "amount": 50, "daysLate": 4 },
            "transactionId": "payme-123"
        }))
        .await;

    assert_eq!(decimal(&payment["netAmount"]), dec!(950));
    assert_eq!(payment["status"], "completed");
    assert_eq!(payment["currency"], "UZS");
    assert_eq!(payment["collectedBy"], ADMIN_USER_ID);
    assert_eq!(payment["paymentMethod"], "payme");

    let receipt = payment["receiptNumber"].as_str().unwrap();
    assert!(receipt.starts_with("RCP-"));
    assert_eq!(receipt.len(), "RCP-20240101-1234".len());

    let student = app.student_account(STUDENT_ID).await;
    assert_eq!(student.total_paid, dec!(950));
    assert_eq!(student.total_debt, dec!(4050));
}

#[tokio::test]
async fn overpayment_clamps_debt_at_zero() {
    let app = spawn_app();
    app.create_payment(payment_body(300)).await;
    app.create_payment(payment_body(10_000)).await;

    let student = app.student_account(STUDENT_ID).await;
    assert_eq!(student.total_paid, dec!(10300));
    assert_eq!(student.total_debt, dec!(0));
}

#[tokio::test]
async fn receipt_is_sent_after_payment() {
    let app = spawn_app();
    let payment = app.create_payment(payment_body(2000)).await;
    app.wait_for_receipts().await;

    let emails = app.email.sent();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, format!("{}@example.com", STUDENT_ID));
    assert!(emails[0]
        .subject
        .contains(payment["receiptNumber"].as_str().unwrap()));
    assert_eq!(app.sms.send_count(), 1);
}

#[tokio::test]
async fn pending_payment_leaves_balance_until_verified() {
    let app = spawn_app();
    let mut body = payment_body(1000);
    body["status"] = json!("pending");
    let payment = app.create_payment(body).await;
    assert_eq!(payment["status"], "pending");

    let student = app.student_account(STUDENT_ID).await;
    assert_eq!(student.total_paid, dec!(0));
    assert_eq!(student.total_debt, dec!(5000));

    let id = payment["id"].as_str().unwrap();
    let (status, verified) = app
        .as_admin(Method::POST, &format!("/payments/{}/verify", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["status"], "completed");
    assert_eq!(verified["verifiedBy"], ADMIN_USER_ID);

    let student = app.student_account(STUDENT_ID).await;
    assert_eq!(student.total_paid, dec!(1000));
    assert_eq!(student.total_debt, dec!(4000));

    let (status, _) = app
        .as_admin(Method::POST, &format!("/payments/{}/verify", id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejects_invalid_payment_requests() {
    let app = spawn_app();

    let mut tiny = payment_body(0);
    tiny["amount"] = json!(0.001);
    let (status, body) = app.as_admin(Method::POST, "/payments", Some(tiny)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation error");

    let mut over_discount = payment_body(100);
    over_discount["discount"] = json!({ "amount": 500 });
    let (status, _) = app
        .as_admin(Method::POST, "/payments", Some(over_discount))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut unknown = payment_body(100);
    unknown["studentId"] = json!("nobody");
    let (status, _) = app.as_admin(Method::POST, "/payments", Some(unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.store.payment_count(), 0);
}

#[tokio::test]
async fn recording_requires_a_collector_role_and_user() {
    let app = spawn_app();

    let (status, _) = app
        .request(
            Method::POST,
            "/payments",
            Some("teacher"),
            Some("user-teacher"),
            Some(payment_body(100)),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::POST,
            "/payments",
            Some("accountant"),
            None,
            Some(payment_body(100)),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            Method::POST,
            "/payments",
            Some("accountant"),
            Some("user-acc"),
            Some(payment_body(100)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn missing_org_header_is_unauthorized() {
    let app = spawn_app();
    let request = axum::http::Request::builder()
        .uri("/payments")
        .header("X-User-Role", "admin")
        .body(axum::body::Body::empty())
        .unwrap();

    use tower::ServiceExt;
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let app = spawn_app();
    for amount in [100, 200, 300] {
        app.create_payment(payment_body(amount)).await;
    }
    let mut card = payment_body(400);
    card["paymentMethod"] = json!("card");
    app.create_payment(card).await;

    let (status, page) = app
        .as_admin(Method::GET, "/payments?page=2&limit=3", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 4);
    assert_eq!(page["pagination"]["pages"], 2);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);

    let (_, cards) = app
        .as_admin(Method::GET, "/payments?paymentMethod=card", None)
        .await;
    assert_eq!(cards["pagination"]["total"], 1);
    assert_eq!(decimal(&cards["data"][0]["amount"]), dec!(400));
}

#[tokio::test]
async fn search_matches_receipt_numbers_case_insensitively() {
    let app = spawn_app();
    let payment = app.create_payment(payment_body(100)).await;
    app.create_payment(payment_body(200)).await;

    let receipt = payment["receiptNumber"].as_str().unwrap();
    let needle = receipt.to_lowercase();
    let (_, found) = app
        .as_admin(Method::GET, &format!("/payments?search={}", needle), None)
        .await;
    assert_eq!(found["pagination"]["total"], 1);
    assert_eq!(found["data"][0]["receiptNumber"], receipt);
}

#[tokio::test]
async fn students_only_see_their_own_payments() {
    let app = spawn_app();
    let own = app.create_payment(payment_body(100)).await;
    let mut other = payment_body(200);
    other["studentId"] = json!(OTHER_STUDENT_ID);
    let theirs = app.create_payment(other).await;

    let (status, page) = app
        .request(
            Method::GET,
            "/payments",
            Some("student"),
            Some(STUDENT_USER_ID),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["data"][0]["id"], own["id"]);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/payments/{}", theirs["id"].as_str().unwrap()),
            Some("student"),
            Some(STUDENT_USER_ID),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, receipt) = app
        .request(
            Method::GET,
            &format!("/payments/{}/receipt", own["id"].as_str().unwrap()),
            Some("student"),
            Some(STUDENT_USER_ID),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["organization"]["name"], "Bright Minds Academy");
    assert_eq!(receipt["student"]["name"], "Aziza Karimova");
}

#[tokio::test]
async fn update_and_delete_follow_status_rules() {
    let app = spawn_app();
    let completed = app.create_payment(payment_body(100)).await;
    let completed_id = completed["id"].as_str().unwrap();

    let (status, updated) = app
        .as_admin(
            Method::PUT,
            &format!("/payments/{}", completed_id),
            Some(json!({ "notes": "paid at front desk" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["notes"], "paid at front desk");

    let (status, _) = app
        .as_admin(Method::DELETE, &format!("/payments/{}", completed_id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut pending = payment_body(100);
    pending["status"] = json!("pending");
    let pending = app.create_payment(pending).await;
    let pending_id = pending["id"].as_str().unwrap();

    let (status, failed) = app
        .as_admin(
            Method::PUT,
            &format!("/payments/{}", pending_id),
            Some(json!({ "status": "failed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["status"], "failed");

    let (status, body) = app
        .as_admin(Method::DELETE, &format!("/payments/{}", pending_id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT, "{}", body);

    let (status, _) = app
        .as_admin(Method::GET, &format!("/payments/{}", pending_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn student_history_requires_staff() {
    let app = spawn_app();
    app.create_payment(payment_body(100)).await;

    let (status, page) = app
        .request(
            Method::GET,
            &format!("/students/{}/payments", STUDENT_ID),
            Some("receptionist"),
            Some("user-rec"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 1);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/students/{}/payments", STUDENT_ID),
            Some("student"),
            Some(STUDENT_USER_ID),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn balance_failure_reports_reconciliation() {
    let app = spawn_app();
    app.store.fail_balance_updates(true);

    let (status, body) = app
        .as_admin(Method::POST, "/payments", Some(payment_body(1000)))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Reconciliation required");

    // The payment itself was kept so operators can reconcile it.
    assert_eq!(app.store.payment_count(), 1);
    let student = app.student_account(STUDENT_ID).await;
    assert_eq!(student.total_paid, dec!(0));
}

#[tokio::test]
async fn huge_page_numbers_return_an_empty_page() {
    let app = spawn_app();
    app.create_payment(payment_body(100)).await;

    let (status, page) = app
        .as_admin(
            Method::GET,
            "/payments?page=18446744073709551615&limit=100",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["data"], json!([]));

    let (status, history) = app
        .as_admin(
            Method::GET,
            &format!("/students/{}/payments?page=18446744073709551615", STUDENT_ID),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["data"], json!([]));
}

#[tokio::test]
async fn oversized_amounts_are_rejected_without_touching_balances() {
    let app = spawn_app();
    let mut body = payment_body(0);
    body["amount"] = json!(7.0e28);
    body["lateFee"] = json!({ "amount": 7.0e28 });

    let (status, body) = app.as_admin(Method::POST, "/payments", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation error");

    assert_eq!(app.store.payment_count(), 0);
    let student = app.student_account(STUDENT_ID).await;
    assert_eq!(student.total_paid, dec!(0));
}
