mod common;

use axum::http::{Method, StatusCode};
use common::*;
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn empty_ledger_reports_zeroes() {
    let app = spawn_app();
    let (status, stats) = app
        .as_admin(Method::GET, "/payments/statistics", None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["summary"]["totalPayments"], 0);
    assert_eq!(decimal(&stats["summary"]["totalAmount"]), dec!(0));
    assert_eq!(decimal(&stats["summary"]["averagePayment"]), dec!(0));
    assert_eq!(stats["byMethod"], json!([]));
}

#[tokio::test]
async fn statistics_count_completed_payments_by_method() {
    let app = spawn_app();
    app.create_payment(json!({
        "studentId": STUDENT_ID,
        "amount": 1000,
        "paymentMethod": "cash",
        "paymentFor": { "type": "tuition" },
        "discount": { "amount": 100 },
        "lateFee": { "amount": 50 }
    }))
    .await;
    let mut click = payment_body(2000);
    click["paymentMethod"] = json!("click");
    app.create_payment(click).await;

    let mut pending = payment_body(9999);
    pending["status"] = json!("pending");
    app.create_payment(pending).await;

    let (_, stats) = app
        .as_admin(Method::GET, "/payments/statistics", None)
        .await;
    let summary = &stats["summary"];
    assert_eq!(summary["totalPayments"], 2);
    assert_eq!(decimal(&summary["totalAmount"]), dec!(3000));
    assert_eq!(decimal(&summary["totalDiscount"]), dec!(100));
    assert_eq!(decimal(&summary["totalLateFee"]), dec!(50));
    assert_eq!(decimal(&summary["averagePayment"]), dec!(1500));

    let by_method = stats["byMethod"].as_array().unwrap();
    assert_eq!(by_method.len(), 2);
    assert_eq!(by_method[0]["method"], "cash");
    assert_eq!(by_method[0]["count"], 1);
    assert_eq!(by_method[1]["method"], "click");
    assert_eq!(decimal(&by_method[1]["amount"]), dec!(2000));
}

#[tokio::test]
async fn statistics_respect_date_range() {
    let app = spawn_app();
    let mut old = payment_body(700);
    old["paymentDate"] = json!("2023-06-15T10:00:00Z");
    app.create_payment(old).await;
    app.create_payment(payment_body(300)).await;

    let (status, stats) = app
        .as_admin(
            Method::GET,
            "/payments/statistics?startDate=2023-06-01&endDate=2023-06-15",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["summary"]["totalPayments"], 1);
    assert_eq!(decimal(&stats["summary"]["totalAmount"]), dec!(700));

    let (status, _) = app
        .as_admin(
            Method::GET,
            "/payments/statistics?startDate=2024-02-01&endDate=2024-01-01",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .as_admin(Method::GET, "/payments/statistics?startDate=yesterday", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn statistics_are_for_managers_only() {
    let app = spawn_app();
    let (status, _) = app
        .request(
            Method::GET,
            "/payments/statistics",
            Some("accountant"),
            Some("user-acc"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn today_and_pending_summaries() {
    let app = spawn_app();
    app.create_payment(payment_body(1000)).await;
    let mut pending = payment_body(500);
    pending["status"] = json!("pending");
    app.create_payment(pending).await;

    let (status, today) = app.as_admin(Method::GET, "/payments/today", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(today["count"], 2);
    assert_eq!(today["completed"], 1);
    assert_eq!(today["pending"], 1);
    assert_eq!(decimal(&today["totalAmount"]), dec!(1000));
    assert!(today["date"].is_string());

    let (status, pending) = app.as_admin(Method::GET, "/payments/pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["count"], 1);
    assert_eq!(pending["data"][0]["status"], "pending");
}

#[tokio::test]
async fn late_fee_uses_organization_settings() {
    let app = spawn_app();

    let (status, fee) = app
        .as_admin(
            Method::GET,
            &format!("/payments/late-fee/{}?daysLate=10", STUDENT_ID),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fee["studentId"], STUDENT_ID);
    assert_eq!(fee["daysLate"], 7);
    assert_eq!(decimal(&fee["amount"]), dec!(35000));

    let (_, within_grace) = app
        .as_admin(
            Method::GET,
            &format!("/payments/late-fee/{}?daysLate=2", STUDENT_ID),
            None,
        )
        .await;
    assert_eq!(decimal(&within_grace["amount"]), dec!(0));

    let (status, _) = app
        .as_admin(Method::GET, "/payments/late-fee/nobody?daysLate=5", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn overdue_lists_indebted_students_with_stale_payments() {
    let app = spawn_app();
    let mut stale = payment_body(100);
    stale["paymentDate"] = json!((chrono::Utc::now() - chrono::Duration::days(60)).to_rfc3339());
    app.create_payment(stale).await;

    let mut settled = payment_body(100);
    settled["studentId"] = json!(OTHER_STUDENT_ID);
    settled["paymentDate"] = json!((chrono::Utc::now() - chrono::Duration::days(90)).to_rfc3339());
    app.create_payment(settled).await;

    let (status, report) = app.as_admin(Method::GET, "/payments/overdue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["count"], 1);
    assert_eq!(decimal(&report["totalDebt"]), dec!(4900));

    let entry = &report["overduePayments"][0];
    assert_eq!(entry["student"]["id"], STUDENT_ID);
    assert_eq!(entry["student"]["name"], "Aziza Karimova");
    assert_eq!(entry["daysOverdue"], 60);
    assert_eq!(decimal(&entry["debt"]), dec!(4900));
    assert!(entry["lastPaymentDate"].is_string());
}

#[tokio::test]
async fn recent_payers_are_not_overdue() {
    let app = spawn_app();
    app.create_payment(payment_body(100)).await;

    let (status, report) = app.as_admin(Method::GET, "/payments/overdue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["count"], 0);
    assert_eq!(report["overduePayments"], json!([]));

    let (status, _) = app
        .request(
            Method::GET,
            "/payments/overdue",
            Some("accountant"),
            Some("user-acc"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
