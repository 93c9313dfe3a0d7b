//! Common test utilities for ledger-service integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use ledger_service::config::{LedgerConfig, MongoConfig, SmsConfig, SmtpConfig, StorageBackend};
use ledger_service::models::{Address, FinancialSettings, Organization, StudentAccount};
use ledger_service::services::providers::{MockEmailProvider, MockSmsProvider};
use ledger_service::services::{
    InMemoryLedgerStore, PaymentLedger, RandomReceiptNumbers, ReceiptNotifier,
};
use ledger_service::{build_router, AppState};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::Value;
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};
use std::time::Duration;
use tower::ServiceExt;

pub const ORG_ID: &str = "org-test";
pub const STUDENT_ID: &str = "stu-1";
pub const STUDENT_USER_ID: &str = "user-stu-1";
pub const OTHER_STUDENT_ID: &str = "stu-2";
pub const OTHER_STUDENT_USER_ID: &str = "user-stu-2";
pub const ADMIN_USER_ID: &str = "user-admin";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ledger_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_config() -> LedgerConfig {
    LedgerConfig {
        common: CommonConfig {
            port: 0,
            log_level: "debug".to_string(),
            otlp_endpoint: None,
        },
        service_name: "ledger-service-test".to_string(),
        storage: StorageBackend::Memory,
        mongodb: MongoConfig {
            uri: Secret::new("mongodb://localhost:27017".to_string()),
            database: "ledger_test".to_string(),
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "noreply@example.com".to_string(),
            from_name: "Education CRM".to_string(),
            enabled: false,
        },
        sms: SmsConfig {
            api_url: "http://localhost:9".to_string(),
            email: String::new(),
            password: Secret::new(String::new()),
            sender: "4546".to_string(),
            token_ttl_secs: 60,
            enabled: false,
        },
        allowed_origins: Vec::new(),
    }
}

pub fn student(id: &str, user_id: &str, debt: Decimal) -> StudentAccount {
    StudentAccount {
        id: id.to_string(),
        organization_id: ORG_ID.to_string(),
        user_id: Some(user_id.to_string()),
        student_id: format!("STU-20240101-{}", 1000 + id.len()),
        first_name: "Aziza".to_string(),
        last_name: "Karimova".to_string(),
        email: Some(format!("{}@example.com", id)),
        phone: Some("+998 90 123-45-67".to_string()),
        total_paid: Decimal::ZERO,
        total_debt: debt,
        updated_at: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryLedgerStore>,
    pub email: Arc<MockEmailProvider>,
    pub sms: Arc<MockSmsProvider>,
}

/// Router over the in-memory store with one organization and two students.
pub fn spawn_app() -> TestApp {
    init_tracing();

    let store = Arc::new(InMemoryLedgerStore::new());
    store
        .put_organization(Organization {
            id: ORG_ID.to_string(),
            name: "Bright Minds Academy".to_string(),
            address: Address {
                street: Some("Amir Temur 1".to_string()),
                city: Some("Tashkent".to_string()),
                ..Default::default()
            },
            financial_settings: FinancialSettings {
                grace_period_days: 3,
                late_fee_per_day: Decimal::from(5000),
                currency: "UZS".to_string(),
            },
        })
        .expect("seed organization");
    store
        .put_student(student(STUDENT_ID, STUDENT_USER_ID, Decimal::from(5000)))
        .expect("seed student");
    store
        .put_student(student(OTHER_STUDENT_ID, OTHER_STUDENT_USER_ID, Decimal::ZERO))
        .expect("seed student");

    let email = Arc::new(MockEmailProvider::new(true));
    let sms = Arc::new(MockSmsProvider::new(true));

    let ledger = PaymentLedger::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(RandomReceiptNumbers),
    );
    let state = AppState {
        config: test_config(),
        ledger: Arc::new(ledger),
        notifier: Arc::new(ReceiptNotifier::new(email.clone(), sms.clone())),
    };

    TestApp {
        router: build_router(state),
        store,
        email,
        sms,
    }
}

impl TestApp {
    /// Sends a request with the gateway identity headers. `role` of `None`
    /// omits `X-User-Role`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        role: Option<&str>,
        user_id: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Org-ID", ORG_ID);
        if let Some(role) = role {
            builder = builder.header("X-User-Role", role);
        }
        if let Some(user_id) = user_id {
            builder = builder.header("X-User-ID", user_id);
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn as_admin(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(method, uri, Some("admin"), Some(ADMIN_USER_ID), body)
            .await
    }

    /// Records a payment as admin and returns the created payment JSON.
    pub async fn create_payment(&self, body: Value) -> Value {
        let (status, json) = self.as_admin(Method::POST, "/payments", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", json);
        json
    }

    pub async fn student_account(&self, id: &str) -> StudentAccount {
        use ledger_service::services::StudentAccountRepository;
        StudentAccountRepository::find(&*self.store, ORG_ID, id)
            .await
            .expect("store read")
            .expect("student exists")
    }

    /// Waits for the detached receipt task to reach the mock providers.
    pub async fn wait_for_receipts(&self) {
        for _ in 0..50 {
            if self.email.send_count() > 0 && self.sms.send_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn payment_body(amount: i64) -> Value {
    serde_json::json!({
        "studentId": STUDENT_ID,
        "amount": amount,
        "paymentMethod": "cash",
        "paymentFor": { "type": "tuition", "month": "2024-01", "year": 2024 }
    })
}

pub fn decimal(value: &Value) -> Decimal {
    let n = value.as_f64().expect("numeric money field");
    Decimal::try_from(n).expect("finite money value")
}
