//! Application startup and lifecycle management.

use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::{LedgerConfig, StorageBackend};
use crate::services::providers::{
    EmailProvider, EskizSmsProvider, MockEmailProvider, MockSmsProvider, SmsProvider,
    SmsTokenCache, SmtpProvider,
};
use crate::services::{
    InMemoryLedgerStore, LedgerError, MongoLedgerStore, OrganizationRepository, PaymentLedger,
    PaymentRepository, RandomReceiptNumbers, ReceiptNotifier, StudentAccountRepository,
};
use crate::{build_router, AppState};

struct Stores {
    payments: Arc<dyn PaymentRepository>,
    students: Arc<dyn StudentAccountRepository>,
    organizations: Arc<dyn OrganizationRepository>,
}

impl Stores {
    fn shared<S>(store: Arc<S>) -> Self
    where
        S: PaymentRepository + StudentAccountRepository + OrganizationRepository + 'static,
    {
        Self {
            payments: store.clone(),
            students: store.clone(),
            organizations: store,
        }
    }
}

async fn connect_mongo(config: &LedgerConfig) -> Result<Stores, AppError> {
    let mut client_options = ClientOptions::parse(config.mongodb.uri.expose_secret())
        .await
        .map_err(|e| {
            tracing::error!("Failed to parse MongoDB connection string: {}", e);
            AppError::DatabaseError(e.into())
        })?;
    client_options.app_name = Some(config.service_name.clone());

    let client = Client::with_options(client_options).map_err(|e| {
        tracing::error!("Failed to create MongoDB client: {}", e);
        AppError::DatabaseError(e.into())
    })?;
    let store = MongoLedgerStore::new(&client.database(&config.mongodb.database));

    store.init_indexes().await.map_err(|e| {
        tracing::error!("Failed to initialize database indexes: {}", e);
        AppError::from(LedgerError::from(e))
    })?;

    Ok(Stores::shared(Arc::new(store)))
}

fn email_provider(config: &LedgerConfig) -> Arc<dyn EmailProvider> {
    if !config.smtp.enabled {
        tracing::info!("SMTP provider disabled, receipts will not be emailed");
        return Arc::new(MockEmailProvider::new(false));
    }
    match SmtpProvider::new(config.smtp.clone()) {
        Ok(provider) => {
            tracing::info!("SMTP email provider initialized");
            Arc::new(provider)
        }
        Err(e) => {
            tracing::warn!("Failed to initialize SMTP provider: {}. Using mock.", e);
            Arc::new(MockEmailProvider::new(false))
        }
    }
}

fn sms_provider(config: &LedgerConfig) -> Arc<dyn SmsProvider> {
    if !config.sms.enabled {
        tracing::info!("SMS provider disabled, receipts will not be texted");
        return Arc::new(MockSmsProvider::new(false));
    }
    let tokens = Arc::new(SmsTokenCache::new(Duration::from_secs(
        config.sms.token_ttl_secs,
    )));
    tracing::info!(api_url = %config.sms.api_url, "Eskiz SMS provider initialized");
    Arc::new(EskizSmsProvider::new(config.sms.clone(), tokens))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    pub async fn build(config: LedgerConfig) -> Result<Self, AppError> {
        let stores = match config.storage {
            StorageBackend::Mongodb => connect_mongo(&config).await?,
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Stores::shared(Arc::new(InMemoryLedgerStore::new()))
            }
        };

        let ledger = PaymentLedger::new(
            stores.payments,
            stores.students,
            stores.organizations,
            Arc::new(RandomReceiptNumbers),
        );
        let notifier = ReceiptNotifier::new(email_provider(&config), sms_provider(&config));

        let state = AppState {
            config: config.clone(),
            ledger: Arc::new(ledger),
            notifier: Arc::new(notifier),
        };

        // Port 0 picks a random port for tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, storage = ?config.storage, "Ledger service bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
