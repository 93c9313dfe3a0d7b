pub mod error;
pub mod identifiers;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod mongo;
pub mod notifier;
pub mod providers;
pub mod repository;

pub use error::{LedgerError, StoreError};
pub use identifiers::{RandomReceiptNumbers, ReceiptNumberSource};
pub use ledger::{
    NewPayment, OverdueAccount, PaymentLedger, PaymentReceipt, PaymentUpdate, RecordedPayment,
    RefundRequest, Viewer,
};
pub use memory::InMemoryLedgerStore;
pub use metrics::{get_metrics, init_metrics};
pub use mongo::MongoLedgerStore;
pub use notifier::{ChannelHealth, NotificationHealth, ReceiptNotifier};
pub use repository::{
    DateRange, OrganizationRepository, Page, Paginated, PaymentFilter, PaymentRepository,
    StudentAccountRepository,
};
