pub mod tenant;

pub use tenant::{Role, TenantContext, COLLECTORS, MANAGERS, STAFF};
