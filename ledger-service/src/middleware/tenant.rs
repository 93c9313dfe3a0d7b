//! Tenant context for multi-tenancy support.
//!
//! Identity arrives as headers set by the gateway after it authenticated the
//! caller: `X-Org-ID` (required), `X-User-ID` and `X-User-Role`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use std::str::FromStr;

use crate::services::Viewer;

pub const ORG_ID_HEADER: &str = "X-Org-ID";
pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Superadmin,
    Admin,
    Accountant,
    Teacher,
    Receptionist,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::Admin => "admin",
            Role::Accountant => "accountant",
            Role::Teacher => "teacher",
            Role::Receptionist => "receptionist",
            Role::Student => "student",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "superadmin" => Ok(Role::Superadmin),
            "admin" => Ok(Role::Admin),
            "accountant" => Ok(Role::Accountant),
            "teacher" => Ok(Role::Teacher),
            "receptionist" => Ok(Role::Receptionist),
            "student" => Ok(Role::Student),
            other => Err(AppError::Unauthorized(anyhow::anyhow!(
                "Unknown role '{}' in X-User-Role",
                other
            ))),
        }
    }
}

/// Statistics, verification, refunds and other ledger management.
pub const MANAGERS: &[Role] = &[Role::Superadmin, Role::Admin];
/// Roles allowed to record payments.
pub const COLLECTORS: &[Role] = &[Role::Superadmin, Role::Admin, Role::Accountant];
pub const STAFF: &[Role] = &[
    Role::Superadmin,
    Role::Admin,
    Role::Accountant,
    Role::Teacher,
    Role::Receptionist,
];

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub org_id: String,
    pub user_id: Option<String>,
    pub role: Option<Role>,
}

impl TenantContext {
    pub fn new(org_id: String, user_id: Option<String>, role: Option<Role>) -> Self {
        Self {
            org_id,
            user_id,
            role,
        }
    }

    pub fn require_any(&self, allowed: &[Role]) -> Result<Role, AppError> {
        match self.role {
            Some(role) if allowed.contains(&role) => Ok(role),
            Some(role) => Err(AppError::Forbidden(anyhow::anyhow!(
                "Role '{}' may not perform this action",
                role.as_str()
            ))),
            None => Err(AppError::Forbidden(anyhow::anyhow!(
                "Missing X-User-Role header"
            ))),
        }
    }

    /// Acting user for audit fields.
    pub fn require_user(&self) -> Result<&str, AppError> {
        self.user_id.as_deref().ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header"))
        })
    }

    /// Any known role may read; students are narrowed to their own records.
    pub fn viewer(&self) -> Result<Viewer, AppError> {
        match self.role {
            Some(Role::Student) => Ok(Viewer::Student {
                user_id: self.require_user()?.to_string(),
            }),
            Some(_) => Ok(Viewer::Staff),
            None => Err(AppError::Forbidden(anyhow::anyhow!(
                "Missing X-User-Role header"
            ))),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let org_id = header(parts, ORG_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!(
                "Missing X-Org-ID header (required from gateway)"
            ))
        })?;

        let user_id = header(parts, USER_ID_HEADER).map(str::to_string);
        let role = header(parts, USER_ROLE_HEADER)
            .map(Role::from_str)
            .transpose()?;

        let span = tracing::Span::current();
        span.record("org_id", org_id);
        if let Some(ref uid) = user_id {
            span.record("user_id", uid.as_str());
        }

        Ok(TenantContext::new(org_id.to_string(), user_id, role))
    }
}
