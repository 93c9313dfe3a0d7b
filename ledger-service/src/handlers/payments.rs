use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    CreatePaymentRequest, DateRangeQuery, LateFeeQuery, LateFeeResponse, ListPaymentsQuery,
    OverdueReportResponse, PaymentListResponse, PaymentResponse, PendingPaymentsResponse,
    ReceiptResponse, RefundPaymentRequest, StatisticsResponse, TodayPaymentsResponse,
    UpdatePaymentRequest,
};
use crate::middleware::{TenantContext, COLLECTORS, MANAGERS, STAFF};
use crate::models::PaymentStatus;
use crate::AppState;

#[tracing::instrument(skip(state, ctx, request), fields(org_id = %ctx.org_id))]
pub async fn create_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    ctx.require_any(COLLECTORS)?;
    let collected_by = ctx.require_user()?;
    request.validate()?;

    let recorded = state
        .ledger
        .process_payment(&ctx.org_id, request.into_new_payment()?, collected_by)
        .await?;

    // Pending payments get their receipt once the money is confirmed.
    if recorded.payment.status == PaymentStatus::Completed {
        state
            .notifier
            .spawn_receipt(recorded.payment.clone(), recorded.student);
    }

    Ok((
        StatusCode::CREATED,
        Json(PaymentResponse::from(recorded.payment)),
    ))
}

pub async fn list_payments(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<PaymentListResponse>, AppError> {
    let viewer = ctx.viewer()?;
    let page = state
        .ledger
        .list_payments(&ctx.org_id, query.filter()?, query.page(), &viewer)
        .await?;

    Ok(Json(page.into()))
}

pub async fn get_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, AppError> {
    let viewer = ctx.viewer()?;
    let payment = state.ledger.find_payment(&ctx.org_id, &id, &viewer).await?;
    Ok(Json(payment.into()))
}

#[tracing::instrument(skip(state, ctx, request), fields(org_id = %ctx.org_id))]
pub async fn update_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(request): Json<UpdatePaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    request.validate()?;

    let payment = state
        .ledger
        .update_payment(&ctx.org_id, &id, request.into())
        .await?;
    Ok(Json(payment.into()))
}

#[tracing::instrument(skip(state, ctx), fields(org_id = %ctx.org_id))]
pub async fn delete_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    ctx.require_any(MANAGERS)?;
    state.ledger.delete_payment(&ctx.org_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, ctx, request), fields(org_id = %ctx.org_id))]
pub async fn refund_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    let refunded_by = ctx.require_user()?;
    request.validate()?;

    let payment = state
        .ledger
        .process_refund(&ctx.org_id, &id, request.into(), refunded_by)
        .await?;
    Ok(Json(payment.into()))
}

#[tracing::instrument(skip(state, ctx), fields(org_id = %ctx.org_id))]
pub async fn verify_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    let verified_by = ctx.require_user()?;

    let payment = state
        .ledger
        .verify_payment(&ctx.org_id, &id, verified_by)
        .await?;
    Ok(Json(payment.into()))
}

pub async fn get_receipt(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<ReceiptResponse>, AppError> {
    let viewer = ctx.viewer()?;
    let receipt = state.ledger.receipt(&ctx.org_id, &id, &viewer).await?;
    Ok(Json(receipt.into()))
}

pub async fn get_statistics(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<StatisticsResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    let stats = state
        .ledger
        .get_payment_statistics(&ctx.org_id, query.to_range()?)
        .await?;
    Ok(Json(stats))
}

pub async fn get_today(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<TodayPaymentsResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    let now = Utc::now();
    let summary = state.ledger.today_summary(&ctx.org_id, now).await?;
    Ok(Json(TodayPaymentsResponse {
        date: now.date_naive(),
        summary,
    }))
}

pub async fn get_pending(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<PendingPaymentsResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    let pending = state.ledger.pending_payments(&ctx.org_id).await?;
    Ok(Json(PendingPaymentsResponse {
        count: pending.len(),
        data: pending.into_iter().map(PaymentResponse::from).collect(),
    }))
}

pub async fn get_overdue(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<OverdueReportResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    let overdue = state.ledger.overdue_accounts(&ctx.org_id, Utc::now()).await?;
    Ok(Json(overdue.into()))
}

pub async fn get_late_fee(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(student_id): Path<String>,
    Query(query): Query<LateFeeQuery>,
) -> Result<Json<LateFeeResponse>, AppError> {
    ctx.require_any(MANAGERS)?;
    let fee = state
        .ledger
        .assess_late_fee(&ctx.org_id, &student_id, query.days_late)
        .await?;
    Ok(Json(LateFeeResponse {
        student_id,
        amount: fee.amount,
        days_late: fee.days_late,
    }))
}

pub async fn student_history(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(student_id): Path<String>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<PaymentListResponse>, AppError> {
    ctx.require_any(STAFF)?;
    let page = state
        .ledger
        .payment_history(&ctx.org_id, &student_id, query.filter()?, query.page())
        .await?;
    Ok(Json(page.into()))
}
