//! Reconciliation engine.
//!
//! Given a normalized outcome for a provider reference, moves the Payment and
//! its Order to the mapped statuses and, on success, grants access. Every
//! caller (push webhook, client verify-now, poller) ends up in [`reconcile`],
//! and calling it again with the same inputs changes nothing.

use crate::error::{AppError, AppResult};
use crate::model::{Order, Payment};
use crate::providers::StatusReport;
use crate::store;
use crate::types::{NormalizedOutcome, OrderStatus, PaymentStatus, ProviderKind};
use chrono::NaiveDateTime;
use diesel::sqlite::SqliteConnection;

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub provider: ProviderKind,
    pub provider_reference: String,
    pub report: StatusReport,
    /// When the caller knows which order the reference belongs to, a mismatch is refused.
    pub expected_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// State moved.
    Applied,
    /// Stored state already matched the outcome.
    Replayed,
    /// Outcome would move the payment backwards; nothing written.
    Stale,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub order_id: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub transaction_id: Option<String>,
    pub transition: Transition,
    pub access_granted: bool,
}

impl Reconciliation {
    fn unchanged(order: &Order, payment: &Payment, transition: Transition) -> Self {
        Self {
            order_id: order.id.clone(),
            payment_status: payment.status,
            order_status: order.status,
            transaction_id: payment.transaction_id(),
            transition,
            access_granted: false,
        }
    }
}

/// Whether an order may move to `next`. A completed order stays completed even
/// if another payment attempt for it fails later.
fn order_transition_allowed(current: OrderStatus, next: OrderStatus) -> bool {
    current != OrderStatus::Completed || next == OrderStatus::Completed
}

pub fn reconcile(
    conn: &mut SqliteConnection,
    request: &ReconcileRequest,
    now: NaiveDateTime,
) -> AppResult<Reconciliation> {
    let result = conn.immediate_transaction(|conn| apply(conn, request, now));

    match &result {
        Ok(done) => tracing::info!(
            provider = %request.provider,
            reference = %request.provider_reference,
            outcome = ?request.report.outcome,
            order_id = %done.order_id,
            transition = ?done.transition,
            access_granted = done.access_granted,
            "payment reconciled"
        ),
        Err(err) => tracing::warn!(
            provider = %request.provider,
            reference = %request.provider_reference,
            outcome = ?request.report.outcome,
            error = %err,
            "reconciliation failed"
        ),
    }

    result
}

fn apply(
    conn: &mut SqliteConnection,
    request: &ReconcileRequest,
    now: NaiveDateTime,
) -> AppResult<Reconciliation> {
    let payment =
        store::find_payment_by_reference(conn, request.provider, &request.provider_reference)?
            .ok_or_else(|| AppError::NotFound("Payment".to_string()))?;

    if let Some(expected) = &request.expected_order_id {
        if expected != &payment.order_id {
            return Err(AppError::AuthorizationDenied(
                "payment reference does not belong to this order".to_string(),
            ));
        }
    }

    let order = store::find_order(conn, &payment.order_id)?
        .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

    let outcome = request.report.outcome;
    let (payment_target, order_target) = outcome.statuses();

    if !payment.status.can_become(payment_target) {
        tracing::warn!(
            payment_id = %payment.id,
            stored = %payment.status,
            reported = %payment_target,
            "ignoring outcome for settled payment"
        );
        return Ok(Reconciliation::unchanged(&order, &payment, Transition::Stale));
    }

    let order_next = if order_transition_allowed(order.status, order_target) {
        order_target
    } else {
        order.status
    };

    if payment.status == payment_target && order.status == order_next {
        return Ok(Reconciliation::unchanged(&order, &payment, Transition::Replayed));
    }

    let mut metadata = payment.metadata_json();
    if let Some(fields) = metadata.as_object_mut() {
        if let Some(transaction_id) = &request.report.transaction_id {
            fields.insert("transaction_id".into(), transaction_id.clone().into());
        }
        fields.insert("verified_at".into(), now.and_utc().to_rfc3339().into());
        fields.insert("last_outcome".into(), payment_target.as_str().into());
    }

    store::update_payment_status(conn, &payment.id, payment_target, &metadata, now)?;
    if order.status != order_next {
        store::update_order_status(conn, &order.id, order_next, now)?;
    }

    // Access is granted only on the transition into completed; replays returned above.
    let access_granted = if outcome == NormalizedOutcome::Successful
        && payment.status != PaymentStatus::Completed
    {
        grant_access(conn, &order, now)?;
        true
    } else {
        false
    };

    Ok(Reconciliation {
        order_id: order.id.clone(),
        payment_status: payment_target,
        order_status: order_next,
        transaction_id: metadata
            .get("transaction_id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        transition: Transition::Applied,
        access_granted,
    })
}

fn grant_access(conn: &mut SqliteConnection, order: &Order, now: NaiveDateTime) -> AppResult<()> {
    let product = store::find_product(conn, &order.product_id)?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

    let expires_at = product.access_expiry(now);
    store::upsert_user_access(conn, order, now, expires_at)?;

    if product.product_type.is_recurring() {
        let period_end = expires_at.ok_or_else(|| {
            AppError::InternalError("recurring product without an access expiry".to_string())
        })?;
        store::upsert_subscription(conn, &order.user_id, &product.id, now, period_end)?;
    }

    tracing::info!(
        user_id = %order.user_id,
        product_id = %product.id,
        product_type = %product.product_type,
        expires_at = ?expires_at,
        "access granted"
    );
    Ok(())
}
