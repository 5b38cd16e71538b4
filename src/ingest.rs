//! Entry points into the reconciliation engine. Push and pull paths differ only
//! in where the outcome comes from; both finish in [`reconcile_outcome`].

use crate::error::AppResult;
use crate::providers::StatusReport;
use crate::reconcile::{self, ReconcileRequest, Reconciliation};
use crate::types::ProviderKind;
use crate::AppState;

/// Applies an outcome that has already been authenticated.
pub fn reconcile_outcome(
    state: &AppState,
    provider: ProviderKind,
    reference: &str,
    report: StatusReport,
    expected_order_id: Option<&str>,
) -> AppResult<Reconciliation> {
    let mut conn = state.get_db_connection()?;
    reconcile::reconcile(
        &mut conn,
        &ReconcileRequest {
            provider,
            provider_reference: reference.to_string(),
            report,
            expected_order_id: expected_order_id.map(str::to_string),
        },
        chrono::Utc::now().naive_utc(),
    )
}

/// Asks the provider for the authoritative status, then reconciles it.
/// A provider failure leaves stored state untouched.
pub async fn query_and_reconcile(
    state: &AppState,
    provider: ProviderKind,
    reference: &str,
    expected_order_id: Option<&str>,
) -> AppResult<Reconciliation> {
    let adapter = state.providers.get(provider);
    tracing::debug!(provider = %adapter.kind(), reference, "querying provider status");
    let report = adapter.query_status(reference).await?;
    reconcile_outcome(state, provider, reference, report, expected_order_id)
}
