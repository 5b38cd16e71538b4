//! Entitlement store: key-based reads, writes and upserts over the SQLite tables.
//!
//! Everything that must hold across replicas (one access row per user and
//! product, one payment per provider reference, the download cap) is enforced
//! here by unique indexes and conditional writes, never by in-process locks.

use crate::error::AppResult;
use crate::model::{
    DownloadToken, Lesson, Order, Payment, Product, Subscription, UserAccess,
    GRANT_SOURCE_PAYMENT,
};
use crate::schema::{download_tokens, lessons, orders, payments, products, subscriptions, user_access};
use crate::types::{OrderStatus, PaymentStatus, ProviderKind, SubscriptionStatus};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

pub fn find_product(conn: &mut SqliteConnection, product_id: &str) -> AppResult<Option<Product>> {
    Ok(products::table
        .find(product_id)
        .select(Product::as_select())
        .first(conn)
        .optional()?)
}

pub fn insert_product(conn: &mut SqliteConnection, product: &Product) -> AppResult<()> {
    diesel::insert_into(products::table)
        .values(product)
        .execute(conn)?;
    Ok(())
}

pub fn find_order(conn: &mut SqliteConnection, order_id: &str) -> AppResult<Option<Order>> {
    Ok(orders::table
        .find(order_id)
        .select(Order::as_select())
        .first(conn)
        .optional()?)
}

pub fn insert_order(conn: &mut SqliteConnection, order: &Order) -> AppResult<()> {
    diesel::insert_into(orders::table)
        .values(order)
        .execute(conn)?;
    Ok(())
}

pub fn update_order_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: OrderStatus,
    now: NaiveDateTime,
) -> AppResult<()> {
    diesel::update(orders::table.find(order_id))
        .set((orders::status.eq(status), orders::updated_at.eq(now)))
        .execute(conn)?;
    Ok(())
}

pub fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> AppResult<()> {
    diesel::insert_into(payments::table)
        .values(payment)
        .execute(conn)?;
    Ok(())
}

/// Looks a payment up by its idempotency key.
pub fn find_payment_by_reference(
    conn: &mut SqliteConnection,
    provider: ProviderKind,
    provider_payment_id: &str,
) -> AppResult<Option<Payment>> {
    Ok(payments::table
        .filter(payments::provider.eq(provider))
        .filter(payments::provider_payment_id.eq(provider_payment_id))
        .select(Payment::as_select())
        .first(conn)
        .optional()?)
}

pub fn update_payment_status(
    conn: &mut SqliteConnection,
    payment_id: &str,
    status: PaymentStatus,
    metadata: &serde_json::Value,
    now: NaiveDateTime,
) -> AppResult<()> {
    diesel::update(payments::table.find(payment_id))
        .set((
            payments::status.eq(status),
            payments::metadata.eq(Some(metadata.to_string())),
            payments::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn find_user_access(
    conn: &mut SqliteConnection,
    user_id: &str,
    product_id: &str,
) -> AppResult<Option<UserAccess>> {
    Ok(user_access::table
        .filter(user_access::user_id.eq(user_id))
        .filter(user_access::product_id.eq(product_id))
        .select(UserAccess::as_select())
        .first(conn)
        .optional()?)
}

/// Inserts the access row, or refreshes it if `(user_id, product_id)` already exists.
pub fn upsert_user_access(
    conn: &mut SqliteConnection,
    order: &Order,
    granted_at: NaiveDateTime,
    expires_at: Option<NaiveDateTime>,
) -> AppResult<()> {
    let row = UserAccess {
        id: Uuid::new_v4().to_string(),
        user_id: order.user_id.clone(),
        product_id: order.product_id.clone(),
        product_type: order.product_type,
        is_active: true,
        access_granted_at: granted_at,
        access_expires_at: expires_at,
        granted_by: GRANT_SOURCE_PAYMENT.to_string(),
        order_id: Some(order.id.clone()),
    };

    diesel::insert_into(user_access::table)
        .values(&row)
        .on_conflict((user_access::user_id, user_access::product_id))
        .do_update()
        .set((
            user_access::product_type.eq(order.product_type),
            user_access::is_active.eq(true),
            user_access::access_granted_at.eq(granted_at),
            user_access::access_expires_at.eq(expires_at),
            user_access::granted_by.eq(GRANT_SOURCE_PAYMENT),
            user_access::order_id.eq(Some(order.id.clone())),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn find_subscription(
    conn: &mut SqliteConnection,
    user_id: &str,
    plan_id: &str,
) -> AppResult<Option<Subscription>> {
    Ok(subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .filter(subscriptions::plan_id.eq(plan_id))
        .select(Subscription::as_select())
        .first(conn)
        .optional()?)
}

/// Inserts or reactivates the subscription keyed by `(user_id, plan_id)`.
pub fn upsert_subscription(
    conn: &mut SqliteConnection,
    user_id: &str,
    plan_id: &str,
    period_start: NaiveDateTime,
    period_end: NaiveDateTime,
) -> AppResult<()> {
    let row = Subscription {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        plan_id: plan_id.to_string(),
        status: SubscriptionStatus::Active,
        current_period_start: period_start,
        current_period_end: period_end,
    };

    diesel::insert_into(subscriptions::table)
        .values(&row)
        .on_conflict((subscriptions::user_id, subscriptions::plan_id))
        .do_update()
        .set((
            subscriptions::status.eq(SubscriptionStatus::Active),
            subscriptions::current_period_start.eq(period_start),
            subscriptions::current_period_end.eq(period_end),
        ))
        .execute(conn)?;
    Ok(())
}

/// Marks lapsed access rows inactive and lapsed subscriptions expired.
/// Returns `(access rows, subscriptions)` touched.
pub fn deactivate_lapsed(conn: &mut SqliteConnection, now: NaiveDateTime) -> AppResult<(usize, usize)> {
    conn.transaction(|conn| {
        let access = diesel::update(
            user_access::table
                .filter(user_access::is_active.eq(true))
                .filter(user_access::access_expires_at.le(now)),
        )
        .set(user_access::is_active.eq(false))
        .execute(conn)?;

        let subs = diesel::update(
            subscriptions::table
                .filter(subscriptions::status.eq(SubscriptionStatus::Active))
                .filter(subscriptions::current_period_end.le(now)),
        )
        .set(subscriptions::status.eq(SubscriptionStatus::Expired))
        .execute(conn)?;

        Ok((access, subs))
    })
}

pub fn insert_download_token(conn: &mut SqliteConnection, token: &DownloadToken) -> AppResult<()> {
    diesel::insert_into(download_tokens::table)
        .values(token)
        .execute(conn)?;
    Ok(())
}

pub fn find_download_token(
    conn: &mut SqliteConnection,
    token_id: &str,
) -> AppResult<Option<DownloadToken>> {
    Ok(download_tokens::table
        .find(token_id)
        .select(DownloadToken::as_select())
        .first(conn)
        .optional()?)
}

/// Single conditional increment: succeeds only while the token is unexpired,
/// bound to `product_id`, and under its cap. Returns whether a row was updated.
pub fn try_consume_download(
    conn: &mut SqliteConnection,
    token_id: &str,
    product_id: &str,
    now: NaiveDateTime,
) -> AppResult<bool> {
    let updated = diesel::update(
        download_tokens::table
            .filter(download_tokens::id.eq(token_id))
            .filter(download_tokens::product_id.eq(product_id))
            .filter(download_tokens::expires_at.gt(now))
            .filter(download_tokens::download_count.lt(download_tokens::max_downloads)),
    )
    .set(download_tokens::download_count.eq(download_tokens::download_count + 1))
    .execute(conn)?;

    Ok(updated == 1)
}

pub fn find_lesson(conn: &mut SqliteConnection, lesson_id: &str) -> AppResult<Option<Lesson>> {
    Ok(lessons::table
        .find(lesson_id)
        .select(Lesson::as_select())
        .first(conn)
        .optional()?)
}

pub fn insert_lesson(conn: &mut SqliteConnection, lesson: &Lesson) -> AppResult<()> {
    diesel::insert_into(lessons::table)
        .values(lesson)
        .execute(conn)?;
    Ok(())
}

pub fn find_payment_for_order(
    conn: &mut SqliteConnection,
    order_id: &str,
    provider_payment_id: &str,
) -> AppResult<Option<Payment>> {
    Ok(payments::table
        .filter(payments::order_id.eq(order_id))
        .filter(payments::provider_payment_id.eq(provider_payment_id))
        .select(Payment::as_select())
        .first(conn)
        .optional()?)
}
