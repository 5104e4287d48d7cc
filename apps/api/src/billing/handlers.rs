//! Axum route handlers for subscription billing and the Stripe webhook.

use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Row};
use tracing::{info, warn};

use crate::auth::current_user::CurrentUser;
use crate::billing::plans::{Tier, TierLimits};
use crate::billing::stripe::{
    effective_tier, event_type_name, interpret_event, CheckoutParams, StripeClient,
    WebhookAction,
};
use crate::errors::AppError;
use crate::models::subscription::SubscriptionRow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub tier: Tier,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub tier: Tier,
    pub limits: TierLimits,
    pub subscription: Option<SubscriptionRow>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn stripe(state: &AppState) -> Result<&StripeClient, AppError> {
    state.stripe.as_ref().ok_or(AppError::NotConfigured("Billing"))
}

/// POST /api/v1/billing/checkout
pub async fn handle_checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<UrlResponse>, AppError> {
    let stripe = stripe(&state)?;
    if req.tier == Tier::Free {
        return Err(AppError::Validation("The free tier needs no checkout".to_string()));
    }
    let price_id = req.tier.price_id(stripe.config()).ok_or_else(|| {
        AppError::Validation(format!("No price configured for the {} tier", req.tier.as_str()))
    })?;

    let frontend = state.config.frontend_url.trim_end_matches('/');
    let success_url = format!("{frontend}/dashboard/billing?checkout=success");
    let cancel_url = format!("{frontend}/pricing?checkout=cancelled");

    let url = stripe
        .create_checkout_session(CheckoutParams {
            user_id: user.id,
            email: &user.email,
            customer_id: user.stripe_customer_id.as_deref(),
            tier: req.tier,
            price_id,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;
    Ok(Json(UrlResponse { url }))
}

/// POST /api/v1/billing/portal
pub async fn handle_portal(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<UrlResponse>, AppError> {
    let stripe = stripe(&state)?;
    let customer_id = user
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| AppError::Validation("No billing account exists yet".to_string()))?;

    let return_url = format!(
        "{}/dashboard/billing",
        state.config.frontend_url.trim_end_matches('/')
    );
    let url = stripe.create_portal_session(customer_id, &return_url).await?;
    Ok(Json(UrlResponse { url }))
}

/// GET /api/v1/billing/subscription
pub async fn handle_get_subscription(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription =
        sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?;

    Ok(Json(SubscriptionResponse {
        tier: user.tier,
        limits: user.tier.limits(),
        subscription,
    }))
}

/// POST /billing/webhook
///
/// The event id is recorded in the same transaction that applies it, so a
/// failed apply is retried by Stripe and a duplicate delivery is a no-op.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let stripe = stripe(&state)?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing Stripe-Signature header".to_string()))?;

    let event = stripe.parse_webhook(&body, signature)?;
    let action = interpret_event(&event)?;
    let event_id = event.id.to_string();
    let event_type = event_type_name(&event);

    let mut tx = state.db.begin().await?;
    let inserted = sqlx::query(
        "INSERT INTO stripe_events (id, event_type) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
    )
    .bind(&event_id)
    .bind(&event_type)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if inserted == 0 {
        info!("Stripe event {event_id} already processed");
        return Ok(Json(WebhookAck { received: true }));
    }

    apply_action(&mut tx, &action).await?;
    tx.commit().await?;

    info!("Processed Stripe event {event_id} ({event_type})");
    Ok(Json(WebhookAck { received: true }))
}

async fn apply_action(conn: &mut PgConnection, action: &WebhookAction) -> Result<(), AppError> {
    match action {
        WebhookAction::CheckoutCompleted {
            user_id,
            customer_id,
            subscription_id,
            tier,
        } => {
            sqlx::query(
                r#"
                INSERT INTO subscriptions
                    (user_id, stripe_subscription_id, stripe_customer_id, tier, status)
                VALUES ($1, $2, $3, $4, 'active')
                ON CONFLICT (user_id) DO UPDATE SET
                    stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                    stripe_customer_id     = EXCLUDED.stripe_customer_id,
                    tier                   = EXCLUDED.tier,
                    status                 = 'active',
                    updated_at             = NOW()
                "#,
            )
            .bind(user_id)
            .bind(subscription_id)
            .bind(customer_id)
            .bind(tier.as_str())
            .execute(&mut *conn)
            .await?;

            set_user_tier(conn, *user_id, *tier, Some(customer_id)).await?;
            info!("User {user_id} subscribed to {}", tier.as_str());
        }
        WebhookAction::SubscriptionUpdated {
            subscription_id,
            status,
            current_period_end,
        } => {
            let row = sqlx::query(
                r#"
                UPDATE subscriptions
                SET status = $1, current_period_end = $2, updated_at = NOW()
                WHERE stripe_subscription_id = $3
                RETURNING user_id, tier
                "#,
            )
            .bind(status)
            .bind(current_period_end)
            .bind(subscription_id)
            .fetch_optional(&mut *conn)
            .await?;

            match row {
                Some(row) => {
                    let user_id: uuid::Uuid = row.try_get("user_id")?;
                    let tier: String = row.try_get("tier")?;
                    let tier = effective_tier(status, Tier::from_db(&tier));
                    set_user_tier(conn, user_id, tier, None).await?;
                }
                None => warn!("Subscription {subscription_id} updated before checkout completed"),
            }
        }
        WebhookAction::SubscriptionDeleted { subscription_id } => {
            let user_id: Option<uuid::Uuid> = sqlx::query_scalar(
                r#"
                UPDATE subscriptions
                SET status = 'canceled', updated_at = NOW()
                WHERE stripe_subscription_id = $1
                RETURNING user_id
                "#,
            )
            .bind(subscription_id)
            .fetch_optional(&mut *conn)
            .await?;

            match user_id {
                Some(user_id) => {
                    set_user_tier(conn, user_id, Tier::Free, None).await?;
                    info!("Subscription {subscription_id} canceled, user {user_id} back to free");
                }
                None => warn!("Deleted subscription {subscription_id} is unknown"),
            }
        }
        WebhookAction::Ignored => {}
    }
    Ok(())
}

async fn set_user_tier(
    conn: &mut PgConnection,
    user_id: uuid::Uuid,
    tier: Tier,
    customer_id: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE users
        SET tier = $1,
            stripe_customer_id = COALESCE($2, stripe_customer_id),
            updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(tier.as_str())
    .bind(customer_id)
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_request_rejects_unknown_tier() {
        let ok: CheckoutRequest = serde_json::from_str(r#"{"tier":"starter"}"#).unwrap();
        assert_eq!(ok.tier, Tier::Starter);
        assert!(serde_json::from_str::<CheckoutRequest>(r#"{"tier":"gold"}"#).is_err());
    }

    #[test]
    fn test_subscription_response_shape() {
        let response = SubscriptionResponse {
            tier: Tier::Pro,
            limits: Tier::Pro.limits(),
            subscription: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["tier"], "pro");
        assert_eq!(value["limits"]["requests_per_minute"], 300);
        assert!(value["subscription"].is_null());
    }
}
