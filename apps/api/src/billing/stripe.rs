//! Stripe client (checkout, customer portal) and webhook event handling.
//!
//! Webhook payloads are authenticated by `stripe::Webhook::construct_event`
//! before anything is interpreted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, Client, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData,
    CustomerId, Event, EventObject, EventType, Webhook,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::plans::Tier;
use crate::config::StripeConfig;
use crate::errors::AppError;

/// Everything needed to open a hosted checkout page.
pub struct CheckoutParams<'a> {
    pub user_id: Uuid,
    pub email: &'a str,
    pub customer_id: Option<&'a str>,
    pub tier: Tier,
    pub price_id: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Clone)]
pub struct StripeClient {
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn client(&self) -> Client {
        Client::new(self.config.secret_key.clone())
    }

    /// Creates a subscription-mode checkout session and returns its hosted URL.
    pub async fn create_checkout_session(
        &self,
        params: CheckoutParams<'_>,
    ) -> Result<String, AppError> {
        let user_id = params.user_id.to_string();
        let metadata: HashMap<String, String> = HashMap::from([
            ("tier".to_string(), params.tier.as_str().to_string()),
            ("user_id".to_string(), user_id.clone()),
        ]);

        let mut checkout = CreateCheckoutSession {
            cancel_url: Some(params.cancel_url),
            success_url: Some(params.success_url),
            client_reference_id: Some(&user_id),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(params.price_id.to_string()),
                quantity: Some(1),
                ..Default::default()
            }]),
            metadata: Some(metadata.clone()),
            mode: Some(CheckoutSessionMode::Subscription),
            subscription_data: Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(metadata),
                ..Default::default()
            }),
            ..Default::default()
        };
        match params.customer_id {
            Some(customer) => checkout.customer = Some(parse_customer_id(customer)?),
            None => checkout.customer_email = Some(params.email),
        }

        let session = CheckoutSession::create(&self.client(), checkout)
            .await
            .map_err(|e| {
                error!("Failed to create Stripe checkout session: {e}");
                AppError::Payment(e.to_string())
            })?;
        info!(
            "Created {} checkout session {} for user {}",
            params.tier.as_str(),
            session.id,
            params.user_id
        );
        session
            .url
            .ok_or_else(|| AppError::Payment("Checkout session missing URL".to_string()))
    }

    /// Creates a customer-portal session for managing an existing subscription.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, AppError> {
        let mut portal = CreateBillingPortalSession::new(parse_customer_id(customer_id)?);
        portal.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client(), portal)
            .await
            .map_err(|e| {
                error!("Failed to create Stripe portal session: {e}");
                AppError::Payment(e.to_string())
            })?;
        Ok(session.url)
    }

    /// Verifies the `Stripe-Signature` header and decodes the event.
    pub fn parse_webhook(&self, payload: &[u8], signature: &str) -> Result<Event, AppError> {
        let payload = std::str::from_utf8(payload)
            .map_err(|_| AppError::Validation("Webhook payload is not UTF-8".to_string()))?;
        Webhook::construct_event(payload, signature, &self.config.webhook_secret).map_err(|e| {
            warn!("Rejected Stripe webhook: {e}");
            AppError::Validation(format!("Webhook validation failed: {e}"))
        })
    }
}

fn parse_customer_id(customer_id: &str) -> Result<CustomerId, AppError> {
    customer_id
        .parse()
        .map_err(|e| AppError::Payment(format!("Invalid Stripe customer id {customer_id}: {e:?}")))
}

/// Wire name of the event type (`checkout.session.completed`).
pub fn event_type_name(event: &Event) -> String {
    serde_json::to_value(&event.type_)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", event.type_))
}

/// What a webhook event means for local subscription state.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    CheckoutCompleted {
        user_id: Uuid,
        customer_id: String,
        subscription_id: String,
        tier: Tier,
    },
    SubscriptionUpdated {
        subscription_id: String,
        status: String,
        current_period_end: Option<DateTime<Utc>>,
    },
    SubscriptionDeleted {
        subscription_id: String,
    },
    Ignored,
}

pub fn interpret_event(event: &Event) -> Result<WebhookAction, AppError> {
    match (&event.type_, &event.data.object) {
        (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
            checkout_completed(CompletedCheckout {
                client_reference_id: session.client_reference_id.as_deref(),
                tier: session
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("tier"))
                    .map(String::as_str),
                customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
                subscription_id: session.subscription.as_ref().map(|s| s.id().to_string()),
            })
        }
        (EventType::CustomerSubscriptionUpdated, EventObject::Subscription(sub)) => {
            Ok(subscription_updated(
                sub.id.to_string(),
                sub.status.as_str(),
                sub.current_period_end,
            ))
        }
        (EventType::CustomerSubscriptionDeleted, EventObject::Subscription(sub)) => {
            Ok(WebhookAction::SubscriptionDeleted {
                subscription_id: sub.id.to_string(),
            })
        }
        _ => Ok(WebhookAction::Ignored),
    }
}

/// The fields of a completed checkout session that local state depends on.
struct CompletedCheckout<'a> {
    client_reference_id: Option<&'a str>,
    tier: Option<&'a str>,
    customer_id: Option<String>,
    subscription_id: Option<String>,
}

fn checkout_completed(session: CompletedCheckout<'_>) -> Result<WebhookAction, AppError> {
    let missing = |field: &str| AppError::Validation(format!("Checkout session missing {field}"));

    let user_id = session
        .client_reference_id
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| missing("user"))?;
    let tier = session
        .tier
        .and_then(Tier::parse)
        .filter(|t| *t != Tier::Free)
        .ok_or_else(|| missing("tier"))?;
    let customer_id = session.customer_id.ok_or_else(|| missing("customer"))?;
    let subscription_id = session
        .subscription_id
        .ok_or_else(|| missing("subscription"))?;

    Ok(WebhookAction::CheckoutCompleted {
        user_id,
        customer_id,
        subscription_id,
        tier,
    })
}

fn subscription_updated(
    subscription_id: String,
    status: &str,
    current_period_end: i64,
) -> WebhookAction {
    WebhookAction::SubscriptionUpdated {
        subscription_id,
        status: status.to_string(),
        current_period_end: DateTime::<Utc>::from_timestamp(current_period_end, 0),
    }
}

/// Active and trialing subscriptions keep their tier; anything else drops to free.
pub fn effective_tier(status: &str, subscribed: Tier) -> Tier {
    match status {
        "active" | "trialing" => subscribed,
        _ => Tier::Free,
    }
}
