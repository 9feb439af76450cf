use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use super::plans::PlanTier;

/// key: billing-events -> typed provider payloads
///
/// Each variant carries everything its handler needs, so events can be applied
/// in whatever order the provider delivers them.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted {
        organization_id: i32,
        plan: PlanTier,
        subscription_ref: String,
        invoice_ref: Option<String>,
        amount_cents: Option<i64>,
        period_end: Option<DateTime<Utc>>,
    },
    SubscriptionUpdated {
        subscription_ref: String,
        provider_status: String,
        plan: Option<PlanTier>,
        period_end: Option<DateTime<Utc>>,
    },
    SubscriptionDeleted {
        subscription_ref: String,
    },
    InvoicePaid {
        invoice_ref: String,
        subscription_ref: Option<String>,
        organization_id: Option<i32>,
        amount_cents: i64,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    },
    InvoicePaymentFailed {
        invoice_ref: String,
        subscription_ref: Option<String>,
        organization_id: Option<i32>,
        amount_cents: i64,
    },
    /// Event types we do not handle. Acknowledged so the provider stops retrying.
    Unrecognized {
        event_type: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event payload has no type")]
    MissingType,
    #[error("{event_type} event missing {field}")]
    MissingField {
        event_type: String,
        field: &'static str,
    },
}

fn missing(event_type: &str, field: &'static str) -> EventError {
    EventError::MissingField {
        event_type: event_type.to_string(),
        field,
    }
}

fn str_field<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str)
}

fn metadata_str<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object
        .pointer(&format!("/metadata/{key}"))
        .and_then(Value::as_str)
}

// provider metadata values are always strings
fn metadata_organization_id(object: &Value) -> Option<i32> {
    metadata_str(object, "organization_id").and_then(|raw| raw.parse::<i32>().ok())
}

// references can arrive as a bare id or as an expanded object
fn subscription_field(object: &Value) -> Option<String> {
    match object.get("subscription") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Object(_)) => object
            .pointer("/subscription/id")
            .and_then(Value::as_str)
            .map(|id| id.to_string()),
        _ => None,
    }
}

fn epoch_field(object: &Value, field: &str) -> Option<DateTime<Utc>> {
    object
        .get(field)
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Maps a raw provider envelope onto [`BillingEvent`]. Unknown types parse to
/// [`BillingEvent::Unrecognized`]; known types with missing required fields fail.
pub fn parse_event(payload: &Value) -> Result<BillingEvent, EventError> {
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or(EventError::MissingType)?;
    let null = Value::Null;
    let object = payload.pointer("/data/object").unwrap_or(&null);

    match event_type {
        "checkout.session.completed" => {
            let organization_id = metadata_organization_id(object)
                .ok_or_else(|| missing(event_type, "metadata.organization_id"))?;
            let plan = PlanTier::from_key(metadata_str(object, "plan").unwrap_or_default());
            let subscription_ref =
                subscription_field(object).ok_or_else(|| missing(event_type, "subscription"))?;
            let period_end = epoch_field(object, "current_period_end").or_else(|| {
                object
                    .pointer("/subscription/current_period_end")
                    .and_then(Value::as_i64)
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            });
            Ok(BillingEvent::CheckoutCompleted {
                organization_id,
                plan,
                subscription_ref,
                invoice_ref: str_field(object, "invoice").map(|id| id.to_string()),
                amount_cents: object.get("amount_total").and_then(Value::as_i64),
                period_end,
            })
        }
        "customer.subscription.updated" => Ok(BillingEvent::SubscriptionUpdated {
            subscription_ref: str_field(object, "id")
                .map(|id| id.to_string())
                .ok_or_else(|| missing(event_type, "id"))?,
            provider_status: str_field(object, "status")
                .map(|status| status.to_string())
                .ok_or_else(|| missing(event_type, "status"))?,
            plan: metadata_str(object, "plan").map(PlanTier::from_key),
            period_end: epoch_field(object, "current_period_end"),
        }),
        "customer.subscription.deleted" => Ok(BillingEvent::SubscriptionDeleted {
            subscription_ref: str_field(object, "id")
                .map(|id| id.to_string())
                .ok_or_else(|| missing(event_type, "id"))?,
        }),
        "invoice.paid" | "invoice.payment_succeeded" => Ok(BillingEvent::InvoicePaid {
            invoice_ref: str_field(object, "id")
                .map(|id| id.to_string())
                .ok_or_else(|| missing(event_type, "id"))?,
            subscription_ref: subscription_field(object),
            organization_id: metadata_organization_id(object),
            amount_cents: object.get("amount_paid").and_then(Value::as_i64).unwrap_or(0),
            period_start: epoch_field(object, "period_start"),
            period_end: epoch_field(object, "period_end"),
        }),
        "invoice.payment_failed" => Ok(BillingEvent::InvoicePaymentFailed {
            invoice_ref: str_field(object, "id")
                .map(|id| id.to_string())
                .ok_or_else(|| missing(event_type, "id"))?,
            subscription_ref: subscription_field(object),
            organization_id: metadata_organization_id(object),
            amount_cents: object.get("amount_due").and_then(Value::as_i64).unwrap_or(0),
        }),
        other => Ok(BillingEvent::Unrecognized {
            event_type: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checkout_session_parses_with_metadata() {
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "subscription": "sub_42",
                    "invoice": "in_1001",
                    "amount_total": 1200,
                    "metadata": {"organization_id": "7", "plan": "plus"}
                }
            }
        });
        let event = parse_event(&payload).unwrap();
        assert_eq!(
            event,
            BillingEvent::CheckoutCompleted {
                organization_id: 7,
                plan: PlanTier::Plus,
                subscription_ref: "sub_42".into(),
                invoice_ref: Some("in_1001".into()),
                amount_cents: Some(1200),
                period_end: None,
            }
        );
    }

    #[test]
    fn checkout_session_accepts_expanded_subscription_object() {
        let payload = json!({
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "subscription": {"id": "sub_9", "current_period_end": 1700000000},
                    "metadata": {"organization_id": "3", "plan": "pro"}
                }
            }
        });
        match parse_event(&payload).unwrap() {
            BillingEvent::CheckoutCompleted {
                subscription_ref,
                plan,
                period_end,
                ..
            } => {
                assert_eq!(subscription_ref, "sub_9");
                assert_eq!(plan, PlanTier::Pro);
                assert_eq!(period_end.unwrap().timestamp(), 1700000000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn checkout_without_organization_metadata_fails() {
        let payload = json!({
            "type": "checkout.session.completed",
            "data": {"object": {"subscription": "sub_1", "metadata": {}}}
        });
        let err = parse_event(&payload).unwrap_err();
        assert_eq!(
            err,
            EventError::MissingField {
                event_type: "checkout.session.completed".into(),
                field: "metadata.organization_id",
            }
        );
    }

    #[test]
    fn subscription_update_carries_provider_status_verbatim() {
        let payload = json!({
            "type": "customer.subscription.updated",
            "data": {
                "object": {
                    "id": "sub_42",
                    "status": "past_due",
                    "current_period_end": 1700000000,
                    "metadata": {"plan": "plus"}
                }
            }
        });
        let event = parse_event(&payload).unwrap();
        assert_eq!(
            event,
            BillingEvent::SubscriptionUpdated {
                subscription_ref: "sub_42".into(),
                provider_status: "past_due".into(),
                plan: Some(PlanTier::Plus),
                period_end: Utc.timestamp_opt(1700000000, 0).single(),
            }
        );
    }

    #[test]
    fn subscription_delete_needs_only_the_reference() {
        let payload = json!({
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_42"}}
        });
        assert_eq!(
            parse_event(&payload).unwrap(),
            BillingEvent::SubscriptionDeleted {
                subscription_ref: "sub_42".into()
            }
        );
    }

    #[test]
    fn invoice_paid_parses_amount_and_period() {
        let payload = json!({
            "type": "invoice.paid",
            "data": {
                "object": {
                    "id": "in_77",
                    "subscription": "sub_42",
                    "amount_paid": 1200,
                    "period_start": 1700000000,
                    "period_end": 1702592000
                }
            }
        });
        match parse_event(&payload).unwrap() {
            BillingEvent::InvoicePaid {
                invoice_ref,
                subscription_ref,
                amount_cents,
                period_start,
                period_end,
                ..
            } => {
                assert_eq!(invoice_ref, "in_77");
                assert_eq!(subscription_ref.as_deref(), Some("sub_42"));
                assert_eq!(amount_cents, 1200);
                assert!(period_start.unwrap() < period_end.unwrap());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn invoice_metadata_resolves_the_organization() {
        // no subscription reference at all, only the checkout metadata
        let payload = json!({
            "type": "invoice.payment_failed",
            "data": {
                "object": {
                    "id": "in_90",
                    "amount_due": 2500,
                    "metadata": {"organization_id": "12"}
                }
            }
        });
        assert_eq!(
            parse_event(&payload).unwrap(),
            BillingEvent::InvoicePaymentFailed {
                invoice_ref: "in_90".into(),
                subscription_ref: None,
                organization_id: Some(12),
                amount_cents: 2500,
            }
        );
    }

    #[test]
    fn payment_failure_keeps_its_real_invoice_id() {
        let payload = json!({
            "type": "invoice.payment_failed",
            "data": {"object": {"id": "in_88", "subscription": "sub_42", "amount_due": 1200}}
        });
        assert_eq!(
            parse_event(&payload).unwrap(),
            BillingEvent::InvoicePaymentFailed {
                invoice_ref: "in_88".into(),
                subscription_ref: Some("sub_42".into()),
                organization_id: None,
                amount_cents: 1200,
            }
        );
    }

    #[test]
    fn unknown_event_types_become_unrecognized() {
        let payload = json!({
            "type": "customer.created",
            "data": {"object": {"id": "cus_1"}}
        });
        assert_eq!(
            parse_event(&payload).unwrap(),
            BillingEvent::Unrecognized {
                event_type: "customer.created".into()
            }
        );
    }

    #[test]
    fn payload_without_type_is_rejected() {
        let payload = json!({"data": {"object": {}}});
        assert_eq!(parse_event(&payload).unwrap_err(), EventError::MissingType);
    }
}
