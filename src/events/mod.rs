use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Cloneable handle for emitting events from services and handlers.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// The events that can occur across the payment lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PaymentInitiated {
        session_id: String,
        gateway: String,
    },
    OrderFinalized {
        order_id: Uuid,
        session_id: String,
        gateway: String,
        total_minor: i64,
    },
    PaymentFailed {
        session_id: String,
        gateway: String,
        reason: String,
    },
    ConfirmationEmailRequested {
        order_id: Uuid,
        registration_id: Uuid,
        email: String,
    },
    SessionExpired {
        session_id: String,
        expired_at: DateTime<Utc>,
    },
    StockDepleted {
        item_id: Uuid,
        item_kind: String,
    },
}

/// Drains the event channel. Email delivery is fire-and-forget: a failure
/// is logged and never rolls back the order that triggered it.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderFinalized {
                order_id,
                session_id,
                gateway,
                total_minor,
            } => {
                info!(
                    "Order finalized: order_id={}, session_id={}, gateway={}, total_minor={}",
                    order_id, session_id, gateway, total_minor
                );
                metrics::counter!("orders_finalized_total", 1);
            }
            Event::ConfirmationEmailRequested {
                order_id,
                registration_id,
                email,
            } => {
                if let Err(e) = send_confirmation_email(order_id, registration_id, &email).await {
                    error!(
                        "Failed to send confirmation email: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::PaymentInitiated {
                session_id,
                gateway,
            } => {
                info!(
                    "Payment initiated: session_id={}, gateway={}",
                    session_id, gateway
                );
                metrics::counter!("payments_initiated_total", 1);
            }
            Event::PaymentFailed {
                session_id,
                gateway,
                reason,
            } => {
                warn!(
                    "Payment failed: session_id={}, gateway={}, reason={}",
                    session_id, gateway, reason
                );
                metrics::counter!("payments_failed_total", 1);
            }
            Event::SessionExpired {
                session_id,
                expired_at,
            } => {
                info!(
                    "Session expired and removed: session_id={}, expired_at={}",
                    session_id, expired_at
                );
                metrics::counter!("sessions_expired_total", 1);
            }
            Event::StockDepleted { item_id, item_kind } => {
                warn!("Stock depleted: item_id={}, kind={}", item_id, item_kind);
            }
        }
    }

    info!("Event processing loop stopped");
}

async fn send_confirmation_email(
    order_id: Uuid,
    registration_id: Uuid,
    email: &str,
) -> Result<(), String> {
    // Delivery goes through an external mailer in production deployments;
    // here we record the intent so the pipeline is observable end to end.
    info!(
        "Queueing confirmation email: order_id={}, registration_id={}, to={}",
        order_id, registration_id, email
    );
    metrics::counter!("confirmation_emails_queued_total", 1);
    Ok(())
}
