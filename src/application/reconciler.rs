use crate::application::ledger::OrderLedger;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::payment::{GatewaySignal, Outcome};
use crate::domain::ports::{PaymentGateway, SharedNotifier};
use crate::error::{NotifyError, Result};
use serde::Serialize;
use std::sync::Arc;

/// What happened to one inbound gateway signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub order_id: String,
    pub outcome: Outcome,
    pub evidence: String,
    /// True only for the signal that actually flipped the order to paid.
    pub applied: bool,
}

/// Applies gateway confirmations to the ledger with exactly-once side effects.
pub struct GatewayReconciler {
    ledger: Arc<OrderLedger>,
    notifier: SharedNotifier,
    admin_user_id: String,
}

impl GatewayReconciler {
    pub fn new(ledger: Arc<OrderLedger>, notifier: SharedNotifier, admin_user_id: impl Into<String>) -> Self {
        Self {
            ledger,
            notifier,
            admin_user_id: admin_user_id.into(),
        }
    }

    /// Verifies `signal`, asks the gateway for the outcome and settles the order.
    ///
    /// Signals for orders that are gone or no longer pending are acknowledged
    /// without touching the ledger. A verification failure is a `Signature` error
    /// and a provider-reported failure is a `Gateway` error; neither changes state.
    pub async fn reconcile(
        &self,
        gateway: &dyn PaymentGateway,
        signal: &GatewaySignal,
    ) -> Result<ReconcileReport> {
        let method = gateway.method();
        let order_id = gateway.order_id(signal)?;

        let order = match self.ledger.get(&order_id).await {
            Ok(order) => order,
            Err(NotifyError::NotFound(_)) => {
                tracing::warn!(%order_id, %method, "Confirmation for unknown order ignored");
                return Ok(Self::no_op(order_id, Outcome::Failure, "order not found"));
            }
            Err(e) => return Err(e),
        };
        if order.status == OrderStatus::Paid {
            tracing::info!(%order_id, %method, "Duplicate confirmation ignored");
            return Ok(Self::no_op(order_id, Outcome::Success, "already paid"));
        }
        if !order.is_payable(self.ledger.now()) {
            tracing::warn!(%order_id, %method, "Confirmation for expired order ignored");
            return Ok(Self::no_op(order_id, Outcome::Failure, "order expired"));
        }

        gateway.verify_inbound_signal(signal, &order).inspect_err(|e| {
            tracing::warn!(%order_id, %method, error = %e, "Inbound signal rejected");
        })?;

        // A racing confirmation may settle the order while ours is in flight;
        // the provider then refuses ours, which is not a payment failure.
        let outcome = match gateway.extract_outcome(signal, &order).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if self.settled_meanwhile(&order_id).await {
                    return Ok(Self::no_op(order_id, Outcome::Success, "already paid"));
                }
                return Err(e);
            }
        };
        if outcome.outcome == Outcome::Failure {
            if self.settled_meanwhile(&order_id).await {
                tracing::info!(%order_id, %method, "Refusal for an order settled concurrently ignored");
                return Ok(Self::no_op(order_id, Outcome::Success, "already paid"));
            }
            tracing::warn!(%order_id, %method, evidence = %outcome.evidence, "Gateway reported failure");
            self.push(&self.admin_user_id, &failure_message(&order, &outcome.evidence))
                .await;
            return Err(NotifyError::Gateway(outcome.evidence));
        }

        let transition = match self.ledger.transition_to_paid(&order_id, method).await {
            Ok(transition) => transition,
            Err(NotifyError::AlreadyTerminal(_)) => {
                tracing::warn!(%order_id, "Order expired before confirmation landed");
                return Ok(Self::no_op(order_id, Outcome::Success, "order expired"));
            }
            Err(e) => return Err(e),
        };

        if transition.applied {
            let paid = &transition.order;
            self.push(&self.admin_user_id, &admin_message(paid, &outcome.evidence))
                .await;
            if paid.user_id.starts_with('U') {
                self.push(&paid.user_id, &customer_message(paid)).await;
            }
        }

        Ok(ReconcileReport {
            order_id,
            outcome: Outcome::Success,
            evidence: outcome.evidence,
            applied: transition.applied,
        })
    }

    async fn settled_meanwhile(&self, order_id: &str) -> bool {
        matches!(
            self.ledger.get(order_id).await,
            Ok(order) if order.status == OrderStatus::Paid
        )
    }

    fn no_op(order_id: String, outcome: Outcome, reason: &str) -> ReconcileReport {
        ReconcileReport {
            order_id,
            outcome,
            evidence: reason.to_string(),
            applied: false,
        }
    }

    /// Notification failures never undo a settled payment.
    async fn push(&self, user_id: &str, text: &str) {
        if let Err(e) = self.notifier.push(user_id, text).await {
            tracing::warn!(user_id, error = %e, "Payment notification failed");
        }
    }
}

fn paid_at(order: &Order) -> String {
    order
        .paid_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default()
}

pub fn admin_message(order: &Order, evidence: &str) -> String {
    format!(
        "🎉 收到新的付款通知\n\n💰 金額: NT$ {}\n📋 訂單編號: {}\n💳 付款方式: {}\n🔢 交易資訊: {}\n⏰ 付款時間: {}\n👤 客戶: {} ({})",
        order.amount,
        order.order_id,
        order
            .payment_method
            .map(|m| m.to_string())
            .unwrap_or_default(),
        evidence,
        paid_at(order),
        order.user_name,
        order.user_id,
    )
}

pub fn customer_message(order: &Order) -> String {
    format!(
        "✅ 付款成功確認\n\n感謝您的付款！\n\n📋 訂單編號: {}\n💰 金額: NT$ {}\n⏰ 時間: {}\n\n我們已收到您的款項，會盡快為您處理 😊",
        order.order_id,
        order.amount,
        paid_at(order),
    )
}

fn failure_message(order: &Order, evidence: &str) -> String {
    format!(
        "⚠️ 付款失敗通知\n\n📋 訂單編號: {}\n❌ 失敗原因: {}\n💰 金額: NT$ {}\n👤 客戶: {}",
        order.order_id, evidence, order.amount, order.user_name
    )
}
