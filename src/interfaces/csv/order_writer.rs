use crate::domain::order::{Order, OrderStatus};
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;

/// One flat CSV row; timestamps are RFC 3339 so spreadsheets can read them.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRecord<'a> {
    order_id: &'a str,
    user_id: &'a str,
    user_name: &'a str,
    amount: String,
    status: OrderStatus,
    created_at: String,
    expiry_time: String,
    payment_method: String,
    paid_at: String,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Writes orders as CSV to any `Write` sink (stdout, a file, a buffer).
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes a header plus one row per order. `now` decides the reported
    /// status, so overdue pending orders come out as expired.
    pub fn write_orders(
        &mut self,
        orders: impl IntoIterator<Item = Order>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut written = 0;
        for order in orders {
            self.writer.serialize(OrderRecord {
                order_id: &order.order_id,
                user_id: &order.user_id,
                user_name: &order.user_name,
                amount: order.amount.to_string(),
                status: order.effective_status(now),
                created_at: timestamp(order.created_at),
                expiry_time: timestamp(order.expiry_time),
                payment_method: order
                    .payment_method
                    .map(|m| m.to_string())
                    .unwrap_or_default(),
                paid_at: order.paid_at.map(timestamp).unwrap_or_default(),
            })?;
            written += 1;
        }
        if written == 0 {
            self.writer.write_record([
                "orderId",
                "userId",
                "userName",
                "amount",
                "status",
                "createdAt",
                "expiryTime",
                "paymentMethod",
                "paidAt",
            ])?;
        }
        self.writer.flush()?;
        Ok(written)
    }
}
