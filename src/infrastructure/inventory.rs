use crate::domain::pickup::PickupObservation;
use crate::domain::ports::InventorySource;
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

const ID_FIELDS: &[&str] = &[
    "itemId",
    "ItemID",
    "ReceivingOrderID",
    "ReceivingOrderId",
    "OrderNo",
    "id",
];
const HANG_FIELDS: &[&str] = &["hangTimestamp", "HangTime", "HangDate", "ReadyAt", "FinishTime"];
const PICKED_FIELDS: &[&str] = &["picked", "IsPicked", "PickedUp"];
const STATUS_FIELDS: &[&str] = &["Status", "StatusName", "FlowText", "status"];
/// Whole status values meaning the customer has the item. Compared exactly so
/// that "未簽收", "unsigned" or "not delivered" never count.
const PICKED_STATUSES: &[&str] = &["已簽收", "已取貨", "signed", "delivered", "picked up"];

/// Numbers at or above this are epoch milliseconds, below it epoch seconds.
const MILLIS_CUTOFF: i64 = 100_000_000_000;
/// Feed timestamps without an offset are store-local time (UTC+8).
const FEED_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Polls the inventory endpoint for items ready for pickup.
#[derive(Clone)]
pub struct HttpInventorySource {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpInventorySource {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl InventorySource for HttpInventorySource {
    async fn poll(&self) -> Result<Vec<PickupObservation>> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Gateway(format!(
                "Inventory endpoint returned HTTP {}",
                status
            )));
        }
        let body: Value = response.json().await?;
        normalize(&body)
    }
}

/// Turns any of the known inventory payload shapes into observations.
///
/// Accepts a bare array or one wrapped under `Data.List`, `Data`, `data`,
/// `items` or `List`. Anything else is rejected so the tick fails instead of
/// silently treating the feed as empty.
pub fn normalize(body: &Value) -> Result<Vec<PickupObservation>> {
    let entries = locate_entries(body).ok_or_else(|| {
        NotifyError::Gateway("Unrecognized inventory response shape".to_string())
    })?;

    let mut observations = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(record) = entry.as_object() else {
            continue;
        };
        let Some(item_id) = item_id(record) else {
            tracing::debug!("Discarding inventory entry without an id");
            continue;
        };
        observations.push(PickupObservation {
            item_id,
            hang_timestamp: hang_timestamp(record),
            picked: is_picked(record),
        });
    }
    Ok(observations)
}

fn locate_entries(body: &Value) -> Option<&Vec<Value>> {
    if let Some(entries) = body.as_array() {
        return Some(entries);
    }
    let root = body.as_object()?;
    if let Some(list) = root
        .get("Data")
        .and_then(|data| data.get("List"))
        .and_then(Value::as_array)
    {
        return Some(list);
    }
    ["Data", "data", "items", "List"]
        .iter()
        .find_map(|key| root.get(*key).and_then(Value::as_array))
}

fn first<'a>(record: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|field| record.get(*field))
        .find(|value| !value.is_null())
}

fn item_id(record: &Map<String, Value>) -> Option<String> {
    ID_FIELDS.iter().find_map(|field| match record.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn from_epoch(raw: i64) -> Option<DateTime<Utc>> {
    if raw >= MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(raw) = text.parse::<i64>() {
        return from_epoch(raw);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())?;
    let offset = FixedOffset::east_opt(FEED_UTC_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

fn hang_timestamp(record: &Map<String, Value>) -> Option<DateTime<Utc>> {
    match first(record, HANG_FIELDS)? {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => parse_timestamp_text(s),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "y" | "yes"),
        _ => false,
    }
}

fn is_picked(record: &Map<String, Value>) -> bool {
    if first(record, PICKED_FIELDS).is_some_and(truthy) {
        return true;
    }
    match record.get("DeliverDate") {
        Some(Value::Null) | None => {}
        Some(Value::String(s)) if s.trim().is_empty() => {}
        Some(_) => return true,
    }
    STATUS_FIELDS
        .iter()
        .filter_map(|field| record.get(*field).and_then(Value::as_str))
        .map(|status| status.trim().to_lowercase())
        .any(|status| PICKED_STATUSES.contains(&status.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_array_with_canonical_fields() {
        let body = json!([
            {"itemId": "A1", "hangTimestamp": 1767225600000i64, "picked": false}
        ]);
        let items = normalize(&body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "A1");
        assert_eq!(
            items[0].hang_timestamp,
            DateTime::from_timestamp_millis(1767225600000)
        );
        assert!(!items[0].picked);
    }

    #[test]
    fn test_wrapped_shapes_and_aliases() {
        let body = json!({"Data": {"List": [
            {"ReceivingOrderID": 42, "HangTime": 1767225600, "DeliverDate": "2026-01-02"},
            {"OrderNo": "B-7", "ReadyAt": "2026-01-01T08:00:00", "StatusName": "待取件"}
        ]}});
        let items = normalize(&body).unwrap();
        assert_eq!(items[0].item_id, "42");
        assert_eq!(items[0].hang_timestamp, DateTime::from_timestamp(1767225600, 0));
        assert!(items[0].picked);

        assert_eq!(items[1].item_id, "B-7");
        assert_eq!(items[1].hang_timestamp, DateTime::from_timestamp(1767225600, 0));
        assert!(!items[1].picked);

        let body = json!({"items": [{"id": "C", "Status": "Delivered to customer"}]});
        let items = normalize(&body).unwrap();
        assert!(items[0].picked);
        assert!(items[0].hang_timestamp.is_none());
    }

    #[test]
    fn test_entries_without_id_are_discarded() {
        let body = json!({"data": [{"HangTime": 1}, {"itemId": "  "}, "junk", {"ItemID": "ok"}]});
        let items = normalize(&body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "ok");
    }

    #[test]
    fn test_rfc3339_and_signed_marker() {
        let body = json!([
            {"itemId": "X", "FinishTime": "2026-01-01T00:00:00Z", "FlowText": "已簽收"}
        ]);
        let items = normalize(&body).unwrap();
        assert_eq!(items[0].hang_timestamp, DateTime::from_timestamp(1767225600, 0));
        assert!(items[0].picked);

        let body = json!([
            {"itemId": "U-1", "Status": "unsigned"},
            {"itemId": "U-2", "StatusName": "not delivered"},
            {"itemId": "U-3", "Status": "undelivered"},
            {"itemId": "U-4", "FlowText": "未簽收"},
            {"itemId": "S-1", "Status": " Delivered "}
        ]);
        let picked: Vec<(String, bool)> = normalize(&body)
            .unwrap()
            .into_iter()
            .map(|item| (item.item_id, item.picked))
            .collect();
        assert_eq!(
            picked,
            vec![
                ("U-1".to_string(), false),
                ("U-2".to_string(), false),
                ("U-3".to_string(), false),
                ("U-4".to_string(), false),
                ("S-1".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_unrecognized_shape_fails() {
        assert!(matches!(
            normalize(&json!({"result": "ok"})),
            Err(NotifyError::Gateway(_))
        ));
        assert!(normalize(&json!("text")).is_err());
    }
}
