//! Ecommerce mapper: flattens the host's nested order object and derives
//! Amplitude transaction fields (`revenue`, `revenueType`, `productId`,
//! `quantity`) from it.
//!
//! Quantity aggregation: an explicit order `quantity` wins, otherwise the
//! per-product quantities are summed (unparseable entries count as 0).

use forwarder_core::types::fields;
use forwarder_core::{CanonicalEventRecord, ForwarderError, ForwarderResult, Payload};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::namespace::ECOMMERCE_MARKER;

pub const ORDER_COMPLETED: &str = "Order Completed";
pub const ORDER_REFUNDED: &str = "Order Refunded";

/// Payload key holding the nested order object.
pub const ORDER_KEY: &str = "ecommerce";

const PRODUCTS_KEY: &str = "products";
const PRODUCT_ID_KEY: &str = "product_id";
const QUANTITY_KEY: &str = "quantity";
/// Revenue sources, in order of preference.
const REVENUE_KEYS: [&str; 3] = ["revenue", "total", "value"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RevenueType {
    Purchase,
    Refund,
}

impl RevenueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "Purchase",
            Self::Refund => "Refund",
        }
    }

    /// Revenue type implied by an ecommerce action name.
    pub fn for_action(action: &str) -> Option<Self> {
        match action {
            ORDER_COMPLETED => Some(Self::Purchase),
            ORDER_REFUNDED => Some(Self::Refund),
            _ => None,
        }
    }
}

/// Transaction fields derived from one ecommerce event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub action: String,
    pub product_id: Option<String>,
    pub quantity: Option<i64>,
    pub revenue: Option<Number>,
    pub revenue_type: Option<RevenueType>,
}

impl Transaction {
    /// Write the present fields onto a record.
    pub fn apply(&self, record: &mut CanonicalEventRecord) {
        if let Some(ref revenue) = self.revenue {
            record.insert(fields::REVENUE, Value::Number(revenue.clone()));
        }
        if let Some(revenue_type) = self.revenue_type {
            record.insert(fields::REVENUE_TYPE, revenue_type.as_str());
        }
        if let Some(ref product_id) = self.product_id {
            record.insert(fields::PRODUCT_ID, product_id.as_str());
        }
        if let Some(quantity) = self.quantity {
            record.insert(fields::QUANTITY, quantity);
        }
    }
}

pub struct EcommerceMapper;

impl EcommerceMapper {
    /// Derive the transaction for `action` and flatten the order into
    /// `payload`.
    ///
    /// The nested `ecommerce` object is removed; its remaining fields come
    /// back as `ecom_<field>` top-level keys. Without a nested object the
    /// order fields are read from the payload itself.
    pub fn map(action: &str, payload: &mut Payload) -> ForwarderResult<Transaction> {
        let mut order = take_order(payload)?;

        let products = match order.shift_remove(PRODUCTS_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Array(products)) => Some(products),
            Some(other) => {
                return Err(ForwarderError::MalformedEcommercePayload(format!(
                    "products must be an array, got {}",
                    json_type(&other)
                )))
            }
        };

        let product_id = match products {
            Some(ref products) => product_ids(products)?,
            None => None,
        };

        let quantity = match order.shift_remove(QUANTITY_KEY).filter(|v| !is_empty(v)) {
            Some(explicit) => Some(parse_quantity(&explicit)),
            None => products.as_deref().map(sum_quantities).transpose()?,
        };

        let revenue = take_revenue(&mut order)?;
        let revenue_type = RevenueType::for_action(action);
        if revenue_type.is_some() && revenue.is_none() {
            return Err(ForwarderError::MissingRequiredField(format!(
                "revenue (required for '{action}')"
            )));
        }

        if let Some(products) = products {
            payload.insert(format!("{ECOMMERCE_MARKER}{PRODUCTS_KEY}"), Value::Array(products));
        }
        for (key, value) in order {
            payload.insert(format!("{ECOMMERCE_MARKER}{key}"), value);
        }

        debug!(
            action,
            product_id = product_id.as_deref().unwrap_or(""),
            quantity = quantity.unwrap_or(0),
            "Ecommerce payload mapped"
        );

        Ok(Transaction {
            action: action.to_string(),
            product_id,
            quantity,
            revenue,
            revenue_type,
        })
    }
}

/// Pull the order object out of the payload.
fn take_order(payload: &mut Payload) -> ForwarderResult<Map<String, Value>> {
    match payload.shift_remove(ORDER_KEY) {
        Some(Value::Object(order)) => Ok(order),
        Some(Value::Null) | None => {
            let mut order = Map::new();
            for key in [PRODUCTS_KEY, QUANTITY_KEY]
                .into_iter()
                .chain(REVENUE_KEYS)
            {
                if let Some(value) = payload.shift_remove(key) {
                    order.insert(key.to_string(), value);
                }
            }
            Ok(order)
        }
        Some(other) => Err(ForwarderError::MalformedEcommercePayload(format!(
            "ecommerce must be an object, got {}",
            json_type(&other)
        ))),
    }
}

/// Comma-joined product ids in product order; products without an id are
/// skipped.
fn product_ids(products: &[Value]) -> ForwarderResult<Option<String>> {
    let mut ids = Vec::with_capacity(products.len());
    for (index, product) in products.iter().enumerate() {
        let product = product.as_object().ok_or_else(|| {
            ForwarderError::MalformedEcommercePayload(format!(
                "products[{index}] must be an object, got {}",
                json_type(product)
            ))
        })?;
        match product.get(PRODUCT_ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => ids.push(id.clone()),
            Some(Value::Number(id)) => ids.push(id.to_string()),
            _ => {}
        }
    }
    Ok((!ids.is_empty()).then(|| ids.join(",")))
}

fn sum_quantities(products: &[Value]) -> ForwarderResult<i64> {
    products
        .iter()
        .filter_map(|product| product.get(QUANTITY_KEY))
        .map(parse_quantity)
        .try_fold(0i64, |total, quantity| total.checked_add(quantity))
        .ok_or_else(|| {
            ForwarderError::MalformedEcommercePayload(
                "product quantities overflow the order total".to_string(),
            )
        })
}

/// Integer quantity from a number or numeric string; anything else is 0.
fn parse_quantity(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// First non-empty revenue source, as a JSON number. All sources are removed
/// from the order.
fn take_revenue(order: &mut Map<String, Value>) -> ForwarderResult<Option<Number>> {
    let mut revenue = None;
    for key in REVENUE_KEYS {
        let Some(value) = order.shift_remove(key) else {
            continue;
        };
        if revenue.is_some() || is_empty(&value) {
            continue;
        }
        revenue = Some(parse_revenue(key, &value)?);
    }
    Ok(revenue)
}

fn parse_revenue(key: &str, value: &Value) -> ForwarderResult<Number> {
    let malformed = || {
        ForwarderError::MalformedEcommercePayload(format!("{key} must be numeric, got {value}"))
    };
    match value {
        Value::Number(n) => Ok(n.clone()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(int) = s.parse::<i64>() {
                return Ok(Number::from(int));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(malformed)
        }
        _ => Err(malformed()),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_order_completed() {
        let mut p = payload(json!({
            "ecommerce": {
                "order_id": "ord-1",
                "products": [
                    {"product_id": "A", "quantity": "2"},
                    {"product_id": "B", "quantity": "1"}
                ],
                "total": 42
            }
        }));

        let tx = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap();
        assert_eq!(tx.product_id.as_deref(), Some("A,B"));
        assert_eq!(tx.quantity, Some(3));
        assert_eq!(tx.revenue, Some(Number::from(42)));
        assert_eq!(tx.revenue_type, Some(RevenueType::Purchase));

        // Nested object is gone; remaining order fields are flattened
        assert!(p.get("ecommerce").is_none());
        assert_eq!(p["ecom_order_id"], "ord-1");
        assert_eq!(p["ecom_products"].as_array().unwrap().len(), 2);
        assert!(p.get("ecom_total").is_none());
    }

    #[test]
    fn test_order_fields_at_top_level() {
        let mut p = payload(json!({
            "products": [{"product_id": "A", "quantity": 1}],
            "revenue": "19.99",
            "coupon": "SPRING"
        }));

        let tx = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap();
        assert_eq!(tx.product_id.as_deref(), Some("A"));
        assert_eq!(tx.revenue, Number::from_f64(19.99));
        assert!(p.get("products").is_none());
        assert!(p.get("revenue").is_none());
        // Unrelated top-level keys are untouched
        assert_eq!(p["coupon"], "SPRING");
    }

    #[test]
    fn test_refund() {
        let mut p = payload(json!({"ecommerce": {"order_id": "ord-1", "value": 10}}));
        let tx = EcommerceMapper::map(ORDER_REFUNDED, &mut p).unwrap();
        assert_eq!(tx.revenue_type, Some(RevenueType::Refund));
        assert_eq!(tx.revenue, Some(Number::from(10)));
        assert_eq!(tx.product_id, None);
        assert_eq!(tx.quantity, None);
    }

    #[test]
    fn test_other_action_has_no_revenue_type() {
        let mut p = payload(json!({"ecommerce": {"products": [{"product_id": "A"}]}}));
        let tx = EcommerceMapper::map("Product Added", &mut p).unwrap();
        assert_eq!(tx.revenue_type, None);
        assert_eq!(tx.revenue, None);
        assert_eq!(tx.quantity, Some(0));
    }

    #[test]
    fn test_revenue_preference_skips_empty() {
        let mut p = payload(json!({
            "ecommerce": {"revenue": "", "total": null, "value": 7.5}
        }));
        let tx = EcommerceMapper::map("Checkout Started", &mut p).unwrap();
        assert_eq!(tx.revenue, Number::from_f64(7.5));

        let mut p = payload(json!({"ecommerce": {"revenue": 5, "total": 6}}));
        let tx = EcommerceMapper::map("Checkout Started", &mut p).unwrap();
        assert_eq!(tx.revenue, Some(Number::from(5)));
    }

    #[test]
    fn test_explicit_quantity_wins() {
        let mut p = payload(json!({
            "ecommerce": {
                "quantity": 10,
                "products": [{"product_id": "A", "quantity": 2}],
                "total": 1
            }
        }));
        let tx = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap();
        assert_eq!(tx.quantity, Some(10));
    }

    #[test]
    fn test_unparseable_quantity_counts_zero() {
        let mut p = payload(json!({
            "ecommerce": {
                "products": [
                    {"product_id": "A", "quantity": "lots"},
                    {"product_id": "B", "quantity": "4"},
                    {"product_id": 99}
                ],
                "total": 1
            }
        }));
        let tx = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap();
        assert_eq!(tx.quantity, Some(4));
        assert_eq!(tx.product_id.as_deref(), Some("A,B,99"));
    }

    #[test]
    fn test_quantity_total_overflow_is_malformed() {
        let mut p = payload(json!({
            "ecommerce": {
                "products": [
                    {"product_id": "A", "quantity": "9223372036854775807"},
                    {"product_id": "B", "quantity": "1"}
                ],
                "total": 1
            }
        }));
        let err = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap_err();
        assert!(matches!(err, ForwarderError::MalformedEcommercePayload(_)));
    }

    #[test]
    fn test_completed_order_requires_revenue() {
        let mut p = payload(json!({"ecommerce": {"products": []}}));
        let err = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap_err();
        assert!(matches!(err, ForwarderError::MissingRequiredField(_)));
    }

    #[test]
    fn test_malformed_products() {
        let mut p = payload(json!({"ecommerce": {"products": "A,B", "total": 1}}));
        let err = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap_err();
        assert!(matches!(err, ForwarderError::MalformedEcommercePayload(_)));

        let mut p = payload(json!({"ecommerce": {"products": ["A"], "total": 1}}));
        let err = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap_err();
        assert!(matches!(err, ForwarderError::MalformedEcommercePayload(_)));
    }

    #[test]
    fn test_malformed_revenue() {
        let mut p = payload(json!({"ecommerce": {"total": "forty-two"}}));
        let err = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap_err();
        assert!(matches!(err, ForwarderError::MalformedEcommercePayload(_)));
    }

    #[test]
    fn test_malformed_order_object() {
        let mut p = payload(json!({"ecommerce": "ord-1"}));
        let err = EcommerceMapper::map(ORDER_COMPLETED, &mut p).unwrap_err();
        assert!(matches!(err, ForwarderError::MalformedEcommercePayload(_)));
    }

    #[test]
    fn test_apply_to_record() {
        let tx = Transaction {
            action: ORDER_COMPLETED.into(),
            product_id: Some("A,B".into()),
            quantity: Some(3),
            revenue: Some(Number::from(42)),
            revenue_type: Some(RevenueType::Purchase),
        };
        let mut record = CanonicalEventRecord::new();
        tx.apply(&mut record);
        assert_eq!(record.get("productId"), Some(&json!("A,B")));
        assert_eq!(record.get("quantity"), Some(&json!(3)));
        assert_eq!(record.get("revenue"), Some(&json!(42)));
        assert_eq!(record.get("revenueType"), Some(&json!("Purchase")));
    }
}
