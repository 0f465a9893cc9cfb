//! Order lifecycle primitives: statuses, order codes, line snapshots.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::money::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        Self::Pending,
        Self::Confirmed,
        Self::Cancelled,
        Self::Shipped,
        Self::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }

    /// PENDING and CONFIRMED orders are still open: cancelable by their
    /// owner and address-editable.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a cancel request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelRefusal {
    AlreadyCancelled,
    NotCancelable,
}

pub fn cancel_refusal(status: OrderStatus) -> Option<CancelRefusal> {
    match status {
        OrderStatus::Cancelled => Some(CancelRefusal::AlreadyCancelled),
        s if s.is_open() => None,
        _ => Some(CancelRefusal::NotCancelable),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cod => "COD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        (raw == "COD").then_some(Self::Cod)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Collected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Collected => "COLLECTED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "COLLECTED" => Some(Self::Collected),
            _ => None,
        }
    }
}

/// One immutable order line: the product and unit price as they were at
/// creation time. Later product edits never touch this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> Result<Money, super::money::MoneyError> {
        self.unit_price.multiply(self.quantity)
    }
}

/// Product fields read (and row-locked) during order creation.
#[derive(Clone, Debug)]
pub struct ProductSnapshot {
    pub title: String,
    pub price: Money,
    pub stock: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("product {0} not found")]
    MissingProduct(Uuid),
    #[error("product {0} out of stock")]
    OutOfStock(Uuid),
    #[error("cart lines have mixed currencies")]
    MixedCurrencies,
    #[error("order total overflows")]
    Overflow,
}

/// Turns cart lines into immutable order lines plus the order total.
///
/// Fails if any product is missing, any line exceeds current stock, or the
/// lines do not share a single currency. The caller is responsible for
/// holding locks so the stock it passed in cannot change underneath.
pub fn snapshot_lines(
    cart: &[(Uuid, u32)],
    products: &HashMap<Uuid, ProductSnapshot>,
) -> Result<(Vec<OrderLine>, Money), SnapshotError> {
    if cart.is_empty() {
        return Err(SnapshotError::EmptyCart);
    }

    let mut lines = Vec::with_capacity(cart.len());
    let mut total: Option<Money> = None;

    for (product_id, quantity) in cart {
        let product = products
            .get(product_id)
            .ok_or(SnapshotError::MissingProduct(*product_id))?;
        if product.stock < i64::from(*quantity) {
            return Err(SnapshotError::OutOfStock(*product_id));
        }

        let line = OrderLine {
            product_id: *product_id,
            title: product.title.clone(),
            quantity: *quantity,
            unit_price: product.price,
        };
        let line_total = line.line_total().map_err(|_| SnapshotError::Overflow)?;
        total = Some(match total {
            None => line_total,
            Some(acc) => acc.add(&line_total).map_err(|err| match err {
                super::money::MoneyError::CurrencyMismatch => SnapshotError::MixedCurrencies,
                super::money::MoneyError::Overflow => SnapshotError::Overflow,
            })?,
        });
        lines.push(line);
    }

    // cart is non-empty, so total is set
    let total = total.unwrap_or_default();
    Ok((lines, total))
}

const CODE_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `ORD` + last six digits of the creation epoch-millis + five random
/// base36 characters. Collisions are possible; callers retry the insert
/// with a fresh code when the unique constraint rejects one.
pub fn generate_order_code(now: DateTime<Utc>) -> String {
    let stamp = now.timestamp_millis().unsigned_abs() % 1_000_000;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("ORD{stamp:06}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;

    fn snapshot(price: i64, stock: i64) -> ProductSnapshot {
        ProductSnapshot {
            title: "Widget".into(),
            price: Money::new(price, Currency::Bdt),
            stock,
        }
    }

    #[test]
    fn test_order_code_format() {
        let re = regex::Regex::new(r"^ORD\d{6}[A-Z0-9]{5}$").unwrap();
        for _ in 0..50 {
            let code = generate_order_code(Utc::now());
            assert!(re.is_match(&code), "bad code {code}");
        }
    }

    #[test]
    fn test_snapshot_totals() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let products = HashMap::from([(p1, snapshot(250, 5)), (p2, snapshot(100, 10))]);
        let (lines, total) = snapshot_lines(&[(p1, 2), (p2, 3)], &products).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(total, Money::new(2 * 250 + 3 * 100, Currency::Bdt));
        assert_eq!(lines[0].unit_price.amount, 250);
        assert_eq!(lines[0].quantity, 2);
    }

    #[test]
    fn test_snapshot_rejects_shortfall() {
        let p1 = Uuid::new_v4();
        let products = HashMap::from([(p1, snapshot(250, 1))]);
        assert_eq!(
            snapshot_lines(&[(p1, 2)], &products),
            Err(SnapshotError::OutOfStock(p1))
        );
    }

    #[test]
    fn test_snapshot_rejects_missing_product() {
        let p1 = Uuid::new_v4();
        assert_eq!(
            snapshot_lines(&[(p1, 1)], &HashMap::new()),
            Err(SnapshotError::MissingProduct(p1))
        );
    }

    #[test]
    fn test_snapshot_rejects_mixed_currencies() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let mut products = HashMap::from([(p1, snapshot(250, 5))]);
        products.insert(
            p2,
            ProductSnapshot {
                title: "Import".into(),
                price: Money::new(10, Currency::Usd),
                stock: 5,
            },
        );
        assert_eq!(
            snapshot_lines(&[(p1, 1), (p2, 1)], &products),
            Err(SnapshotError::MixedCurrencies)
        );
    }

    #[test]
    fn test_snapshot_rejects_empty_cart() {
        assert_eq!(
            snapshot_lines(&[], &HashMap::new()),
            Err(SnapshotError::EmptyCart)
        );
    }

    #[test]
    fn test_cancel_guard() {
        assert_eq!(cancel_refusal(OrderStatus::Pending), None);
        assert_eq!(cancel_refusal(OrderStatus::Confirmed), None);
        assert_eq!(
            cancel_refusal(OrderStatus::Cancelled),
            Some(CancelRefusal::AlreadyCancelled)
        );
        assert_eq!(
            cancel_refusal(OrderStatus::Shipped),
            Some(CancelRefusal::NotCancelable)
        );
        assert_eq!(
            cancel_refusal(OrderStatus::Delivered),
            Some(CancelRefusal::NotCancelable)
        );
    }

    #[test]
    fn test_status_roundtrip() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("REFUNDED"), None);
    }
}
