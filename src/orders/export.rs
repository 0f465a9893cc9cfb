//! CSV serialisation for the admin order export.
//!
//! The header is a fixed 17-column contract; downstream spreadsheets key
//! on these exact names. Quoting is standard CSV (fields containing a
//! comma, quote, or newline are quoted, internal quotes doubled).

use anyhow::Result;
use chrono::SecondsFormat;

use super::admin::AdminOrderRow;

pub const HEADER: [&str; 17] = [
    "orderId",
    "orderCode",
    "userId",
    "userName",
    "userEmail",
    "status",
    "totalAmount",
    "currency",
    "paymentStatus",
    "createdAt",
    "shippingFullName",
    "shippingPhone",
    "shippingDivision",
    "shippingDistrict",
    "shippingThana",
    "shippingPostalCode",
    "shippingStreetAddress",
];

pub fn write_csv(rows: &[AdminOrderRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for row in rows {
        writer.write_record(record(row))?;
    }
    let bytes = writer.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}

fn record(row: &AdminOrderRow) -> [String; 17] {
    let order = &row.order;
    let address = &order.shipping_address.0;
    let field = |value: &Option<String>| value.clone().unwrap_or_default();
    [
        order.id.to_string(),
        order.order_code.clone(),
        order.user_id.to_string(),
        field(&row.user_name),
        field(&row.user_email),
        order.status.clone(),
        order.total_amount.to_string(),
        order.total_currency.clone(),
        order.payment_status.clone(),
        order
            .created_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        field(&address.full_name),
        field(&address.phone),
        field(&address.division),
        field(&address.district),
        field(&address.thana),
        field(&address.postal_code),
        field(&address.street_address),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Currency, Money, OrderLine};
    use crate::orders::Order;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn sample_row(user_name: &str, code: &str) -> AdminOrderRow {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        AdminOrderRow {
            order: Order {
                id: Uuid::new_v4(),
                order_code: code.to_string(),
                user_id: Uuid::new_v4(),
                items: sqlx::types::Json(vec![OrderLine {
                    product_id: Uuid::new_v4(),
                    title: "Widget".into(),
                    quantity: 2,
                    unit_price: Money::new(250, Currency::Bdt),
                }]),
                status: "PENDING".into(),
                total_amount: 500,
                total_currency: "BDT".into(),
                shipping_address: sqlx::types::Json(Address {
                    full_name: Some("Rahim Uddin".into()),
                    phone: Some("01712345678".into()),
                    division: Some("Dhaka".into()),
                    district: Some("Dhaka".into()),
                    thana: Some("Dhanmondi".into()),
                    postal_code: Some("1207".into()),
                    street_address: Some("House 7, Road 2".into()),
                }),
                payment_method: "COD".into(),
                payment_status: "PENDING".into(),
                payment_collected_at: None,
                created_at: created,
                updated_at: created,
            },
            user_name: Some(user_name.to_string()),
            user_email: Some("rahim@example.com".into()),
        }
    }

    #[test]
    fn test_header_has_seventeen_columns() {
        assert_eq!(HEADER.len(), 17);
        let csv = write_csv(&[]).unwrap();
        let header_line = csv.lines().next().unwrap();
        assert_eq!(header_line.split(',').count(), 17);
        assert!(header_line.starts_with("orderId,orderCode,userId"));
    }

    #[test]
    fn test_rows_align_with_header() {
        let row = sample_row("Rahim Uddin", "ORD123456ABCDE");
        let csv = write_csv(&[row]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("ORD123456ABCDE"));
        assert!(lines[1].contains("2026-03-01T12:00:00.000Z"));
    }

    #[test]
    fn test_fields_with_commas_and_quotes_are_escaped() {
        let row = sample_row("Uddin, \"Boss\" Rahim", "ORD000001AAAAA");
        let csv = write_csv(&[row]).unwrap();
        assert!(csv.contains("\"Uddin, \"\"Boss\"\" Rahim\""));
    }

    #[test]
    fn test_order_code_roundtrips() {
        let code = "ORD654321ZZ9X0";
        let csv = write_csv(&[sample_row("Rahim Uddin", code)]).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        let position = headers.iter().position(|h| h == "orderCode").unwrap();
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[position], code);
    }
}
