//! Multipart form normalisation for product writes.
//!
//! Product mutations arrive as form-data, so every scalar is a string and
//! `specification`/`price` may be string-encoded JSON. Everything is
//! normalised here into `ProductForm`; handlers and SQL only ever see
//! typed values.

use axum::extract::Multipart;
use serde_json::{Map, Value};

use crate::domain::{Currency, Money};
use crate::error::{ApiError, ApiResult};

pub const MAX_IMAGES: usize = 5;

#[derive(Debug, Default)]
pub struct ProductForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub specification: Option<Map<String, Value>>,
    pub price: Option<Money>,
    pub stock: Option<i32>,
    pub remove_image_ids: Vec<String>,
    pub uploads: Vec<(String, Vec<u8>)>,
}

pub async fn read_product_form(mut multipart: Multipart) -> ApiResult<ProductForm> {
    let mut form = ProductForm::default();
    let mut price_raw: Option<String> = None;
    let mut price_amount: Option<String> = None;
    let mut price_currency: Option<String> = None;
    let mut stock_raw: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::invalid(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "images" => {
                if form.uploads.len() == MAX_IMAGES {
                    return Err(ApiError::invalid(format!(
                        "at most {MAX_IMAGES} images per upload"
                    )));
                }
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::invalid(err.to_string()))?;
                form.uploads.push((file_name, bytes.to_vec()));
            }
            "title" => form.title = Some(text(field).await?),
            "description" => form.description = Some(text(field).await?),
            "category" => form.category = Some(text(field).await?),
            "specification" => {
                form.specification = Some(parse_specification(&text(field).await?)?);
            }
            "price" => price_raw = Some(text(field).await?),
            "price_amount" => price_amount = Some(text(field).await?),
            "price_currency" => price_currency = Some(text(field).await?),
            "stock" => stock_raw = Some(text(field).await?),
            "remove_image_ids" => {
                form.remove_image_ids = text(field)
                    .await?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            _ => {
                // drain and ignore unknown fields
                let _ = field.bytes().await;
            }
        }
    }

    form.price = parse_price(
        price_raw.as_deref(),
        price_amount.as_deref(),
        price_currency.as_deref(),
    )?;
    form.stock = stock_raw.as_deref().map(parse_stock).transpose()?;

    Ok(form)
}

async fn text(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    Ok(field
        .text()
        .await
        .map_err(|err| ApiError::invalid(err.to_string()))?
        .trim()
        .to_string())
}

fn parse_specification(raw: &str) -> ApiResult<Map<String, Value>> {
    if raw.is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| ApiError::invalid("invalid specification JSON"))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::invalid("specification must be a JSON object")),
    }
}

/// Accepts either a string-encoded JSON object (`price`) or the flat
/// `price_amount`/`price_currency` pair, normalised to one `Money`.
fn parse_price(
    raw: Option<&str>,
    amount: Option<&str>,
    currency: Option<&str>,
) -> ApiResult<Option<Money>> {
    if let Some(raw) = raw.filter(|r| !r.is_empty()) {
        let value: Value =
            serde_json::from_str(raw).map_err(|_| ApiError::invalid("invalid price JSON"))?;
        let object = value
            .as_object()
            .ok_or_else(|| ApiError::invalid("price must be a JSON object"))?;
        let amount = object
            .get("amount")
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::invalid("price.amount is required and must be an integer"))?;
        if amount < 0 {
            return Err(ApiError::invalid("price.amount must be non-negative"));
        }
        let currency = match object.get("currency") {
            None | Some(Value::Null) => Currency::default(),
            Some(Value::String(code)) => Currency::parse(code)
                .ok_or_else(|| ApiError::invalid(format!("unsupported currency: {code}")))?,
            Some(_) => return Err(ApiError::invalid("price.currency must be a string")),
        };
        return Ok(Some(Money::new(amount, currency)));
    }

    if let Some(amount) = amount.filter(|a| !a.is_empty()) {
        let amount: i64 = amount
            .parse()
            .map_err(|_| ApiError::invalid("price_amount must be an integer"))?;
        if amount < 0 {
            return Err(ApiError::invalid("price.amount must be non-negative"));
        }
        let currency = match currency.filter(|c| !c.is_empty()) {
            None => Currency::default(),
            Some(code) => Currency::parse(code)
                .ok_or_else(|| ApiError::invalid(format!("unsupported currency: {code}")))?,
        };
        return Ok(Some(Money::new(amount, currency)));
    }

    Ok(None)
}

fn parse_stock(raw: &str) -> ApiResult<i32> {
    let stock: i32 = raw
        .parse()
        .map_err(|_| ApiError::invalid("stock must be a non-negative number"))?;
    if stock < 0 {
        return Err(ApiError::invalid("stock must be a non-negative number"));
    }
    Ok(stock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specification_normalisation() {
        let map = parse_specification(r#"{"ram":"8GB","ports":{"usb":3}}"#).unwrap();
        assert_eq!(map.get("ram").and_then(Value::as_str), Some("8GB"));
        assert!(parse_specification("not json").is_err());
        assert!(parse_specification("[1,2]").is_err());
        assert!(parse_specification("").unwrap().is_empty());
    }

    #[test]
    fn test_price_from_json_string() {
        let money = parse_price(Some(r#"{"amount":1999,"currency":"USD"}"#), None, None)
            .unwrap()
            .unwrap();
        assert_eq!(money, Money::new(1999, Currency::Usd));

        // currency defaults when omitted
        let money = parse_price(Some(r#"{"amount":500}"#), None, None)
            .unwrap()
            .unwrap();
        assert_eq!(money.currency, Currency::Bdt);

        assert!(parse_price(Some("{"), None, None).is_err());
        assert!(parse_price(Some(r#"{"currency":"BDT"}"#), None, None).is_err());
        assert!(parse_price(Some(r#"{"amount":10,"currency":"NGN"}"#), None, None).is_err());
    }

    #[test]
    fn test_price_from_flat_fields() {
        let money = parse_price(None, Some("750"), Some("bdt")).unwrap().unwrap();
        assert_eq!(money, Money::new(750, Currency::Bdt));
        assert!(parse_price(None, Some("-1"), None).is_err());
        assert!(parse_price(None, Some("abc"), None).is_err());
        assert_eq!(parse_price(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_stock_parse() {
        assert_eq!(parse_stock("12").unwrap(), 12);
        assert!(parse_stock("-3").is_err());
        assert!(parse_stock("many").is_err());
    }
}
