use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::MySqlPool;

use crate::error::{ApiError, ApiResult};

/// ===============================
/// Column kinds a PATCH-style update may touch
/// ===============================
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnKind {
    Text,
    NullableText,
    /// Non-negative amount
    Money,
    Date,
    Bool,
}

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    Decimal(Decimal),
    Bool(bool),
    Date(NaiveDate),
    U64(u64),
    Null,
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
/// Only columns listed in `allowed` may appear in `payload`; anything else is
/// rejected, so callers decide exactly which columns a client can write.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[(&str, ColumnKind)],
    id_column: &str,
    id_value: u64,
) -> ApiResult<SqlUpdate> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ApiError::validation("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(ApiError::validation("No fields provided for update"));
    }

    let mut columns = Vec::with_capacity(obj.len());
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let kind = allowed
            .iter()
            .find(|(name, _)| *name == key.as_str())
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ApiError::validation(format!("Field '{key}' cannot be updated")))?;

        values.push(convert(key, kind, value)?);
        columns.push(format!("{key} = ?"));
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        table,
        columns.join(", "),
        id_column
    );

    // WHERE id = ?
    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate { sql, values })
}

fn convert(key: &str, kind: ColumnKind, value: &Value) -> ApiResult<SqlValue> {
    let invalid = || ApiError::validation(format!("Invalid value for '{key}'"));

    match (kind, value) {
        (ColumnKind::NullableText, Value::Null) => Ok(SqlValue::Null),
        (ColumnKind::Text | ColumnKind::NullableText, Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() && kind == ColumnKind::Text {
                return Err(invalid());
            }
            Ok(SqlValue::String(s.to_string()))
        }
        (ColumnKind::Money, Value::Number(n)) => {
            let amount = n
                .as_f64()
                .and_then(|f| Decimal::try_from(f).ok())
                .ok_or_else(invalid)?;
            if amount < Decimal::ZERO {
                return Err(ApiError::validation(format!("'{key}' must not be negative")));
            }
            Ok(SqlValue::Decimal(amount.round_dp(2)))
        }
        (ColumnKind::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(SqlValue::Date)
            .map_err(|_| invalid()),
        (ColumnKind::Bool, Value::Bool(b)) => Ok(SqlValue::Bool(*b)),
        _ => Err(invalid()),
    }
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::Decimal(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

/// Row offset for a 1-based page; widened so any client page is representable.
pub fn page_offset(page: u32, per_page: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(per_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn page_offset_handles_the_largest_page() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 10), 20);
        assert_eq!(page_offset(u32::MAX, 100), (u64::from(u32::MAX) - 1) * 100);
        assert_eq!(page_offset(0, 10), 0);
    }

    const ALLOWED: &[(&str, ColumnKind)] = &[
        ("name", ColumnKind::Text),
        ("phone", ColumnKind::NullableText),
        ("base_salary", ColumnKind::Money),
        ("join_date", ColumnKind::Date),
        ("is_active", ColumnKind::Bool),
    ];

    #[test]
    fn builds_set_clause_for_allowed_columns() {
        let payload = json!({"name": "Karim", "base_salary": 18000.5, "phone": null});
        let update = build_update_sql("employees", &payload, ALLOWED, "id", 9).unwrap();

        assert!(update.sql.starts_with("UPDATE employees SET "));
        assert!(update.sql.ends_with(" WHERE id = ?"));
        assert!(update.sql.contains("name = ?"));
        assert!(update.sql.contains("base_salary = ?"));
        assert!(update.values.contains(&SqlValue::Decimal(dec!(18000.5))));
        assert!(update.values.contains(&SqlValue::Null));
        assert_eq!(update.values.last(), Some(&SqlValue::U64(9)));
    }

    #[test]
    fn unlisted_column_is_rejected() {
        let payload = json!({"advance_balance": 0});
        let err = build_update_sql("employees", &payload, ALLOWED, "id", 1).unwrap_err();
        assert_eq!(err, ApiError::validation("Field 'advance_balance' cannot be updated"));
    }

    #[test]
    fn type_mismatch_and_negative_money_are_rejected() {
        for payload in [
            json!({"base_salary": "a lot"}),
            json!({"base_salary": -1}),
            json!({"join_date": "01/02/2024"}),
            json!({"is_active": "yes"}),
            json!({"name": "   "}),
            json!({"name": null}),
        ] {
            assert!(build_update_sql("employees", &payload, ALLOWED, "id", 1).is_err(), "{payload}");
        }
    }

    #[test]
    fn empty_or_non_object_payload_is_rejected() {
        assert!(build_update_sql("employees", &json!({}), ALLOWED, "id", 1).is_err());
        assert!(build_update_sql("employees", &json!([1, 2]), ALLOWED, "id", 1).is_err());
    }
}
