use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::impl_sqlx_string_enum;
use super::payment::PaymentMethod;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvanceType {
    /// Money handed to the employee; raises the balance.
    Given,
    /// Money taken back, from salary or in cash; lowers the balance.
    Recovered,
    /// Signed correction.
    Adjustment,
}

impl_sqlx_string_enum!(AdvanceType);

/// Immutable advance ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AdvanceRecord {
    pub id: u64,
    pub employee_id: u64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: AdvanceType,
    /// Positive for GIVEN and RECOVERED, signed for ADJUSTMENT.
    pub amount: Decimal,
    /// Running balance right after this entry.
    pub balance_after: Decimal,
    pub salary_id: Option<u64>,
    pub payment_method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
}

pub const ADVANCE_COLUMNS: &str = "id, employee_id, type, amount, balance_after, salary_id, \
     payment_method, reference, description, created_by, created_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_is_serialized_under_type_key() {
        let record = AdvanceRecord {
            id: 1,
            employee_id: 7,
            kind: AdvanceType::Given,
            amount: Decimal::new(2000, 0),
            balance_after: Decimal::new(2000, 0),
            salary_id: None,
            payment_method: Some(PaymentMethod::Cash),
            reference: None,
            description: None,
            created_by: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "GIVEN");
        assert_eq!(json["amount"], 2000.0);
        assert_eq!(json["payment_method"], "CASH");
    }
}
