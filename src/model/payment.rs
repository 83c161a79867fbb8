use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::impl_sqlx_string_enum;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Cheque,
    Card,
}

impl_sqlx_string_enum!(PaymentMethod);

/// One salary disbursement. A salary has at most one payment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Payment {
    pub id: u64,
    pub salary_id: u64,
    pub employee_id: u64,
    /// Net amount handed over, after advance recovery.
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub paid_date: DateTime<Utc>,
}

pub const PAYMENT_COLUMNS: &str =
    "id, salary_id, employee_id, amount, payment_method, reference, notes, paid_date";
