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
pub enum SalaryStatus {
    Unpaid,
    Paid,
}

impl_sqlx_string_enum!(SalaryStatus);

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Salary {
    pub id: u64,
    pub employee_id: u64,
    pub month: u8,
    pub year: u16,
    pub base_salary: Decimal,
    pub allowances: Decimal,
    pub overtime_hours: Decimal,
    pub overtime_amount: Decimal,
    pub bonus: Decimal,
    pub deductions: Decimal,
    pub gross_salary: Decimal,
    pub advance_deduction: Decimal,
    pub net_salary: Decimal,
    pub status: SalaryStatus,
    pub paid_date: Option<DateTime<Utc>>,
}

impl Salary {
    pub fn is_paid(&self) -> bool {
        self.status == SalaryStatus::Paid
    }
}

pub const SALARY_COLUMNS: &str = "id, employee_id, month, year, base_salary, allowances, \
     overtime_hours, overtime_amount, bonus, deductions, gross_salary, advance_deduction, \
     net_salary, status, paid_date";
