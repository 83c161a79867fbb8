use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "employee_code": "EMP-001",
        "name": "Rahim Uddin",
        "email": "rahim@company.com",
        "phone": "+8801712345678",
        "designation": "Machine Operator",
        "join_date": "2024-01-01",
        "base_salary": 15000.0,
        "house_rent_allowance": 3000.0,
        "medical_allowance": 750.0,
        "transport_allowance": 500.0,
        "food_allowance": 750.0,
        "other_allowance": 0.0,
        "advance_balance": 5000.0,
        "is_active": true
    })
)]
pub struct Employee {
    pub id: u64,
    pub employee_code: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub designation: Option<String>,

    #[schema(value_type = String, format = "date")]
    pub join_date: NaiveDate,

    pub base_salary: Decimal,
    pub house_rent_allowance: Decimal,
    pub medical_allowance: Decimal,
    pub transport_allowance: Decimal,
    pub food_allowance: Decimal,
    pub other_allowance: Decimal,

    /// Outstanding advance; only ever changed together with a ledger entry.
    pub advance_balance: Decimal,
    pub is_active: bool,
}

impl Employee {
    pub fn total_allowances(&self) -> Decimal {
        self.house_rent_allowance
            + self.medical_allowance
            + self.transport_allowance
            + self.food_allowance
            + self.other_allowance
    }
}

/// Columns selected whenever a full `Employee` row is loaded.
pub const EMPLOYEE_COLUMNS: &str = "id, employee_code, name, email, phone, designation, join_date, \
     base_salary, house_rent_allowance, medical_allowance, transport_allowance, food_allowance, \
     other_allowance, advance_balance, is_active";

#[cfg(test)]
pub(crate) fn sample_employee(id: u64, advance_balance: Decimal) -> Employee {
    use rust_decimal_macros::dec;

    Employee {
        id,
        employee_code: format!("EMP-{id:03}"),
        name: format!("Employee {id}"),
        email: format!("emp{id}@company.com"),
        phone: None,
        designation: None,
        join_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
        base_salary: dec!(15000),
        house_rent_allowance: dec!(3000),
        medical_allowance: dec!(750),
        transport_allowance: dec!(500),
        food_allowance: dec!(750),
        other_allowance: dec!(0),
        advance_balance,
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn allowances_sum_all_five_fields() {
        let mut emp = sample_employee(1, dec!(0));
        emp.other_allowance = dec!(250);
        assert_eq!(emp.total_allowances(), dec!(5250));
    }
}
