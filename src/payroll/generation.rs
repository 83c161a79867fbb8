use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::model::employee::Employee;
use crate::payroll::settlement::SalaryComponents;

/// An UNPAID salary row about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSalary {
    pub employee_id: u64,
    pub month: u8,
    pub year: u16,
    pub base_salary: Decimal,
    pub allowances: Decimal,
    pub gross_salary: Decimal,
}

impl NewSalary {
    pub fn from_employee(employee: &Employee, month: u8, year: u16) -> Self {
        let components = SalaryComponents {
            base_salary: employee.base_salary,
            allowances: employee.total_allowances(),
            overtime_amount: Decimal::ZERO,
            bonus: Decimal::ZERO,
            deductions: Decimal::ZERO,
        };
        Self {
            employee_id: employee.id,
            month,
            year,
            base_salary: components.base_salary,
            allowances: components.allowances,
            gross_salary: components.gross(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
pub struct GenerationSummary {
    pub created: u64,
    pub skipped: u64,
    pub total_active: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPlan {
    pub to_create: Vec<NewSalary>,
    pub skipped: u64,
}

/// Decides which active employees still need a salary for the period.
///
/// Employees listed in `already_generated` are skipped, so running the plan
/// again for the same period creates nothing.
pub fn plan_monthly_salaries(
    employees: &[Employee],
    already_generated: &HashSet<u64>,
    month: u8,
    year: u16,
) -> GenerationPlan {
    let mut to_create = Vec::new();
    let mut skipped = 0;

    for employee in employees.iter().filter(|e| e.is_active) {
        if already_generated.contains(&employee.id) {
            skipped += 1;
        } else {
            to_create.push(NewSalary::from_employee(employee, month, year));
        }
    }

    GenerationPlan { to_create, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::employee::sample_employee;
    use rust_decimal_macros::dec;

    #[test]
    fn new_salary_uses_base_plus_allowances() {
        let employee = sample_employee(3, dec!(0));
        let salary = NewSalary::from_employee(&employee, 4, 2026);
        assert_eq!(salary.base_salary, dec!(15000));
        assert_eq!(salary.allowances, dec!(5000));
        assert_eq!(salary.gross_salary, dec!(20000));
        assert_eq!((salary.month, salary.year), (4, 2026));
    }

    #[test]
    fn inactive_employees_are_ignored() {
        let mut inactive = sample_employee(2, dec!(0));
        inactive.is_active = false;
        let employees = vec![sample_employee(1, dec!(0)), inactive];

        let plan = plan_monthly_salaries(&employees, &HashSet::new(), 1, 2026);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].employee_id, 1);
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn second_run_for_same_period_creates_nothing() {
        let employees: Vec<_> = (1..=3).map(|id| sample_employee(id, dec!(0))).collect();

        let first = plan_monthly_salaries(&employees, &HashSet::new(), 5, 2026);
        assert_eq!(first.to_create.len(), 3);

        let generated: HashSet<u64> = first.to_create.iter().map(|s| s.employee_id).collect();
        let second = plan_monthly_salaries(&employees, &generated, 5, 2026);
        assert!(second.to_create.is_empty());
        assert_eq!(second.skipped, 3);
    }
}
