//! Salary/advance settlement arithmetic.
//!
//! Everything here is pure: handlers load rows, call into this module inside
//! a transaction and persist whatever it returns.

use derive_more::Display;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::model::advance::AdvanceType;
use crate::utils::money::{format_bdt, round_money};

#[derive(Debug, Display, Clone, PartialEq)]
pub enum SettlementError {
    #[display(fmt = "Amount must be greater than zero")]
    NonPositiveAmount,

    #[display(fmt = "Adjustment amount must not be zero")]
    ZeroAdjustment,

    #[display(fmt = "Advance deduction must not be negative")]
    NegativeDeduction,

    #[display(
        fmt = "Advance deduction {} exceeds the maximum allowed {}",
        "format_bdt(*requested)",
        "format_bdt(*max)"
    )]
    DeductionAboveMax { requested: Decimal, max: Decimal },

    #[display(
        fmt = "Amount {} exceeds the outstanding advance balance {}",
        "format_bdt(*requested)",
        "format_bdt(*balance)"
    )]
    ExceedsBalance { requested: Decimal, balance: Decimal },

    #[display(fmt = "Gross salary must not be negative")]
    NegativeGross,
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

/// The parts a monthly salary is built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalaryComponents {
    pub base_salary: Decimal,
    pub allowances: Decimal,
    pub overtime_amount: Decimal,
    pub bonus: Decimal,
    pub deductions: Decimal,
}

impl SalaryComponents {
    /// base + allowances + overtime + bonus - deductions
    pub fn gross(&self) -> Decimal {
        round_money(
            self.base_salary + self.allowances + self.overtime_amount + self.bonus
                - self.deductions,
        )
    }

    pub fn checked_gross(&self) -> Result<Decimal, SettlementError> {
        let gross = self.gross();
        if gross < Decimal::ZERO {
            return Err(SettlementError::NegativeGross);
        }
        Ok(gross)
    }
}

/// Advance figures shown next to a salary before it is paid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct AdvanceInfo {
    pub current_balance: Decimal,
    pub max_deduction: Decimal,
    pub suggested_deduction: Decimal,
}

/// Proposes how much of the outstanding advance to recover from a salary.
///
/// The proposal is a configured share of gross pay, never above the
/// maximum deduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeductionPolicy {
    pub percent_of_gross: Decimal,
}

impl Default for DeductionPolicy {
    fn default() -> Self {
        Self {
            percent_of_gross: dec!(100),
        }
    }
}

impl DeductionPolicy {
    pub fn new(percent_of_gross: Decimal) -> Self {
        Self { percent_of_gross }
    }

    pub fn suggest(&self, gross: Decimal, max_deduction: Decimal) -> Decimal {
        clamp_deduction(round_money(gross * self.percent_of_gross / dec!(100)), max_deduction)
    }
}

/// min(balance, gross), floored at zero.
pub fn max_deduction(current_balance: Decimal, gross: Decimal) -> Decimal {
    current_balance.min(gross).max(Decimal::ZERO)
}

pub fn advance_info(current_balance: Decimal, gross: Decimal, policy: &DeductionPolicy) -> AdvanceInfo {
    let max = max_deduction(current_balance, gross);
    AdvanceInfo {
        current_balance,
        max_deduction: max,
        suggested_deduction: policy.suggest(gross, max),
    }
}

/// Forces a requested deduction into `[0, max]`.
pub fn clamp_deduction(requested: Decimal, max: Decimal) -> Decimal {
    requested.max(Decimal::ZERO).min(max.max(Decimal::ZERO))
}

/// Outcome of paying one salary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct SalarySettlement {
    pub gross_salary: Decimal,
    pub advance_deducted: Decimal,
    pub net_paid: Decimal,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
}

/// Settles a salary against the employee's advance balance.
///
/// A missing deduction means zero. The deduction must lie in
/// `[0, min(balance, gross)]`; anything outside is rejected, not clamped.
pub fn settle_salary(
    gross: Decimal,
    previous_balance: Decimal,
    requested_deduction: Option<Decimal>,
) -> Result<SalarySettlement, SettlementError> {
    let deduction = round_money(requested_deduction.unwrap_or(Decimal::ZERO));
    if deduction < Decimal::ZERO {
        return Err(SettlementError::NegativeDeduction);
    }

    let max = max_deduction(previous_balance, gross);
    if deduction > max {
        return Err(SettlementError::DeductionAboveMax {
            requested: deduction,
            max,
        });
    }

    Ok(SalarySettlement {
        gross_salary: gross,
        advance_deducted: deduction,
        net_paid: gross - deduction,
        previous_balance,
        new_balance: previous_balance - deduction,
    })
}

/// A ledger movement requested outside of salary payment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceChange {
    pub kind: AdvanceType,
    /// Stored amount: positive for GIVEN/RECOVERED, signed for ADJUSTMENT.
    pub amount: Decimal,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
}

pub fn give_advance(previous_balance: Decimal, amount: Decimal) -> Result<BalanceChange, SettlementError> {
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(SettlementError::NonPositiveAmount);
    }
    Ok(BalanceChange {
        kind: AdvanceType::Given,
        amount,
        previous_balance,
        new_balance: previous_balance + amount,
    })
}

pub fn recover_advance(previous_balance: Decimal, amount: Decimal) -> Result<BalanceChange, SettlementError> {
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(SettlementError::NonPositiveAmount);
    }
    if amount > previous_balance {
        return Err(SettlementError::ExceedsBalance {
            requested: amount,
            balance: previous_balance,
        });
    }
    Ok(BalanceChange {
        kind: AdvanceType::Recovered,
        amount,
        previous_balance,
        new_balance: previous_balance - amount,
    })
}

/// Signed correction; the balance may not go below zero.
pub fn adjust_advance(previous_balance: Decimal, delta: Decimal) -> Result<BalanceChange, SettlementError> {
    let delta = round_money(delta);
    if delta.is_zero() {
        return Err(SettlementError::ZeroAdjustment);
    }
    let new_balance = previous_balance + delta;
    if new_balance < Decimal::ZERO {
        return Err(SettlementError::ExceedsBalance {
            requested: -delta,
            balance: previous_balance,
        });
    }
    Ok(BalanceChange {
        kind: AdvanceType::Adjustment,
        amount: delta,
        previous_balance,
        new_balance,
    })
}
