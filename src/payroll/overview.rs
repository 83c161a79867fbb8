use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::utils::money::round_money;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct OverviewSummary {
    pub total_outstanding: Decimal,
    pub employees_with_balance: u64,
    /// Mean balance over employees that owe something.
    pub average_advance: Decimal,
}

pub fn summarize<I>(balances: I) -> OverviewSummary
where
    I: IntoIterator<Item = Decimal>,
{
    let (total, count) = balances
        .into_iter()
        .filter(|b| !b.is_zero())
        .fold((Decimal::ZERO, 0u64), |(sum, n), b| (sum + b, n + 1));

    let average_advance = if count == 0 {
        Decimal::ZERO
    } else {
        round_money(total / Decimal::from(count))
    };

    OverviewSummary {
        total_outstanding: total,
        employees_with_balance: count,
        average_advance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_balances_do_not_count() {
        let s = summarize([dec!(5000), dec!(0), dec!(2500), dec!(0)]);
        assert_eq!(s.total_outstanding, dec!(7500));
        assert_eq!(s.employees_with_balance, 2);
        assert_eq!(s.average_advance, dec!(3750));
    }

    #[test]
    fn empty_overview_averages_to_zero() {
        let s = summarize(Vec::<Decimal>::new());
        assert_eq!(s.total_outstanding, dec!(0));
        assert_eq!(s.employees_with_balance, 0);
        assert_eq!(s.average_advance, dec!(0));
    }

    #[test]
    fn average_is_rounded_to_paisa() {
        let s = summarize([dec!(100), dec!(100), dec!(101)]);
        assert_eq!(s.average_advance, dec!(100.33));
    }
}
