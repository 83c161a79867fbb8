use rust_decimal::{Decimal, RoundingStrategy};

pub const CURRENCY_SYMBOL: &str = "৳";

/// Rounds to paisa (two decimals), half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Formats an amount the way en-BD renders BDT: `৳1,23,456.50`.
///
/// The last three integer digits form one group, every group before that
/// has two digits.
pub fn format_bdt(amount: Decimal) -> String {
    let rounded = round_money(amount);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let grouped = group_south_asian(int_part);
    let sign = if negative { "-" } else { "" };
    format!("{sign}{CURRENCY_SYMBOL}{grouped}.{frac_part}")
}

fn group_south_asian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, tail) = digits.split_at(digits.len() - 3);

    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    format!("{},{}", groups.join(","), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn small_amounts_have_no_grouping() {
        assert_eq!(format_bdt(dec!(0)), "৳0.00");
        assert_eq!(format_bdt(dec!(999.5)), "৳999.50");
    }

    #[test]
    fn groups_thousands_then_lakhs() {
        assert_eq!(format_bdt(dec!(5000)), "৳5,000.00");
        assert_eq!(format_bdt(dec!(20000)), "৳20,000.00");
        assert_eq!(format_bdt(dec!(123456.5)), "৳1,23,456.50");
        assert_eq!(format_bdt(dec!(12345678)), "৳1,23,45,678.00");
    }

    #[test]
    fn negative_amounts_keep_sign_before_symbol() {
        assert_eq!(format_bdt(dec!(-1500)), "-৳1,500.00");
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(-10.005)), dec!(-10.01));
        assert_eq!(format_bdt(dec!(0.004)), "৳0.00");
    }
}
