use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::model::advance::{AdvanceRecord, AdvanceType};

/// Effect of one entry on the outstanding balance.
pub fn signed_amount(kind: AdvanceType, amount: Decimal) -> Decimal {
    match kind {
        AdvanceType::Given => amount,
        AdvanceType::Recovered => -amount,
        AdvanceType::Adjustment => amount,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LedgerMismatch {
    pub record_id: u64,
    pub expected_balance: Decimal,
    pub recorded_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Reconciliation {
    pub employee_id: u64,
    /// Balance obtained by replaying every entry from zero.
    pub ledger_balance: Decimal,
    /// Balance stored on the employee row.
    pub stored_balance: Decimal,
    pub entries: usize,
    pub consistent: bool,
    /// First entry whose `balance_after` disagrees with the replay.
    pub first_mismatch: Option<LedgerMismatch>,
}

/// Replays entries (oldest first) and checks every running snapshot.
pub fn reconcile(employee_id: u64, stored_balance: Decimal, records: &[AdvanceRecord]) -> Reconciliation {
    let mut running = Decimal::ZERO;
    let mut first_mismatch = None;

    for record in records {
        running += signed_amount(record.kind, record.amount);
        if first_mismatch.is_none() && record.balance_after != running {
            first_mismatch = Some(LedgerMismatch {
                record_id: record.id,
                expected_balance: running,
                recorded_balance: record.balance_after,
            });
        }
    }

    Reconciliation {
        employee_id,
        ledger_balance: running,
        stored_balance,
        entries: records.len(),
        consistent: first_mismatch.is_none() && running == stored_balance,
        first_mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn entry(id: u64, kind: AdvanceType, amount: Decimal, balance_after: Decimal) -> AdvanceRecord {
        AdvanceRecord {
            id,
            employee_id: 1,
            kind,
            amount,
            balance_after,
            salary_id: None,
            payment_method: None,
            reference: None,
            description: None,
            created_by: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn consistent_ledger_matches_stored_balance() {
        let records = vec![
            entry(1, AdvanceType::Given, dec!(2000), dec!(2000)),
            entry(2, AdvanceType::Given, dec!(3000), dec!(5000)),
            entry(3, AdvanceType::Recovered, dec!(5000), dec!(0)),
            entry(4, AdvanceType::Adjustment, dec!(150), dec!(150)),
        ];
        let r = reconcile(1, dec!(150), &records);
        assert!(r.consistent);
        assert_eq!(r.ledger_balance, dec!(150));
        assert_eq!(r.entries, 4);
        assert_eq!(r.first_mismatch, None);
    }

    #[test]
    fn wrong_snapshot_is_reported_once() {
        let records = vec![
            entry(1, AdvanceType::Given, dec!(2000), dec!(2000)),
            entry(2, AdvanceType::Recovered, dec!(500), dec!(1600)),
            entry(3, AdvanceType::Recovered, dec!(500), dec!(1000)),
        ];
        let r = reconcile(1, dec!(1000), &records);
        assert!(!r.consistent);
        let mismatch = r.first_mismatch.unwrap();
        assert_eq!(mismatch.record_id, 2);
        assert_eq!(mismatch.expected_balance, dec!(1500));
        assert_eq!(mismatch.recorded_balance, dec!(1600));
    }

    #[test]
    fn drifted_employee_balance_is_inconsistent() {
        let records = vec![entry(1, AdvanceType::Given, dec!(2000), dec!(2000))];
        let r = reconcile(1, dec!(2500), &records);
        assert!(r.first_mismatch.is_none());
        assert!(!r.consistent);
    }

    #[test]
    fn negative_adjustment_lowers_balance() {
        assert_eq!(signed_amount(AdvanceType::Adjustment, dec!(-300)), dec!(-300));
        assert_eq!(signed_amount(AdvanceType::Recovered, dec!(300)), dec!(-300));
    }
}
