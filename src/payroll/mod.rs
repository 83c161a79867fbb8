pub mod generation;
pub mod ledger;
pub mod overview;
pub mod settlement;
