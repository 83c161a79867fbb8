pub mod dates;
pub mod db_utils;
pub mod idempotency;
pub mod ledger_cache;
pub mod money;
