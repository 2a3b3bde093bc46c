pub mod ledger;
pub mod period;

pub use ledger::{QuotaLedger, QuotaSnapshot, ReservationHandle};
