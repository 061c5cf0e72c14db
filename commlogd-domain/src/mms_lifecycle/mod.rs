// MMS transaction lifecycle: state machine, in-flight bookkeeping and
// durable part storage.

pub mod errors;
pub mod parts;
pub mod service;
pub mod transactions;

pub use errors::MmsError;
pub use parts::{PartCopyError, PartStorage};
pub use service::{wants_read_report, MmsLifecycle};
pub use transactions::TransactionTable;
