pub mod earnings;
pub mod ticker;

pub use earnings::{DeliveryBatch, EarningsEvent, UNKNOWN_COMPANY};
pub use ticker::{TickerError, TickerSymbol};
