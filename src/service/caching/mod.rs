pub mod dedup;

pub use dedup::{DedupError, DedupStore};
