pub mod automation;
pub mod caching;
pub mod command;
pub mod finance;
pub mod universe;
