pub mod earnings;
pub mod mention;
