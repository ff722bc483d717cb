pub mod discount;
pub mod filters;
