pub mod dedup;
pub mod message;
pub mod state;
pub mod store;
