pub mod cycle;

pub use cycle::{ArbitrageBot, RunSummary};
