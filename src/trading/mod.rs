//! Order intake and execution.

pub mod service;

pub use service::{RoutedExecution, TradingService};
