//! Settlement creation and the periodic settlement state machine.

pub mod processor;
pub mod service;

pub use processor::{
    RandomVerifier, RetryPolicy, SettlementProcessor, SettlementProcessorHandle,
    SettlementVerifier, TickReport,
};
pub use service::{SettlementConfig, SettlementService};
