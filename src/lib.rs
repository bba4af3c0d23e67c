//! # clearing-pipeline
//!
//! Post-trade pipeline: multi-venue execution, netting and margin, clearing
//! validation and delayed settlement.
//!
//! An order is routed across simulated venues into an execution, netted
//! against every same-symbol execution of the trailing day, margined,
//! validated against position, margin, volume, market-hours and risk-score
//! limits, and, once cleared, settled T+2 by a periodic background loop.
//!
//! ## Architecture
//!
//! - **core**: Domain records: orders, executions and fills, nettings and
//!   clearings, settlements
//! - **venue**: Venue catalog, weighted venue selection, execution router
//! - **clearing**: Netting engine, margin model, clearing gates
//! - **settlement**: Settlement creation and the settlement state machine
//! - **trading**: Idempotent order intake and execution
//! - **store**: Persistence contract and the in-memory store
//! - **pipeline**: End-to-end wiring
//!
//! ## Example
//!
//! ```no_run
//! use clearing_pipeline::prelude::*;
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! # async fn run() -> clearing_pipeline::error::Result<()> {
//! let pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//! )?;
//! let request = OrderRequest::new("CLIENT-1", "AAPL", Side::Buy, OrderKind::Market, dec!(10), dec!(100));
//! let outcome = pipeline.process(request, "order-0001").await?;
//! println!("settles on {}", outcome.settlement.settlement_date);
//! # Ok(())
//! # }
//! ```

pub mod clearing;
pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod settlement;
pub mod store;
pub mod trading;
pub mod venue;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::clearing::{ClearingService, MarginModel, NettingEngine};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::PipelineConfig;
    pub use crate::core::clearing::{Clearing, ClearingStatus, TradeNetting};
    pub use crate::core::execution::{Execution, Fill};
    pub use crate::core::ids::{ClientId, Symbol, VenueId};
    pub use crate::core::order::{Order, OrderKind, OrderRequest, OrderStatus, Side};
    pub use crate::core::settlement::{Settlement, SettlementStatus};
    pub use crate::error::{PipelineError, ValidationFailure};
    pub use crate::pipeline::{Pipeline, TradeOutcome};
    pub use crate::settlement::{SettlementProcessor, SettlementVerifier, TickReport};
    pub use crate::store::{MemoryStore, Store};
    pub use crate::venue::{ExecutionRouter, VenueProfile, VenueRegistry};
}
