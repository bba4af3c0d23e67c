//! Netting, margin and the clearing decision.
//!
//! A trade is cleared by netting every same-symbol execution in the trailing
//! window, pricing margin on the net exposure, and running the clearing gates
//! against the client's daily aggregates.

pub mod margin;
pub mod netting;
pub mod service;
pub mod validator;

pub use margin::MarginModel;
pub use netting::{NettingConfig, NettingEngine};
pub use service::ClearingService;
pub use validator::{ClearingValidator, ClearingView, MarketHours, RiskLimits, RiskScoreModel};
