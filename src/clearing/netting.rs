use crate::clearing::margin::MarginModel;
use crate::config::span;
use crate::core::clearing::{NettingStatus, TradeNetting};
use crate::core::execution::Execution;
use crate::core::ids::Symbol;
use crate::core::order::{Order, Side};
use crate::error::{PipelineError, Result};
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NettingConfig {
    /// Length of the trailing netting window.
    pub window_hours: i64,
    pub margin: MarginModel,
}

impl Default for NettingConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            margin: MarginModel::default(),
        }
    }
}

impl NettingConfig {
    pub fn window(&self) -> Result<Duration> {
        span(
            "netting.window_hours",
            self.window_hours,
            Duration::try_hours(self.window_hours),
        )
    }
}

/// Multilateral same-symbol netting with margin assessment.
///
/// Holds no position state of its own: every call re-reads the window from
/// the store.
#[derive(Debug, Clone, Default)]
pub struct NettingEngine {
    config: NettingConfig,
}

impl NettingEngine {
    pub fn new(config: NettingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NettingConfig {
        &self.config
    }

    /// Net every completed `order.symbol` execution in the trailing window
    /// ending at `now`, then apply the margin model.
    ///
    /// The triggering execution is expected to be persisted already; if the
    /// store does not return it, it is added so the netting always covers it.
    pub fn net_and_margin(
        &self,
        store: &dyn Store,
        trigger: &Execution,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<TradeNetting> {
        let window_start = now
            .checked_sub_signed(self.config.window()?)
            .ok_or(PipelineError::Overflow("netting window start"))?;
        let mut executions = store.executions_for_symbol_since(&order.symbol, window_start)?;
        debug!(
            "netting {}: {} execution(s) since {}",
            order.symbol,
            executions.len(),
            window_start
        );

        if !executions.iter().any(|e| e.id == trigger.id) {
            warn!(
                "triggering execution {} not in the {} window, adding it",
                trigger.id, order.symbol
            );
            executions.push(trigger.clone());
        }

        let order_ids: Vec<Uuid> = executions.iter().map(|e| e.order_id).collect();
        let orders = store.orders_by_ids(&order_ids)?;

        self.net_executions(&order.symbol, &executions, &orders, window_start, now)
    }

    /// Net `executions` whose parent orders are given in `orders`.
    ///
    /// Any execution without a parent order aborts the whole netting with
    /// [`PipelineError::ReferentialIntegrity`]; no partial result is returned.
    pub fn net_executions(
        &self,
        symbol: &Symbol,
        executions: &[Execution],
        orders: &HashMap<Uuid, Order>,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TradeNetting> {
        let mut netting = TradeNetting::new(symbol.clone(), window_start, now);

        for execution in executions {
            let parent = orders.get(&execution.order_id).ok_or_else(|| {
                error!(
                    "execution {} references missing order {}",
                    execution.id, execution.order_id
                );
                PipelineError::ReferentialIntegrity {
                    execution_id: execution.id,
                    order_id: execution.order_id,
                }
            })?;

            let amount = execution.notional()?;
            let (quantity, amount) = match parent.side {
                Side::Buy => (
                    netting.net_quantity.checked_add(execution.total_quantity),
                    netting.net_amount.checked_add(amount),
                ),
                Side::Sell => (
                    netting.net_quantity.checked_sub(execution.total_quantity),
                    netting.net_amount.checked_sub(amount),
                ),
            };
            netting.net_quantity = quantity.ok_or(PipelineError::Overflow("net quantity"))?;
            netting.net_amount = amount.ok_or(PipelineError::Overflow("net amount"))?;
            netting.original_trades.push(execution.id);
        }

        netting.net_settlement = netting.net_amount.abs();
        netting.net_margin = self
            .config
            .margin
            .margin_for(netting.net_settlement, netting.net_quantity)?;
        netting.status = NettingStatus::Completed;

        info!(
            "netted {} trade(s) on {}: qty {} amount {} settlement {} margin {}",
            netting.trade_count(),
            symbol,
            netting.net_quantity,
            netting.net_amount,
            netting.net_settlement,
            netting.net_margin
        );
        Ok(netting)
    }
}
