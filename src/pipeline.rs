//! End-to-end wiring of the post-trade stages.

use crate::clearing::netting::NettingEngine;
use crate::clearing::service::ClearingService;
use crate::clearing::validator::ClearingValidator;
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::core::clearing::Clearing;
use crate::core::execution::Execution;
use crate::core::order::{Order, OrderRequest};
use crate::core::settlement::Settlement;
use crate::error::Result;
use crate::settlement::processor::{RandomVerifier, SettlementProcessor, SettlementVerifier};
use crate::settlement::service::SettlementService;
use crate::store::Store;
use crate::trading::service::TradingService;
use crate::venue::router::ExecutionRouter;
use log::info;
use serde::Serialize;
use std::sync::Arc;

/// Every record one order produced on its way through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    pub order: Order,
    pub execution: Execution,
    pub clearing: Clearing,
    pub settlement: Settlement,
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    trading: TradingService,
    clearing: ClearingService,
    settlement: SettlementService,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let router = ExecutionRouter::new(
            Arc::new(config.venue_registry()?),
            config.router.clone(),
            clock.clone(),
        );
        Self::assemble(config, store, clock, router)
    }

    /// A pipeline whose routing is reproducible for a given seed.
    pub fn with_seed(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        let router = ExecutionRouter::with_seed(
            Arc::new(config.venue_registry()?),
            config.router.clone(),
            clock.clone(),
            seed,
        );
        Self::assemble(config, store, clock, router)
    }

    fn assemble(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        router: ExecutionRouter,
    ) -> Result<Self> {
        let trading = TradingService::new(
            store.clone(),
            clock.clone(),
            Arc::new(router),
            config.idempotency_ttl()?,
        );
        let clearing = ClearingService::new(
            store.clone(),
            clock.clone(),
            NettingEngine::new(config.netting.clone()),
            ClearingValidator::new(config.limits.clone(), config.market_hours),
        )
        .with_client_serialization(config.serialize_client_clearings);
        let settlement = SettlementService::new(
            store.clone(),
            clock.clone(),
            config.settlement.clone(),
            config.market_hours,
        );

        Ok(Self {
            config,
            store,
            clock,
            trading,
            clearing,
            settlement,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn trading(&self) -> &TradingService {
        &self.trading
    }

    pub fn clearing(&self) -> &ClearingService {
        &self.clearing
    }

    pub fn settlement(&self) -> &SettlementService {
        &self.settlement
    }

    /// Order, execution, clearing and settlement for one request.
    ///
    /// Replaying an idempotency key returns the records the first call
    /// produced. The execution is keyed by `<key>:exec`.
    pub async fn process(&self, request: OrderRequest, idempotency_key: &str) -> Result<TradeOutcome> {
        let order = self.trading.create_order(request, idempotency_key)?;
        let routed = self
            .trading
            .route_order(order.id, &format!("{}:exec", idempotency_key))
            .await?;

        // Routing happens outside the client lock; persisting the execution
        // and clearing it happen inside.
        let (execution, clearing) = self
            .clearing
            .commit_and_clear(&order.client_id, || self.trading.commit_execution(routed))?;
        let settlement = self.settlement.settle_trade(execution.id)?;
        info!(
            "order {} processed: execution {} clearing {} settlement {} due {}",
            order.id, execution.id, clearing.id, settlement.id, settlement.settlement_date
        );

        // Re-read so a replay reports the current order status.
        let order = self.trading.get_order(order.id)?;
        Ok(TradeOutcome {
            order,
            execution,
            clearing,
            settlement,
        })
    }

    /// A settlement loop over this pipeline's store and clock.
    pub fn settlement_processor(&self, verifier: Arc<dyn SettlementVerifier>) -> SettlementProcessor {
        let settlement = &self.config.settlement;
        SettlementProcessor::new(
            self.store.clone(),
            self.clock.clone(),
            verifier,
            std::time::Duration::from_secs(settlement.interval_secs),
            settlement.retry.clone(),
        )
    }

    /// A settlement loop verifying with the configured success probability.
    pub fn random_settlement_processor(&self, seed: Option<u64>) -> SettlementProcessor {
        let probability = self.config.settlement.verification_probability;
        let verifier = match seed {
            Some(seed) => RandomVerifier::with_seed(probability, seed),
            None => RandomVerifier::new(probability),
        };
        self.settlement_processor(Arc::new(verifier))
    }
}
