use crate::clock::Clock;
use crate::core::execution::{Execution, Fill};
use crate::core::order::Order;
use crate::error::{PipelineError, Result};
use crate::venue::profile::{VenueProfile, VenueRegistry};
use crate::venue::selection::select_venue;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Simulated prices and shrunk quantities are rounded to this many places.
pub const SIMULATION_DP: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Venue attempts per order, successful or not.
    pub max_attempts: u32,
    /// Fill prices are drawn uniformly from `price * (1 ± price_variance)`.
    pub price_variance: Decimal,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            price_variance: dec!(0.02),
        }
    }
}

/// Routes an order across the venue registry and aggregates the fills.
///
/// The router persists nothing; callers store the returned execution.
pub struct ExecutionRouter {
    registry: Arc<VenueRegistry>,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl ExecutionRouter {
    pub fn new(registry: Arc<VenueRegistry>, config: RouterConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(registry, config, clock, StdRng::from_entropy())
    }

    /// A router whose venue choices, latencies and fills are reproducible.
    pub fn with_seed(
        registry: Arc<VenueRegistry>,
        config: RouterConfig,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Self {
        Self::with_rng(registry, config, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        registry: Arc<VenueRegistry>,
        config: RouterConfig,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        Self {
            registry,
            config,
            clock,
            rng: Mutex::new(rng),
        }
    }

    pub fn registry(&self) -> &VenueRegistry {
        &self.registry
    }

    // The lock is released before returning, so it is never held across
    // the latency sleep.
    fn draw<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *rng)
    }

    /// Fill `order` across up to `max_attempts` venue attempts.
    pub async fn route(&self, order: &Order) -> Result<Execution> {
        info!(
            "routing order {} {} {} {} @ {}",
            order.id, order.side, order.quantity, order.symbol, order.price
        );

        let mut remaining = order.quantity;
        let mut fills: Vec<Fill> = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            if remaining <= Decimal::ZERO {
                break;
            }
            let venue = self.draw(|rng| select_venue(&self.registry, rng));
            debug!(
                "order {} attempt {}: venue {} remaining {}",
                order.id, attempt, venue.id, remaining
            );

            match self.attempt(venue, order, remaining).await {
                Ok(fill) => {
                    remaining -= fill.quantity;
                    fills.push(fill);
                }
                Err(e) if e.is_recoverable_venue_failure() => {
                    warn!("order {} attempt {} failed: {}", order.id, attempt, e);
                }
                Err(e) => return Err(e),
            }
        }

        if fills.is_empty() {
            error!("order {}: no venue could execute", order.id);
            return Err(PipelineError::NoVenueAvailable { order_id: order.id });
        }

        let execution = Execution::from_fills(order, fills, self.clock.now())?;
        info!(
            "order {} executed as {}: qty {} avg {} across {} fill(s), fees {}, unfilled {}",
            order.id,
            execution.id,
            execution.total_quantity,
            execution.average_price,
            execution.fills.len(),
            execution.total_fees()?,
            remaining.max(Decimal::ZERO)
        );
        Ok(execution)
    }

    async fn attempt(
        &self,
        venue: &VenueProfile,
        order: &Order,
        remaining: Decimal,
    ) -> Result<Fill> {
        let latency_ms = self.draw(|rng| rng.gen_range(venue.min_latency_ms..=venue.max_latency_ms));
        debug!("venue {} latency {}ms", venue.id, latency_ms);
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        let outcome = self.draw(|rng| rng.gen::<f64>());
        if outcome > venue.success_probability {
            return Err(PipelineError::VenueRejected {
                venue: venue.id.clone(),
            });
        }

        let (price_draw, liquidity_draw) = self.draw(|rng| (rng.gen::<f64>(), rng.gen::<f64>()));

        let variance = self.config.price_variance;
        let draw = Decimal::from_f64(price_draw).unwrap_or_default();
        let factor = Decimal::ONE + (draw * dec!(2) * variance - variance);
        let price = order
            .price
            .checked_mul(factor)
            .ok_or(PipelineError::Overflow("fill price"))?
            .round_dp(SIMULATION_DP);

        let mut quantity = remaining;
        if liquidity_draw > venue.liquidity_factor {
            let liquidity = Decimal::from_f64(venue.liquidity_factor).unwrap_or_default();
            quantity = (remaining * liquidity).round_dp(SIMULATION_DP);
            debug!(
                "venue {} thin: quantity {} -> {}",
                venue.id, remaining, quantity
            );
            if quantity.is_zero() {
                return Err(PipelineError::InsufficientLiquidity {
                    venue: venue.id.clone(),
                });
            }
        }

        let fee_amount = price
            .checked_mul(quantity)
            .and_then(|notional| notional.checked_mul(venue.fee_rate))
            .ok_or(PipelineError::Overflow("fill fee"))?;
        let fill = Fill {
            id: Uuid::new_v4(),
            venue_id: venue.id.clone(),
            venue_name: venue.name.clone(),
            price,
            quantity,
            fee_rate: venue.fee_rate,
            fee_amount,
            created_at: self.clock.now(),
        };
        info!(
            "venue {} filled {} @ {} (fee {})",
            venue.id, fill.quantity, fill.price, fill.fee_amount
        );
        Ok(fill)
    }
}
