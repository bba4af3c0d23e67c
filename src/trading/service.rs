use crate::clock::Clock;
use crate::core::execution::Execution;
use crate::core::ids::ClientId;
use crate::core::order::{Order, OrderRequest, OrderStatus};
use crate::error::{PipelineError, Result};
use crate::store::{IdempotencyRecord, ResourceKind, Store};
use crate::venue::router::ExecutionRouter;
use chrono::Duration;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

/// An execution between routing and persistence.
#[derive(Debug)]
pub enum RoutedExecution {
    /// The idempotency key already produced this stored execution.
    Replayed(Execution),
    Routed {
        order: Order,
        execution: Execution,
        key: String,
    },
}

impl RoutedExecution {
    pub fn execution(&self) -> &Execution {
        match self {
            Self::Replayed(execution) | Self::Routed { execution, .. } => execution,
        }
    }
}

/// Order intake and execution, both keyed by caller-supplied idempotency keys.
///
/// Replaying a key inside its validity window returns the resource the key
/// first created instead of creating another one.
pub struct TradingService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    router: Arc<ExecutionRouter>,
    idempotency_ttl: Duration,
}

impl TradingService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        router: Arc<ExecutionRouter>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            router,
            idempotency_ttl,
        }
    }

    pub fn router(&self) -> &ExecutionRouter {
        &self.router
    }

    fn live_record(&self, kind: ResourceKind, key: &str) -> Result<Option<IdempotencyRecord>> {
        if key.trim().is_empty() {
            return Err(PipelineError::InvalidOrder("idempotency key is required".into()));
        }
        let now = self.clock.now();
        Ok(self
            .store
            .get_idempotency_record(kind, key)?
            .filter(|record| record.is_live(now)))
    }

    fn record(&self, kind: ResourceKind, key: &str, resource_id: Uuid) -> Result<IdempotencyRecord> {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.idempotency_ttl)
            .ok_or(PipelineError::Overflow("idempotency expiry"))?;
        Ok(IdempotencyRecord {
            key: key.to_string(),
            resource_id,
            resource_kind: kind,
            expires_at,
        })
    }

    pub fn create_order(&self, request: OrderRequest, idempotency_key: &str) -> Result<Order> {
        if let Some(record) = self.live_record(ResourceKind::Order, idempotency_key)? {
            debug!(
                "idempotency key {} replayed, returning order {}",
                idempotency_key, record.resource_id
            );
            return self.get_order(record.resource_id);
        }

        let order = Order::from_request(request, self.clock.now())?;
        let record = self.record(ResourceKind::Order, idempotency_key, order.id)?;
        self.store.create_order_with_idempotency(&order, &record)?;
        info!(
            "order {} created for client {}: {} {} {} @ {}",
            order.id, order.client_id, order.side, order.quantity, order.symbol, order.price
        );
        Ok(order)
    }

    /// Route a PENDING order and persist its execution; the order becomes
    /// FILLED.
    pub async fn execute_order(&self, order_id: Uuid, idempotency_key: &str) -> Result<Execution> {
        let routed = self.route_order(order_id, idempotency_key).await?;
        self.commit_execution(routed)
    }

    /// The routing half of [`execute_order`](Self::execute_order). Nothing is
    /// persisted until the result is passed to
    /// [`commit_execution`](Self::commit_execution).
    pub async fn route_order(&self, order_id: Uuid, idempotency_key: &str) -> Result<RoutedExecution> {
        if let Some(record) = self.live_record(ResourceKind::Execution, idempotency_key)? {
            debug!(
                "idempotency key {} replayed, returning execution {}",
                idempotency_key, record.resource_id
            );
            let execution = self
                .store
                .get_execution(record.resource_id)?
                .ok_or_else(|| PipelineError::not_found("execution", record.resource_id))?;
            return Ok(RoutedExecution::Replayed(execution));
        }

        let order = self.get_order(order_id)?;
        if order.status != OrderStatus::Pending {
            return Err(PipelineError::InvalidOrder(format!(
                "order {} is {:?}, only PENDING orders can be executed",
                order.id, order.status
            )));
        }

        let execution = self.router.route(&order).await?;
        Ok(RoutedExecution::Routed {
            order,
            execution,
            key: idempotency_key.to_string(),
        })
    }

    /// Persist a routed execution with its idempotency record and mark the
    /// order FILLED. A replayed execution is returned as stored.
    pub fn commit_execution(&self, routed: RoutedExecution) -> Result<Execution> {
        let (mut order, execution, key) = match routed {
            RoutedExecution::Replayed(execution) => return Ok(execution),
            RoutedExecution::Routed {
                order,
                execution,
                key,
            } => (order, execution, key),
        };

        let record = self.record(ResourceKind::Execution, &key, execution.id)?;
        self.store
            .create_execution_with_idempotency(&execution, &record)?;

        order.mark_filled(self.clock.now());
        self.store.update_order(&order)?;
        info!("order {} FILLED by execution {}", order.id, execution.id);
        Ok(execution)
    }

    pub fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| PipelineError::not_found("order", order_id))
    }

    /// Like [`get_order`](Self::get_order), but another client's order is
    /// reported as not found.
    pub fn get_order_for_client(&self, order_id: Uuid, client: &ClientId) -> Result<Order> {
        let order = self.get_order(order_id)?;
        if &order.client_id != client {
            return Err(PipelineError::not_found("order", order_id));
        }
        Ok(order)
    }
}
