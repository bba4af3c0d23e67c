use crate::core::ids::{ClientId, Symbol};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for BUY, -1 for SELL. Used to sign quantities and amounts.
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.pad("BUY"),
            Side::Sell => f.pad("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

/// Largest `quantity * price` an order may carry. Leaves enough headroom
/// under `Decimal::MAX` for fees, price variance and daily sums.
pub const MAX_ORDER_NOTIONAL: Decimal = dec!(100000000000000000000);

/// A client's order submission, before it is assigned an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_id: ClientId,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    /// Limit price, or the reference price for MARKET orders.
    pub price: Decimal,
}

impl OrderRequest {
    pub fn new(
        client_id: impl Into<ClientId>,
        symbol: impl Into<Symbol>,
        side: Side,
        kind: OrderKind,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            symbol: symbol.into(),
            side,
            kind,
            quantity,
            price,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(PipelineError::InvalidOrder("client id is required".into()));
        }
        if self.symbol.is_empty() {
            return Err(PipelineError::InvalidOrder("symbol is required".into()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(PipelineError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.price <= Decimal::ZERO {
            return Err(PipelineError::InvalidOrder(format!(
                "price must be positive, got {}",
                self.price
            )));
        }
        match self.quantity.checked_mul(self.price) {
            Some(notional) if notional <= MAX_ORDER_NOTIONAL => Ok(()),
            _ => Err(PipelineError::InvalidOrder(format!(
                "notional of {} x {} exceeds {}",
                self.quantity, self.price, MAX_ORDER_NOTIONAL
            ))),
        }
    }
}

/// A persisted order. Symbol, side and quantity never change after creation;
/// only the status moves from PENDING to FILLED (or CANCELLED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_id: ClientId,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a PENDING order from a validated request.
    pub fn from_request(request: OrderRequest, now: DateTime<Utc>) -> Result<Self> {
        request.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            client_id: request.client_id,
            symbol: request.symbol,
            side: request.side,
            kind: request.kind,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn mark_filled(&mut self, now: DateTime<Utc>) {
        self.status = OrderStatus::Filled;
        self.updated_at = now;
    }
}
