//! Core data types for ladder trading

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tolerance used when comparing volumes and prices that went through float math
pub const EPSILON: f64 = 1e-9;

/// Client-side order reference, generated before the order reaches the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRef(Uuid);

impl OrderRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Basket direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Order side that opens or extends this basket
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces this basket
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    /// Price displaced `distance` in the adverse direction for this side
    pub fn adverse_price(&self, from: f64, distance: f64) -> f64 {
        from - self.sign() * distance
    }

    /// Price displaced `distance` in the favorable direction for this side
    pub fn favorable_price(&self, from: f64, distance: f64) -> f64 {
        from + self.sign() * distance
    }

    /// True if `candidate` gives more protection than `current` for this side
    pub fn is_tighter_stop(&self, candidate: f64, current: f64) -> bool {
        match self {
            Side::Long => candidate > current + EPSILON,
            Side::Short => candidate < current - EPSILON,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side as seen by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Basket this side opens when it is not reducing anything
    pub fn opens(&self) -> Side {
        match self {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }

    /// Basket this side reduces
    pub fn closes(&self) -> Side {
        self.opens().opposite()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type issued to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Stop { trigger: f64 },
    Limit { price: f64 },
}

impl OrderKind {
    pub fn is_market(&self) -> bool {
        matches!(self, OrderKind::Market)
    }
}

/// What an order is for, used to route its fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPurpose {
    /// Opens or extends a rung
    Entry,
    /// Protective stop published by the stop synchronizer
    Exit,
    /// Market close of a whole basket
    Liquidation,
}

/// Request to place an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_ref: OrderRef,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub volume: f64,
    pub purpose: OrderPurpose,
    /// Ladder level this order belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
}

impl OrderRequest {
    pub fn new(side: OrderSide, kind: OrderKind, volume: f64, purpose: OrderPurpose) -> Self {
        Self {
            order_ref: OrderRef::new(),
            side,
            kind,
            volume,
            purpose,
            level: None,
        }
    }

    /// Tag the order with a ladder level
    pub fn at_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn is_reducing(&self) -> bool {
        matches!(self.purpose, OrderPurpose::Exit | OrderPurpose::Liquidation)
    }
}

/// Command emitted by the controller for the order gateway
#[derive(Debug, Clone, PartialEq)]
pub enum OrderCommand {
    Place(OrderRequest),
    /// Cancel-if-active; repeating it is harmless
    Cancel(OrderRef),
}

impl OrderCommand {
    pub fn as_place(&self) -> Option<&OrderRequest> {
        match self {
            OrderCommand::Place(req) => Some(req),
            OrderCommand::Cancel(_) => None,
        }
    }
}

/// Trade fill reported by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_ref: OrderRef,
    /// Venue trade id, used to drop duplicate deliveries
    pub trade_id: u64,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
}

impl Fill {
    pub fn new(order_ref: OrderRef, trade_id: u64, side: OrderSide, price: f64, volume: f64) -> Self {
        Self {
            order_ref,
            trade_id,
            side,
            price,
            volume,
        }
    }
}

/// Candle from the market-data collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub time: DateTime<Utc>,
    #[serde(default = "default_finished")]
    pub finished: bool,
}

fn default_finished() -> bool {
    true
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Position and account snapshot from the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Signed net volume (positive = long)
    pub net_volume: f64,
    pub average_price: f64,
    pub equity: f64,
    pub balance: f64,
}

/// Instrument metadata; any field may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    #[serde(default)]
    pub price_step: Option<f64>,
    #[serde(default)]
    pub volume_step: Option<f64>,
    #[serde(default)]
    pub min_volume: Option<f64>,
    #[serde(default)]
    pub max_volume: Option<f64>,
}

/// Intent from the signal source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalIntent {
    RequestOpen(Side),
    RequestClose(Side),
    /// Lifts a cooldown or a post-loss trading halt
    TradeAgain,
}

/// Inbound event consumed by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum LadderEvent {
    Tick(f64),
    Candle(Candle),
    Fill(Fill),
    OrderRejected { order_ref: OrderRef, reason: String },
    Position(PositionSnapshot),
    Signal(SignalIntent),
}

/// Controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LadderStatus {
    /// No open rungs, no pending orders
    Idle,
    /// Entry orders sent, waiting for the first fill
    Building,
    /// At least one basket holds volume
    Active,
    /// Close orders sent, waiting for baskets to go flat
    Liquidating,
    /// Blocked until a trade-again signal
    Cooldown,
}

impl LadderStatus {
    /// Whether a new basket may start building
    pub fn accepts_new_basket(&self) -> bool {
        matches!(self, LadderStatus::Idle)
    }

    /// Whether stops and risk thresholds are evaluated on price updates
    pub fn is_managing(&self) -> bool {
        matches!(self, LadderStatus::Building | LadderStatus::Active)
    }
}

/// Stop order last sent for a rung
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PublishedStop {
    pub price: f64,
    pub volume: f64,
}

/// One planned or filled order at one ladder level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rung {
    /// Stage index (1 = first entry)
    pub index: u32,
    pub side: Side,
    pub planned_volume: f64,
    /// Volume currently held by this rung
    pub executed_volume: f64,
    /// Weighted average of this rung's own entry fills
    pub entry_price: f64,
    /// Protective stop distance in price units
    pub stop_offset: f64,
    pub entry_kind: OrderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_order_ref: Option<OrderRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_order_ref: Option<OrderRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_exit: Option<PublishedStop>,
    /// Total volume ever filled by the entry order
    pub entry_filled: f64,
    /// Consecutive gateway rejections of the entry order
    pub rejections: u32,
    pub abandoned: bool,
}

impl Rung {
    pub fn new(index: u32, side: Side, planned_volume: f64, stop_offset: f64, entry_kind: OrderKind) -> Self {
        Self {
            index,
            side,
            planned_volume,
            executed_volume: 0.0,
            entry_price: 0.0,
            stop_offset,
            entry_kind,
            entry_order_ref: None,
            exit_order_ref: None,
            published_exit: None,
            entry_filled: 0.0,
            rejections: 0,
            abandoned: false,
        }
    }

    /// Rung rebuilt from a position snapshot, with no order attached
    pub fn synthetic(side: Side, volume: f64, price: f64, stop_offset: f64) -> Self {
        let mut rung = Self::new(0, side, volume, stop_offset, OrderKind::Market);
        rung.executed_volume = volume;
        rung.entry_price = price;
        rung.entry_filled = volume;
        rung
    }

    pub fn is_open(&self) -> bool {
        self.executed_volume > EPSILON
    }

    pub fn has_working_entry(&self) -> bool {
        self.entry_order_ref.is_some()
    }

    /// Entry volume not yet filled
    pub fn unfilled_volume(&self) -> f64 {
        (self.planned_volume - self.entry_filled).max(0.0)
    }

    /// Needs its entry order (re)sent
    pub fn needs_entry_order(&self) -> bool {
        !self.abandoned && self.entry_order_ref.is_none() && self.unfilled_volume() > EPSILON
    }

    /// Apply an entry fill using the incremental weighted average
    pub fn apply_entry_fill(&mut self, price: f64, volume: f64) {
        let total = self.executed_volume + volume;
        if total > EPSILON {
            self.entry_price = (self.entry_price * self.executed_volume + price * volume) / total;
        }
        self.executed_volume = total;
        self.entry_filled += volume;
        self.rejections = 0;
        if self.unfilled_volume() <= EPSILON {
            self.entry_order_ref = None;
        }
    }

    /// Remove up to `volume`, returning the amount consumed
    pub fn reduce(&mut self, volume: f64) -> f64 {
        let consumed = volume.min(self.executed_volume);
        self.executed_volume -= consumed;
        if self.executed_volume <= EPSILON {
            self.executed_volume = 0.0;
        }
        consumed
    }

    /// Protective stop candidate for this rung
    pub fn stop_candidate(&self) -> f64 {
        self.side.adverse_price(self.entry_price, self.stop_offset)
    }

    /// Floating profit in price units × volume
    pub fn floating_profit(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.executed_volume
    }

    /// Can be dropped from the basket
    pub fn is_spent(&self) -> bool {
        !self.is_open() && self.entry_order_ref.is_none() && self.exit_order_ref.is_none()
    }
}

/// Realized results across baskets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LadderStats {
    pub realized_pnl: f64,
    pub fills_processed: u64,
    pub duplicate_fills: u64,
    pub baskets_closed: u32,
    pub take_profits: u32,
    pub stop_losses: u32,
    pub reconciliations: u32,
    pub abandoned_levels: u32,
}

impl LadderStats {
    pub fn add_realized(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
    }
}
