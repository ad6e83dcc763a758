//! Paper trading gateway
//!
//! Simulates order execution against the market data the runner observes.
//! Market orders fill at the last price; stop and limit orders rest until a
//! tick or candle range crosses them.

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};

use crate::ladder::{
    Fill, InstrumentMeta, LadderError, LadderEvent, LadderResult, OrderGateway, OrderKind, OrderRef, OrderRequest,
    OrderSide, PositionSnapshot, EPSILON,
};

fn default_initial_balance() -> f64 {
    10_000.0
}

/// Paper account settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaperSettings {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    /// Fee charged on notional (e.g. 0.0001 = 0.01%)
    #[serde(default)]
    pub fee_rate: f64,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            fee_rate: 0.0,
        }
    }
}

/// Netting position of the paper account
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaperPosition {
    /// Position size (positive = long, negative = short)
    pub size: f64,
    /// Average entry price
    pub entry_price: f64,
}

impl PaperPosition {
    /// Apply a fill, returning the realized P&L it produced
    fn apply_fill(&mut self, side: OrderSide, qty: f64, price: f64) -> f64 {
        let signed_qty = match side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };

        if self.size.abs() <= EPSILON || self.size.signum() == signed_qty.signum() {
            let total = self.size.abs() + qty;
            self.entry_price = (self.entry_price * self.size.abs() + price * qty) / total;
            self.size += signed_qty;
            return 0.0;
        }

        let close_qty = qty.min(self.size.abs());
        let pnl = self.size.signum() * (price - self.entry_price) * close_qty;
        self.size += signed_qty;

        if self.size.abs() <= EPSILON {
            *self = Self::default();
        } else if self.size.signum() == signed_qty.signum() {
            // flipped: the remainder opened at the fill price
            self.entry_price = price;
        }
        pnl
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.size * (price - self.entry_price)
    }
}

/// Price range of one observation
#[derive(Debug, Clone, Copy)]
struct Bar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl Bar {
    fn from_event(event: &LadderEvent) -> Option<Self> {
        match event {
            LadderEvent::Tick(price) => Some(Self {
                open: *price,
                high: *price,
                low: *price,
                close: *price,
            }),
            LadderEvent::Candle(c) => Some(Self {
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
            }),
            _ => None,
        }
    }
}

/// Fill price of a resting order within `bar`, if it is crossed
fn trigger_price(request: &OrderRequest, bar: &Bar) -> Option<f64> {
    match (request.kind, request.side) {
        (OrderKind::Market, _) => Some(bar.open),
        (OrderKind::Stop { trigger }, OrderSide::Buy) => (bar.high >= trigger).then(|| trigger.max(bar.open)),
        (OrderKind::Stop { trigger }, OrderSide::Sell) => (bar.low <= trigger).then(|| trigger.min(bar.open)),
        (OrderKind::Limit { price }, OrderSide::Buy) => (bar.low <= price).then(|| price.min(bar.open)),
        (OrderKind::Limit { price }, OrderSide::Sell) => (bar.high >= price).then(|| price.max(bar.open)),
    }
}

#[derive(Debug)]
struct PaperBook {
    mark: Option<f64>,
    resting: Vec<OrderRequest>,
    position: PaperPosition,
    balance: f64,
    total_fees: f64,
    next_trade_id: u64,
}

impl PaperBook {
    fn execute(&mut self, request: &OrderRequest, price: f64, fee_rate: f64) -> Fill {
        let fee = request.volume * price * fee_rate;
        let pnl = self.position.apply_fill(request.side, request.volume, price);
        self.balance += pnl - fee;
        self.total_fees += fee;
        self.next_trade_id += 1;

        info!(
            "Paper fill: {} {} at {} (order {}, pnl {:.4}, fee {:.4})",
            request.side.as_str(),
            request.volume,
            price,
            request.order_ref,
            pnl,
            fee
        );
        Fill::new(request.order_ref, self.next_trade_id, request.side, price, request.volume)
    }

    fn equity(&self) -> f64 {
        let floating = self.mark.map(|m| self.position.unrealized_pnl(m)).unwrap_or(0.0);
        self.balance + floating
    }
}

/// Simulated venue for replays and dry runs
pub struct PaperGateway {
    meta: InstrumentMeta,
    fee_rate: f64,
    book: Mutex<PaperBook>,
    events_tx: mpsc::UnboundedSender<LadderEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LadderEvent>>>,
}

impl PaperGateway {
    pub fn new(meta: InstrumentMeta, settings: &PaperSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        info!("PaperGateway started with balance: {}", settings.initial_balance);
        Self {
            meta,
            fee_rate: settings.fee_rate,
            book: Mutex::new(PaperBook {
                mark: None,
                resting: Vec::new(),
                position: PaperPosition::default(),
                balance: settings.initial_balance,
                total_fees: 0.0,
                next_trade_id: 0,
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub async fn position(&self) -> PaperPosition {
        self.book.lock().await.position
    }

    pub async fn resting_orders(&self) -> Vec<OrderRequest> {
        self.book.lock().await.resting.clone()
    }

    pub async fn total_fees(&self) -> f64 {
        self.book.lock().await.total_fees
    }

    fn emit(&self, event: LadderEvent) {
        // receiver gone means nobody is listening anymore
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn submit(&self, order: &OrderRequest) -> LadderResult<()> {
        if !order.volume.is_finite() || order.volume <= 0.0 {
            return Err(LadderError::Gateway(format!("invalid volume {}", order.volume)));
        }

        let mut book = self.book.lock().await;
        if !order.kind.is_market() {
            debug!("Paper order {} resting: {:?} {}", order.order_ref, order.kind, order.volume);
            book.resting.push(order.clone());
            return Ok(());
        }

        match book.mark {
            Some(mark) => {
                let fill = book.execute(order, mark, self.fee_rate);
                self.emit(LadderEvent::Fill(fill));
            }
            None => self.emit(LadderEvent::OrderRejected {
                order_ref: order.order_ref,
                reason: "no market price".into(),
            }),
        }
        Ok(())
    }

    async fn cancel(&self, order_ref: OrderRef) -> LadderResult<()> {
        let mut book = self.book.lock().await;
        book.resting.retain(|o| o.order_ref != order_ref);
        Ok(())
    }

    async fn position_snapshot(&self) -> LadderResult<PositionSnapshot> {
        let book = self.book.lock().await;
        Ok(PositionSnapshot {
            net_volume: book.position.size,
            average_price: book.position.entry_price,
            equity: book.equity(),
            balance: book.balance,
        })
    }

    async fn instrument_meta(&self) -> LadderResult<InstrumentMeta> {
        Ok(self.meta)
    }

    async fn subscribe_events(&self) -> LadderResult<mpsc::UnboundedReceiver<LadderEvent>> {
        self.events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| LadderError::InvalidState {
                current_state: "paper events already subscribed".into(),
            })
    }

    async fn observe(&self, event: &LadderEvent) {
        let Some(bar) = Bar::from_event(event) else {
            return;
        };

        let mut book = self.book.lock().await;
        let resting = std::mem::take(&mut book.resting);
        for order in resting {
            match trigger_price(&order, &bar) {
                Some(price) => {
                    let fill = book.execute(&order, price, self.fee_rate);
                    self.emit(LadderEvent::Fill(fill));
                }
                None => book.resting.push(order),
            }
        }
        book.mark = Some(bar.close);
    }
}
