//! Direction basket - all rungs of one side plus their aggregate state

use serde::{Deserialize, Serialize};

use super::types::{OrderKind, OrderRef, Rung, Side, EPSILON};

/// Level index used for volume that cannot be attributed to a scheduled rung
pub const UNATTRIBUTED_LEVEL: u32 = 0;

/// Result of a FIFO reduction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reduction {
    /// Volume actually taken out of the basket
    pub consumed: f64,
    /// Realized profit of the consumed volume
    pub realized_pnl: f64,
    /// Stop orders left behind by rungs that went flat
    pub orphaned_exits: Vec<OrderRef>,
}

/// Ordered rungs of one side with aggregate volume, average price and stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionBasket {
    pub side: Side,
    rungs: Vec<Rung>,
    open_volume: f64,
    weighted_average_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_stop: Option<f64>,
    stage_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_entry_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_equity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    liquidation_ref: Option<OrderRef>,
    /// Volume of the liquidation order not yet filled
    #[serde(default)]
    liquidation_pending: f64,
}

impl DirectionBasket {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            rungs: Vec::new(),
            open_volume: 0.0,
            weighted_average_price: 0.0,
            active_stop: None,
            stage_count: 0,
            first_entry_price: None,
            start_equity: None,
            liquidation_ref: None,
            liquidation_pending: 0.0,
        }
    }

    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    pub fn rungs_mut(&mut self) -> &mut [Rung] {
        &mut self.rungs
    }

    pub fn open_volume(&self) -> f64 {
        self.open_volume
    }

    /// Weighted-average entry price, if the basket holds volume
    pub fn weighted_average_price(&self) -> Option<f64> {
        (!self.is_flat()).then_some(self.weighted_average_price)
    }

    pub fn active_stop(&self) -> Option<f64> {
        self.active_stop
    }

    pub fn set_active_stop(&mut self, stop: f64) {
        self.active_stop = Some(stop);
    }

    pub fn stage_count(&self) -> u32 {
        self.stage_count
    }

    pub fn first_entry_price(&self) -> Option<f64> {
        self.first_entry_price
    }

    pub fn start_equity(&self) -> Option<f64> {
        self.start_equity
    }

    pub fn set_start_equity(&mut self, equity: Option<f64>) {
        self.start_equity = equity;
    }

    pub fn liquidation_ref(&self) -> Option<OrderRef> {
        self.liquidation_ref
    }

    /// Track a market close order of `volume`
    pub fn track_liquidation(&mut self, order_ref: OrderRef, volume: f64) {
        self.liquidation_ref = Some(order_ref);
        self.liquidation_pending = volume;
    }

    /// Forget the liquidation order (rejected or fully filled)
    pub fn forget_liquidation(&mut self) {
        self.liquidation_ref = None;
        self.liquidation_pending = 0.0;
    }

    /// Count a fill of the liquidation order; returns true once it is complete
    pub fn liquidation_filled(&mut self, volume: f64) -> bool {
        self.liquidation_pending -= volume;
        if self.liquidation_pending > EPSILON {
            return false;
        }
        self.forget_liquidation();
        true
    }

    pub fn is_flat(&self) -> bool {
        self.open_volume <= EPSILON
    }

    /// Nothing open, nothing scheduled
    pub fn is_idle(&self) -> bool {
        self.is_flat() && self.rungs.is_empty() && self.liquidation_ref.is_none()
    }

    pub fn has_working_entries(&self) -> bool {
        self.rungs.iter().any(|r| r.has_working_entry())
    }

    /// Append a newly scheduled rung and count its stage
    pub fn schedule(&mut self, volume: f64, stop_offset: f64, entry_kind: OrderKind) -> &mut Rung {
        self.stage_count += 1;
        let rung = Rung::new(self.stage_count, self.side, volume, stop_offset, entry_kind);
        self.rungs.push(rung);
        let last = self.rungs.len() - 1;
        &mut self.rungs[last]
    }

    /// Consume a stage without scheduling a rung (its volume normalized to nothing)
    pub fn skip_stage(&mut self) {
        self.stage_count += 1;
    }

    pub fn position_of_entry(&self, order_ref: OrderRef) -> Option<usize> {
        self.rungs.iter().position(|r| r.entry_order_ref == Some(order_ref))
    }

    pub fn position_of_exit(&self, order_ref: OrderRef) -> Option<usize> {
        self.rungs.iter().position(|r| r.exit_order_ref == Some(order_ref))
    }

    pub fn position_of_level(&self, level: u32) -> Option<usize> {
        self.rungs.iter().position(|r| r.index == level)
    }

    /// Apply an entry fill to the rung at `position`
    pub fn apply_entry_fill(&mut self, position: usize, price: f64, volume: f64) {
        if let Some(rung) = self.rungs.get_mut(position) {
            rung.apply_entry_fill(price, volume);
        }
        self.note_first_entry(price);
        self.recompute();
    }

    /// Apply a fill that extends the basket but matches no working rung order.
    ///
    /// The most recent open rung absorbs it; an empty basket gets a rung at
    /// [`UNATTRIBUTED_LEVEL`].
    pub fn apply_unattributed_fill(&mut self, price: f64, volume: f64, stop_offset: f64) {
        let position = match self.rungs.iter().rposition(|r| r.is_open()) {
            Some(position) => position,
            None => {
                self.rungs
                    .push(Rung::new(UNATTRIBUTED_LEVEL, self.side, 0.0, stop_offset, OrderKind::Market));
                self.rungs.len() - 1
            }
        };
        let rung = &mut self.rungs[position];
        rung.planned_volume += volume;
        rung.apply_entry_fill(price, volume);
        self.note_first_entry(price);
        self.recompute();
    }

    fn note_first_entry(&mut self, price: f64) {
        if self.first_entry_price.is_none() {
            self.first_entry_price = Some(price);
        }
    }

    /// Consume volume from the oldest rungs first
    pub fn reduce_fifo(&mut self, volume: f64, price: f64) -> Reduction {
        let mut remaining = volume;
        let mut reduction = Reduction::default();

        for rung in self.rungs.iter_mut() {
            if remaining <= EPSILON {
                break;
            }
            if !rung.is_open() {
                continue;
            }
            let consumed = rung.reduce(remaining);
            remaining -= consumed;
            reduction.consumed += consumed;
            reduction.realized_pnl += self.side.sign() * (price - rung.entry_price) * consumed;

            if !rung.is_open() {
                if let Some(exit) = rung.exit_order_ref.take() {
                    reduction.orphaned_exits.push(exit);
                }
                rung.published_exit = None;
            }
        }

        self.rungs.retain(|r| !r.is_spent() || r.needs_entry_order());
        self.recompute();
        reduction
    }

    /// Drop rungs that are neither open nor waiting on an order
    pub fn prune(&mut self) {
        self.rungs.retain(|r| !r.is_spent() || r.needs_entry_order());
    }

    /// Reset the basket, returning every order reference still attached
    pub fn clear(&mut self) -> Vec<OrderRef> {
        let mut refs: Vec<OrderRef> = self
            .rungs
            .iter()
            .flat_map(|r| [r.entry_order_ref, r.exit_order_ref])
            .flatten()
            .collect();
        refs.extend(self.liquidation_ref);
        *self = Self::new(self.side);
        refs
    }

    /// Replace all rungs with one synthetic rung (or nothing when flat)
    pub fn rebuild(&mut self, volume: f64, price: f64, stop_offset: f64) -> Vec<OrderRef> {
        let start_equity = self.start_equity;
        let refs = self.clear();
        if volume > EPSILON {
            self.rungs.push(Rung::synthetic(self.side, volume, price, stop_offset));
            self.stage_count = 1;
            self.first_entry_price = Some(price);
            self.start_equity = start_equity;
            self.recompute();
        }
        refs
    }

    /// Recompute open volume and weighted-average price from the rungs
    pub fn recompute(&mut self) {
        let (volume, notional) = self
            .rungs
            .iter()
            .fold((0.0, 0.0), |(v, n), r| (v + r.executed_volume, n + r.entry_price * r.executed_volume));

        self.open_volume = volume;
        if volume > EPSILON {
            self.weighted_average_price = notional / volume;
        } else {
            self.open_volume = 0.0;
            self.weighted_average_price = 0.0;
            self.active_stop = None;
        }
    }

    /// Floating profit in price units × volume
    pub fn floating_profit(&self, price: f64) -> f64 {
        self.rungs.iter().map(|r| r.floating_profit(price)).sum()
    }

    /// Distance price has moved against the first entry (negative when favorable)
    pub fn adverse_excursion(&self, price: f64) -> Option<f64> {
        self.first_entry_price
            .map(|first| self.side.sign() * (first - price))
    }
}
