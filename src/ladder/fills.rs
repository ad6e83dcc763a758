//! Fill tracker - deduplicates fills and routes them into the baskets

use std::collections::{HashSet, VecDeque};

use log::{debug, warn};

use super::basket::DirectionBasket;
use super::types::{Fill, OrderRef, Side, EPSILON};

/// What a single fill did to the baskets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillOutcome {
    /// Volume that reduced a basket, with the side reduced
    pub reduced: Option<(Side, f64)>,
    /// Volume that opened or extended a basket
    pub extended: Option<(Side, f64)>,
    pub realized_pnl: f64,
    /// Baskets that went from open to flat
    pub flattened: Vec<Side>,
    /// Orders left without purpose and to be cancelled
    pub stale_orders: Vec<OrderRef>,
    /// The fill matched no order the baskets know about
    pub unattributed: bool,
    /// A liquidation order of this side is now completely filled
    pub liquidation_done: Option<Side>,
}

/// Routes fills by order reference, falling back to the fill side
#[derive(Debug)]
pub struct FillTracker {
    seen: HashSet<u64>,
    window: VecDeque<u64>,
    capacity: usize,
    duplicates: u64,
}

impl FillTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            window: VecDeque::with_capacity(capacity),
            capacity,
            duplicates: 0,
        }
    }

    /// Number of duplicate deliveries dropped so far
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Record a trade id; returns true if it was already seen
    pub fn check_duplicate(&mut self, trade_id: u64) -> bool {
        if self.seen.contains(&trade_id) {
            return true;
        }
        if self.window.len() == self.capacity {
            if let Some(oldest) = self.window.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.window.push_back(trade_id);
        self.seen.insert(trade_id);
        false
    }

    /// Apply a fill to the baskets.
    ///
    /// Returns `None` for duplicates and malformed fills.
    pub fn apply(
        &mut self,
        fill: &Fill,
        long: &mut DirectionBasket,
        short: &mut DirectionBasket,
        stop_offset: f64,
    ) -> Option<FillOutcome> {
        if !(fill.volume > EPSILON) || !fill.price.is_finite() {
            warn!("Ignoring malformed fill {:?}", fill);
            return None;
        }
        if self.check_duplicate(fill.trade_id) {
            self.duplicates += 1;
            debug!("Duplicate fill trade_id={} ignored", fill.trade_id);
            return None;
        }

        let opens = fill.side.opens();
        let closes = fill.side.closes();
        let mut outcome = FillOutcome::default();

        let (opening, closing) = match opens {
            Side::Long => (long, short),
            Side::Short => (short, long),
        };

        let liquidation = closing.liquidation_ref() == Some(fill.order_ref);
        let known_exit = liquidation || closing.position_of_exit(fill.order_ref).is_some();
        if liquidation && closing.liquidation_filled(fill.volume) {
            outcome.liquidation_done = Some(closes);
        }

        if !known_exit {
            if let Some(position) = opening.position_of_entry(fill.order_ref) {
                opening.apply_entry_fill(position, fill.price, fill.volume);
                outcome.extended = Some((opens, fill.volume));
                return Some(outcome);
            }
            outcome.unattributed = true;
            debug!(
                "Fill {} for unknown order {}, applying by side",
                fill.trade_id, fill.order_ref
            );
        }

        // Reducing part: known exits, or anything on the opposite side of an open basket
        let mut remaining = fill.volume;
        if !closing.is_flat() {
            let reduction = closing.reduce_fifo(remaining, fill.price);
            remaining -= reduction.consumed;
            outcome.realized_pnl += reduction.realized_pnl;
            outcome.reduced = Some((closes, reduction.consumed));
            outcome.stale_orders.extend(reduction.orphaned_exits);

            if closing.is_flat() {
                outcome.stale_orders.extend(closing.clear());
                outcome.flattened.push(closes);
            }
            // the order that just filled needs no cancel
            outcome.stale_orders.retain(|r| *r != fill.order_ref);
        } else if known_exit {
            warn!("Exit fill {} arrived for flat {} basket", fill.trade_id, closes);
        }

        if remaining > EPSILON {
            opening.apply_unattributed_fill(fill.price, remaining, stop_offset);
            outcome.extended = Some((opens, remaining));
            outcome.unattributed = true;
        }

        Some(outcome)
    }
}
