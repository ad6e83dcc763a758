//! Shared stop synchronizer
//!
//! Every open rung of a basket is protected by the same stop price. The stop
//! is the tightest of the per-rung candidates, optionally trailed behind
//! price, and only ever moves in the protective direction.

use log::debug;

use super::basket::DirectionBasket;
use super::config::LadderConfig;
use super::normalizer::InstrumentPrecision;
use super::types::{OrderCommand, OrderKind, OrderPurpose, OrderRequest, PublishedStop, Side, EPSILON};

/// Trailing distances in price units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingDistances {
    pub activation: f64,
    pub trail: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopSynchronizer {
    enabled: bool,
    trailing: Option<TrailingDistances>,
}

impl StopSynchronizer {
    pub fn new(enabled: bool, trailing: Option<TrailingDistances>) -> Self {
        Self { enabled, trailing }
    }

    pub fn from_config(config: &LadderConfig, precision: &InstrumentPrecision) -> Self {
        let trailing = config.trailing.map(|t| TrailingDistances {
            activation: precision.steps_to_price(t.activation_steps),
            trail: precision.steps_to_price(t.trail_steps),
        });
        Self::new(config.stop_offset_steps > 0.0, trailing)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Un-ratcheted stop candidate for the basket at `price`
    pub fn candidate(&self, basket: &DirectionBasket, price: f64) -> Option<f64> {
        if !self.enabled || basket.is_flat() {
            return None;
        }
        let side = basket.side;

        let fixed = basket
            .rungs()
            .iter()
            .filter(|r| r.is_open())
            .map(|r| r.stop_candidate())
            .reduce(|a, b| tighter(side, a, b))?;

        let trailed = match (self.trailing, basket.weighted_average_price()) {
            (Some(trailing), Some(average)) => {
                let favorable_move = side.sign() * (price - average);
                (favorable_move + EPSILON >= trailing.activation).then(|| side.adverse_price(price, trailing.trail))
            }
            _ => None,
        };

        Some(match trailed {
            Some(trailed) => tighter(side, fixed, trailed),
            None => fixed,
        })
    }

    /// Ratchet the basket's active stop toward the current candidate.
    ///
    /// Returns the active stop after the update.
    pub fn update(&self, basket: &mut DirectionBasket, price: f64, precision: &InstrumentPrecision) -> Option<f64> {
        let candidate = precision.normalize_price(self.candidate(basket, price)?);

        match basket.active_stop() {
            Some(current) if !basket.side.is_tighter_stop(candidate, current) => {}
            previous => {
                debug!("{} stop {:?} -> {}", basket.side, previous, candidate);
                basket.set_active_stop(candidate);
            }
        }
        basket.active_stop()
    }

    /// Commands that bring every open rung's exit order in line with the
    /// active stop. Rungs whose published stop already matches are left alone.
    pub fn publish(&self, basket: &mut DirectionBasket, precision: &InstrumentPrecision) -> Vec<OrderCommand> {
        let Some(stop) = basket.active_stop() else {
            return Vec::new();
        };
        let side = basket.side;
        let mut commands = Vec::new();

        for rung in basket.rungs_mut().iter_mut().filter(|r| r.is_open()) {
            let Some(volume) = precision.normalize_volume(rung.executed_volume) else {
                continue;
            };

            if let (Some(_), Some(published)) = (rung.exit_order_ref, rung.published_exit) {
                if precision.same_price(published.price, stop) && precision.same_volume(published.volume, volume) {
                    continue;
                }
            }

            if let Some(old) = rung.exit_order_ref.take() {
                commands.push(OrderCommand::Cancel(old));
            }

            let request = OrderRequest::new(side.exit_side(), OrderKind::Stop { trigger: stop }, volume, OrderPurpose::Exit)
                .at_level(rung.index);
            rung.exit_order_ref = Some(request.order_ref);
            rung.published_exit = Some(PublishedStop { price: stop, volume });
            commands.push(OrderCommand::Place(request));
        }

        commands
    }
}

fn tighter(side: Side, a: f64, b: f64) -> f64 {
    match side {
        Side::Long => a.max(b),
        Side::Short => a.min(b),
    }
}
