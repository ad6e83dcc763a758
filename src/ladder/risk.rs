//! Basket risk evaluator - basket-wide take-profit and stop-loss

use serde::{Deserialize, Serialize};

use super::basket::DirectionBasket;
use super::config::{RiskConfig, RiskMode, RiskScope};
use super::types::{Side, EPSILON};

/// Which threshold was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTrigger {
    TakeProfit,
    StopLoss,
}

/// A crossed threshold and the baskets it closes
#[derive(Debug, Clone, PartialEq)]
pub struct RiskVerdict {
    pub trigger: RiskTrigger,
    pub sides: Vec<Side>,
    /// Profit in the unit of the configured mode
    pub profit: f64,
    /// Signed threshold that was crossed
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasketRiskEvaluator {
    config: RiskConfig,
    price_step: f64,
}

impl BasketRiskEvaluator {
    pub fn new(config: RiskConfig, price_step: f64) -> Self {
        Self { config, price_step }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// True if no threshold is configured
    pub fn is_disabled(&self) -> bool {
        self.config.take_profit.is_none() && self.config.stop_loss.is_none()
    }

    /// Floating profit of a basket in the unit of the configured mode
    pub fn profit(&self, basket: &DirectionBasket, price: f64) -> f64 {
        let currency = basket.floating_profit(price);
        match self.config.mode {
            RiskMode::PriceSteps => currency / self.price_step,
            RiskMode::Currency | RiskMode::PercentOfEquity => currency,
        }
    }

    /// Take-profit and stop-loss levels (both positive) for the given volume.
    ///
    /// Percent mode needs equity; without it no threshold applies.
    pub fn thresholds(&self, open_volume: f64, equity: Option<f64>) -> (Option<f64>, Option<f64>) {
        let scale = |magnitude: f64| -> Option<f64> {
            match self.config.mode {
                RiskMode::PriceSteps => Some(magnitude),
                RiskMode::Currency if self.config.per_lot => Some(magnitude * open_volume),
                RiskMode::Currency => Some(magnitude),
                RiskMode::PercentOfEquity => equity.filter(|e| *e > 0.0).map(|e| e * magnitude / 100.0),
            }
        };
        (
            self.config.take_profit.and_then(scale),
            self.config.stop_loss.and_then(scale),
        )
    }

    /// Evaluate both baskets at `price`
    pub fn evaluate(
        &self,
        long: &DirectionBasket,
        short: &DirectionBasket,
        price: f64,
        equity: Option<f64>,
    ) -> Vec<RiskVerdict> {
        if self.is_disabled() {
            return Vec::new();
        }

        let open: Vec<&DirectionBasket> = [long, short].into_iter().filter(|b| !b.is_flat()).collect();
        if open.is_empty() {
            return Vec::new();
        }

        match self.config.scope {
            RiskScope::Combined => {
                let profit = open.iter().map(|b| self.profit(b, price)).sum();
                let volume = open.iter().map(|b| b.open_volume()).sum();
                let sides = open.iter().map(|b| b.side).collect();
                self.check(profit, volume, equity, sides).into_iter().collect()
            }
            RiskScope::PerBasket => open
                .iter()
                .filter_map(|b| self.check(self.profit(b, price), b.open_volume(), equity, vec![b.side]))
                .collect(),
        }
    }

    fn check(&self, profit: f64, volume: f64, equity: Option<f64>, sides: Vec<Side>) -> Option<RiskVerdict> {
        let (take_profit, stop_loss) = self.thresholds(volume, equity);

        if let Some(target) = take_profit {
            if profit + EPSILON >= target {
                return Some(RiskVerdict {
                    trigger: RiskTrigger::TakeProfit,
                    sides,
                    profit,
                    threshold: target,
                });
            }
        }
        if let Some(limit) = stop_loss {
            if profit - EPSILON <= -limit {
                return Some(RiskVerdict {
                    trigger: RiskTrigger::StopLoss,
                    sides,
                    profit,
                    threshold: -limit,
                });
            }
        }
        None
    }
}
