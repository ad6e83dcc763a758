//! Ladder configuration

use serde::{Deserialize, Serialize};

use super::errors::{LadderError, LadderResult};
use super::normalizer::VolumeRounding;
use super::progression::Progression;
use super::types::Side;

/// How stages beyond the first are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Add market stages as price moves against the basket (martingale averaging)
    #[default]
    Averaging,
    /// Pre-place stop orders in the trade direction (pyramid)
    PyramidStops,
    /// Pre-place limit orders against the trade direction
    AveragingLimits,
}

impl EntryMode {
    pub fn pre_places_levels(&self) -> bool {
        !matches!(self, EntryMode::Averaging)
    }
}

/// Which baskets may be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectionFilter {
    #[default]
    Both,
    LongOnly,
    ShortOnly,
}

impl DirectionFilter {
    pub fn allows(&self, side: Side) -> bool {
        match self {
            DirectionFilter::Both => true,
            DirectionFilter::LongOnly => side == Side::Long,
            DirectionFilter::ShortOnly => side == Side::Short,
        }
    }
}

/// Baseline equity must exceed before a new stage is added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfitBaseline {
    /// Account balance from the latest position snapshot
    #[default]
    Balance,
    /// Equity observed when the current basket started building
    BasketStartEquity,
}

/// Trailing stop parameters, in price steps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Favorable move from the average price before trailing starts
    pub activation_steps: f64,
    /// Distance kept between price and the trailed stop
    pub trail_steps: f64,
}

/// Unit in which basket profit is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskMode {
    /// Thresholds in price steps × volume
    PriceSteps,
    /// Thresholds in quote currency
    #[default]
    Currency,
    /// Thresholds in percent of current equity
    PercentOfEquity,
}

/// Whether long and short baskets are evaluated together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskScope {
    #[default]
    PerBasket,
    Combined,
}

/// Basket-wide take-profit / stop-loss settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub mode: RiskMode,
    #[serde(default)]
    pub scope: RiskScope,
    /// Profit target magnitude (positive)
    #[serde(default)]
    pub take_profit: Option<f64>,
    /// Loss limit magnitude (positive)
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// Currency mode only: thresholds are per lot of open volume
    #[serde(default)]
    pub per_lot: bool,
    /// Keep trading after a take-profit; otherwise enter cooldown
    #[serde(default = "default_true")]
    pub trade_again_after_profit: bool,
    /// Disable trading after a stop-loss until a trade-again signal
    #[serde(default)]
    pub no_reentry_after_loss: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            mode: RiskMode::default(),
            scope: RiskScope::default(),
            take_profit: None,
            stop_loss: None,
            per_lot: false,
            trade_again_after_profit: true,
            no_reentry_after_loss: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_volume() -> f64 {
    1.0
}

fn default_max_stages() -> u32 {
    3
}

fn default_level_distance() -> f64 {
    10.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_fill_memory() -> usize {
    1024
}

/// Ladder configuration for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Instrument name, used in logs
    pub instrument: String,

    #[serde(default)]
    pub entry_mode: EntryMode,

    /// Stage-1 volume before progression and normalization
    #[serde(default = "default_base_volume")]
    pub base_volume: f64,

    /// Per-stage volume factors
    #[serde(default)]
    pub volume_progression: Progression,

    /// Per-gap spacing factors
    #[serde(default)]
    pub spacing_progression: Progression,

    /// Distance between consecutive levels, in price steps
    #[serde(default = "default_level_distance")]
    pub level_distance_steps: f64,

    #[serde(default = "default_max_stages")]
    pub max_stages: u32,

    /// Protective stop distance from each rung's entry, in price steps (0 disables)
    #[serde(default)]
    pub stop_offset_steps: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing: Option<TrailingConfig>,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub direction: DirectionFilter,

    /// Accept an open request for the opposite side while a basket is live
    #[serde(default)]
    pub allow_hedging: bool,

    #[serde(default)]
    pub require_profit_for_next_stage: bool,

    #[serde(default)]
    pub profit_baseline: ProfitBaseline,

    /// Consecutive rejections before a level is abandoned
    #[serde(default = "default_max_retries")]
    pub max_order_retries: u32,

    #[serde(default)]
    pub volume_rounding: VolumeRounding,

    /// Evaluate unfinished candles as ticks
    #[serde(default)]
    pub evaluate_unfinished_candles: bool,

    /// Number of recent trade ids remembered for duplicate detection
    #[serde(default = "default_fill_memory")]
    pub fill_memory: usize,
}

impl LadderConfig {
    /// Create a configuration with defaults for everything but the instrument
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            entry_mode: EntryMode::default(),
            base_volume: default_base_volume(),
            volume_progression: Progression::default(),
            spacing_progression: Progression::default(),
            level_distance_steps: default_level_distance(),
            max_stages: default_max_stages(),
            stop_offset_steps: 0.0,
            trailing: None,
            risk: RiskConfig::default(),
            direction: DirectionFilter::default(),
            allow_hedging: false,
            require_profit_for_next_stage: false,
            profit_baseline: ProfitBaseline::default(),
            max_order_retries: default_max_retries(),
            volume_rounding: VolumeRounding::default(),
            evaluate_unfinished_candles: false,
            fill_memory: default_fill_memory(),
        }
    }

    /// Builder: entry mode
    pub fn with_entry_mode(mut self, mode: EntryMode) -> Self {
        self.entry_mode = mode;
        self
    }

    /// Builder: base volume and volume progression
    pub fn with_volumes(mut self, base_volume: f64, progression: Progression) -> Self {
        self.base_volume = base_volume;
        self.volume_progression = progression;
        self
    }

    /// Builder: level distance (price steps) and spacing progression
    pub fn with_spacing(mut self, level_distance_steps: f64, progression: Progression) -> Self {
        self.level_distance_steps = level_distance_steps;
        self.spacing_progression = progression;
        self
    }

    pub fn with_max_stages(mut self, max_stages: u32) -> Self {
        self.max_stages = max_stages;
        self
    }

    pub fn with_stop_offset(mut self, steps: f64) -> Self {
        self.stop_offset_steps = steps;
        self
    }

    pub fn with_trailing(mut self, activation_steps: f64, trail_steps: f64) -> Self {
        self.trailing = Some(TrailingConfig {
            activation_steps,
            trail_steps,
        });
        self
    }

    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_direction(mut self, direction: DirectionFilter) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_hedging(mut self, allow: bool) -> Self {
        self.allow_hedging = allow;
        self
    }

    pub fn with_profit_requirement(mut self, baseline: ProfitBaseline) -> Self {
        self.require_profit_for_next_stage = true;
        self.profit_baseline = baseline;
        self
    }

    pub fn with_max_order_retries(mut self, retries: u32) -> Self {
        self.max_order_retries = retries;
        self
    }

    /// Validate the configuration; the controller refuses to start otherwise
    pub fn validate(&self) -> LadderResult<()> {
        if self.instrument.is_empty() {
            return Err(LadderError::InvalidConfig("instrument cannot be empty".into()));
        }

        if !(self.base_volume > 0.0) {
            return Err(LadderError::InvalidConfig("base_volume must be positive".into()));
        }

        if self.max_stages == 0 {
            return Err(LadderError::InvalidConfig("max_stages must be at least 1".into()));
        }

        if self.max_stages > 1 && !(self.level_distance_steps > 0.0) {
            return Err(LadderError::InvalidConfig(
                "level_distance_steps must be positive when max_stages > 1".into(),
            ));
        }

        if self.stop_offset_steps < 0.0 {
            return Err(LadderError::InvalidConfig("stop_offset_steps must not be negative".into()));
        }

        if let Some(trailing) = &self.trailing {
            if self.stop_offset_steps <= 0.0 {
                return Err(LadderError::InvalidConfig(
                    "stop_offset_steps must be positive when trailing is enabled".into(),
                ));
            }
            if trailing.activation_steps < 0.0 || trailing.trail_steps <= 0.0 {
                return Err(LadderError::InvalidConfig(
                    "trailing requires activation_steps >= 0 and trail_steps > 0".into(),
                ));
            }
        }

        for (name, threshold) in [("take_profit", self.risk.take_profit), ("stop_loss", self.risk.stop_loss)] {
            if let Some(value) = threshold {
                if !(value > 0.0) {
                    return Err(LadderError::InvalidConfig(format!("{name} must be positive")));
                }
            }
        }

        if self.max_order_retries == 0 {
            return Err(LadderError::InvalidConfig("max_order_retries must be at least 1".into()));
        }

        self.volume_progression.validate("volume_progression")?;
        self.spacing_progression.validate("spacing_progression")?;

        Ok(())
    }
}
