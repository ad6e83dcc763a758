//! Signal sources - decide when baskets open and close
//!
//! A signal source sees every finished candle together with the current
//! ladder state and answers with [`SignalIntent`]s. It never touches orders:
//! the controller decides whether an intent is acted on.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::ladder::{Candle, LadderState, LadderStatus, Side, SignalIntent};

/// Signal interface for the ladder runner
///
/// # Lifecycle
///
/// 1. The runner hands each finished candle to `on_candle` after the
///    controller has processed it
/// 2. Returned intents are fed back to the controller in order
///
/// # Example Implementation
///
/// ```rust
/// use basket_ladder::ladder::{Candle, LadderState, Side, SignalIntent};
/// use basket_ladder::signal::SignalSource;
///
/// struct AlwaysLong;
///
/// impl SignalSource for AlwaysLong {
///     fn on_candle(&mut self, _candle: &Candle, state: &LadderState) -> Vec<SignalIntent> {
///         if state.is_idle() {
///             vec![SignalIntent::RequestOpen(Side::Long)]
///         } else {
///             vec![]
///         }
///     }
/// }
/// ```
pub trait SignalSource: Send {
    /// Called once per finished candle
    fn on_candle(&mut self, candle: &Candle, state: &LadderState) -> Vec<SignalIntent>;

    /// Name used in logs
    fn name(&self) -> &str {
        "unnamed_signal"
    }
}

/// Emits `TradeAgain` after a number of candles spent in cooldown
#[derive(Debug, Clone, Default)]
struct CooldownTimer {
    candles: Option<u32>,
    waited: u32,
}

impl CooldownTimer {
    fn new(candles: Option<u32>) -> Self {
        Self { candles, waited: 0 }
    }

    fn tick(&mut self, state: &LadderState) -> Option<SignalIntent> {
        let limit = self.candles?;
        if state.status != LadderStatus::Cooldown {
            self.waited = 0;
            return None;
        }
        self.waited += 1;
        if self.waited < limit {
            return None;
        }
        self.waited = 0;
        Some(SignalIntent::TradeAgain)
    }
}

/// Opens one side whenever the ladder is idle
#[derive(Debug, Clone)]
pub struct FixedSide {
    side: Side,
    cooldown: CooldownTimer,
}

impl FixedSide {
    pub fn new(side: Side, cooldown_candles: Option<u32>) -> Self {
        Self {
            side,
            cooldown: CooldownTimer::new(cooldown_candles),
        }
    }
}

impl SignalSource for FixedSide {
    fn on_candle(&mut self, _candle: &Candle, state: &LadderState) -> Vec<SignalIntent> {
        if let Some(intent) = self.cooldown.tick(state) {
            return vec![intent];
        }
        if state.status == LadderStatus::Idle && state.trading_enabled {
            return vec![SignalIntent::RequestOpen(self.side)];
        }
        Vec::new()
    }

    fn name(&self) -> &str {
        "fixed_side"
    }
}

/// Follows the body of the last finished candle.
///
/// A bullish body of at least `min_body` requests a long basket, a bearish
/// one a short basket. With `close_on_reversal` the opposite basket is
/// closed first.
#[derive(Debug, Clone)]
pub struct CandleDirection {
    min_body: f64,
    close_on_reversal: bool,
    cooldown: CooldownTimer,
}

impl CandleDirection {
    pub fn new(min_body: f64, close_on_reversal: bool, cooldown_candles: Option<u32>) -> Self {
        Self {
            min_body,
            close_on_reversal,
            cooldown: CooldownTimer::new(cooldown_candles),
        }
    }

    fn direction(&self, candle: &Candle) -> Option<Side> {
        if (candle.close - candle.open).abs() < self.min_body {
            return None;
        }
        if candle.is_bullish() {
            Some(Side::Long)
        } else if candle.is_bearish() {
            Some(Side::Short)
        } else {
            None
        }
    }
}

impl SignalSource for CandleDirection {
    fn on_candle(&mut self, candle: &Candle, state: &LadderState) -> Vec<SignalIntent> {
        if let Some(intent) = self.cooldown.tick(state) {
            return vec![intent];
        }

        let Some(side) = self.direction(candle) else {
            return Vec::new();
        };

        let mut intents = Vec::new();
        if self.close_on_reversal && !state.basket(side.opposite()).is_idle() {
            debug!("Candle reversal: closing {} basket", side.opposite());
            intents.push(SignalIntent::RequestClose(side.opposite()));
        }
        if state.basket(side).is_idle() {
            intents.push(SignalIntent::RequestOpen(side));
        }
        intents
    }

    fn name(&self) -> &str {
        "candle_direction"
    }
}

fn default_close_on_reversal() -> bool {
    true
}

/// Signal source selection, as found in the `signal` settings section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalSettings {
    FixedSide {
        side: Side,
        #[serde(default)]
        cooldown_candles: Option<u32>,
    },
    CandleDirection {
        #[serde(default)]
        min_body: f64,
        #[serde(default = "default_close_on_reversal")]
        close_on_reversal: bool,
        #[serde(default)]
        cooldown_candles: Option<u32>,
    },
}

impl Default for SignalSettings {
    fn default() -> Self {
        SignalSettings::CandleDirection {
            min_body: 0.0,
            close_on_reversal: default_close_on_reversal(),
            cooldown_candles: None,
        }
    }
}

/// Create the signal source described by the settings
pub fn build_signal_source(settings: &SignalSettings) -> Box<dyn SignalSource> {
    match settings {
        SignalSettings::FixedSide { side, cooldown_candles } => Box::new(FixedSide::new(*side, *cooldown_candles)),
        SignalSettings::CandleDirection {
            min_body,
            close_on_reversal,
            cooldown_candles,
        } => Box::new(CandleDirection::new(*min_body, *close_on_reversal, *cooldown_candles)),
    }
}
