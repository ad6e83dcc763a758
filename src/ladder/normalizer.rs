//! Volume and price normalization against instrument constraints

use log::warn;
use serde::{Deserialize, Serialize};

use super::types::InstrumentMeta;

/// Tick size used when the instrument reports none
pub const DEFAULT_PRICE_STEP: f64 = 0.01;
/// Lot step used when the instrument reports none
pub const DEFAULT_VOLUME_STEP: f64 = 0.01;

/// How a requested volume is snapped to the volume step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VolumeRounding {
    #[default]
    HalfAwayFromZero,
    Floor,
}

/// Instrument step/min/max constraints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPrecision {
    pub price_step: f64,
    pub volume_step: f64,
    pub min_volume: f64,
    pub max_volume: f64,
    pub rounding: VolumeRounding,
}

impl InstrumentPrecision {
    pub fn new(price_step: f64, volume_step: f64, min_volume: f64, max_volume: f64) -> Self {
        Self {
            price_step,
            volume_step,
            min_volume,
            max_volume,
            rounding: VolumeRounding::default(),
        }
    }

    /// Build from broker metadata, falling back to conservative defaults for
    /// anything missing or non-positive
    pub fn from_meta(meta: &InstrumentMeta, rounding: VolumeRounding) -> Self {
        let price_step = match meta.price_step {
            Some(step) if step > 0.0 => step,
            _ => {
                warn!("Instrument price step missing, using {}", DEFAULT_PRICE_STEP);
                DEFAULT_PRICE_STEP
            }
        };
        let volume_step = match meta.volume_step {
            Some(step) if step > 0.0 => step,
            _ => {
                warn!("Instrument volume step missing, using {}", DEFAULT_VOLUME_STEP);
                DEFAULT_VOLUME_STEP
            }
        };
        let min_volume = meta.min_volume.filter(|v| *v > 0.0).unwrap_or(volume_step);
        let max_volume = meta
            .max_volume
            .filter(|v| *v >= min_volume)
            .unwrap_or(f64::MAX);

        Self {
            price_step,
            volume_step,
            min_volume,
            max_volume,
            rounding,
        }
    }

    pub fn with_rounding(mut self, rounding: VolumeRounding) -> Self {
        self.rounding = rounding;
        self
    }

    /// Snap a volume to the step and clamp it to the allowed range.
    ///
    /// Returns `None` when the result is zero or below the minimum, in which
    /// case the caller skips the order.
    pub fn normalize_volume(&self, volume: f64) -> Option<f64> {
        if !volume.is_finite() || volume <= 0.0 {
            return None;
        }

        let steps = volume / self.volume_step;
        let steps = match self.rounding {
            VolumeRounding::HalfAwayFromZero => steps.round(),
            // absorb representation error such as 0.3 / 0.1 = 2.9999999999999996
            VolumeRounding::Floor => (steps + 1e-9).floor(),
        };

        let max_steps = (self.max_volume / self.volume_step + 1e-9).floor();
        let steps = steps.min(max_steps);
        let normalized = steps * self.volume_step;

        if steps < 1.0 || normalized + 1e-12 < self.min_volume {
            return None;
        }
        Some(normalized)
    }

    /// Largest valid order volume that does not exceed `volume`.
    ///
    /// Used for closing orders, which must never overshoot the open position.
    pub fn closable_volume(&self, volume: f64) -> Option<f64> {
        self.with_rounding(VolumeRounding::Floor).normalize_volume(volume)
    }

    /// Round a price to the tick size (half away from zero)
    pub fn normalize_price(&self, price: f64) -> f64 {
        (price / self.price_step).round() * self.price_step
    }

    /// Convert a distance in ticks to price units
    pub fn steps_to_price(&self, steps: f64) -> f64 {
        steps * self.price_step
    }

    /// Convert a price distance to ticks
    pub fn price_to_steps(&self, distance: f64) -> f64 {
        distance / self.price_step
    }

    /// Prices closer than half a tick are considered equal
    pub fn same_price(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.price_step / 2.0
    }

    /// Volumes closer than half a lot step are considered equal
    pub fn same_volume(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.volume_step / 2.0
    }
}

impl Default for InstrumentPrecision {
    fn default() -> Self {
        Self::from_meta(&InstrumentMeta::default(), VolumeRounding::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn precision() -> InstrumentPrecision {
        InstrumentPrecision::new(0.01, 0.1, 0.1, 50.0)
    }

    #[test]
    fn test_volume_rounding_modes() {
        let p = precision();
        assert_eq!(p.normalize_volume(0.26).map(|v| (v * 10.0).round()), Some(3.0));

        let floor = p.with_rounding(VolumeRounding::Floor);
        assert_eq!(floor.normalize_volume(0.29).map(|v| (v * 10.0).round()), Some(2.0));
        // 0.3 is exactly three steps even though 0.3 / 0.1 is not exactly 3
        assert_eq!(floor.normalize_volume(0.3).map(|v| (v * 10.0).round()), Some(3.0));
    }

    #[test]
    fn test_volume_below_minimum_is_skipped() {
        let p = InstrumentPrecision::new(0.01, 0.1, 0.5, 50.0);
        assert!(p.normalize_volume(0.3).is_none());
        assert!(p.normalize_volume(0.04).is_none());
        assert!(p.normalize_volume(0.0).is_none());
        assert!(p.normalize_volume(-1.0).is_none());
        assert!(p.normalize_volume(f64::NAN).is_none());
    }

    #[test]
    fn test_volume_clamped_to_max() {
        let p = InstrumentPrecision::new(0.01, 0.1, 0.1, 10.04);
        let v = p.normalize_volume(99.0).unwrap();
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_closable_volume_never_rounds_up() {
        // half-away rounding would turn 0.26 into 0.3
        let p = precision();
        assert_eq!(p.closable_volume(0.26).map(|v| (v * 10.0).round()), Some(2.0));
        assert!(p.closable_volume(0.05).is_none());

        let capped = InstrumentPrecision::new(0.01, 0.1, 0.1, 10.0);
        assert!((capped.closable_volume(12.34).unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_rounding() {
        let p = InstrumentPrecision::new(0.5, 1.0, 1.0, 100.0);
        assert_eq!(p.normalize_price(100.24), 100.0);
        assert_eq!(p.normalize_price(100.25), 100.5);
        assert_eq!(p.normalize_price(-100.25), -100.5);
        assert!(p.same_price(100.0, 100.2));
        assert!(!p.same_price(100.0, 100.3));
    }

    #[test]
    fn test_missing_meta_uses_defaults() {
        let p = InstrumentPrecision::from_meta(
            &InstrumentMeta {
                price_step: None,
                volume_step: Some(0.0),
                min_volume: None,
                max_volume: None,
            },
            VolumeRounding::Floor,
        );
        assert_eq!(p.price_step, DEFAULT_PRICE_STEP);
        assert_eq!(p.volume_step, DEFAULT_VOLUME_STEP);
        assert_eq!(p.min_volume, DEFAULT_VOLUME_STEP);
        assert!(p.normalize_volume(1.0).is_some());
    }

    proptest! {
        #[test]
        fn prop_volume_normalization_is_idempotent(
            volume in 0.0f64..500.0,
            step_exp in 0u32..4,
            floor in any::<bool>(),
        ) {
            let step = 10f64.powi(-(step_exp as i32));
            let rounding = if floor { VolumeRounding::Floor } else { VolumeRounding::HalfAwayFromZero };
            let p = InstrumentPrecision::new(0.01, step, step, 250.0).with_rounding(rounding);

            if let Some(once) = p.normalize_volume(volume) {
                prop_assert_eq!(p.normalize_volume(once), Some(once));
                prop_assert!(once >= p.min_volume - 1e-12);
                prop_assert!(once <= p.max_volume + 1e-12);
            }
        }
    }
}
