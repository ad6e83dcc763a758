//! Stage progressions - per-stage volume and spacing multipliers

use serde::{Deserialize, Serialize};

use super::errors::{LadderError, LadderResult};

/// Multiplier sequence applied per stage (stage 1 = first entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Progression {
    /// Every stage gets factor 1
    #[default]
    Fixed,
    /// 1, 1 + d, 1 + 2d, ...
    Arithmetic { increment: f64 },
    /// 1, m, m², ... (martingale: previous × multiplier)
    Geometric { multiplier: f64 },
    /// 1, 2, 3, 5, 8, ...
    Fibonacci,
    /// Explicit factors; the last one repeats past the end of the table
    Table { factors: Vec<f64> },
}

impl Progression {
    /// Factor for a 1-based stage
    pub fn factor(&self, stage: u32) -> f64 {
        let stage = stage.max(1);
        match self {
            Progression::Fixed => 1.0,
            Progression::Arithmetic { increment } => 1.0 + increment * (stage - 1) as f64,
            Progression::Geometric { multiplier } => multiplier.powi(stage as i32 - 1),
            Progression::Fibonacci => fibonacci(stage),
            Progression::Table { factors } => factors
                .get(stage as usize - 1)
                .or_else(|| factors.last())
                .copied()
                .unwrap_or(1.0),
        }
    }

    pub fn validate(&self, what: &str) -> LadderResult<()> {
        match self {
            Progression::Arithmetic { increment } if *increment < 0.0 => Err(LadderError::InvalidConfig(
                format!("{what}: arithmetic increment must not be negative"),
            )),
            Progression::Geometric { multiplier } if *multiplier <= 0.0 => Err(LadderError::InvalidConfig(
                format!("{what}: geometric multiplier must be positive"),
            )),
            Progression::Table { factors } if factors.is_empty() || factors.iter().any(|f| *f <= 0.0) => {
                Err(LadderError::InvalidConfig(format!(
                    "{what}: table factors must be non-empty and positive"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// 1, 2, 3, 5, 8, ...
fn fibonacci(stage: u32) -> f64 {
    let (mut prev, mut current) = (1.0, 1.0);
    for _ in 1..stage {
        let next = prev + current;
        prev = current;
        current = next;
    }
    current
}

/// Raw (un-normalized) volume for a stage
pub fn stage_volume(base_volume: f64, progression: &Progression, stage: u32) -> f64 {
    base_volume * progression.factor(stage)
}

/// Cumulative distance of a stage from the first entry, in the same unit as
/// `level_distance`. Stage 1 sits at zero; stage k sits at
/// `level_distance × Σ spacing(1..k-1)`.
pub fn stage_offset(level_distance: f64, spacing: &Progression, stage: u32) -> f64 {
    (1..stage.max(1)).map(|j| spacing.factor(j)).sum::<f64>() * level_distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_martingale_volumes() {
        let p = Progression::Geometric { multiplier: 2.0 };
        let volumes: Vec<f64> = (1..=4).map(|s| stage_volume(1.0, &p, s)).collect();
        assert_eq!(volumes, vec![1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn test_fibonacci_factors() {
        let factors: Vec<f64> = (1..=6).map(|s| Progression::Fibonacci.factor(s)).collect();
        assert_eq!(factors, vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0]);
    }

    #[test]
    fn test_arithmetic_and_table() {
        let p = Progression::Arithmetic { increment: 0.5 };
        assert_eq!(p.factor(1), 1.0);
        assert_eq!(p.factor(3), 2.0);

        let t = Progression::Table { factors: vec![1.0, 1.5, 3.0] };
        assert_eq!(t.factor(2), 1.5);
        assert_eq!(t.factor(7), 3.0);
    }

    #[test]
    fn test_stage_offsets() {
        assert_eq!(stage_offset(10.0, &Progression::Fixed, 1), 0.0);
        assert_eq!(stage_offset(10.0, &Progression::Fixed, 2), 10.0);
        assert_eq!(stage_offset(10.0, &Progression::Fixed, 3), 20.0);
        // fibonacci spacing: gaps of 1, 2, 3 levels
        assert_eq!(stage_offset(10.0, &Progression::Fibonacci, 4), 60.0);
    }

    #[test]
    fn test_validation() {
        assert!(Progression::Geometric { multiplier: 0.0 }.validate("volume").is_err());
        assert!(Progression::Table { factors: vec![] }.validate("volume").is_err());
        assert!(Progression::Fibonacci.validate("volume").is_ok());
    }
}
