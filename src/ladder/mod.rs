//! Position Ladder Module
//!
//! This module implements a layered position ladder: a basket of entries
//! per direction, added in stages with configurable volume and spacing
//! progressions, protected by one shared stop and closed as a whole on
//! basket-wide take-profit or stop-loss.
//!
//! # Architecture
//!
//! The ladder module is organized into several sub-modules:
//!
//! - [`config`] - Ladder configuration and validation
//! - [`types`] - Core data types (Rung, OrderRequest, LadderEvent, etc.)
//! - [`errors`] - Ladder-specific error types
//! - [`progression`] - Volume and spacing progressions
//! - [`normalizer`] - Price and volume rounding to instrument steps
//! - [`basket`] - Per-direction basket with weighted average and FIFO reduction
//! - [`fills`] - Fill routing and duplicate detection
//! - [`stops`] - Shared stop synchronizer with optional trailing
//! - [`risk`] - Basket-wide take-profit / stop-loss evaluation
//! - [`controller`] - The per-instrument state machine
//! - [`gateway`] - Order gateway and event feed abstractions (mockable for testing)
//! - [`runner`] - Main execution loop
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use basket_ladder::ladder::{
//!     EntryMode, LadderConfig, LadderRunner, Progression, RunnerConfig,
//! };
//!
//! // Martingale averaging: 1, 2, 4 lots every 20 price steps
//! let config = LadderConfig::new("EURUSD")
//!     .with_entry_mode(EntryMode::Averaging)
//!     .with_volumes(0.01, Progression::Geometric { multiplier: 2.0 })
//!     .with_spacing(20.0, Progression::Fixed)
//!     .with_max_stages(3)
//!     .with_stop_offset(100.0);
//!
//! let mut runner = LadderRunner::new(config, gateway, feed, RunnerConfig::default()).await?;
//! let summary = runner.run().await?;
//! ```
//!
//! # Testing
//!
//! The controller performs no I/O and can be driven directly with
//! [`LadderEvent`]s. Mock implementations are provided for the runner:
//!
//! ```rust,ignore
//! use basket_ladder::ladder::gateway::mock::{MockEventFeed, MockGateway};
//!
//! let gateway = MockGateway::new(InstrumentMeta::default());
//! let feed = MockEventFeed::new(vec![LadderEvent::Tick(100.0)]);
//! ```

pub mod basket;
pub mod config;
pub mod controller;
pub mod errors;
pub mod fills;
pub mod gateway;
pub mod normalizer;
pub mod progression;
pub mod risk;
pub mod runner;
pub mod stops;
pub mod types;

// Re-export commonly used types
pub use basket::{DirectionBasket, Reduction};
pub use config::{
    DirectionFilter, EntryMode, LadderConfig, ProfitBaseline, RiskConfig, RiskMode, RiskScope, TrailingConfig,
};
pub use controller::{BasketSummary, CloseReason, LadderController, LadderState, LadderSummary};
pub use errors::{LadderError, LadderResult};
pub use fills::{FillOutcome, FillTracker};
pub use gateway::{EventFeed, OrderGateway};
pub use normalizer::{InstrumentPrecision, VolumeRounding};
pub use progression::{stage_offset, stage_volume, Progression};
pub use risk::{BasketRiskEvaluator, RiskTrigger, RiskVerdict};
pub use runner::{LadderRunner, RunnerConfig};
pub use stops::{StopSynchronizer, TrailingDistances};
pub use types::{
    Candle, Fill, InstrumentMeta, LadderEvent, LadderStats, LadderStatus, OrderCommand, OrderKind, OrderPurpose,
    OrderRef, OrderRequest, OrderSide, PositionSnapshot, PublishedStop, Rung, Side, SignalIntent, EPSILON,
};
