#![deny(unreachable_pub)]
pub mod config;
pub mod ladder;
pub mod paper;
pub mod replay;
pub mod signal;
pub use config::Settings;
pub use ladder::{LadderConfig, LadderController, LadderError, LadderResult, LadderRunner, LadderSummary};
pub use paper::{PaperGateway, PaperSettings};
pub use replay::ReplayFeed;
pub use signal::{build_signal_source, SignalSettings, SignalSource};
