//! Ladder Replay Binary
//!
//! Replays a candle file through the paper gateway and prints the final
//! ladder summary as JSON.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin ladder_replay -- config.toml candles.json
//! ```
//!
//! Settings can be overridden from the environment or a `.env` file,
//! e.g. `APP_LADDER__MAX_STAGES=5`.

use std::env;

use log::{error, info};

use basket_ladder::{build_signal_source, LadderRunner, PaperGateway, ReplayFeed, Settings};

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();

    let args: Vec<String> = env::args().collect();
    let (config_path, candles_path) = match (args.get(1), args.get(2)) {
        (Some(config), Some(candles)) => (config.clone(), candles.clone()),
        _ => {
            eprintln!("Usage: ladder_replay <config.toml> <candles.json>");
            std::process::exit(1);
        }
    };

    let settings = match Settings::new(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load config '{}': {}", config_path, e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str())).init();
    match dotenv {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let feed = match ReplayFeed::from_json_file(&candles_path) {
        Ok(feed) => feed,
        Err(e) => {
            error!("Failed to load candles: {}", e);
            std::process::exit(1);
        }
    };

    let gateway = PaperGateway::new(settings.instrument, &settings.paper);
    let signals = build_signal_source(&settings.signal);

    let runner = match LadderRunner::new(settings.ladder, gateway, feed, settings.runner).await {
        Ok(runner) => runner,
        Err(e) => {
            error!("Failed to start ladder: {}", e);
            std::process::exit(1);
        }
    };
    let mut runner = runner.with_signals(signals);

    let summary = match runner.run().await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Replay stopped: {}", e);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize summary: {}", e);
            std::process::exit(1);
        }
    }
}
