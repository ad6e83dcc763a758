//! Candle replay feed for backtests and dry runs

use std::path::Path;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ladder::{Candle, EventFeed, LadderEvent, LadderResult};

const REPLAY_CHANNEL_CAPACITY: usize = 1024;

/// Event feed that replays a fixed candle series, then closes
pub struct ReplayFeed {
    candles: Vec<Candle>,
    producer: Option<JoinHandle<()>>,
}

impl ReplayFeed {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles,
            producer: None,
        }
    }

    /// Load a JSON array of candles
    pub fn from_json_file(path: impl AsRef<Path>) -> LadderResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let candles: Vec<Candle> = serde_json::from_str(&contents)?;
        info!("Loaded {} candles from {}", candles.len(), path.as_ref().display());
        Ok(Self::new(candles))
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[async_trait]
impl EventFeed for ReplayFeed {
    async fn subscribe(&mut self) -> LadderResult<mpsc::Receiver<LadderEvent>> {
        let (tx, rx) = mpsc::channel(REPLAY_CHANNEL_CAPACITY);
        let candles = std::mem::take(&mut self.candles);

        self.producer = Some(tokio::spawn(async move {
            for candle in candles {
                if tx.send(LadderEvent::Candle(candle)).await.is_err() {
                    debug!("Replay receiver dropped");
                    return;
                }
            }
        }));
        Ok(rx)
    }

    async fn unsubscribe(&mut self) -> LadderResult<()> {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        Ok(())
    }
}
