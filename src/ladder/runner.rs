//! Ladder runner - main execution loop

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::interval;

use super::config::LadderConfig;
use super::controller::{LadderController, LadderSummary};
use super::errors::{LadderError, LadderResult};
use super::gateway::{EventFeed, OrderGateway};
use super::types::{LadderEvent, OrderCommand};
use crate::signal::SignalSource;

/// Ladder runner configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub position_poll_interval_ms: u64,
    pub summary_interval_secs: u64,
    pub max_consecutive_errors: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            position_poll_interval_ms: 1000,
            summary_interval_secs: 60,
            max_consecutive_errors: 5,
        }
    }
}

/// Drives one [`LadderController`] against a gateway and an event feed
pub struct LadderRunner<G: OrderGateway, F: EventFeed> {
    controller: LadderController,
    gateway: Arc<G>,
    feed: F,
    signals: Option<Box<dyn SignalSource>>,
    runner_config: RunnerConfig,
    consecutive_errors: u32,
}

impl<G: OrderGateway + 'static, F: EventFeed + 'static> LadderRunner<G, F> {
    /// Fetch instrument metadata and build the controller
    pub async fn new(config: LadderConfig, gateway: G, feed: F, runner_config: RunnerConfig) -> LadderResult<Self> {
        let meta = gateway.instrument_meta().await?;
        let controller = LadderController::new(config, &meta)?;
        Ok(Self {
            controller,
            gateway: Arc::new(gateway),
            feed,
            signals: None,
            runner_config,
            consecutive_errors: 0,
        })
    }

    /// Attach a signal source consulted on every finished candle
    pub fn with_signals(mut self, signals: Box<dyn SignalSource>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn controller(&self) -> &LadderController {
        &self.controller
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Run until the event feed closes.
    ///
    /// Returns the final summary, or an error after too many consecutive
    /// gateway failures.
    pub async fn run(&mut self) -> LadderResult<LadderSummary> {
        info!("Starting ladder runner for {}", self.controller.config().instrument);
        if let Some(signals) = &self.signals {
            info!("Signal source: {}", signals.name());
        }

        let mut gateway_rx = self.gateway.subscribe_events().await?;
        let mut feed_rx = self.feed.subscribe().await?;

        let mut poll_timer = interval(Duration::from_millis(self.runner_config.position_poll_interval_ms.max(1)));
        let mut summary_timer = interval(Duration::from_secs(self.runner_config.summary_interval_secs.max(1)));
        // first ticks complete immediately
        poll_timer.tick().await;
        summary_timer.tick().await;
        self.poll_position(&mut gateway_rx).await;

        loop {
            tokio::select! {
                biased;
                Some(event) = gateway_rx.recv() => {
                    self.process(event, &mut gateway_rx).await;
                }
                event = feed_rx.recv() => match event {
                    Some(event) => self.on_feed_event(event, &mut gateway_rx).await,
                    None => {
                        info!("Event feed closed");
                        break;
                    }
                },
                _ = poll_timer.tick() => self.poll_position(&mut gateway_rx).await,
                _ = summary_timer.tick() => self.log_summary(),
            }

            if self.consecutive_errors >= self.runner_config.max_consecutive_errors {
                error!("Too many consecutive errors, shutting down");
                self.feed.unsubscribe().await?;
                return Err(LadderError::Gateway("Too many consecutive errors".into()));
            }
        }

        self.drain(&mut gateway_rx).await;
        self.feed.unsubscribe().await?;
        self.log_summary();
        Ok(self.controller.summary())
    }

    /// Market data and signals from the feed.
    ///
    /// The gateway sees the event first so simulated resting orders fill
    /// before the controller reacts to the new price.
    async fn on_feed_event(&mut self, event: LadderEvent, rx: &mut mpsc::UnboundedReceiver<LadderEvent>) {
        if matches!(event, LadderEvent::Tick(_) | LadderEvent::Candle(_)) {
            self.gateway.observe(&event).await;
            self.drain(rx).await;
        }

        let finished = match &event {
            LadderEvent::Candle(candle) if candle.finished => Some(candle.clone()),
            _ => None,
        };

        self.process(event, rx).await;

        let Some(candle) = finished else {
            return;
        };
        let intents = match self.signals.as_mut() {
            Some(signals) => signals.on_candle(&candle, self.controller.state()),
            None => return,
        };
        for intent in intents {
            debug!("Signal intent {:?}", intent);
            self.process(LadderEvent::Signal(intent), rx).await;
        }
    }

    /// Handle an event and every gateway outcome it causes
    async fn process(&mut self, event: LadderEvent, rx: &mut mpsc::UnboundedReceiver<LadderEvent>) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let commands = self.controller.handle(event);
            for command in commands {
                if let Some(rejection) = self.dispatch(command).await {
                    queue.push_back(rejection);
                }
            }
            while let Ok(event) = rx.try_recv() {
                queue.push_back(event);
            }
        }
    }

    /// Send one command; an immediate placement failure comes back as a rejection
    async fn dispatch(&mut self, command: OrderCommand) -> Option<LadderEvent> {
        match command {
            OrderCommand::Place(request) => match self.gateway.submit(&request).await {
                Ok(()) => {
                    self.consecutive_errors = 0;
                    None
                }
                Err(e) => {
                    error!("Failed to place order {}: {}", request.order_ref, e);
                    self.consecutive_errors += 1;
                    Some(LadderEvent::OrderRejected {
                        order_ref: request.order_ref,
                        reason: e.to_string(),
                    })
                }
            },
            OrderCommand::Cancel(order_ref) => {
                if let Err(e) = self.gateway.cancel(order_ref).await {
                    warn!("Failed to cancel order {}: {}", order_ref, e);
                    self.consecutive_errors += 1;
                }
                None
            }
        }
    }

    async fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<LadderEvent>) {
        while let Ok(event) = rx.try_recv() {
            self.process(event, rx).await;
        }
    }

    async fn poll_position(&mut self, rx: &mut mpsc::UnboundedReceiver<LadderEvent>) {
        match self.gateway.position_snapshot().await {
            Ok(snapshot) => {
                self.consecutive_errors = 0;
                self.process(LadderEvent::Position(snapshot), rx).await;
            }
            Err(e) => {
                warn!("Failed to fetch position: {}", e);
                self.consecutive_errors += 1;
            }
        }
    }

    fn log_summary(&self) {
        let s = self.controller.summary();
        info!(
            "{} {:?}: long={} short={} realized={:.4} fills={} closed={}",
            s.instrument,
            s.status,
            s.long.open_volume,
            s.short.open_volume,
            s.stats.realized_pnl,
            s.stats.fills_processed,
            s.stats.baskets_closed
        );
    }
}
