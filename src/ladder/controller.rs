//! Ladder controller - the per-instrument state machine
//!
//! The controller owns all basket state. It consumes [`LadderEvent`]s one at
//! a time and answers each with the [`OrderCommand`]s the gateway should
//! execute. It performs no I/O itself.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::basket::DirectionBasket;
use super::config::{EntryMode, LadderConfig, ProfitBaseline};
use super::errors::LadderResult;
use super::fills::FillTracker;
use super::normalizer::InstrumentPrecision;
use super::progression::{stage_offset, stage_volume};
use super::risk::{BasketRiskEvaluator, RiskTrigger};
use super::stops::StopSynchronizer;
use super::types::{
    Candle, Fill, InstrumentMeta, LadderEvent, LadderStats, LadderStatus, OrderCommand, OrderKind, OrderPurpose,
    OrderRef, OrderRequest, PositionSnapshot, Rung, Side, SignalIntent, EPSILON,
};

/// Why the controller is liquidating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Signal,
    TakeProfit,
    StopLoss,
}

impl From<RiskTrigger> for CloseReason {
    fn from(trigger: RiskTrigger) -> Self {
        match trigger {
            RiskTrigger::TakeProfit => CloseReason::TakeProfit,
            RiskTrigger::StopLoss => CloseReason::StopLoss,
        }
    }
}

/// Everything the controller knows about one instrument
#[derive(Debug, Clone, Serialize)]
pub struct LadderState {
    pub status: LadderStatus,
    pub trading_enabled: bool,
    pub long: DirectionBasket,
    pub short: DirectionBasket,
    pub last_price: Option<f64>,
    pub snapshot: Option<PositionSnapshot>,
    /// Sides with a liquidation in flight
    pub liquidating: Vec<Side>,
    pub close_reason: Option<CloseReason>,
    pub stats: LadderStats,
}

impl LadderState {
    pub fn new() -> Self {
        Self {
            status: LadderStatus::Idle,
            trading_enabled: true,
            long: DirectionBasket::new(Side::Long),
            short: DirectionBasket::new(Side::Short),
            last_price: None,
            snapshot: None,
            liquidating: Vec::new(),
            close_reason: None,
            stats: LadderStats::default(),
        }
    }

    pub fn basket(&self, side: Side) -> &DirectionBasket {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    pub fn basket_mut(&mut self, side: Side) -> &mut DirectionBasket {
        match side {
            Side::Long => &mut self.long,
            Side::Short => &mut self.short,
        }
    }

    /// Signed net volume held by both baskets
    pub fn net_volume(&self) -> f64 {
        self.long.open_volume() - self.short.open_volume()
    }

    pub fn has_open_volume(&self) -> bool {
        !self.long.is_flat() || !self.short.is_flat()
    }

    pub fn is_idle(&self) -> bool {
        self.long.is_idle() && self.short.is_idle()
    }
}

impl Default for LadderState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-basket part of [`LadderSummary`]
#[derive(Debug, Clone, Serialize)]
pub struct BasketSummary {
    pub side: Side,
    pub stages: u32,
    pub rungs: usize,
    pub open_volume: f64,
    pub average_price: Option<f64>,
    pub active_stop: Option<f64>,
    pub floating_pnl: f64,
}

impl BasketSummary {
    fn new(basket: &DirectionBasket, price: Option<f64>) -> Self {
        Self {
            side: basket.side,
            stages: basket.stage_count(),
            rungs: basket.rungs().len(),
            open_volume: basket.open_volume(),
            average_price: basket.weighted_average_price(),
            active_stop: basket.active_stop(),
            floating_pnl: price.map(|p| basket.floating_profit(p)).unwrap_or(0.0),
        }
    }
}

/// Point-in-time summary for logging and reporting
#[derive(Debug, Clone, Serialize)]
pub struct LadderSummary {
    pub instrument: String,
    pub status: LadderStatus,
    pub trading_enabled: bool,
    pub last_price: Option<f64>,
    pub long: BasketSummary,
    pub short: BasketSummary,
    pub stats: LadderStats,
    pub generated_at: DateTime<Utc>,
}

/// Ladder controller for one instrument
pub struct LadderController {
    config: LadderConfig,
    precision: InstrumentPrecision,
    stops: StopSynchronizer,
    risk: BasketRiskEvaluator,
    fills: FillTracker,
    /// Protective stop distance in price units
    stop_offset: f64,
    /// Level distance in price units
    level_distance: f64,
    /// A mismatching snapshot is waiting for a price to rebuild at
    reconcile_deferred: bool,
    state: LadderState,
}

impl LadderController {
    /// Create a controller; fails on an invalid configuration
    pub fn new(config: LadderConfig, meta: &InstrumentMeta) -> LadderResult<Self> {
        config.validate()?;

        let precision = InstrumentPrecision::from_meta(meta, config.volume_rounding);
        let stops = StopSynchronizer::from_config(&config, &precision);
        let risk = BasketRiskEvaluator::new(config.risk, precision.price_step);
        let fills = FillTracker::new(config.fill_memory);
        let stop_offset = precision.steps_to_price(config.stop_offset_steps);
        let level_distance = precision.steps_to_price(config.level_distance_steps);

        info!(
            "Ladder for {}: mode={:?}, base_volume={}, max_stages={}, level_distance={}, stop_offset={}",
            config.instrument, config.entry_mode, config.base_volume, config.max_stages, level_distance, stop_offset
        );

        Ok(Self {
            config,
            precision,
            stops,
            risk,
            fills,
            stop_offset,
            level_distance,
            reconcile_deferred: false,
            state: LadderState::new(),
        })
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    pub fn precision(&self) -> &InstrumentPrecision {
        &self.precision
    }

    pub fn state(&self) -> &LadderState {
        &self.state
    }

    pub fn status(&self) -> LadderStatus {
        self.state.status
    }

    pub fn basket(&self, side: Side) -> &DirectionBasket {
        self.state.basket(side)
    }

    pub fn stats(&self) -> &LadderStats {
        &self.state.stats
    }

    pub fn summary(&self) -> LadderSummary {
        LadderSummary {
            instrument: self.config.instrument.clone(),
            status: self.state.status,
            trading_enabled: self.state.trading_enabled,
            last_price: self.state.last_price,
            long: BasketSummary::new(&self.state.long, self.state.last_price),
            short: BasketSummary::new(&self.state.short, self.state.last_price),
            stats: self.state.stats.clone(),
            generated_at: Utc::now(),
        }
    }

    /// Process one event to completion
    pub fn handle(&mut self, event: LadderEvent) -> Vec<OrderCommand> {
        match event {
            LadderEvent::Tick(price) => self.on_price(price),
            LadderEvent::Candle(candle) => self.on_candle(&candle),
            LadderEvent::Fill(fill) => self.on_fill(&fill),
            LadderEvent::OrderRejected { order_ref, reason } => self.on_rejected(order_ref, &reason),
            LadderEvent::Position(snapshot) => self.on_position(snapshot),
            LadderEvent::Signal(intent) => self.on_signal(intent),
        }
    }

    fn set_status(&mut self, status: LadderStatus) {
        if self.state.status != status {
            info!("{} ladder status {:?} -> {:?}", self.config.instrument, self.state.status, status);
            self.state.status = status;
        }
    }

    fn equity(&self) -> Option<f64> {
        self.state.snapshot.map(|s| s.equity)
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    fn on_signal(&mut self, intent: SignalIntent) -> Vec<OrderCommand> {
        let mut commands = Vec::new();
        match intent {
            SignalIntent::RequestOpen(side) => self.request_open(side, &mut commands),
            SignalIntent::RequestClose(side) => {
                if self.state.basket(side).is_idle() {
                    debug!("Close request for idle {} basket ignored", side);
                } else {
                    self.begin_liquidation(&[side], CloseReason::Signal, &mut commands);
                }
            }
            SignalIntent::TradeAgain => {
                if !self.state.trading_enabled {
                    info!("Trading re-enabled");
                }
                self.state.trading_enabled = true;
                if self.state.status == LadderStatus::Cooldown {
                    self.set_status(LadderStatus::Idle);
                }
            }
        }
        commands
    }

    fn request_open(&mut self, side: Side, commands: &mut Vec<OrderCommand>) {
        if !self.state.trading_enabled {
            info!("Open {} ignored: trading disabled", side);
            return;
        }
        if !self.config.direction.allows(side) {
            debug!("Open {} ignored: direction filter {:?}", side, self.config.direction);
            return;
        }

        let status = self.state.status;
        let hedge = self.config.allow_hedging && status.is_managing() && self.state.basket(side).is_idle();
        if !status.accepts_new_basket() && !hedge {
            debug!("Open {} ignored in {:?}", side, status);
            return;
        }

        let Some(price) = self.state.last_price else {
            warn!("Open {} ignored: no price seen yet", side);
            return;
        };

        self.start_basket(side, price, commands);
    }

    /// Schedule stage 1 at market and, for ladder modes, the pre-placed levels
    fn start_basket(&mut self, side: Side, price: f64, commands: &mut Vec<OrderCommand>) {
        let raw = stage_volume(self.config.base_volume, &self.config.volume_progression, 1);
        let Some(volume) = self.precision.normalize_volume(raw) else {
            warn!("Stage 1 volume {} normalizes to nothing, not opening {}", raw, side);
            return;
        };

        let precision = self.precision;
        let stop_offset = self.stop_offset;
        let start_equity = self.equity();
        let basket = self.state.basket_mut(side);
        basket.set_start_equity(start_equity);

        let first = basket.schedule(volume, stop_offset, OrderKind::Market);
        if let Some(request) = entry_request(first, &precision) {
            commands.push(OrderCommand::Place(request));
        }

        if self.config.entry_mode.pre_places_levels() {
            for stage in 2..=self.config.max_stages {
                let offset = stage_offset(self.level_distance, &self.config.spacing_progression, stage);
                let kind = match self.config.entry_mode {
                    EntryMode::PyramidStops => OrderKind::Stop {
                        trigger: precision.normalize_price(side.favorable_price(price, offset)),
                    },
                    _ => OrderKind::Limit {
                        price: precision.normalize_price(side.adverse_price(price, offset)),
                    },
                };

                let raw = stage_volume(self.config.base_volume, &self.config.volume_progression, stage);
                let basket = self.state.basket_mut(side);
                let Some(volume) = precision.normalize_volume(raw) else {
                    warn!("Stage {} volume {} normalizes to nothing, skipping level", stage, raw);
                    basket.skip_stage();
                    continue;
                };
                let rung = basket.schedule(volume, stop_offset, kind);
                if let Some(request) = entry_request(rung, &precision) {
                    commands.push(OrderCommand::Place(request));
                }
            }
        }

        info!(
            "Opening {} {} basket at {} with {} order(s)",
            self.config.instrument,
            side,
            price,
            commands.len()
        );

        if self.state.status == LadderStatus::Idle {
            self.set_status(LadderStatus::Building);
        }
    }

    // ------------------------------------------------------------------
    // Prices
    // ------------------------------------------------------------------

    fn on_candle(&mut self, candle: &Candle) -> Vec<OrderCommand> {
        if !candle.finished && !self.config.evaluate_unfinished_candles {
            return Vec::new();
        }
        self.on_price(candle.close)
    }

    fn on_price(&mut self, price: f64) -> Vec<OrderCommand> {
        if !price.is_finite() || price <= 0.0 {
            warn!("Ignoring invalid price {}", price);
            return Vec::new();
        }
        self.state.last_price = Some(price);

        let deferred = self.state.snapshot.filter(|_| self.reconcile_deferred);
        let mut commands = match deferred {
            Some(snapshot) => self.reconcile(snapshot),
            None => Vec::new(),
        };

        if matches!(self.state.status, LadderStatus::Idle | LadderStatus::Cooldown) {
            return commands;
        }
        if self.state.status == LadderStatus::Liquidating {
            self.retry_liquidation(&mut commands);
        }

        let verdicts = self.risk.evaluate(&self.state.long, &self.state.short, price, self.equity());
        for verdict in verdicts {
            if verdict.sides.iter().all(|side| self.state.liquidating.contains(side)) {
                continue;
            }
            info!(
                "{:?} hit for {:?}: profit {:.4} vs threshold {:.4}",
                verdict.trigger, verdict.sides, verdict.profit, verdict.threshold
            );
            self.begin_liquidation(&verdict.sides, verdict.trigger.into(), &mut commands);
        }

        // baskets not being closed keep their ladder and stop
        for side in [Side::Long, Side::Short] {
            if self.state.liquidating.contains(&side) {
                continue;
            }
            self.reissue_entries(side, &mut commands);
            if self.config.entry_mode == EntryMode::Averaging {
                self.maybe_add_stage(side, price, &mut commands);
            }
            self.sync_stops(side, price, &mut commands);
        }
        commands
    }

    /// Re-send entry orders cleared by a rejection
    fn reissue_entries(&mut self, side: Side, commands: &mut Vec<OrderCommand>) {
        let precision = self.precision;
        for rung in self.state.basket_mut(side).rungs_mut().iter_mut() {
            if !rung.needs_entry_order() {
                continue;
            }
            if let Some(request) = entry_request(rung, &precision) {
                debug!("Re-issuing level {} entry ({} rejections)", rung.index, rung.rejections);
                commands.push(OrderCommand::Place(request));
            }
        }
    }

    /// Averaging mode: add the next stage at market once price moved far enough
    fn maybe_add_stage(&mut self, side: Side, price: f64, commands: &mut Vec<OrderCommand>) {
        let basket = self.state.basket(side);
        if basket.is_flat() || basket.has_working_entries() || basket.stage_count() >= self.config.max_stages {
            return;
        }

        let next = basket.stage_count() + 1;
        let Some(adverse) = basket.adverse_excursion(price) else {
            return;
        };
        let required = stage_offset(self.level_distance, &self.config.spacing_progression, next);
        if adverse + EPSILON < required {
            return;
        }

        if self.config.require_profit_for_next_stage && !self.profit_gate_open(side) {
            debug!("Stage {} for {} held back: equity below baseline", next, side);
            return;
        }

        let raw = stage_volume(self.config.base_volume, &self.config.volume_progression, next);
        let precision = self.precision;
        let stop_offset = self.stop_offset;
        let basket = self.state.basket_mut(side);

        let Some(volume) = precision.normalize_volume(raw) else {
            warn!("Stage {} volume {} normalizes to nothing, skipping", next, raw);
            basket.skip_stage();
            return;
        };

        let rung = basket.schedule(volume, stop_offset, OrderKind::Market);
        if let Some(request) = entry_request(rung, &precision) {
            info!(
                "Adding {} stage {} volume {} after adverse move {:.5}",
                side, next, volume, adverse
            );
            commands.push(OrderCommand::Place(request));
        }
    }

    fn profit_gate_open(&self, side: Side) -> bool {
        let Some(snapshot) = self.state.snapshot else {
            return false;
        };
        let baseline = match self.config.profit_baseline {
            ProfitBaseline::Balance => Some(snapshot.balance),
            ProfitBaseline::BasketStartEquity => self.state.basket(side).start_equity(),
        };
        baseline.is_some_and(|baseline| snapshot.equity > baseline)
    }

    fn sync_stops(&mut self, side: Side, price: f64, commands: &mut Vec<OrderCommand>) {
        if !self.stops.is_enabled() || self.state.liquidating.contains(&side) {
            return;
        }
        let (stops, precision) = (self.stops, self.precision);
        let basket = self.state.basket_mut(side);
        if basket.is_flat() {
            return;
        }
        stops.update(basket, price, &precision);
        commands.extend(stops.publish(basket, &precision));
    }

    // ------------------------------------------------------------------
    // Fills and rejections
    // ------------------------------------------------------------------

    fn on_fill(&mut self, fill: &Fill) -> Vec<OrderCommand> {
        let outcome = self
            .fills
            .apply(fill, &mut self.state.long, &mut self.state.short, self.stop_offset);
        self.state.stats.duplicate_fills = self.fills.duplicates();
        let Some(outcome) = outcome else {
            return Vec::new();
        };

        info!(
            "Fill {} {} {} @ {} (order {})",
            fill.trade_id,
            fill.side.as_str(),
            fill.volume,
            fill.price,
            fill.order_ref
        );

        self.state.stats.fills_processed += 1;
        self.state.stats.add_realized(outcome.realized_pnl);

        let mut commands: Vec<OrderCommand> = outcome.stale_orders.into_iter().map(OrderCommand::Cancel).collect();

        if let Some(side) = outcome.liquidation_done {
            debug!("{} liquidation order completely filled", side);
        }
        for side in &outcome.flattened {
            self.state.stats.baskets_closed += 1;
            info!(
                "{} basket closed, realized P&L now {:.4}",
                side, self.state.stats.realized_pnl
            );
        }

        if self.state.status == LadderStatus::Liquidating {
            // volume left behind by late fills gets a fresh close order
            self.retry_liquidation(&mut commands);
        }
        let price = self.state.last_price.unwrap_or(fill.price);
        for side in [Side::Long, Side::Short] {
            self.sync_stops(side, price, &mut commands);
        }
        self.settle_status();
        commands
    }

    fn on_rejected(&mut self, order_ref: OrderRef, reason: &str) -> Vec<OrderCommand> {
        warn!("Order {} rejected: {}", order_ref, reason);
        let max_retries = self.config.max_order_retries;

        for side in [Side::Long, Side::Short] {
            let basket = self.state.basket_mut(side);

            if basket.liquidation_ref() == Some(order_ref) {
                basket.forget_liquidation();
                return Vec::new();
            }

            if let Some(position) = basket.position_of_exit(order_ref) {
                let rung = &mut basket.rungs_mut()[position];
                rung.exit_order_ref = None;
                rung.published_exit = None;
                return Vec::new();
            }

            if let Some(position) = basket.position_of_entry(order_ref) {
                let rung = &mut basket.rungs_mut()[position];
                rung.entry_order_ref = None;
                rung.rejections += 1;

                let abandoned = rung.rejections >= max_retries;
                if abandoned {
                    rung.abandoned = true;
                    warn!(
                        "Abandoning {} level {} after {} rejections",
                        side, rung.index, rung.rejections
                    );
                    basket.prune();
                    self.state.stats.abandoned_levels += 1;
                    self.settle_status();
                }
                return Vec::new();
            }
        }

        debug!("Rejection for unknown order {}", order_ref);
        Vec::new()
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn on_position(&mut self, snapshot: PositionSnapshot) -> Vec<OrderCommand> {
        if !snapshot.net_volume.is_finite() {
            warn!("Ignoring position snapshot with invalid volume");
            return Vec::new();
        }
        self.state.snapshot = Some(snapshot);
        self.reconcile(snapshot)
    }

    /// Rebuild the baskets from the broker position when the volumes disagree
    fn reconcile(&mut self, snapshot: PositionSnapshot) -> Vec<OrderCommand> {
        self.reconcile_deferred = false;
        let tracked = self.state.net_volume();
        if self.precision.same_volume(tracked, snapshot.net_volume) {
            return Vec::new();
        }

        let (keep, volume) = if snapshot.net_volume > 0.0 {
            (Side::Long, snapshot.net_volume)
        } else {
            (Side::Short, -snapshot.net_volume)
        };
        let volume = if volume < self.precision.volume_step / 2.0 { 0.0 } else { volume };

        let known_price = if snapshot.average_price > 0.0 {
            Some(snapshot.average_price)
        } else {
            self.state.last_price
        };
        let price = match known_price {
            Some(price) => price,
            None if volume <= EPSILON => 0.0,
            None => {
                warn!(
                    "Position mismatch on {} with no price known, rebuilding on the next price",
                    self.config.instrument
                );
                self.reconcile_deferred = true;
                return Vec::new();
            }
        };

        warn!(
            "Position mismatch on {}: tracked {:.6}, broker {:.6}; rebuilding baskets",
            self.config.instrument, tracked, snapshot.net_volume
        );
        self.state.stats.reconciliations += 1;

        let stop_offset = self.stop_offset;
        let mut refs = self.state.basket_mut(keep.opposite()).clear();
        refs.extend(self.state.basket_mut(keep).rebuild(volume, price, stop_offset));

        let mut commands: Vec<OrderCommand> = refs.into_iter().map(OrderCommand::Cancel).collect();
        match self.state.status {
            LadderStatus::Liquidating => self.finish_liquidation_if_done(&mut commands),
            _ => self.settle_status(),
        }
        commands
    }

    // ------------------------------------------------------------------
    // Liquidation
    // ------------------------------------------------------------------

    /// Cancel every pending order of the sides and close their open volume at market
    fn begin_liquidation(&mut self, sides: &[Side], reason: CloseReason, commands: &mut Vec<OrderCommand>) {
        let mut started = false;

        for &side in sides {
            if self.state.liquidating.contains(&side) {
                continue;
            }
            let basket = self.state.basket_mut(side);
            if basket.is_idle() {
                continue;
            }

            for rung in basket.rungs_mut().iter_mut() {
                if let Some(entry) = rung.entry_order_ref.take() {
                    commands.push(OrderCommand::Cancel(entry));
                }
                rung.planned_volume = rung.entry_filled;
                if let Some(exit) = rung.exit_order_ref.take() {
                    commands.push(OrderCommand::Cancel(exit));
                }
                rung.published_exit = None;
            }
            basket.prune();

            started = true;
            self.state.liquidating.push(side);
            if !self.state.basket(side).is_flat() {
                self.send_liquidation(side, commands);
            }
        }

        if !started {
            return;
        }

        match reason {
            CloseReason::TakeProfit => self.state.stats.take_profits += 1,
            CloseReason::StopLoss => {
                self.state.stats.stop_losses += 1;
                if self.config.risk.no_reentry_after_loss {
                    warn!("Stop-loss hit, trading disabled until trade-again");
                    self.state.trading_enabled = false;
                }
            }
            CloseReason::Signal => {}
        }
        if self.state.close_reason != Some(CloseReason::StopLoss) {
            self.state.close_reason = Some(reason);
        }

        self.set_status(LadderStatus::Liquidating);
        self.finish_liquidation_if_done(commands);
    }

    /// Close the open volume at market, one valid lot size at a time
    fn send_liquidation(&mut self, side: Side, commands: &mut Vec<OrderCommand>) {
        let price = self.state.last_price;
        let precision = self.precision;
        let basket = self.state.basket_mut(side);
        let open = basket.open_volume();

        let Some(volume) = precision.closable_volume(open) else {
            // a remainder below one lot cannot be sent; the next snapshot reconciles it
            let exit_price = price.or(basket.weighted_average_price()).unwrap_or(0.0);
            warn!("{} basket remainder {} is below one lot, writing it off at {}", side, open, exit_price);
            let reduction = basket.reduce_fifo(open, exit_price);
            commands.extend(reduction.orphaned_exits.into_iter().map(OrderCommand::Cancel));
            self.state.stats.add_realized(reduction.realized_pnl);
            if self.state.basket(side).is_flat() {
                self.state.stats.baskets_closed += 1;
            }
            return;
        };

        let request = OrderRequest::new(side.exit_side(), OrderKind::Market, volume, OrderPurpose::Liquidation);
        basket.track_liquidation(request.order_ref, volume);
        info!("Liquidating {} basket: {} {} at market", side, request.side.as_str(), volume);
        commands.push(OrderCommand::Place(request));
    }

    /// Send a new close for liquidating baskets that hold volume with no close order working
    fn retry_liquidation(&mut self, commands: &mut Vec<OrderCommand>) {
        for side in self.state.liquidating.clone() {
            let basket = self.state.basket(side);
            if !basket.is_flat() && basket.liquidation_ref().is_none() {
                self.send_liquidation(side, commands);
            }
        }
        self.finish_liquidation_if_done(commands);
    }

    fn finish_liquidation_if_done(&mut self, commands: &mut Vec<OrderCommand>) {
        if self.state.status != LadderStatus::Liquidating {
            return;
        }
        if self.state.liquidating.iter().any(|side| !self.state.basket(*side).is_flat()) {
            return;
        }

        for side in std::mem::take(&mut self.state.liquidating) {
            commands.extend(self.state.basket_mut(side).clear().into_iter().map(OrderCommand::Cancel));
        }

        let reason = self.state.close_reason.take();
        let next = if self.state.has_open_volume() {
            LadderStatus::Active
        } else if !self.state.is_idle() {
            LadderStatus::Building
        } else if !self.state.trading_enabled
            || (reason == Some(CloseReason::TakeProfit) && !self.config.risk.trade_again_after_profit)
        {
            LadderStatus::Cooldown
        } else {
            LadderStatus::Idle
        };
        info!("Liquidation finished ({:?})", reason);
        self.set_status(next);
    }

    /// Align the status with basket contents outside of liquidation
    fn settle_status(&mut self) {
        let next = match self.state.status {
            LadderStatus::Liquidating => return,
            _ if self.state.has_open_volume() => LadderStatus::Active,
            LadderStatus::Building | LadderStatus::Active if self.state.is_idle() => LadderStatus::Idle,
            status => status,
        };
        self.set_status(next);
    }
}

/// Entry order for the unfilled part of a rung; binds the new reference to it
fn entry_request(rung: &mut Rung, precision: &InstrumentPrecision) -> Option<OrderRequest> {
    let Some(volume) = precision.normalize_volume(rung.unfilled_volume()) else {
        // remainder below one lot: the level counts as filled
        rung.planned_volume = rung.entry_filled;
        return None;
    };
    let request = OrderRequest::new(rung.side.entry_side(), rung.entry_kind, volume, OrderPurpose::Entry)
        .at_level(rung.index);
    rung.entry_order_ref = Some(request.order_ref);
    Some(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::config::{DirectionFilter, RiskConfig, RiskMode};
    use crate::ladder::errors::LadderError;
    use crate::ladder::progression::Progression;
    use proptest::prelude::*;

    fn meta(price_step: f64) -> InstrumentMeta {
        InstrumentMeta {
            price_step: Some(price_step),
            volume_step: Some(1.0),
            min_volume: Some(1.0),
            max_volume: Some(1000.0),
        }
    }

    fn martingale() -> LadderConfig {
        LadderConfig::new("TEST")
            .with_volumes(1.0, Progression::Geometric { multiplier: 2.0 })
            .with_spacing(10.0, Progression::Fixed)
            .with_max_stages(3)
    }

    fn places(commands: &[OrderCommand]) -> Vec<OrderRequest> {
        commands.iter().filter_map(|c| c.as_place().cloned()).collect()
    }

    fn cancels(commands: &[OrderCommand]) -> usize {
        commands.iter().filter(|c| matches!(c, OrderCommand::Cancel(_))).count()
    }

    struct Harness {
        controller: LadderController,
        trade_id: u64,
    }

    impl Harness {
        fn new(config: LadderConfig, price_step: f64) -> Self {
            Self {
                controller: LadderController::new(config, &meta(price_step)).unwrap(),
                trade_id: 0,
            }
        }

        fn tick(&mut self, price: f64) -> Vec<OrderCommand> {
            self.controller.handle(LadderEvent::Tick(price))
        }

        fn signal(&mut self, intent: SignalIntent) -> Vec<OrderCommand> {
            self.controller.handle(LadderEvent::Signal(intent))
        }

        fn fill(&mut self, request: &OrderRequest, price: f64) -> Vec<OrderCommand> {
            self.trade_id += 1;
            let fill = Fill::new(request.order_ref, self.trade_id, request.side, price, request.volume);
            self.controller.handle(LadderEvent::Fill(fill))
        }

        /// Fill every market order in `commands` at `price`
        fn fill_markets(&mut self, commands: &[OrderCommand], price: f64) -> Vec<OrderCommand> {
            let mut out = Vec::new();
            for request in places(commands).iter().filter(|r| r.kind.is_market()) {
                out.extend(self.fill(request, price));
            }
            out
        }

        fn open(&mut self, side: Side, price: f64) -> Vec<OrderCommand> {
            self.tick(price);
            self.signal(SignalIntent::RequestOpen(side))
        }

        fn long(&self) -> &DirectionBasket {
            self.controller.basket(Side::Long)
        }
    }

    #[test]
    fn test_martingale_stage_scenario() {
        let mut h = Harness::new(martingale(), 1.0);

        let commands = h.open(Side::Long, 100.0);
        let first = places(&commands);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, OrderKind::Market);
        assert_eq!(first[0].side, crate::ladder::types::OrderSide::Buy);
        assert_eq!(first[0].volume, 1.0);
        assert_eq!(h.controller.status(), LadderStatus::Building);

        h.fill_markets(&commands, 100.0);
        assert_eq!(h.controller.status(), LadderStatus::Active);

        assert!(places(&h.tick(95.0)).is_empty());

        let stage2 = h.tick(90.0);
        let stage2_orders = places(&stage2);
        assert_eq!(stage2_orders.len(), 1);
        assert_eq!(stage2_orders[0].volume, 2.0);
        assert_eq!(stage2_orders[0].level, Some(2));
        // nothing more while stage 2 is working
        assert!(places(&h.tick(89.0)).is_empty());
        h.fill_markets(&stage2, 90.0);

        assert!(places(&h.tick(85.0)).is_empty());
        let stage3 = h.tick(80.0);
        assert_eq!(places(&stage3)[0].volume, 4.0);
        h.fill_markets(&stage3, 80.0);

        assert!(places(&h.tick(70.0)).is_empty());
        assert!(places(&h.tick(50.0)).is_empty());

        let long = h.long();
        assert_eq!(long.stage_count(), 3);
        assert!((long.open_volume() - 7.0).abs() < 1e-9);
        let expected = (100.0 + 90.0 * 2.0 + 80.0 * 4.0) / 7.0;
        assert!((long.weighted_average_price().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_pre_placed_pyramid_levels() {
        let config = LadderConfig::new("TEST")
            .with_entry_mode(EntryMode::PyramidStops)
            .with_spacing(10.0, Progression::Fixed)
            .with_max_stages(3);
        let mut h = Harness::new(config, 1.0);

        let orders = places(&h.open(Side::Long, 100.0));
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].kind, OrderKind::Market);
        assert_eq!(orders[1].kind, OrderKind::Stop { trigger: 110.0 });
        assert_eq!(orders[2].kind, OrderKind::Stop { trigger: 120.0 });
        assert!(orders.iter().all(|o| o.purpose == OrderPurpose::Entry));
        assert_eq!(h.long().stage_count(), 3);
    }

    #[test]
    fn test_pre_placed_averaging_limits_short() {
        let config = LadderConfig::new("TEST")
            .with_entry_mode(EntryMode::AveragingLimits)
            .with_spacing(10.0, Progression::Fibonacci)
            .with_volumes(1.0, Progression::Fibonacci)
            .with_max_stages(3);
        let mut h = Harness::new(config, 1.0);

        let orders = places(&h.open(Side::Short, 100.0));
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].side, crate::ladder::types::OrderSide::Sell);
        assert_eq!(orders[1].kind, OrderKind::Limit { price: 110.0 });
        assert_eq!(orders[1].volume, 2.0);
        // spacing gaps of 1 and 2 levels
        assert_eq!(orders[2].kind, OrderKind::Limit { price: 130.0 });
        assert_eq!(orders[2].volume, 3.0);
    }

    #[test]
    fn test_take_profit_scenario() {
        let config = LadderConfig::new("TEST")
            .with_volumes(1.0, Progression::Geometric { multiplier: 2.0 })
            .with_spacing(1000.0, Progression::Fixed)
            .with_max_stages(2)
            .with_risk(RiskConfig {
                mode: RiskMode::Currency,
                take_profit: Some(200.0),
                ..RiskConfig::default()
            });
        let mut h = Harness::new(config, 0.01);

        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);
        let stage2 = h.tick(90.0);
        h.fill_markets(&stage2, 90.0);
        assert!((h.long().weighted_average_price().unwrap() - 93.333_333).abs() < 1e-5);

        assert!(places(&h.tick(159.9)).is_empty());
        assert_eq!(h.controller.status(), LadderStatus::Active);

        let closing = h.tick(160.01);
        let orders = places(&closing);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].purpose, OrderPurpose::Liquidation);
        assert_eq!(orders[0].kind, OrderKind::Market);
        assert_eq!(orders[0].volume, 3.0);
        assert_eq!(h.controller.status(), LadderStatus::Liquidating);
        assert_eq!(h.controller.stats().take_profits, 1);

        // a second evaluation while liquidating sends nothing new
        assert!(h.tick(161.0).is_empty());

        h.fill(&orders[0], 160.01);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!(h.controller.state().trading_enabled);
        assert_eq!(h.controller.stats().baskets_closed, 1);
        assert!((h.controller.stats().realized_pnl - 200.03).abs() < 1e-6);
        assert!(h.long().is_idle());
    }

    #[test]
    fn test_take_profit_enters_cooldown_without_trade_again() {
        let config = LadderConfig::new("TEST").with_max_stages(1).with_risk(RiskConfig {
            take_profit: Some(10.0),
            trade_again_after_profit: false,
            ..RiskConfig::default()
        });
        let mut h = Harness::new(config, 1.0);

        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);
        let closing = h.tick(111.0);
        h.fill_markets(&closing, 111.0);

        assert_eq!(h.controller.status(), LadderStatus::Cooldown);
        assert!(h.signal(SignalIntent::RequestOpen(Side::Long)).is_empty());

        h.signal(SignalIntent::TradeAgain);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert_eq!(places(&h.signal(SignalIntent::RequestOpen(Side::Long))).len(), 1);
    }

    #[test]
    fn test_stop_loss_disables_trading() {
        let config = LadderConfig::new("TEST").with_max_stages(1).with_risk(RiskConfig {
            stop_loss: Some(20.0),
            no_reentry_after_loss: true,
            ..RiskConfig::default()
        });
        let mut h = Harness::new(config, 1.0);

        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);
        assert!(places(&h.tick(81.0)).is_empty());

        let closing = h.tick(79.0);
        assert_eq!(places(&closing)[0].purpose, OrderPurpose::Liquidation);
        h.fill_markets(&closing, 79.0);

        assert_eq!(h.controller.stats().stop_losses, 1);
        assert!(!h.controller.state().trading_enabled);
        assert_eq!(h.controller.status(), LadderStatus::Cooldown);
        assert!(h.signal(SignalIntent::RequestOpen(Side::Long)).is_empty());

        h.signal(SignalIntent::TradeAgain);
        assert!(h.controller.state().trading_enabled);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
    }

    #[test]
    fn test_shared_stop_published_per_rung_and_stop_out() {
        let config = martingale().with_stop_offset(15.0);
        let mut h = Harness::new(config, 1.0);

        let commands = h.open(Side::Long, 100.0);
        let after_fill = h.fill_markets(&commands, 100.0);
        let stops = places(&after_fill);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].kind, OrderKind::Stop { trigger: 85.0 });
        assert_eq!(stops[0].purpose, OrderPurpose::Exit);

        let stage2 = h.tick(90.0);
        assert_eq!(places(&stage2).len(), 1, "no stop churn while the stop is unchanged");
        let after_fill = h.fill_markets(&stage2, 90.0);
        let stop2 = places(&after_fill);
        assert_eq!(stop2.len(), 1);
        assert_eq!(stop2[0].kind, OrderKind::Stop { trigger: 85.0 });
        assert_eq!(stop2[0].volume, 2.0);
        assert_eq!(h.long().active_stop(), Some(85.0));

        h.fill(&stops[0], 85.0);
        assert_eq!(h.controller.status(), LadderStatus::Active);
        h.fill(&stop2[0], 85.0);

        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!(h.long().is_idle());
        assert!((h.controller.stats().realized_pnl + 25.0).abs() < 1e-9);
        assert_eq!(h.controller.stats().baskets_closed, 1);
    }

    #[test]
    fn test_rejection_retry_and_abandon() {
        let config = martingale().with_max_order_retries(2);
        let mut h = Harness::new(config, 1.0);

        let first = places(&h.open(Side::Long, 100.0)).remove(0);
        h.controller.handle(LadderEvent::OrderRejected {
            order_ref: first.order_ref,
            reason: "margin".into(),
        });
        assert_eq!(h.controller.status(), LadderStatus::Building);

        let retry = places(&h.tick(100.0));
        assert_eq!(retry.len(), 1);
        assert_ne!(retry[0].order_ref, first.order_ref);
        assert_eq!(retry[0].level, Some(1));

        h.controller.handle(LadderEvent::OrderRejected {
            order_ref: retry[0].order_ref,
            reason: "margin".into(),
        });
        assert_eq!(h.controller.stats().abandoned_levels, 1);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!(h.tick(100.0).is_empty());
    }

    #[test]
    fn test_reconciliation_rebuilds_from_snapshot() {
        let mut h = Harness::new(martingale(), 1.0);
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);

        let snapshot = |net_volume: f64, average_price: f64| {
            LadderEvent::Position(PositionSnapshot {
                net_volume,
                average_price,
                equity: 1000.0,
                balance: 1000.0,
            })
        };

        // in sync: nothing happens
        h.controller.handle(snapshot(1.0, 100.0));
        assert_eq!(h.controller.stats().reconciliations, 0);

        h.controller.handle(snapshot(3.0, 95.0));
        assert_eq!(h.controller.stats().reconciliations, 1);
        assert!((h.long().open_volume() - 3.0).abs() < 1e-9);
        assert_eq!(h.long().weighted_average_price(), Some(95.0));
        assert_eq!(h.long().rungs().len(), 1);

        h.controller.handle(snapshot(-2.0, 96.0));
        assert!(h.long().is_idle());
        assert!((h.controller.basket(Side::Short).open_volume() - 2.0).abs() < 1e-9);
        assert_eq!(h.controller.status(), LadderStatus::Active);

        h.controller.handle(snapshot(0.0, 0.0));
        assert_eq!(h.controller.stats().reconciliations, 3);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
    }

    #[test]
    fn test_existing_position_adopted_on_startup() {
        let mut h = Harness::new(martingale().with_stop_offset(5.0), 1.0);
        h.controller.handle(LadderEvent::Position(PositionSnapshot {
            net_volume: 2.0,
            average_price: 50.0,
            equity: 100.0,
            balance: 100.0,
        }));
        assert_eq!(h.controller.status(), LadderStatus::Active);

        let stops = places(&h.tick(51.0));
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].kind, OrderKind::Stop { trigger: 45.0 });
        assert_eq!(stops[0].volume, 2.0);
    }

    #[test]
    fn test_duplicate_fill_counted_once() {
        let mut h = Harness::new(martingale(), 1.0);
        let order = places(&h.open(Side::Long, 100.0)).remove(0);

        let fill = Fill::new(order.order_ref, 42, order.side, 100.0, 1.0);
        h.controller.handle(LadderEvent::Fill(fill.clone()));
        h.controller.handle(LadderEvent::Fill(fill));

        assert!((h.long().open_volume() - 1.0).abs() < 1e-9);
        assert_eq!(h.controller.stats().fills_processed, 1);
        assert_eq!(h.controller.stats().duplicate_fills, 1);
    }

    #[test]
    fn test_direction_filter_and_hedging() {
        let mut h = Harness::new(martingale().with_direction(DirectionFilter::LongOnly), 1.0);
        assert!(h.open(Side::Short, 100.0).is_empty());
        assert_eq!(h.controller.status(), LadderStatus::Idle);

        let mut h = Harness::new(martingale(), 1.0);
        h.open(Side::Long, 100.0);
        assert!(h.signal(SignalIntent::RequestOpen(Side::Short)).is_empty());

        let mut h = Harness::new(martingale().with_hedging(true), 1.0);
        h.open(Side::Long, 100.0);
        let hedge = places(&h.signal(SignalIntent::RequestOpen(Side::Short)));
        assert_eq!(hedge.len(), 1);
        assert_eq!(hedge[0].side, crate::ladder::types::OrderSide::Sell);
        // the same side is never opened twice
        assert!(h.signal(SignalIntent::RequestOpen(Side::Long)).is_empty());
    }

    #[test]
    fn test_open_without_price_is_ignored() {
        let mut h = Harness::new(martingale(), 1.0);
        assert!(h.signal(SignalIntent::RequestOpen(Side::Long)).is_empty());
        assert_eq!(h.controller.status(), LadderStatus::Idle);
    }

    #[test]
    fn test_unfinished_candles_are_skipped() {
        let candle = |close: f64, finished: bool| {
            LadderEvent::Candle(Candle {
                open: 100.0,
                high: 100.0,
                low: close,
                close,
                time: Utc::now(),
                finished,
            })
        };

        let mut h = Harness::new(martingale(), 1.0);
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);
        assert!(h.controller.handle(candle(90.0, false)).is_empty());
        assert_eq!(places(&h.controller.handle(candle(90.0, true))).len(), 1);

        let config = martingale();
        let mut h = Harness::new(
            LadderConfig {
                evaluate_unfinished_candles: true,
                ..config
            },
            1.0,
        );
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);
        assert_eq!(places(&h.controller.handle(candle(90.0, false))).len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LadderConfig::new("TEST").with_trailing(10.0, 5.0);
        let result = LadderController::new(config, &meta(1.0));
        assert!(matches!(result, Err(LadderError::InvalidConfig(_))));
    }

    #[test]
    fn test_profit_gate_with_balance_baseline() {
        let config = martingale().with_profit_requirement(ProfitBaseline::Balance);
        let mut h = Harness::new(config, 1.0);
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);

        let snapshot = |equity: f64| {
            LadderEvent::Position(PositionSnapshot {
                net_volume: 1.0,
                average_price: 100.0,
                equity,
                balance: 1000.0,
            })
        };

        h.controller.handle(snapshot(990.0));
        assert!(places(&h.tick(90.0)).is_empty());

        h.controller.handle(snapshot(1010.0));
        assert_eq!(places(&h.tick(90.0)).len(), 1);
    }

    #[test]
    fn test_profit_gate_with_basket_start_equity() {
        let config = martingale().with_profit_requirement(ProfitBaseline::BasketStartEquity);
        let mut h = Harness::new(config, 1.0);
        let snapshot = |net_volume: f64, equity: f64| {
            LadderEvent::Position(PositionSnapshot {
                net_volume,
                average_price: 100.0,
                equity,
                balance: 500.0,
            })
        };

        h.controller.handle(snapshot(0.0, 1000.0));
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);

        // above balance but not above the equity the basket started with
        h.controller.handle(snapshot(1.0, 999.0));
        assert!(places(&h.tick(90.0)).is_empty());

        h.controller.handle(snapshot(1.0, 1001.0));
        assert_eq!(places(&h.tick(90.0)).len(), 1);
    }

    #[test]
    fn test_request_close_cancels_pending_levels() {
        let config = LadderConfig::new("TEST")
            .with_entry_mode(EntryMode::PyramidStops)
            .with_spacing(10.0, Progression::Fixed)
            .with_max_stages(3);
        let mut h = Harness::new(config, 1.0);
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);

        let closing = h.signal(SignalIntent::RequestClose(Side::Long));
        assert_eq!(cancels(&closing), 2);
        let liquidation = places(&closing);
        assert_eq!(liquidation.len(), 1);
        assert_eq!(liquidation[0].purpose, OrderPurpose::Liquidation);
        assert_eq!(liquidation[0].side, crate::ladder::types::OrderSide::Sell);

        // repeated close requests are harmless
        assert!(h.signal(SignalIntent::RequestClose(Side::Long)).is_empty());

        h.fill(&liquidation[0], 101.0);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!((h.controller.stats().realized_pnl - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_while_building_needs_no_market_order() {
        let config = LadderConfig::new("TEST")
            .with_entry_mode(EntryMode::AveragingLimits)
            .with_max_stages(2);
        let mut h = Harness::new(config, 1.0);
        h.open(Side::Long, 100.0);

        let closing = h.signal(SignalIntent::RequestClose(Side::Long));
        assert_eq!(cancels(&closing), 2);
        assert!(places(&closing).is_empty());
        assert_eq!(h.controller.status(), LadderStatus::Idle);
    }

    #[test]
    fn test_rejected_liquidation_is_retried() {
        let mut h = Harness::new(martingale(), 1.0);
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);

        let liquidation = places(&h.signal(SignalIntent::RequestClose(Side::Long))).remove(0);
        h.controller.handle(LadderEvent::OrderRejected {
            order_ref: liquidation.order_ref,
            reason: "market closed".into(),
        });

        let retry = places(&h.tick(100.0));
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].purpose, OrderPurpose::Liquidation);
        assert_ne!(retry[0].order_ref, liquidation.order_ref);
    }

    fn liquidations(commands: &[OrderCommand]) -> Vec<OrderRequest> {
        places(commands)
            .into_iter()
            .filter(|r| r.purpose == OrderPurpose::Liquidation)
            .collect()
    }

    #[test]
    fn test_late_entry_fill_during_liquidation_is_closed() {
        let config = LadderConfig::new("TEST")
            .with_entry_mode(EntryMode::AveragingLimits)
            .with_volumes(1.0, Progression::Fixed)
            .with_spacing(10.0, Progression::Fixed)
            .with_max_stages(2);
        let mut h = Harness::new(config, 1.0);

        let opening = places(&h.open(Side::Long, 100.0));
        let level = opening[1].clone();
        h.fill(&opening[0], 100.0);

        let first_close = liquidations(&h.signal(SignalIntent::RequestClose(Side::Long))).remove(0);
        assert_eq!(first_close.volume, 1.0);

        // the cancelled level filled before the cancel reached the venue
        assert!(liquidations(&h.fill(&level, 90.0)).is_empty());
        assert!((h.long().open_volume() - 2.0).abs() < 1e-9);

        let second = liquidations(&h.fill(&first_close, 95.0));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].volume, 1.0);
        assert_ne!(second[0].order_ref, first_close.order_ref);
        assert_eq!(h.controller.status(), LadderStatus::Liquidating);

        h.fill(&second[0], 96.0);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!(h.long().is_idle());
    }

    #[test]
    fn test_hedge_basket_evaluated_while_other_side_liquidates() {
        let config = LadderConfig::new("TEST")
            .with_volumes(1.0, Progression::Fixed)
            .with_max_stages(1)
            .with_hedging(true)
            .with_risk(RiskConfig {
                mode: RiskMode::Currency,
                take_profit: Some(5.0),
                stop_loss: Some(20.0),
                ..RiskConfig::default()
            });
        let mut h = Harness::new(config, 1.0);

        let long = h.open(Side::Long, 100.0);
        h.fill_markets(&long, 100.0);
        let short = h.signal(SignalIntent::RequestOpen(Side::Short));
        h.fill_markets(&short, 100.0);

        let long_close = liquidations(&h.tick(106.0));
        assert_eq!(long_close.len(), 1);
        assert_eq!(long_close[0].side, crate::ladder::types::OrderSide::Sell);
        assert_eq!(h.controller.status(), LadderStatus::Liquidating);

        // long close still unfilled; the short keeps its own stop-loss
        let short_close = liquidations(&h.tick(130.0));
        assert_eq!(short_close.len(), 1);
        assert_eq!(short_close[0].side, crate::ladder::types::OrderSide::Buy);
        assert_eq!(h.controller.stats().take_profits, 1);
        assert_eq!(h.controller.stats().stop_losses, 1);

        h.fill(&long_close[0], 130.0);
        assert_eq!(h.controller.status(), LadderStatus::Liquidating);
        h.fill(&short_close[0], 130.0);
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!(h.controller.state().is_idle());
    }

    #[test]
    fn test_snapshot_without_price_waits_for_first_tick() {
        let config = martingale().with_risk(RiskConfig {
            mode: RiskMode::Currency,
            take_profit: Some(10.0),
            ..RiskConfig::default()
        });
        let mut h = Harness::new(config, 1.0);

        h.controller.handle(LadderEvent::Position(PositionSnapshot {
            net_volume: 2.0,
            average_price: 0.0,
            equity: 1000.0,
            balance: 1000.0,
        }));
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!(h.long().is_flat());
        assert_eq!(h.controller.stats().reconciliations, 0);

        let commands = h.tick(50.0);
        assert!(liquidations(&commands).is_empty());
        assert_eq!(h.controller.status(), LadderStatus::Active);
        assert_eq!(h.long().weighted_average_price(), Some(50.0));
        assert_eq!(h.controller.stats().reconciliations, 1);
        assert_eq!(h.controller.stats().take_profits, 0);
    }

    #[test]
    fn test_liquidation_volume_snapped_to_lot_step() {
        let meta = InstrumentMeta {
            price_step: Some(1.0),
            volume_step: Some(0.1),
            min_volume: Some(0.1),
            max_volume: Some(100.0),
        };
        let mut h = Harness {
            controller: LadderController::new(martingale(), &meta).unwrap(),
            trade_id: 0,
        };
        h.tick(100.0);
        h.controller.handle(LadderEvent::Position(PositionSnapshot {
            net_volume: 1.25,
            average_price: 100.0,
            equity: 1000.0,
            balance: 1000.0,
        }));

        let close = liquidations(&h.signal(SignalIntent::RequestClose(Side::Long)));
        assert_eq!(close.len(), 1);
        assert!((close[0].volume - 1.2).abs() < 1e-9);

        // the sub-lot remainder cannot be sent and is written off
        let after = h.fill(&close[0], 100.0);
        assert!(liquidations(&after).is_empty());
        assert_eq!(h.controller.status(), LadderStatus::Idle);
        assert!(h.long().is_idle());
        assert_eq!(h.controller.stats().baskets_closed, 1);
    }

    #[test]
    fn test_summary_serializes() {
        let mut h = Harness::new(martingale(), 1.0);
        let commands = h.open(Side::Long, 100.0);
        h.fill_markets(&commands, 100.0);
        h.tick(104.0);

        let json = serde_json::to_value(h.controller.summary()).unwrap();
        assert_eq!(json["status"], "Active");
        assert_eq!(json["long"]["stages"], 1);
        assert_eq!(json["long"]["floating_pnl"], 4.0);
        assert_eq!(json["stats"]["fills_processed"], 1);
    }

    proptest! {
        #[test]
        fn prop_stage_count_never_exceeds_max(
            path in proptest::collection::vec(1.0f64..200.0, 1..80),
            max_stages in 1u32..6,
        ) {
            let config = LadderConfig::new("TEST")
                .with_volumes(1.0, Progression::Arithmetic { increment: 1.0 })
                .with_spacing(1.0, Progression::Fixed)
                .with_max_stages(max_stages);
            let mut h = Harness::new(config, 1.0);

            let commands = h.open(Side::Long, 200.0);
            h.fill_markets(&commands, 200.0);

            for price in path {
                let commands = h.tick(price);
                h.fill_markets(&commands, price);
                prop_assert!(h.long().stage_count() <= max_stages);
            }
        }
    }
}
