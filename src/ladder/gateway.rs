//! Order gateway and event feed abstractions - mockable for tests

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::LadderResult;
use super::types::{InstrumentMeta, LadderEvent, OrderRef, OrderRequest, PositionSnapshot};

/// Broker-side order operations.
///
/// Calls are fire-and-forget: an `Ok` only means the request was accepted
/// for processing. Fills and late rejections arrive on the stream returned
/// by [`OrderGateway::subscribe_events`].
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit an order
    async fn submit(&self, order: &OrderRequest) -> LadderResult<()>;

    /// Cancel an order if it is still active
    async fn cancel(&self, order_ref: OrderRef) -> LadderResult<()>;

    /// Current net position and account values
    async fn position_snapshot(&self) -> LadderResult<PositionSnapshot>;

    /// Instrument steps and limits
    async fn instrument_meta(&self) -> LadderResult<InstrumentMeta>;

    /// Stream of order outcomes (fills, rejections)
    async fn subscribe_events(&self) -> LadderResult<mpsc::UnboundedReceiver<LadderEvent>>;

    /// Market data seen by the runner before the controller handles it.
    /// Simulated venues use it to trigger resting orders.
    async fn observe(&self, _event: &LadderEvent) {}
}

/// Source of market data and signals
#[async_trait]
pub trait EventFeed: Send {
    async fn subscribe(&mut self) -> LadderResult<mpsc::Receiver<LadderEvent>>;

    async fn unsubscribe(&mut self) -> LadderResult<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mock {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use crate::ladder::errors::LadderError;

    /// Mock gateway recording every request
    pub struct MockGateway {
        pub submitted: Arc<Mutex<Vec<OrderRequest>>>,
        pub cancelled: Arc<Mutex<Vec<OrderRef>>>,
        pub snapshot: Arc<Mutex<PositionSnapshot>>,
        pub meta: Arc<Mutex<InstrumentMeta>>,
        pub should_fail: Arc<Mutex<bool>>,
        pub fail_snapshots: Arc<Mutex<bool>>,
        events_tx: mpsc::UnboundedSender<LadderEvent>,
        events_rx: Mutex<Option<mpsc::UnboundedReceiver<LadderEvent>>>,
    }

    impl MockGateway {
        pub fn new(meta: InstrumentMeta) -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Self {
                submitted: Arc::new(Mutex::new(Vec::new())),
                cancelled: Arc::new(Mutex::new(Vec::new())),
                snapshot: Arc::new(Mutex::new(PositionSnapshot::default())),
                meta: Arc::new(Mutex::new(meta)),
                should_fail: Arc::new(Mutex::new(false)),
                fail_snapshots: Arc::new(Mutex::new(false)),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }
        }

        pub async fn set_should_fail(&self, fail: bool) {
            *self.should_fail.lock().await = fail;
        }

        pub async fn set_fail_snapshots(&self, fail: bool) {
            *self.fail_snapshots.lock().await = fail;
        }

        pub async fn set_snapshot(&self, snapshot: PositionSnapshot) {
            *self.snapshot.lock().await = snapshot;
        }

        /// Push an order outcome as if the venue reported it
        pub fn emit(&self, event: LadderEvent) {
            let _ = self.events_tx.send(event);
        }
    }

    #[async_trait]
    impl OrderGateway for MockGateway {
        async fn submit(&self, order: &OrderRequest) -> LadderResult<()> {
            if *self.should_fail.lock().await {
                return Err(LadderError::Gateway("Mock failure".into()));
            }
            self.submitted.lock().await.push(order.clone());
            Ok(())
        }

        async fn cancel(&self, order_ref: OrderRef) -> LadderResult<()> {
            self.cancelled.lock().await.push(order_ref);
            Ok(())
        }

        async fn position_snapshot(&self) -> LadderResult<PositionSnapshot> {
            if *self.fail_snapshots.lock().await {
                return Err(LadderError::Gateway("Mock snapshot failure".into()));
            }
            Ok(*self.snapshot.lock().await)
        }

        async fn instrument_meta(&self) -> LadderResult<InstrumentMeta> {
            Ok(*self.meta.lock().await)
        }

        async fn subscribe_events(&self) -> LadderResult<mpsc::UnboundedReceiver<LadderEvent>> {
            self.events_rx
                .lock()
                .await
                .take()
                .ok_or_else(|| LadderError::InvalidState {
                    current_state: "gateway events already subscribed".into(),
                })
        }
    }

    /// Mock feed replaying a fixed list of events, then closing
    pub struct MockEventFeed {
        events: Vec<LadderEvent>,
        pub subscribed: bool,
    }

    impl MockEventFeed {
        pub fn new(events: Vec<LadderEvent>) -> Self {
            Self {
                events,
                subscribed: false,
            }
        }
    }

    #[async_trait]
    impl EventFeed for MockEventFeed {
        async fn subscribe(&mut self) -> LadderResult<mpsc::Receiver<LadderEvent>> {
            let (tx, rx) = mpsc::channel(self.events.len().max(1));
            for event in self.events.drain(..) {
                tx.send(event).await?;
            }
            self.subscribed = true;
            Ok(rx)
        }

        async fn unsubscribe(&mut self) -> LadderResult<()> {
            self.subscribed = false;
            Ok(())
        }
    }
}
