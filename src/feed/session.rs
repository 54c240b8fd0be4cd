//! Feed session over one shared connection.
//!
//! `Session` lazily establishes the event/market feed and the settlement
//! feed, at most once each, and serves the sport description snapshot.
//! Every live feed is driven by one receive loop task that owns the server
//! stream and the write end of the feed's channels. When the stream fails the
//! loop clears the session slot and then drops its senders, so consumers see
//! the channels close and the next accessor call subscribes afresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admission::{AdmissionError, AdmissionGate};
use crate::config::ClientConfig;
use crate::feed::channel::FeedReceiver;
use crate::feed::model::{
    EventEnvelope, EventSettlement, EventSettlementEnvelope, MarketEnvelope, SportDescription,
};
use crate::feed::proto::{
    MultipleEventsSettlementMsg, SportDescriptionsRequest, StreamEventsRequest,
    StreamSettlementsRequest,
};
use crate::feed::publisher::{DiffPublisher, FeedStats, FeedStatsSnapshot};
use crate::feed::timestamp::{resolve_or_now, to_wire_timestamp, TimestampError};
use crate::feed::transport::{
    EventsPushStream, FeedTransport, SettlementsPushStream, TransportError,
};

/// Receive handles of the event/market feed pair.
pub type EventsFeed = (FeedReceiver<EventEnvelope>, FeedReceiver<MarketEnvelope>);

type Slot<T> = Arc<Mutex<Option<T>>>;

struct ActiveEventsFeed {
    generation: u64,
    events: FeedReceiver<EventEnvelope>,
    markets: FeedReceiver<MarketEnvelope>,
    task: AbortHandle,
}

struct ActiveSettlementsFeed {
    generation: u64,
    settlements: FeedReceiver<EventSettlementEnvelope>,
    task: AbortHandle,
}

trait ActiveFeed {
    fn generation(&self) -> u64;
    fn abort(&self);
}

impl ActiveFeed for ActiveEventsFeed {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn abort(&self) {
        self.task.abort();
    }
}

impl ActiveFeed for ActiveSettlementsFeed {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn abort(&self) {
        self.task.abort();
    }
}

/// Feed session bound to one connection and one admission gate.
pub struct Session {
    transport: Arc<dyn FeedTransport>,
    gate: Arc<AdmissionGate>,
    shutdown: CancellationToken,
    client_name: String,
    request_timeout: Duration,
    channel_capacity: usize,
    stats: Arc<FeedStats>,
    generations: AtomicU64,
    events_feed: Slot<ActiveEventsFeed>,
    settlements_feed: Slot<ActiveSettlementsFeed>,
    // Serializes snapshot requests; there is no state to cache.
    entities_lock: Mutex<()>,
}

impl Session {
    pub(crate) fn new(
        transport: Arc<dyn FeedTransport>,
        gate: Arc<AdmissionGate>,
        shutdown: CancellationToken,
        config: &ClientConfig,
    ) -> Self {
        Self {
            transport,
            gate,
            shutdown,
            client_name: config.client_name.clone(),
            request_timeout: config.request_deadline,
            channel_capacity: config.channel_capacity,
            stats: Arc::new(FeedStats::default()),
            generations: AtomicU64::new(0),
            events_feed: Arc::new(Mutex::new(None)),
            settlements_feed: Arc::new(Mutex::new(None)),
            entities_lock: Mutex::new(()),
        }
    }

    /// Returns the event and market diff channels, subscribing if needed.
    ///
    /// Concurrent callers share one subscription and receive handles to the
    /// same channels. Admission waits without a deadline; it only ends early
    /// when the connection is closed. Both channels close when the server
    /// stream fails; call again to re-subscribe.
    pub async fn events_feed(&self) -> Result<EventsFeed, SessionError> {
        self.ensure_open()?;
        let mut slot = self.events_feed.lock().await;
        if let Some(active) = slot.as_ref() {
            return Ok((active.events.clone(), active.markets.clone()));
        }

        self.gate.admit(&self.shutdown).await?;
        let request = StreamEventsRequest {
            client_name: self.client_name.clone(),
        };
        let stream = self
            .transport
            .stream_events(request)
            .await
            .map_err(|source| SessionError::Subscribe {
                feed: "events",
                source,
            })?;

        let (events_tx, events) = FeedReceiver::channel(self.channel_capacity);
        let (markets_tx, markets) = FeedReceiver::channel(self.channel_capacity);
        let publisher = DiffPublisher::new(events_tx, markets_tx, Arc::clone(&self.stats));
        let generation = self.next_generation();

        let task = tokio::spawn(run_events_loop(
            stream,
            publisher,
            Arc::clone(&self.events_feed),
            generation,
            self.shutdown.clone(),
        ));
        *slot = Some(ActiveEventsFeed {
            generation,
            events: events.clone(),
            markets: markets.clone(),
            task: task.abort_handle(),
        });
        info!(event = "feed_established", feed = "events", generation);

        Ok((events, markets))
    }

    /// Returns the settlement channel, subscribing from `since` if needed.
    ///
    /// `since` only applies when a new subscription is made; a live feed is
    /// returned as is. Fails with [`SessionError::InvalidTimestamp`] when
    /// `since` cannot be sent on the wire.
    pub async fn settlements_feed(
        &self,
        since: DateTime<Utc>,
    ) -> Result<FeedReceiver<EventSettlementEnvelope>, SessionError> {
        self.ensure_open()?;
        let mut slot = self.settlements_feed.lock().await;
        if let Some(active) = slot.as_ref() {
            return Ok(active.settlements.clone());
        }

        let last_consumed_timestamp = to_wire_timestamp(since)
            .map_err(|source| SessionError::InvalidTimestamp { since, source })?;

        self.gate.admit(&self.shutdown).await?;
        let request = StreamSettlementsRequest {
            client_name: self.client_name.clone(),
            last_consumed_timestamp,
        };
        let stream = self
            .transport
            .stream_settlements(request)
            .await
            .map_err(|source| SessionError::Subscribe {
                feed: "settlements",
                source,
            })?;

        let (settlements_tx, settlements) = FeedReceiver::channel(self.channel_capacity);
        let generation = self.next_generation();

        let task = tokio::spawn(run_settlements_loop(
            stream,
            settlements_tx,
            Arc::clone(&self.stats),
            Arc::clone(&self.settlements_feed),
            generation,
            self.shutdown.clone(),
        ));
        *slot = Some(ActiveSettlementsFeed {
            generation,
            settlements: settlements.clone(),
            task: task.abort_handle(),
        });
        info!(event = "feed_established", feed = "settlements", generation, since = %since);

        Ok(settlements)
    }

    /// Fetches the current sport descriptions in `language`.
    ///
    /// Descriptions keep the server's order. The request is bounded by the
    /// configured request deadline.
    pub async fn entities(&self, language: &str) -> Result<Vec<SportDescription>, SessionError> {
        self.ensure_open()?;
        let _serialized = self.entities_lock.lock().await;

        self.gate.admit(&self.shutdown).await?;
        let request = SportDescriptionsRequest {
            lang: language.to_string(),
        };
        let response =
            tokio::time::timeout(self.request_timeout, self.transport.sport_descriptions(request))
                .await
                .map_err(|_| SessionError::Timeout(self.request_timeout))?
                .map_err(SessionError::Snapshot)?;

        Ok(response
            .sport_descriptions
            .iter()
            .map(|description| SportDescription::from_msg(description, language))
            .collect())
    }

    /// Returns `true` while the event/market feed has a running receive loop.
    pub async fn is_events_feed_active(&self) -> bool {
        self.events_feed.lock().await.is_some()
    }

    /// Returns `true` while the settlement feed has a running receive loop.
    pub async fn is_settlements_feed_active(&self) -> bool {
        self.settlements_feed.lock().await.is_some()
    }

    /// Counters accumulated over every feed of this session.
    pub fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::ConnectionClosed);
        }
        Ok(())
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_name", &self.client_name)
            .field("request_timeout", &self.request_timeout)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        abort_active(&self.events_feed);
        abort_active(&self.settlements_feed);
    }
}

fn abort_active<T: ActiveFeed>(slot: &Slot<T>) {
    if let Ok(guard) = slot.try_lock() {
        if let Some(active) = guard.as_ref() {
            active.abort();
        }
    }
}

async fn release_slot<T: ActiveFeed>(slot: &Slot<T>, generation: u64) {
    let mut guard = slot.lock().await;
    if guard
        .as_ref()
        .is_some_and(|active| active.generation() == generation)
    {
        *guard = None;
    }
}

fn log_feed_end(feed: &'static str, generation: u64, reason: &TransportError) {
    if matches!(reason, TransportError::ConnectionClosed) {
        info!(event = "feed_closed", feed, generation, reason = %reason);
    } else {
        error!(event = "feed_closed", feed, generation, error = %reason);
    }
}

async fn run_events_loop(
    mut stream: EventsPushStream,
    publisher: DiffPublisher,
    slot: Slot<ActiveEventsFeed>,
    generation: u64,
    shutdown: CancellationToken,
) {
    let reason = loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break TransportError::ConnectionClosed,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(response)) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break TransportError::ConnectionClosed,
                    _ = publisher.publish(response) => {}
                }
            }
            Some(Err(err)) => break err,
            None => break TransportError::StreamClosed,
        }
    };

    log_feed_end("events", generation, &reason);
    release_slot(&slot, generation).await;
    drop(publisher);
    drop(stream);
}

async fn run_settlements_loop(
    mut stream: SettlementsPushStream,
    settlements: mpsc::Sender<EventSettlementEnvelope>,
    stats: Arc<FeedStats>,
    slot: Slot<ActiveSettlementsFeed>,
    generation: u64,
    shutdown: CancellationToken,
) {
    let reason = loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break TransportError::ConnectionClosed,
            next = stream.next() => next,
        };
        let response = match next {
            Some(Ok(response)) => response,
            Some(Err(err)) => break err,
            None => break TransportError::StreamClosed,
        };

        let generated_at = resolve_or_now(response.diff_timestamp.as_ref(), "diff_timestamp");
        let Some(batch) = response.multiple_events_settlement else {
            warn!(event = "settlement_batch_missing", generation);
            continue;
        };

        tokio::select! {
            _ = shutdown.cancelled() => break TransportError::ConnectionClosed,
            sent = forward_settlements(&settlements, &batch, generated_at) => {
                stats.record_settlements(sent);
            }
        }
    };

    log_feed_end("settlements", generation, &reason);
    release_slot(&slot, generation).await;
    drop(settlements);
    drop(stream);
}

async fn forward_settlements(
    settlements: &mpsc::Sender<EventSettlementEnvelope>,
    batch: &MultipleEventsSettlementMsg,
    generated_at: DateTime<Utc>,
) -> usize {
    let mut sent = 0;
    for settlement in &batch.event_settlement {
        let envelope = EventSettlementEnvelope {
            event_settlement: EventSettlement::from(settlement),
            generated_at,
        };
        if settlements.send(envelope).await.is_err() {
            break;
        }
        sent += 1;
    }
    sent
}

/// Session call failures.
///
/// Receive-loop failures are never returned here; they surface only as
/// closed feed channels.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session is available from the client.
    #[error("session is not initialised")]
    NotInitialized,

    /// The session's connection has been closed.
    #[error("session connection is closed")]
    ConnectionClosed,

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("timestamp {since} is invalid time: {source}")]
    InvalidTimestamp {
        since: DateTime<Utc>,
        #[source]
        source: TimestampError,
    },

    #[error("can't subscribe to {feed} feed: {source}")]
    Subscribe {
        feed: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("can't get sport descriptions: {0}")]
    Snapshot(#[source] TransportError),

    #[error("sport descriptions request timed out after {0:?}")]
    Timeout(Duration),
}
