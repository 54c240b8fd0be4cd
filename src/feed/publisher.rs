//! Fan-out of one server push into the event and market channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::feed::model::{Event, EventEnvelope, FeedAction, Market, MarketEnvelope};
use crate::feed::proto::{EventDiffMsg, MarketsDiffMsg, StreamEventsResponse};
use crate::feed::timestamp::resolve_or_now;

/// Running counters of a session's feeds.
#[derive(Debug, Default)]
pub(crate) struct FeedStats {
    events_published: AtomicU64,
    markets_published: AtomicU64,
    settlements_published: AtomicU64,
    skipped_diffs: AtomicU64,
    malformed_diffs: AtomicU64,
}

impl FeedStats {
    pub(crate) fn record(&self, summary: &PublishSummary) {
        self.events_published
            .fetch_add(summary.events as u64, Ordering::Relaxed);
        self.markets_published
            .fetch_add(summary.markets as u64, Ordering::Relaxed);
        self.skipped_diffs
            .fetch_add(summary.skipped as u64, Ordering::Relaxed);
        self.malformed_diffs
            .fetch_add(summary.malformed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_settlements(&self, count: usize) {
        self.settlements_published
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            markets_published: self.markets_published.load(Ordering::Relaxed),
            settlements_published: self.settlements_published.load(Ordering::Relaxed),
            skipped_diffs: self.skipped_diffs.load(Ordering::Relaxed),
            malformed_diffs: self.malformed_diffs.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a session's feed counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStatsSnapshot {
    pub events_published: u64,
    pub markets_published: u64,
    pub settlements_published: u64,
    /// Diffs without a payload.
    pub skipped_diffs: u64,
    /// Event diffs whose payload could not be mapped to an [`Event`].
    pub malformed_diffs: u64,
}

/// Outcome of publishing one push message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PublishSummary {
    pub(crate) events: usize,
    pub(crate) markets: usize,
    pub(crate) skipped: usize,
    pub(crate) malformed: usize,
}

/// Write side of an event/market feed pair.
///
/// Owned by the feed's receive loop; dropping it closes both channels.
#[derive(Debug)]
pub(crate) struct DiffPublisher {
    events: mpsc::Sender<EventEnvelope>,
    markets: mpsc::Sender<MarketEnvelope>,
    stats: Arc<FeedStats>,
}

impl DiffPublisher {
    pub(crate) fn new(
        events: mpsc::Sender<EventEnvelope>,
        markets: mpsc::Sender<MarketEnvelope>,
        stats: Arc<FeedStats>,
    ) -> Self {
        Self {
            events,
            markets,
            stats,
        }
    }

    /// Publishes every diff of `response`.
    ///
    /// Event and market diffs are written concurrently; the call returns once
    /// both have been fully handed to their channels. Blocks while a consumer
    /// is not reading.
    pub(crate) async fn publish(&self, response: StreamEventsResponse) -> PublishSummary {
        let Some(diffs) = response.diffs_message else {
            return PublishSummary::default();
        };
        let generated_at = resolve_or_now(response.generated_ts.as_ref(), "generated_ts");

        let (events, markets) = tokio::join!(
            self.publish_events(&diffs.event_diffs, generated_at),
            self.publish_markets(&diffs.market_diffs, generated_at),
        );

        let summary = PublishSummary {
            events: events.published,
            markets: markets.published,
            skipped: events.skipped + markets.skipped,
            malformed: events.malformed,
        };
        self.stats.record(&summary);
        summary
    }

    async fn publish_events(
        &self,
        diffs: &[EventDiffMsg],
        generated_at: DateTime<Utc>,
    ) -> WorkerTally {
        let mut tally = WorkerTally::default();
        for diff in diffs {
            let Some(event) = diff.event.as_ref() else {
                tally.skipped += 1;
                continue;
            };
            let event_diff = match Event::try_from(event) {
                Ok(event_diff) => event_diff,
                Err(err) => {
                    debug!(event = "event_diff_malformed", event_id = %event.id, error = %err);
                    tally.malformed += 1;
                    continue;
                }
            };

            let envelope = EventEnvelope {
                event_diff,
                generated_at,
                action: FeedAction::from(diff.diff_type),
            };
            if self.events.send(envelope).await.is_err() {
                debug!(event = "event_channel_closed");
                break;
            }
            tally.published += 1;
        }
        tally
    }

    async fn publish_markets(
        &self,
        groups: &[MarketsDiffMsg],
        generated_at: DateTime<Utc>,
    ) -> WorkerTally {
        let mut tally = WorkerTally::default();
        for group in groups {
            for diff in &group.event_markets_diffs {
                let Some(market) = diff.market.as_ref() else {
                    tally.skipped += 1;
                    continue;
                };

                let envelope = MarketEnvelope {
                    event_id: group.event_id.clone(),
                    market_diff: Market::from(market),
                    generated_at,
                    action: FeedAction::from(diff.diff_type),
                };
                if self.markets.send(envelope).await.is_err() {
                    debug!(event = "market_channel_closed");
                    return tally;
                }
                tally.published += 1;
            }
        }
        tally
    }
}

#[derive(Debug, Default)]
struct WorkerTally {
    published: usize,
    skipped: usize,
    malformed: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{DiffPublisher, FeedStats, PublishSummary};
    use crate::feed::channel::FeedReceiver;
    use crate::feed::model::FeedAction;
    use crate::feed::proto::{
        DiffTypeMsg, DiffsMessage, EventDiffMsg, FeedEventMsg, FeedMarketMsg, MarketDiffMsg,
        MarketsDiffMsg, StreamEventsResponse, WireTimestamp,
    };

    fn event_diff(id: &str, diff_type: DiffTypeMsg) -> EventDiffMsg {
        EventDiffMsg {
            diff_type,
            event: Some(FeedEventMsg {
                id: id.to_string(),
                sport_id: 1,
                category: String::new(),
                league: String::new(),
                status: Default::default(),
                start_ts: None,
                participants: Vec::new(),
            }),
        }
    }

    fn market_diff(id: &str) -> MarketDiffMsg {
        MarketDiffMsg {
            diff_type: DiffTypeMsg::Update,
            market: Some(FeedMarketMsg {
                id: id.to_string(),
                market_type: 1,
                suspended: false,
                outcomes: Vec::new(),
            }),
        }
    }

    fn response(ts: Option<WireTimestamp>, diffs: DiffsMessage) -> StreamEventsResponse {
        StreamEventsResponse {
            generated_ts: ts,
            diffs_message: Some(diffs),
        }
    }

    #[tokio::test]
    async fn publishes_every_diff_with_one_timestamp_in_source_order() {
        let (events_tx, events) = FeedReceiver::channel(16);
        let (markets_tx, markets) = FeedReceiver::channel(16);
        let stats = Arc::new(FeedStats::default());
        let publisher = DiffPublisher::new(events_tx, markets_tx, Arc::clone(&stats));

        let ts = WireTimestamp::new(1_700_000_000, 42);
        let summary = publisher
            .publish(response(
                Some(ts),
                DiffsMessage {
                    event_diffs: vec![
                        event_diff("e1", DiffTypeMsg::Insert),
                        event_diff("e2", DiffTypeMsg::Delete),
                    ],
                    market_diffs: vec![
                        MarketsDiffMsg {
                            event_id: "e1".to_string(),
                            event_markets_diffs: vec![market_diff("m1"), market_diff("m2")],
                        },
                        MarketsDiffMsg {
                            event_id: "e2".to_string(),
                            event_markets_diffs: vec![market_diff("m3")],
                        },
                    ],
                },
            ))
            .await;

        assert_eq!(
            summary,
            PublishSummary {
                events: 2,
                markets: 3,
                skipped: 0,
                malformed: 0
            }
        );
        drop(publisher);

        let first = events.recv().await.expect("e1");
        assert_eq!(first.event_diff.id, "e1");
        assert_eq!(first.action, FeedAction::Insert);
        assert_eq!(first.generated_at.timestamp_subsec_nanos(), 42);
        let second = events.recv().await.expect("e2");
        assert_eq!(second.action, FeedAction::Delete);
        assert_eq!(second.generated_at, first.generated_at);
        assert!(events.recv().await.is_none());

        let mut market_ids = Vec::new();
        while let Some(envelope) = markets.recv().await {
            assert_eq!(envelope.generated_at, first.generated_at);
            market_ids.push((envelope.event_id, envelope.market_diff.id));
        }
        assert_eq!(
            market_ids,
            vec![
                ("e1".to_string(), "m1".to_string()),
                ("e1".to_string(), "m2".to_string()),
                ("e2".to_string(), "m3".to_string()),
            ]
        );
        assert_eq!(stats.snapshot().markets_published, 3);
    }

    #[tokio::test]
    async fn empty_and_malformed_entries_are_not_emitted() {
        let (events_tx, events) = FeedReceiver::channel(8);
        let (markets_tx, markets) = FeedReceiver::channel(8);
        let stats = Arc::new(FeedStats::default());
        let publisher = DiffPublisher::new(events_tx, markets_tx, Arc::clone(&stats));

        let summary = publisher
            .publish(response(
                None,
                DiffsMessage {
                    event_diffs: vec![
                        EventDiffMsg {
                            diff_type: DiffTypeMsg::Update,
                            event: None,
                        },
                        event_diff("", DiffTypeMsg::Update),
                        event_diff("e9", DiffTypeMsg::Update),
                    ],
                    market_diffs: vec![MarketsDiffMsg {
                        event_id: "e9".to_string(),
                        event_markets_diffs: vec![MarketDiffMsg {
                            diff_type: DiffTypeMsg::Delete,
                            market: None,
                        }],
                    }],
                },
            ))
            .await;
        drop(publisher);

        assert_eq!(summary.events, 1);
        assert_eq!(summary.markets, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.malformed, 1);
        assert_eq!(stats.snapshot().malformed_diffs, 1);

        let only = events.recv().await.expect("e9");
        assert_eq!(only.event_diff.id, "e9");
        assert!(events.recv().await.is_none());
        assert!(markets.recv().await.is_none());
    }

    #[tokio::test]
    async fn zero_timestamp_falls_back_to_now() {
        let (events_tx, events) = FeedReceiver::channel(1);
        let (markets_tx, _markets) = FeedReceiver::channel(1);
        let publisher = DiffPublisher::new(events_tx, markets_tx, Arc::default());

        let before = Utc::now();
        publisher
            .publish(response(
                Some(WireTimestamp::new(-62_135_596_800, 0)),
                DiffsMessage {
                    event_diffs: vec![event_diff("e1", DiffTypeMsg::Insert)],
                    market_diffs: Vec::new(),
                },
            ))
            .await;

        let envelope = events.recv().await.expect("envelope");
        assert!(envelope.generated_at >= before);
    }

    #[tokio::test]
    async fn epoch_generation_timestamp_is_kept() {
        let (events_tx, events) = FeedReceiver::channel(1);
        let (markets_tx, _markets) = FeedReceiver::channel(1);
        let publisher = DiffPublisher::new(events_tx, markets_tx, Arc::default());

        publisher
            .publish(response(
                Some(WireTimestamp::default()),
                DiffsMessage {
                    event_diffs: vec![event_diff("e1", DiffTypeMsg::Insert)],
                    market_diffs: Vec::new(),
                },
            ))
            .await;

        let envelope = events.recv().await.expect("envelope");
        assert_eq!(envelope.generated_at.timestamp(), 0);
    }

    #[tokio::test]
    async fn publish_waits_for_slow_consumers() {
        let (events_tx, events) = FeedReceiver::channel(1);
        let (markets_tx, markets) = FeedReceiver::channel(1);
        let publisher = DiffPublisher::new(events_tx, markets_tx, Arc::default());

        let message = response(
            Some(WireTimestamp::new(1_700_000_000, 0)),
            DiffsMessage {
                event_diffs: vec![
                    event_diff("e1", DiffTypeMsg::Insert),
                    event_diff("e2", DiffTypeMsg::Insert),
                    event_diff("e3", DiffTypeMsg::Insert),
                ],
                market_diffs: vec![MarketsDiffMsg {
                    event_id: "e1".to_string(),
                    event_markets_diffs: vec![market_diff("m1"), market_diff("m2")],
                }],
            },
        );

        let task = tokio::spawn(async move { publisher.publish(message).await });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(!task.is_finished(), "publish must block on full channels");

        for _ in 0..3 {
            events.recv().await.expect("event");
        }
        for _ in 0..2 {
            markets.recv().await.expect("market");
        }
        let summary = task.await.expect("publish task");
        assert_eq!(summary.events, 3);
        assert_eq!(summary.markets, 2);
    }

    #[tokio::test]
    async fn message_without_diffs_publishes_nothing() {
        let (events_tx, _events) = FeedReceiver::channel(1);
        let (markets_tx, _markets) = FeedReceiver::channel(1);
        let publisher = DiffPublisher::new(events_tx, markets_tx, Arc::default());

        let summary = publisher.publish(StreamEventsResponse::default()).await;
        assert_eq!(summary, PublishSummary::default());
    }
}
