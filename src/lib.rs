//! Client SDK for a server-push sports feed.
//!
//! The crate is organized by concern:
//! - `client`: connection owner handing out the feed session.
//! - `feed`: session, transport, wire protocol and domain model.
//! - `admission`: token-bucket gate shared by outbound requests.
//! - `config`: client settings and their defaults.

/// Request admission gate.
pub mod admission;
/// Connection owner and session factory.
pub mod client;
/// Client settings.
pub mod config;
/// Feed session, transport and data model.
pub mod feed;

pub use client::{ClientError, FeedClient};
pub use config::{ClientConfig, ClientDefaults, ConfigError};
pub use feed::channel::FeedReceiver;
pub use feed::model::{
    EventEnvelope, EventSettlementEnvelope, FeedAction, MarketEnvelope, SportDescription,
};
pub use feed::publisher::FeedStatsSnapshot;
pub use feed::session::{EventsFeed, Session, SessionError};
pub use feed::transport::{FeedTransport, TransportError};
