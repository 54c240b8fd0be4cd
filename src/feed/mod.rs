//! Feed modules.
//!
//! - `proto`: wire messages exchanged with the feed server.
//! - `model`: domain records and the envelopes delivered to consumers.
//! - `timestamp`: wire timestamp validation and conversion.
//! - `transport`: the connection boundary and its websocket/HTTP implementation.
//! - `publisher`: fan-out of server pushes into feed channels.
//! - `session`: lazily established, single-flight feeds.

/// Receive handles for feed channels.
pub mod channel;
/// Domain records and consumer envelopes.
pub mod model;
/// Feed wire messages.
pub mod proto;
/// Diff fan-out into event and market channels.
pub mod publisher;
/// Feed session and its receive loops.
pub mod session;
/// Wire timestamp helpers.
pub mod timestamp;
/// Transport trait and errors.
pub mod transport;
/// Websocket/HTTP transport.
pub mod ws;
