//! Domain records and the envelopes delivered to feed consumers.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feed::proto::{
    DiffTypeMsg, EventSettlementMsg, EventStatusMsg, FeedEventMsg, FeedMarketMsg,
    MarketTypeDescriptionMsg, OutcomeMsg, OutcomeSettlementMsg, ParticipantMsg,
    PeriodDescriptionMsg, SettlementResultMsg, SportDescriptionMsg,
};
use crate::feed::timestamp::{resolve_timestamp, TimestampError};

/// Kind of change a diff applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedAction {
    Insert,
    Update,
    Delete,
    Unknown,
}

impl From<DiffTypeMsg> for FeedAction {
    fn from(value: DiffTypeMsg) -> Self {
        match value {
            DiffTypeMsg::Insert => Self::Insert,
            DiffTypeMsg::Update => Self::Update,
            DiffTypeMsg::Delete => Self::Delete,
            DiffTypeMsg::Unknown => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    NotStarted,
    Live,
    Suspended,
    Ended,
    Cancelled,
    Unknown,
}

impl From<&EventStatusMsg> for EventStatus {
    fn from(value: &EventStatusMsg) -> Self {
        match value {
            EventStatusMsg::NotStarted => Self::NotStarted,
            EventStatusMsg::Live => Self::Live,
            EventStatusMsg::Suspended => Self::Suspended,
            EventStatusMsg::Ended => Self::Ended,
            EventStatusMsg::Cancelled => Self::Cancelled,
            EventStatusMsg::Unknown => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub venue_role: String,
}

/// Sport event state carried by an event diff.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub id: String,
    pub sport_id: u32,
    pub category: String,
    pub league: String,
    pub status: EventStatus,
    /// Scheduled start, when the feed provides one.
    pub start_at: Option<DateTime<Utc>>,
    pub participants: Vec<Participant>,
}

impl TryFrom<&FeedEventMsg> for Event {
    type Error = ModelError;

    fn try_from(msg: &FeedEventMsg) -> Result<Self, Self::Error> {
        if msg.id.trim().is_empty() {
            return Err(ModelError::MissingField("event.id"));
        }
        // A zero start time means "not scheduled yet".
        let start_at = match resolve_timestamp(msg.start_ts.as_ref()) {
            Ok(at) => Some(at),
            Err(TimestampError::Missing | TimestampError::Zero(_)) => None,
            Err(source) => {
                return Err(ModelError::Timestamp {
                    field: "event.start_ts",
                    source,
                })
            }
        };

        Ok(Self {
            id: msg.id.clone(),
            sport_id: msg.sport_id,
            category: msg.category.clone(),
            league: msg.league.clone(),
            status: EventStatus::from(&msg.status),
            start_at,
            participants: msg.participants.iter().map(Participant::from).collect(),
        })
    }
}

impl From<&ParticipantMsg> for Participant {
    fn from(msg: &ParticipantMsg) -> Self {
        Self {
            id: msg.id.clone(),
            name: msg.name.clone(),
            venue_role: msg.venue_role.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub id: String,
    pub outcome_type: u32,
    pub value: String,
    pub suspended: bool,
}

/// Market state carried by a market diff.
#[derive(Clone, Debug, PartialEq)]
pub struct Market {
    pub id: String,
    pub market_type: u32,
    pub suspended: bool,
    pub outcomes: Vec<Outcome>,
}

impl From<&FeedMarketMsg> for Market {
    fn from(msg: &FeedMarketMsg) -> Self {
        Self {
            id: msg.id.clone(),
            market_type: msg.market_type,
            suspended: msg.suspended,
            outcomes: msg.outcomes.iter().map(Outcome::from).collect(),
        }
    }
}

impl From<&OutcomeMsg> for Outcome {
    fn from(msg: &OutcomeMsg) -> Self {
        Self {
            id: msg.id.clone(),
            outcome_type: msg.outcome_type,
            value: msg.value.clone(),
            suspended: msg.suspended,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementResult {
    Won,
    Lost,
    HalfWon,
    HalfLost,
    Refund,
    Unknown,
}

impl From<SettlementResultMsg> for SettlementResult {
    fn from(value: SettlementResultMsg) -> Self {
        match value {
            SettlementResultMsg::Won => Self::Won,
            SettlementResultMsg::Lost => Self::Lost,
            SettlementResultMsg::HalfWon => Self::HalfWon,
            SettlementResultMsg::HalfLost => Self::HalfLost,
            SettlementResultMsg::Refund => Self::Refund,
            SettlementResultMsg::Unknown => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutcomeSettlement {
    pub market_id: String,
    pub outcome_id: String,
    pub result: SettlementResult,
}

/// Settled outcomes of one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSettlement {
    pub event_id: String,
    pub outcomes: Vec<OutcomeSettlement>,
}

impl From<&EventSettlementMsg> for EventSettlement {
    fn from(msg: &EventSettlementMsg) -> Self {
        Self {
            event_id: msg.event_id.clone(),
            outcomes: msg
                .outcome_settlements
                .iter()
                .map(OutcomeSettlement::from)
                .collect(),
        }
    }
}

impl From<&OutcomeSettlementMsg> for OutcomeSettlement {
    fn from(msg: &OutcomeSettlementMsg) -> Self {
        Self {
            market_id: msg.market_id.clone(),
            outcome_id: msg.outcome_id.clone(),
            result: SettlementResult::from(msg.result),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodDescription {
    pub period_id: u32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketTypeDescription {
    pub market_type: u32,
    pub name: String,
    /// `(outcome_type, name)` pairs.
    pub outcome_types: Vec<(u32, String)>,
}

/// Localized description of a sport and its market vocabulary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SportDescription {
    pub sport_id: u32,
    pub name: String,
    /// Language the description was requested in.
    pub language: String,
    pub periods: Vec<PeriodDescription>,
    pub market_types: Vec<MarketTypeDescription>,
}

impl SportDescription {
    pub(crate) fn from_msg(msg: &SportDescriptionMsg, language: &str) -> Self {
        Self {
            sport_id: msg.sport_id,
            name: msg.sport_name.clone(),
            language: language.to_string(),
            periods: msg.periods.iter().map(PeriodDescription::from).collect(),
            market_types: msg
                .market_types
                .iter()
                .map(MarketTypeDescription::from)
                .collect(),
        }
    }
}

impl From<&PeriodDescriptionMsg> for PeriodDescription {
    fn from(msg: &PeriodDescriptionMsg) -> Self {
        Self {
            period_id: msg.period_id,
            name: msg.name.clone(),
        }
    }
}

impl From<&MarketTypeDescriptionMsg> for MarketTypeDescription {
    fn from(msg: &MarketTypeDescriptionMsg) -> Self {
        Self {
            market_type: msg.market_type,
            name: msg.name.clone(),
            outcome_types: msg
                .outcome_types
                .iter()
                .map(|outcome| (outcome.outcome_type, outcome.name.clone()))
                .collect(),
        }
    }
}

/// Event diff delivered on the event channel.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    pub event_diff: Event,
    pub generated_at: DateTime<Utc>,
    pub action: FeedAction,
}

/// Market diff delivered on the market channel, tagged with its parent event.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketEnvelope {
    pub event_id: String,
    pub market_diff: Market,
    pub generated_at: DateTime<Utc>,
    pub action: FeedAction,
}

/// Settlement delivered on the settlement channel.
#[derive(Clone, Debug, PartialEq)]
pub struct EventSettlementEnvelope {
    pub event_settlement: EventSettlement,
    pub generated_at: DateTime<Utc>,
}

/// Wire records that cannot be mapped to the domain model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("{0} is missing")]
    MissingField(&'static str),

    #[error("{field}: {source}")]
    Timestamp {
        field: &'static str,
        #[source]
        source: TimestampError,
    },
}
