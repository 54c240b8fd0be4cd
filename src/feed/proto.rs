use serde::{Deserialize, Serialize};

/// Point in time as carried on the wire: seconds and nanoseconds since the
/// Unix epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WireTimestamp {
    pub seconds: i64,
    #[serde(default)]
    pub nanos: i32,
}

impl WireTimestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiffTypeMsg {
    Insert,
    Update,
    Delete,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamEventsRequest {
    pub client_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamEventsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_ts: Option<WireTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diffs_message: Option<DiffsMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiffsMessage {
    #[serde(default)]
    pub event_diffs: Vec<EventDiffMsg>,
    #[serde(default)]
    pub market_diffs: Vec<MarketsDiffMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventDiffMsg {
    #[serde(default)]
    pub diff_type: DiffTypeMsg,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<FeedEventMsg>,
}

/// Market diffs grouped under their parent event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketsDiffMsg {
    pub event_id: String,
    #[serde(default)]
    pub event_markets_diffs: Vec<MarketDiffMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketDiffMsg {
    #[serde(default)]
    pub diff_type: DiffTypeMsg,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<FeedMarketMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatusMsg {
    NotStarted,
    Live,
    Suspended,
    Ended,
    Cancelled,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEventMsg {
    pub id: String,
    pub sport_id: u32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub league: String,
    #[serde(default)]
    pub status: EventStatusMsg,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<WireTimestamp>,
    #[serde(default)]
    pub participants: Vec<ParticipantMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantMsg {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub venue_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedMarketMsg {
    pub id: String,
    pub market_type: u32,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default)]
    pub outcomes: Vec<OutcomeMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeMsg {
    pub id: String,
    pub outcome_type: u32,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub suspended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamSettlementsRequest {
    pub client_name: String,
    pub last_consumed_timestamp: WireTimestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamSettlementsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_timestamp: Option<WireTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_events_settlement: Option<MultipleEventsSettlementMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MultipleEventsSettlementMsg {
    #[serde(default)]
    pub event_settlement: Vec<EventSettlementMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSettlementMsg {
    pub event_id: String,
    #[serde(default)]
    pub outcome_settlements: Vec<OutcomeSettlementMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeSettlementMsg {
    pub market_id: String,
    pub outcome_id: String,
    #[serde(default)]
    pub result: SettlementResultMsg,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettlementResultMsg {
    Won,
    Lost,
    HalfWon,
    HalfLost,
    Refund,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SportDescriptionsRequest {
    pub lang: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SportDescriptionsResponse {
    #[serde(default)]
    pub sport_descriptions: Vec<SportDescriptionMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SportDescriptionMsg {
    pub sport_id: u32,
    pub sport_name: String,
    #[serde(default)]
    pub periods: Vec<PeriodDescriptionMsg>,
    #[serde(default)]
    pub market_types: Vec<MarketTypeDescriptionMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeriodDescriptionMsg {
    pub period_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketTypeDescriptionMsg {
    pub market_type: u32,
    pub name: String,
    #[serde(default)]
    pub outcome_types: Vec<OutcomeTypeDescriptionMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeTypeDescriptionMsg {
    pub outcome_type: u32,
    pub name: String,
}

impl StreamEventsResponse {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl StreamSettlementsResponse {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
