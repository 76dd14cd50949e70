use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// One inbound event after normalization, regardless of which payload family it came from.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalMessage {
    pub id: String,
    pub chat_id: String,
    pub participant_id: Option<String>,
    pub is_group: bool,
    pub is_status_broadcast: bool,
    pub is_broadcast: bool,
    #[serde(default)]
    pub from_me: bool,
    /// Epoch seconds; absent when the source did not carry one.
    pub timestamp: Option<i64>,
    pub sender_display_name: Option<String>,
    pub chat_display_name: Option<String>,
    pub sender_address: String,
    pub sender_phone: Option<String>,
    pub sender_opaque_id: Option<String>,
    pub text: Option<String>,
    pub kind: MessageKind,
    pub media: Option<MediaInfo>,
}

impl CanonicalMessage {
    /// Opaque sender with a known name but no phone: the only case contact resolution can help.
    pub fn needs_phone_lookup(&self) -> bool {
        self.sender_opaque_id.is_some()
            && self.sender_phone.is_none()
            && self
                .sender_display_name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Document,
    Audio,
    Sticker,
    Reaction,
    #[default]
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
            MessageKind::Audio => "audio",
            MessageKind::Sticker => "sticker",
            MessageKind::Reaction => "reaction",
            MessageKind::Unknown => "unknown",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MediaInfo {
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub byte_size: Option<u64>,
    pub sha256: Option<String>,
    pub duration_secs: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub caption: Option<String>,
}

/// A listing candidate recovered from one line of text.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OfferMatch {
    pub reference: Option<String>,
    pub color: Option<String>,
    pub year_month: Option<String>,
    pub currency: Option<String>,
    pub price_raw: Option<String>,
    pub price_value: Option<f64>,
    pub condition: Option<String>,
    pub raw_line: String,
}

impl OfferMatch {
    pub fn is_listing(&self) -> bool {
        self.reference.is_some() && (self.price_value.is_some() || self.currency.is_some())
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: String,
    pub display_name: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContactInfo {
    pub address: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
    Ignored,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub struct IngestOutcome {
    pub ingest_id: String,
    pub status: IngestStatus,
    pub message: Option<CanonicalMessage>,
    pub offers: Vec<OfferMatch>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextBlockRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct OffersResponse {
    pub count: usize,
    pub offers: Vec<OfferMatch>,
}

impl From<Vec<OfferMatch>> for OffersResponse {
    fn from(offers: Vec<OfferMatch>) -> Self {
        Self {
            count: offers.len(),
            offers,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
