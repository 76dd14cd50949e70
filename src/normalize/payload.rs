//! Typed views of the two webhook payload families.
//!
//! Classification looks only at which top-level keys are present; field extraction happens
//! afterwards against the concrete variant. Numeric fields are lenient: numbers, numeric
//! strings and garbage (which becomes `None`) are all accepted.

use serde::Deserialize;
use serde_json::Value;
use serde_with::{DefaultOnError, DisplayFromStr, PickFirst, serde_as};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload matches no known webhook shape")]
    Unrecognized,
    #[error("wrapper payload has no body_message")]
    MissingBody,
    #[error("malformed {family} payload: {message}")]
    Malformed {
        family: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub enum WebhookPayload {
    /// `key` + `message` union, as emitted by the messaging provider itself.
    Provider(ProviderEvent),
    /// `message_key` + `body_message` wrapper with a type tag and plain content.
    Wrapper(WrapperEvent),
}

impl WebhookPayload {
    pub fn classify(raw: &Value) -> Result<Self, PayloadError> {
        let obj = raw.as_object().ok_or(PayloadError::NotAnObject)?;

        if obj.contains_key("message_key") {
            if obj.get("body_message").is_none_or(Value::is_null) {
                return Err(PayloadError::MissingBody);
            }
            return serde_json::from_value::<WrapperEvent>(raw.clone())
                .map(WebhookPayload::Wrapper)
                .map_err(|err| PayloadError::Malformed {
                    family: "wrapper",
                    message: err.to_string(),
                });
        }

        if obj.contains_key("key") {
            return serde_json::from_value::<ProviderEvent>(raw.clone())
                .map(WebhookPayload::Provider)
                .map_err(|err| PayloadError::Malformed {
                    family: "provider",
                    message: err.to_string(),
                });
        }

        // Gateways wrap provider events as `{ "event": ..., "data": { key, message, ... } }`.
        match obj.get("data") {
            Some(inner) if inner.is_object() => Self::classify(inner),
            _ => Err(PayloadError::Unrecognized),
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            WebhookPayload::Provider(_) => "provider",
            WebhookPayload::Wrapper(_) => "wrapper",
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub key: ProviderKey,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub message: Option<ProviderMessage>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub message_timestamp: Option<i64>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderKey {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub id: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub participant: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub from_me: Option<bool>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMessage {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub image_message: Option<MediaMessage>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub video_message: Option<MediaMessage>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub document_message: Option<MediaMessage>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub audio_message: Option<MediaMessage>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub sticker_message: Option<MediaMessage>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub reaction_message: Option<ReactionMessage>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub buttons_response_message: Option<ButtonsResponse>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub list_response_message: Option<ListResponse>,
}

impl ProviderMessage {
    pub fn is_empty(&self) -> bool {
        self.conversation.is_none()
            && self.extended_text_message.is_none()
            && self.image_message.is_none()
            && self.video_message.is_none()
            && self.document_message.is_none()
            && self.audio_message.is_none()
            && self.sticker_message.is_none()
            && self.reaction_message.is_none()
            && self.buttons_response_message.is_none()
            && self.list_response_message.is_none()
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtendedText {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub text: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub url: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub file_length: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub file_sha256: Option<String>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub seconds: Option<u32>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub width: Option<u32>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub height: Option<u32>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub caption: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReactionMessage {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub text: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ButtonsResponse {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub selected_button_id: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub single_select_reply: Option<SingleSelectReply>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SingleSelectReply {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub selected_row_id: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct WrapperEvent {
    pub message_key: WrapperKey,
    pub body_message: WrapperBody,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default, alias = "pushName")]
    pub push_name: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default, alias = "chatName")]
    pub chat_name: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WrapperKey {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub id: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default, alias = "remoteJid")]
    pub remote_jid: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub participant: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default, alias = "fromMe")]
    pub from_me: Option<bool>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WrapperBody {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub content: Option<String>,
}
