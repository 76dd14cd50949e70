pub mod identity;
pub mod payload;

pub use payload::WebhookPayload;

use crate::models::{CanonicalMessage, MediaInfo, MessageKind};
use identity::{classify_chat, resolve_identity, sender_address};
use payload::{MediaMessage, ProviderEvent, ProviderMessage, WrapperEvent};

/// `None` when the shape was fine but there is no message worth processing (empty `message`
/// union, no chat or message id).
pub fn normalize(payload: &WebhookPayload) -> Option<CanonicalMessage> {
    match payload {
        WebhookPayload::Provider(event) => normalize_provider(event),
        WebhookPayload::Wrapper(event) => normalize_wrapper(event),
    }
}

fn normalize_provider(event: &ProviderEvent) -> Option<CanonicalMessage> {
    let message = event.message.as_ref().filter(|m| !m.is_empty())?;
    let id = clean(event.key.id.as_deref())?;
    let chat_id = clean(event.key.remote_jid.as_deref())?;
    let text = extract_text(message);
    let kind = infer_kind(message, text.is_some());

    Some(build_message(
        MessageParts {
            id,
            chat_id,
            participant: event.key.participant.as_deref(),
            from_me: event.key.from_me.unwrap_or(false),
            timestamp: event.message_timestamp,
            display_name: clean(event.push_name.as_deref()),
            chat_name: None,
        },
        text,
        kind,
        extract_media(message),
    ))
}

fn normalize_wrapper(event: &WrapperEvent) -> Option<CanonicalMessage> {
    let id = clean(event.message_key.id.as_deref())?;
    let chat_id = clean(event.message_key.remote_jid.as_deref())?;
    let kind = match event
        .body_message
        .kind
        .as_deref()
        .map(|k| k.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("text") => MessageKind::Text,
        Some("image") => MessageKind::Image,
        Some("video") => MessageKind::Video,
        _ => MessageKind::Unknown,
    };

    Some(build_message(
        MessageParts {
            id,
            chat_id,
            participant: event.message_key.participant.as_deref(),
            from_me: event.message_key.from_me.unwrap_or(false),
            timestamp: event.timestamp,
            display_name: clean(event.push_name.as_deref()),
            chat_name: clean(event.chat_name.as_deref()),
        },
        clean(event.body_message.content.as_deref()),
        kind,
        None,
    ))
}

struct MessageParts<'a> {
    id: String,
    chat_id: String,
    participant: Option<&'a str>,
    from_me: bool,
    timestamp: Option<i64>,
    display_name: Option<String>,
    chat_name: Option<String>,
}

fn build_message(
    parts: MessageParts<'_>,
    text: Option<String>,
    kind: MessageKind,
    media: Option<MediaInfo>,
) -> CanonicalMessage {
    let origin = classify_chat(&parts.chat_id);
    let participant_id = if origin.is_group {
        clean(parts.participant)
    } else {
        None
    };
    let address = sender_address(&parts.chat_id, participant_id.as_deref(), origin.is_group);
    let (sender_phone, sender_opaque_id) = resolve_identity(&address).into_parts();

    CanonicalMessage {
        id: parts.id,
        chat_id: parts.chat_id,
        participant_id,
        is_group: origin.is_group,
        is_status_broadcast: origin.is_status_broadcast,
        is_broadcast: origin.is_broadcast,
        from_me: parts.from_me,
        timestamp: parts.timestamp,
        sender_display_name: parts.display_name,
        chat_display_name: parts.chat_name,
        sender_address: address,
        sender_phone,
        sender_opaque_id,
        text,
        kind,
        media,
    }
}

/// Conversation, extended text, media captions, then interactive reply ids.
fn extract_text(message: &ProviderMessage) -> Option<String> {
    let captions = [
        &message.image_message,
        &message.video_message,
        &message.document_message,
        &message.audio_message,
    ];
    clean(message.conversation.as_deref())
        .or_else(|| {
            clean(
                message
                    .extended_text_message
                    .as_ref()
                    .and_then(|ext| ext.text.as_deref()),
            )
        })
        .or_else(|| {
            captions
                .into_iter()
                .find_map(|media| clean(media.as_ref().and_then(|m| m.caption.as_deref())))
        })
        .or_else(|| {
            clean(
                message
                    .buttons_response_message
                    .as_ref()
                    .and_then(|b| b.selected_button_id.as_deref()),
            )
        })
        .or_else(|| {
            clean(
                message
                    .list_response_message
                    .as_ref()
                    .and_then(|l| l.single_select_reply.as_ref())
                    .and_then(|r| r.selected_row_id.as_deref()),
            )
        })
}

fn infer_kind(message: &ProviderMessage, has_text: bool) -> MessageKind {
    if message.image_message.is_some() {
        MessageKind::Image
    } else if message.video_message.is_some() {
        MessageKind::Video
    } else if message.document_message.is_some() {
        MessageKind::Document
    } else if message.audio_message.is_some() {
        MessageKind::Audio
    } else if message.sticker_message.is_some() {
        MessageKind::Sticker
    } else if message.reaction_message.is_some() {
        MessageKind::Reaction
    } else if has_text
        || message.conversation.is_some()
        || message.extended_text_message.is_some()
    {
        MessageKind::Text
    } else {
        MessageKind::Unknown
    }
}

fn extract_media(message: &ProviderMessage) -> Option<MediaInfo> {
    let media = [
        &message.image_message,
        &message.video_message,
        &message.document_message,
        &message.audio_message,
        &message.sticker_message,
    ]
    .into_iter()
    .find_map(Option::as_ref)?;
    Some(media_info(media))
}

fn media_info(media: &MediaMessage) -> MediaInfo {
    MediaInfo {
        url: clean(media.url.as_deref()),
        mime_type: clean(media.mimetype.as_deref()),
        file_name: clean(media.file_name.as_deref()),
        byte_size: media.file_length,
        sha256: clean(media.file_sha256.as_deref()),
        duration_secs: media.seconds,
        width: media.width,
        height: media.height,
        caption: clean(media.caption.as_deref()),
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
