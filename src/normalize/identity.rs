//! Address rules: `<local>@<domain>`, where the domain tells phone-number addressing apart
//! from opaque platform identifiers.

pub const GROUP_SUFFIX: &str = "@g.us";
pub const BROADCAST_SUFFIX: &str = "@broadcast";
pub const STATUS_BROADCAST: &str = "status@broadcast";

const PHONE_DOMAINS: &[&str] = &["s.whatsapp.net", "c.us"];
const OPAQUE_DOMAINS: &[&str] = &["lid"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address<'a> {
    pub local: &'a str,
    pub domain: &'a str,
}

pub fn split_address(address: &str) -> Option<Address<'_>> {
    let (local, domain) = address.trim().split_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(Address { local, domain })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderIdentity {
    /// `+<digits>`
    Phone(String),
    Opaque(String),
    Unknown,
}

impl SenderIdentity {
    pub fn into_parts(self) -> (Option<String>, Option<String>) {
        match self {
            SenderIdentity::Phone(phone) => (Some(phone), None),
            SenderIdentity::Opaque(id) => (None, Some(id)),
            SenderIdentity::Unknown => (None, None),
        }
    }
}

pub fn resolve_identity(address: &str) -> SenderIdentity {
    let Some(Address { local, domain }) = split_address(address) else {
        return SenderIdentity::Unknown;
    };
    let domain = domain.to_ascii_lowercase();

    if PHONE_DOMAINS.contains(&domain.as_str()) {
        // multi-device addresses carry `:<device>` after the number
        let number = local.split_once(':').map_or(local, |(number, _)| number);
        return match phone_from_digits(number) {
            Some(phone) => SenderIdentity::Phone(phone),
            None => SenderIdentity::Unknown,
        };
    }

    if OPAQUE_DOMAINS.contains(&domain.as_str()) {
        return SenderIdentity::Opaque(local.to_string());
    }

    SenderIdentity::Unknown
}

/// Normalizes a bare number (optionally already `+`-prefixed) into `+<digits>`.
pub fn phone_from_digits(raw: &str) -> Option<String> {
    let digits = raw.trim().trim_start_matches('+');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("+{digits}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatOrigin {
    pub is_group: bool,
    pub is_status_broadcast: bool,
    pub is_broadcast: bool,
}

pub fn classify_chat(chat_id: &str) -> ChatOrigin {
    let chat_id = chat_id.trim();
    ChatOrigin {
        is_group: chat_id.ends_with(GROUP_SUFFIX),
        is_status_broadcast: chat_id == STATUS_BROADCAST,
        is_broadcast: chat_id.ends_with(BROADCAST_SUFFIX),
    }
}

/// The participant speaks for group chats; the chat itself is the sender otherwise.
pub fn sender_address(chat_id: &str, participant: Option<&str>, is_group: bool) -> String {
    let participant = participant.map(str::trim).filter(|p| !p.is_empty());
    match (is_group, participant) {
        (true, Some(participant)) => participant.to_string(),
        _ => chat_id.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_addressing_yields_plus_form() {
        assert_eq!(
            resolve_identity("85291234567@s.whatsapp.net"),
            SenderIdentity::Phone("+85291234567".into())
        );
        assert_eq!(
            resolve_identity("556899336555:42@s.whatsapp.net"),
            SenderIdentity::Phone("+556899336555".into())
        );
    }

    #[test]
    fn non_digit_phone_local_part_yields_nothing() {
        assert_eq!(
            resolve_identity("abc123@s.whatsapp.net"),
            SenderIdentity::Unknown
        );
    }

    #[test]
    fn opaque_addressing_keeps_local_part_verbatim() {
        assert_eq!(
            resolve_identity("236395184570386.1:75@lid"),
            SenderIdentity::Opaque("236395184570386.1:75".into())
        );
    }

    #[test]
    fn other_domains_yield_nothing() {
        assert_eq!(
            resolve_identity("120363021033254949@g.us"),
            SenderIdentity::Unknown
        );
        assert_eq!(resolve_identity("no-at-sign"), SenderIdentity::Unknown);
        assert_eq!(resolve_identity("@lid"), SenderIdentity::Unknown);
    }

    #[test]
    fn chat_origin_flags() {
        let group = classify_chat("120363021033254949@g.us");
        assert!(group.is_group && !group.is_broadcast);
        let status = classify_chat(STATUS_BROADCAST);
        assert!(status.is_status_broadcast && status.is_broadcast && !status.is_group);
        let direct = classify_chat("85291234567@s.whatsapp.net");
        assert_eq!(direct, ChatOrigin::default());
    }

    #[test]
    fn group_sender_is_participant() {
        assert_eq!(
            sender_address("1203@g.us", Some("852@s.whatsapp.net"), true),
            "852@s.whatsapp.net"
        );
        assert_eq!(
            sender_address("852@s.whatsapp.net", Some("ignored@lid"), false),
            "852@s.whatsapp.net"
        );
        assert_eq!(sender_address("1203@g.us", Some(" "), true), "1203@g.us");
    }
}
