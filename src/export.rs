//! Offers from chat history exported by the messaging app.
//!
//! Each message starts with a `[date, time] Sender: body` header; lines without a header
//! continue the previous body.

use crate::listing::ListingParser;
use crate::models::OfferMatch;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_with::skip_serializing_none;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[([\d/.]+),\s*(\d{1,2}:\d{2}(?::\d{2})?(?:\s*[APap][Mm])?)\]\s*([^:]+?):\s*(.*)$",
    )
    .expect("export header regex")
});

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%m/%d/%Y", "%d/%m/%y", "%m/%d/%y", "%d.%m.%Y"];
const TIME_FORMATS: &[&str] = &["%I:%M:%S %p", "%I:%M %p", "%H:%M:%S", "%H:%M"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedMessage {
    pub date: String,
    pub time: String,
    pub sender: String,
    pub body: String,
}

impl ExportedMessage {
    /// Epoch seconds, reading the header as UTC. `None` when no known format matches.
    pub fn timestamp(&self) -> Option<i64> {
        let time = self.time.to_uppercase().replace("\u{202f}", " ");
        let time = TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(time.trim(), fmt).ok())?;
        let date = DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(&self.date, fmt).ok())?;
        Some(NaiveDateTime::new(date, time).and_utc().timestamp())
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ExportOffer {
    pub sender: String,
    pub date: String,
    pub time: String,
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub offer: OfferMatch,
}

pub fn parse_chat_export(text: &str) -> Vec<ExportedMessage> {
    let mut messages: Vec<ExportedMessage> = Vec::new();
    for line in text.lines() {
        let line = line.trim_start_matches('\u{200e}');
        if let Some(caps) = HEADER_RE.captures(line) {
            let field = |idx: usize| {
                caps.get(idx)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default()
            };
            messages.push(ExportedMessage {
                date: field(1),
                time: field(2),
                sender: field(3),
                body: field(4),
            });
        } else if let Some(current) = messages.last_mut() {
            current.body.push('\n');
            current.body.push_str(line);
        }
    }
    messages
}

pub fn extract_offers(parser: &ListingParser, text: &str) -> Vec<ExportOffer> {
    parse_chat_export(text)
        .into_iter()
        .flat_map(|message| {
            let timestamp = message.timestamp();
            parser
                .parse_message(&message.body)
                .into_iter()
                .map(move |offer| ExportOffer {
                    sender: message.sender.clone(),
                    date: message.date.clone(),
                    time: message.time.clone(),
                    timestamp,
                    offer,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
