//! Field extraction for dealer offer lines such as `5712/1R blue 7/2025 HKD 908k`.

use crate::config::ParserConfig;
use crate::models::OfferMatch;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static YEAR_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(0?[1-9]|1[0-2])/(20\d{2})\b").expect("year-month regex"));

static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{3,4}(?:/\d+[a-z]?)?)\b").expect("reference regex"));

static COLOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(blue|white|green|black|salmon|grey|choco|coffee)\b").expect("color regex")
});

static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]{3})\b").expect("currency regex"));

static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)(?:\s?([km]))?\b")
        .expect("price regex")
});

static MEDIA_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)photo|omitted|attached:").expect("placeholder regex"));

// checked in order; the first phrase present wins
static CONDITIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\blike new\b", "like new"),
        (r"(?i)\bused\b", "used"),
        (r"(?i)\bfull ?set\b", "full set"),
        (r"(?i)\bmint\b", "mint"),
        (r"(?i)\bnew\b", "new"),
        (r"(?i)\bonly watch\b", "only watch"),
    ]
    .into_iter()
    .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, label)))
    .collect()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct ListingParser {
    config: ParserConfig,
}

impl ListingParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn min_dealer_lines(&self) -> usize {
        self.config.min_dealer_lines
    }

    pub fn is_dealer_list(&self, text: &str) -> bool {
        non_empty_lines(text).count() >= self.config.min_dealer_lines
    }

    /// Per-line extraction over a price list. Short blocks are conversation and yield nothing.
    pub fn parse_dealer_list(&self, text: &str) -> Vec<OfferMatch> {
        if !self.is_dealer_list(text) {
            return Vec::new();
        }
        non_empty_lines(text)
            .filter(|line| !is_media_placeholder(line))
            .filter_map(parse_offer_line)
            .collect()
    }

    /// Dealer lists are parsed line by line; anything shorter is read as a single offer.
    /// Attachment placeholder lines are dropped on both paths.
    pub fn parse_message(&self, text: &str) -> Vec<OfferMatch> {
        if self.is_dealer_list(text) {
            return self.parse_dealer_list(text);
        }
        let joined = non_empty_lines(text)
            .filter(|line| !is_media_placeholder(line))
            .collect::<Vec<_>>()
            .join(" ");
        parse_offer_line(&joined).into_iter().collect()
    }
}

/// Extracts every recognizable field, keeping the line only if it reads as a listing.
pub fn parse_offer_line(line: &str) -> Option<OfferMatch> {
    Some(parse_line(line)).filter(OfferMatch::is_listing)
}

pub fn parse_line(line: &str) -> OfferMatch {
    let line = line.trim();
    let mut masked = line.to_string();

    let year_month = YEAR_MONTH_RE.captures(line).and_then(|caps| {
        let month: u32 = caps.get(1)?.as_str().parse().ok()?;
        let year = caps.get(2)?.as_str();
        mask(&mut masked, caps.get(0)?.range());
        Some(format!("{year}-{month:02}"))
    });

    let reference = REFERENCE_RE.captures(&masked.clone()).and_then(|caps| {
        let found = caps.get(1)?;
        mask(&mut masked, found.range());
        Some(found.as_str().to_uppercase())
    });

    let color = COLOR_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase());

    let currency = CURRENCY_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let price = pick_price(&masked);

    let condition = CONDITIONS
        .iter()
        .find(|(re, _)| re.is_match(line))
        .map(|(_, label)| label.to_string());

    OfferMatch {
        reference,
        color,
        year_month,
        currency,
        price_raw: price.as_ref().map(|p| p.raw.clone()),
        price_value: price.map(|p| p.value),
        condition,
        raw_line: line.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceToken {
    pub raw: String,
    pub value: f64,
    pub scaled: bool,
}

/// Parses one price token (`908k`, `1.205m`, `908,000`) into its scaled value.
pub fn parse_price(token: &str) -> Option<PriceToken> {
    let caps = PRICE_RE.captures(token.trim())?;
    price_from_captures(&caps)
}

fn price_from_captures(caps: &regex::Captures<'_>) -> Option<PriceToken> {
    let raw = caps.get(0)?.as_str().trim().to_string();
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(suffix) if suffix == "k" => 1_000.0,
        Some(suffix) if suffix == "m" => 1_000_000.0,
        _ => 1.0,
    };
    Some(PriceToken {
        raw,
        value: round_cents(number * multiplier),
        scaled: caps.get(2).is_some(),
    })
}

/// A suffixed token wins; otherwise the largest bare number is taken as the price.
fn pick_price(masked: &str) -> Option<PriceToken> {
    let candidates: Vec<PriceToken> = PRICE_RE
        .find_iter(masked)
        .filter_map(|m| parse_price(m.as_str()))
        .collect();
    if let Some(scaled) = candidates.iter().find(|p| p.scaled) {
        return Some(scaled.clone());
    }
    candidates
        .into_iter()
        .max_by(|a, b| a.value.total_cmp(&b.value))
}

/// Lines standing in for attachments in exported chats (`image omitted`, `<attached: ...>`).
pub fn is_media_placeholder(line: &str) -> bool {
    MEDIA_PLACEHOLDER_RE.is_match(line)
}

fn mask(target: &mut String, range: Range<usize>) {
    let width = range.len();
    target.replace_range(range, &" ".repeat(width));
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}
