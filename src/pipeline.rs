use crate::config::{AppConfig, DEFAULT_LOOKUP_TIMEOUT};
use crate::contacts::{ContactResolver, HttpContactResolver, enrich_sender};
use crate::dedup::{DedupQuery, DedupVerdict, Deduplicator};
use crate::directory::Directory;
use crate::listing::ListingParser;
use crate::models::{CanonicalMessage, IngestOutcome, IngestStatus, OfferMatch, StageReport};
use crate::normalize::{self, WebhookPayload};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Duration, time::Instant};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-message composition: classify, normalize, dedup, directory, enrich, parse.
///
/// A duplicate verdict ends processing before any cache other than the deduplicator is touched.
///
/// Cloning is cheap; all caches are shared behind `Arc`s.
#[derive(Clone)]
pub struct Pipeline {
    pub dedup: Deduplicator,
    pub directory: Directory,
    pub parser: ListingParser,
    contacts: Option<Arc<dyn ContactResolver>>,
    lookup_timeout: Duration,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Self {
        let pipeline = Self::with_components(
            Deduplicator::new(config.dedup.clone()),
            Directory::new(),
            ListingParser::new(config.parser),
        );
        match &config.contacts {
            Some(lookup) => pipeline.with_contact_resolver(
                Arc::new(HttpContactResolver::new(lookup)),
                lookup.timeout,
            ),
            None => pipeline,
        }
    }

    pub fn with_components(
        dedup: Deduplicator,
        directory: Directory,
        parser: ListingParser,
    ) -> Self {
        Self {
            dedup,
            directory,
            parser,
            contacts: None,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_contact_resolver(
        mut self,
        resolver: Arc<dyn ContactResolver>,
        timeout: Duration,
    ) -> Self {
        self.contacts = Some(resolver);
        self.lookup_timeout = timeout;
        self
    }

    pub async fn ingest(&self, raw: Value) -> Result<IngestOutcome, PipelineError> {
        let ingest_id = Uuid::new_v4().simple().to_string();
        let mut stages = Vec::new();

        let payload = self
            .capture_stage("classify", &mut stages, async {
                stages::classify(&raw)
            })
            .await?;
        self.directory.mark_webhook_now().await;

        let normalized = self
            .capture_stage("normalize", &mut stages, async {
                Ok::<_, PipelineError>(stages::normalize(&payload))
            })
            .await?;
        let Some(message) = normalized else {
            debug!(target = "watchfeed.pipeline", ingest_id = %ingest_id, family = payload.family(), "no_message_in_payload");
            return Ok(IngestOutcome {
                ingest_id,
                status: IngestStatus::Ignored,
                message: None,
                offers: Vec::new(),
                stages,
            });
        };

        let verdict = self
            .capture_stage("dedup", &mut stages, async {
                Ok::<_, PipelineError>(stages::check_duplicate(&self.dedup, &message).await)
            })
            .await?;
        crate::metrics::dedup_verdict(verdict);
        if verdict.is_duplicate() {
            return Ok(IngestOutcome {
                ingest_id,
                status: IngestStatus::Duplicate,
                message: Some(message),
                offers: Vec::new(),
                stages,
            });
        }

        let message = self
            .capture_stage("directory", &mut stages, {
                let directory = self.directory.clone();
                async move {
                    Ok::<_, PipelineError>(stages::record_identity(&directory, message).await)
                }
            })
            .await?;

        let message = self
            .capture_stage("enrich", &mut stages, {
                let resolver = self.contacts.clone();
                let timeout = self.lookup_timeout;
                async move {
                    Ok::<_, PipelineError>(stages::enrich(message, resolver.as_deref(), timeout).await)
                }
            })
            .await?;

        let offers = self
            .capture_stage("parse_offers", &mut stages, async {
                Ok::<_, PipelineError>(stages::parse_offers(&self.parser, &message))
            })
            .await?;

        info!(
            target = "watchfeed.pipeline",
            ingest_id = %ingest_id,
            chat_id = %message.chat_id,
            kind = message.kind.as_str(),
            offers = offers.len(),
            "message_accepted"
        );

        Ok(IngestOutcome {
            ingest_id,
            status: IngestStatus::Accepted,
            message: Some(message),
            offers,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;

    pub fn classify(raw: &Value) -> Result<StageOutcome<WebhookPayload>, PipelineError> {
        let payload = WebhookPayload::classify(raw)
            .map_err(|err| PipelineError::invalid_input("classify", err.to_string()))?;
        let family = payload.family();
        Ok(StageOutcome::new(payload, json!({ "family": family })))
    }

    pub fn normalize(payload: &WebhookPayload) -> StageOutcome<Option<CanonicalMessage>> {
        let message = normalize::normalize(payload);
        let output = match &message {
            Some(msg) => json!({
                "message_id": msg.id,
                "chat_id": msg.chat_id,
                "kind": msg.kind,
                "is_group": msg.is_group,
                "is_status_broadcast": msg.is_status_broadcast,
                "has_text": msg.text.is_some(),
            }),
            None => json!({ "message": null }),
        };
        StageOutcome::new(message, output)
    }

    /// Learns names from the message and fills a missing sender name from earlier traffic.
    pub async fn record_identity(
        directory: &Directory,
        mut message: CanonicalMessage,
    ) -> StageOutcome<CanonicalMessage> {
        directory
            .upsert_contact(
                &message.sender_address,
                message.sender_display_name.as_deref(),
            )
            .await;
        if message.is_group {
            directory
                .upsert_group(&message.chat_id, message.chat_display_name.as_deref())
                .await;
            if message.chat_display_name.is_none() {
                message.chat_display_name = directory.group_name(&message.chat_id).await;
            }
        }

        let mut name_source = "payload";
        if message.sender_display_name.is_none() {
            message.sender_display_name = directory.contact_name(&message.sender_address).await;
            name_source = if message.sender_display_name.is_some() {
                "directory"
            } else {
                "none"
            };
        }

        let output = json!({
            "sender_address": message.sender_address,
            "display_name_source": name_source,
        });
        StageOutcome::new(message, output)
    }

    pub async fn check_duplicate(
        dedup: &Deduplicator,
        message: &CanonicalMessage,
    ) -> StageOutcome<DedupVerdict> {
        let verdict = dedup
            .check(DedupQuery {
                id: &message.id,
                chat_id: &message.chat_id,
                participant_id: message.participant_id.as_deref(),
                text: message.text.as_deref(),
                sender: Some(message.sender_address.as_str()),
            })
            .await;
        StageOutcome::new(
            verdict,
            json!({ "verdict": verdict, "duplicate": verdict.is_duplicate() }),
        )
    }

    pub async fn enrich(
        message: CanonicalMessage,
        resolver: Option<&dyn ContactResolver>,
        timeout: Duration,
    ) -> StageOutcome<CanonicalMessage> {
        let attempted = resolver.is_some() && message.needs_phone_lookup();
        let message = match resolver {
            Some(resolver) if attempted => enrich_sender(message, resolver, timeout).await,
            _ => message,
        };
        let output = json!({
            "attempted": attempted,
            "has_phone": message.sender_phone.is_some(),
        });
        StageOutcome::new(message, output)
    }

    pub fn parse_offers(
        parser: &ListingParser,
        message: &CanonicalMessage,
    ) -> StageOutcome<Vec<OfferMatch>> {
        let text = message.text.as_deref().unwrap_or_default();
        let dealer_list = parser.is_dealer_list(text);
        let offers = parser.parse_message(text);
        let output = json!({
            "dealer_list": dealer_list,
            "min_lines": parser.min_dealer_lines(),
            "count": offers.len(),
        });
        StageOutcome::new(offers, output)
    }
}
