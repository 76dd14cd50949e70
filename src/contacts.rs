use crate::config::{ContactLookupConfig, env_parse};
use crate::models::CanonicalMessage;
use crate::normalize::identity::phone_from_digits;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum ContactLookupError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy)]
pub struct ContactQuery<'a> {
    pub address: &'a str,
    pub display_name: &'a str,
    pub chat_id: Option<&'a str>,
}

/// Recovers a dialable number for a sender only known by an opaque id and a display name.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    async fn resolve_phone(
        &self,
        query: ContactQuery<'_>,
    ) -> Result<Option<String>, ContactLookupError>;
}

#[derive(Debug, Clone)]
pub struct HttpContactResolver {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    phone: Option<String>,
}

impl HttpContactResolver {
    pub fn new(config: &ContactLookupConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            http: build_client(config.timeout),
        }
    }
}

fn build_client(timeout: Duration) -> Client {
    let connect = env_parse::<u64>("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5);
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[async_trait]
impl ContactResolver for HttpContactResolver {
    async fn resolve_phone(
        &self,
        query: ContactQuery<'_>,
    ) -> Result<Option<String>, ContactLookupError> {
        let mut url = format!(
            "{}/contacts/resolve?address={}&name={}",
            self.base_url,
            encode(query.address),
            encode(query.display_name)
        );
        if let Some(chat_id) = query.chat_id {
            url.push_str(&format!("&chat_id={}", encode(chat_id)));
        }

        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let response = request
            .send()
            .await
            .map_err(|err| ContactLookupError::Request(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ContactLookupError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: LookupResponse = response
            .json()
            .await
            .map_err(|err| ContactLookupError::Deserialize(err.to_string()))?;
        Ok(payload.phone)
    }
}

/// Fills `sender_phone` for opaque senders when the resolver knows them.
///
/// Failures and timeouts are logged and the message comes back untouched. A recovered phone
/// replaces the opaque id so that only one identity form is ever set.
pub async fn enrich_sender(
    mut message: CanonicalMessage,
    resolver: &dyn ContactResolver,
    timeout: Duration,
) -> CanonicalMessage {
    if !message.needs_phone_lookup() {
        return message;
    }
    let Some(display_name) = message.sender_display_name.clone() else {
        return message;
    };
    let query = ContactQuery {
        address: &message.sender_address,
        display_name: &display_name,
        chat_id: Some(message.chat_id.as_str()),
    };

    let outcome = match tokio::time::timeout(timeout, resolver.resolve_phone(query)).await {
        Ok(result) => result,
        Err(_) => Err(ContactLookupError::Timeout(timeout)),
    };

    match outcome {
        Ok(Some(raw)) => match phone_from_digits(&raw) {
            Some(phone) => {
                debug!(target = "watchfeed.contacts", address = %message.sender_address, "sender_phone_resolved");
                message.sender_phone = Some(phone);
                message.sender_opaque_id = None;
            }
            None => {
                warn!(target = "watchfeed.contacts", address = %message.sender_address, phone = %raw, "resolver_returned_invalid_phone");
            }
        },
        Ok(None) => {
            debug!(target = "watchfeed.contacts", address = %message.sender_address, "sender_phone_unknown");
        }
        Err(err) => {
            warn!(target = "watchfeed.contacts", address = %message.sender_address, error = %err, "contact_lookup_failed");
        }
    }
    message
}

#[cfg(test)]
pub(crate) mod stubs {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct FixedResolver {
        pub phone: Option<String>,
        pub calls: AtomicUsize,
    }

    impl FixedResolver {
        pub fn returning(phone: Option<&str>) -> Self {
            Self {
                phone: phone.map(str::to_string),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContactResolver for FixedResolver {
        async fn resolve_phone(
            &self,
            _query: ContactQuery<'_>,
        ) -> Result<Option<String>, ContactLookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.phone.clone())
        }
    }

    pub struct FailingResolver;

    #[async_trait]
    impl ContactResolver for FailingResolver {
        async fn resolve_phone(
            &self,
            _query: ContactQuery<'_>,
        ) -> Result<Option<String>, ContactLookupError> {
            Err(ContactLookupError::Request("HTTP 503".into()))
        }
    }

    pub struct SlowResolver(pub Duration);

    #[async_trait]
    impl ContactResolver for SlowResolver {
        async fn resolve_phone(
            &self,
            _query: ContactQuery<'_>,
        ) -> Result<Option<String>, ContactLookupError> {
            tokio::time::sleep(self.0).await;
            Ok(Some("+85200000000".into()))
        }
    }
}
