//! Display names for chats and senders, learned from traffic and kept for the process lifetime.

use crate::models::{ContactInfo, GroupInfo};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct Directory {
    inner: Arc<Mutex<DirectoryState>>,
}

#[derive(Default)]
struct DirectoryState {
    groups: HashMap<String, Option<String>>,
    contacts: HashMap<String, Option<String>>,
    last_webhook: Option<Instant>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the chat as seen; a non-empty name replaces the stored one.
    pub async fn upsert_group(&self, chat_id: &str, name: Option<&str>) {
        let mut state = self.inner.lock().await;
        upsert(&mut state.groups, chat_id, name);
    }

    pub async fn upsert_contact(&self, address: &str, name: Option<&str>) {
        let mut state = self.inner.lock().await;
        upsert(&mut state.contacts, address, name);
    }

    pub async fn group_name(&self, chat_id: &str) -> Option<String> {
        let state = self.inner.lock().await;
        state.groups.get(chat_id).cloned().flatten()
    }

    pub async fn contact_name(&self, address: &str) -> Option<String> {
        let state = self.inner.lock().await;
        state.contacts.get(address).cloned().flatten()
    }

    pub async fn mark_webhook_now(&self) {
        self.mark_webhook_at(Instant::now()).await;
    }

    pub(crate) async fn mark_webhook_at(&self, at: Instant) {
        self.inner.lock().await.last_webhook = Some(at);
    }

    /// `None` until the first webhook has been accepted.
    pub async fn last_webhook_age_ms(&self) -> Option<u64> {
        let state = self.inner.lock().await;
        state
            .last_webhook
            .map(|at| Instant::now().saturating_duration_since(at).as_millis() as u64)
    }

    pub async fn groups_snapshot(&self) -> Vec<GroupInfo> {
        let state = self.inner.lock().await;
        let mut groups: Vec<GroupInfo> = state
            .groups
            .iter()
            .map(|(id, name)| GroupInfo {
                id: id.clone(),
                display_name: name.clone(),
            })
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }

    pub async fn contacts_snapshot(&self) -> Vec<ContactInfo> {
        let state = self.inner.lock().await;
        let mut contacts: Vec<ContactInfo> = state
            .contacts
            .iter()
            .map(|(address, name)| ContactInfo {
                address: address.clone(),
                display_name: name.clone(),
            })
            .collect();
        contacts.sort_by(|a, b| a.address.cmp(&b.address));
        contacts
    }
}

fn upsert(map: &mut HashMap<String, Option<String>>, key: &str, name: Option<&str>) {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    let slot = map.entry(key.to_string()).or_default();
    if let Some(name) = name {
        *slot = Some(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn group_names_are_last_write_wins() {
        let dir = Directory::new();
        dir.upsert_group("1203@g.us", None).await;
        assert_eq!(dir.group_name("1203@g.us").await, None);
        dir.upsert_group("1203@g.us", Some("HK Dealers")).await;
        dir.upsert_group("1203@g.us", Some("  ")).await;
        assert_eq!(dir.group_name("1203@g.us").await.as_deref(), Some("HK Dealers"));
        dir.upsert_group("1203@g.us", Some("HK Dealers 2")).await;
        assert_eq!(
            dir.group_name("1203@g.us").await.as_deref(),
            Some("HK Dealers 2")
        );
    }

    #[tokio::test]
    async fn snapshot_lists_every_seen_group() {
        let dir = Directory::new();
        dir.upsert_group("b@g.us", Some("Bravo")).await;
        dir.upsert_group("a@g.us", None).await;
        let snapshot = dir.groups_snapshot().await;
        assert_eq!(
            snapshot,
            vec![
                GroupInfo {
                    id: "a@g.us".into(),
                    display_name: None
                },
                GroupInfo {
                    id: "b@g.us".into(),
                    display_name: Some("Bravo".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn contacts_keep_known_name() {
        let dir = Directory::new();
        dir.upsert_contact("987@lid", Some("Ann")).await;
        dir.upsert_contact("987@lid", None).await;
        assert_eq!(dir.contact_name("987@lid").await.as_deref(), Some("Ann"));
        assert_eq!(dir.contacts_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn webhook_age_tracks_last_mark() {
        let dir = Directory::new();
        assert_eq!(dir.last_webhook_age_ms().await, None);
        let past = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .expect("instant in the past");
        dir.mark_webhook_at(past).await;
        let age = dir.last_webhook_age_ms().await.expect("age");
        assert!(age >= 5_000);
        dir.mark_webhook_now().await;
        assert!(dir.last_webhook_age_ms().await.expect("age") < 5_000);
    }
}
