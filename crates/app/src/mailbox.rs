use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_rag_core::{Document, DocumentStore, EmbeddedFilter, StoreError, TenantId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One email in a mailbox export file. Tenant ids come from the CLI, not the
/// file, so an export can be loaded under any tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MailboxEntry {
    document_id: String,
    sender: String,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    text_content: String,
    #[serde(default)]
    is_embedded: bool,
    #[serde(default)]
    embedded_at: Option<DateTime<Utc>>,
}

/// File-backed document store for the CLI: a JSON array of mailbox entries.
/// Embedding-status flips are written back to the file so interrupted
/// vectorization runs resume where they stopped.
pub struct JsonMailboxStore {
    path: PathBuf,
    tenant: TenantId,
    entries: Mutex<Vec<MailboxEntry>>,
}

impl JsonMailboxStore {
    pub fn load(path: &Path, tenant: &TenantId) -> Result<Self, StoreError> {
        let raw = fs::read_to_string(path)?;
        let entries: Vec<MailboxEntry> = serde_json::from_str(&raw)?;

        Ok(Self {
            path: path.to_path_buf(),
            tenant: tenant.clone(),
            entries: Mutex::new(entries),
        })
    }

    fn to_document(&self, entry: &MailboxEntry) -> Document {
        Document {
            document_id: entry.document_id.clone(),
            org_id: self.tenant.org_id.clone(),
            user_id: self.tenant.user_id.clone(),
            text_content: entry.text_content.clone(),
            sent_at: entry.sent_at,
            sender: entry.sender.clone(),
            sender_name: entry.sender_name.clone(),
            subject: entry.subject.clone(),
            thread_id: entry.thread_id.clone(),
            is_embedded: entry.is_embedded,
            embedded_at: entry.embedded_at,
        }
    }

    fn persist(&self, entries: &[MailboxEntry]) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }

    fn matches(&self, tenant: &TenantId) -> bool {
        self.tenant == *tenant
    }
}

#[async_trait]
impl DocumentStore for JsonMailboxStore {
    async fn list_documents(
        &self,
        tenant: &TenantId,
        filter: EmbeddedFilter,
    ) -> Result<Vec<Document>, StoreError> {
        if !self.matches(tenant) {
            return Ok(Vec::new());
        }

        Ok(self
            .entries
            .lock()
            .expect("mailbox lock")
            .iter()
            .filter(|entry| match filter {
                EmbeddedFilter::All => true,
                EmbeddedFilter::Pending => !entry.is_embedded,
                EmbeddedFilter::Embedded => entry.is_embedded,
            })
            .map(|entry| self.to_document(entry))
            .collect())
    }

    async fn count_documents(
        &self,
        tenant: &TenantId,
        filter: EmbeddedFilter,
    ) -> Result<usize, StoreError> {
        Ok(self.list_documents(tenant, filter).await?.len())
    }

    async fn mark_embedded(
        &self,
        document_id: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let snapshot = {
            let mut entries = self.entries.lock().expect("mailbox lock");
            let entry = entries
                .iter_mut()
                .find(|entry| entry.document_id == document_id)
                .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
            entry.is_embedded = true;
            entry.embedded_at = Some(embedded_at);
            entries.clone()
        };

        self.persist(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_mailbox(path: &Path) {
        fs::write(
            path,
            r#"[
                {"document_id": "m-1", "sender": "a@x.com", "subject": "one",
                 "sent_at": "2024-01-05T09:00:00Z", "text_content": "First mail."},
                {"document_id": "m-2", "sender": "b@x.com",
                 "text_content": "Second mail.", "is_embedded": true}
            ]"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn loads_entries_under_the_cli_tenant() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mailbox.json");
        write_mailbox(&path);

        let tenant = TenantId::new("acme", "u-1");
        let store = JsonMailboxStore::load(&path, &tenant).unwrap();

        let all = store
            .list_documents(&tenant, EmbeddedFilter::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].org_id, "acme");

        let pending = store
            .list_documents(&tenant, EmbeddedFilter::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].document_id, "m-1");
    }

    #[tokio::test]
    async fn other_tenants_see_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mailbox.json");
        write_mailbox(&path);

        let store = JsonMailboxStore::load(&path, &TenantId::new("acme", "u-1")).unwrap();
        let other = TenantId::new("globex", "u-9");
        assert!(store
            .list_documents(&other, EmbeddedFilter::All)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn mark_embedded_persists_across_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mailbox.json");
        write_mailbox(&path);

        let tenant = TenantId::new("acme", "u-1");
        let store = JsonMailboxStore::load(&path, &tenant).unwrap();
        store
            .mark_embedded("m-1", Utc::now())
            .await
            .unwrap();

        let reloaded = JsonMailboxStore::load(&path, &tenant).unwrap();
        let pending = reloaded
            .count_documents(&tenant, EmbeddedFilter::Pending)
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn unknown_document_id_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mailbox.json");
        write_mailbox(&path);

        let store = JsonMailboxStore::load(&path, &TenantId::new("acme", "u-1")).unwrap();
        let result = store.mark_embedded("missing", Utc::now()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
