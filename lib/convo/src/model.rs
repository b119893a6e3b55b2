//! Conversation snapshot model.
//!
//! A snapshot is one complete copy of a conversation's documents, alerts and
//! transcripts as returned by a single fetch. Snapshots are replaced
//! wholesale, never merged, and everything derived from one (the selected
//! document, its alerts) is computed on demand from the snapshot alone.

use chrono::{DateTime, NaiveDateTime, Utc};
use lily_core::{AlertId, ConversationId, DocumentId};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A document generated from the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique within the conversation.
    #[serde(default, deserialize_with = "null_as_default")]
    pub document_id: DocumentId,
    #[serde(default)]
    pub convo_id: Option<ConversationId>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    /// Human-readable summary. May contain markdown.
    #[serde(default, deserialize_with = "null_as_default")]
    pub overview: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

/// An alert raised against a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default, deserialize_with = "null_as_default")]
    pub alert_id: AlertId,
    /// The document this alert refers to. It may not be present in the
    /// snapshot.
    #[serde(default, deserialize_with = "null_as_default")]
    pub doc_id: DocumentId,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// Transcript line that triggered the alert, when the server knows it.
    #[serde(default)]
    pub transcript_item_id: Option<String>,
}

impl Alert {
    /// The headline: the message up to its first period.
    #[must_use]
    pub fn title(&self) -> &str {
        self.message
            .split_once('.')
            .map_or(self.message.as_str(), |(title, _)| title)
            .trim()
    }

    /// Everything after the first period, or the whole message when nothing
    /// follows it.
    #[must_use]
    pub fn body(&self) -> &str {
        let rest = self
            .message
            .split_once('.')
            .map_or("", |(_, rest)| rest)
            .trim();
        if rest.is_empty() {
            self.message.trim()
        } else {
            rest
        }
    }
}

/// Everything the server holds for one conversation, fetched in one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    /// In server order, which is display order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub documents: Vec<Document>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alerts: Vec<Alert>,
    /// Passed through untouched.
    #[serde(default, deserialize_with = "null_as_default")]
    pub transcripts: Vec<serde_json::Value>,
}

impl ConversationSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.alerts.is_empty() && self.transcripts.is_empty()
    }

    /// Looks up a document by id.
    #[must_use]
    pub fn document(&self, document_id: &DocumentId) -> Option<&Document> {
        self.documents
            .iter()
            .find(|d| &d.document_id == document_id)
    }

    /// Alerts referring to `document_id`, in server order.
    pub fn alerts_for<'a>(
        &'a self,
        document_id: &'a DocumentId,
    ) -> impl Iterator<Item = &'a Alert> + 'a {
        self.alerts.iter().filter(move |a| &a.doc_id == document_id)
    }

    /// Alerts whose document is not part of this snapshot.
    pub fn dangling_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts
            .iter()
            .filter(move |a| self.document(&a.doc_id).is_none())
    }

    /// Selects the document at `index` together with its alerts.
    #[must_use]
    pub fn select(&self, index: usize) -> Option<DocumentSelection<'_>> {
        let document = self.documents.get(index)?;
        Some(DocumentSelection {
            document,
            alerts: self.alerts_for(&document.document_id).collect(),
            position: index + 1,
            total: self.documents.len(),
        })
    }
}

/// A document chosen by position, with the alerts that refer to it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSelection<'a> {
    pub document: &'a Document,
    pub alerts: Vec<&'a Alert>,
    /// 1-based.
    pub position: usize,
    pub total: usize,
}

impl fmt::Display for DocumentSelection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.position, self.total)
    }
}

/// Accepts RFC 3339 and the space-separated UTC form some stores emit.
/// Anything else becomes `None` instead of failing the snapshot.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Treats an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
