//! Shared data types
//!
//! Retrieval results, their payloads, and embedding vector helpers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Embedding Vectors
// ============================================================================

/// An embedding vector; dimension is fixed per deployment
pub type Embedding = Vec<f32>;

/// Build the all-zero sentinel returned when every embedding backend failed
#[must_use]
pub fn zero_vector(dimension: usize) -> Embedding {
    vec![0.0; dimension]
}

/// Whether a vector is the "computation failed" sentinel
#[must_use]
pub fn is_zero_vector(vector: &[f32]) -> bool {
    vector.iter().all(|v| *v == 0.0)
}

// ============================================================================
// Payload
// ============================================================================

/// Structured payload attached to a stored point or retrieval result
///
/// Known fields are typed; anything else lands in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Primary text body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Title or heading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Short summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Origin of the content (file path, URL, agent id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Owning document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    /// Parent node for hierarchical (tree) retrieval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Unrecognized fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Payload {
    /// Payload with only a text body
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Best available body text: `text`, then `summary`, then `title`
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or(self.summary.as_deref())
            .or(self.title.as_deref())
    }

    /// Every string-valued field, including strings nested inside `extra`
    #[must_use]
    pub fn string_fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = [
            &self.text,
            &self.title,
            &self.summary,
            &self.source,
            &self.document_id,
            &self.parent_id,
        ]
        .into_iter()
        .filter_map(|f| f.as_deref())
        .collect();

        for value in self.extra.values() {
            collect_strings(value, &mut out);
        }
        out
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

// ============================================================================
// Search Results
// ============================================================================

/// A single retrieval hit; lives for one request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Point or row identifier
    pub id: String,

    /// Collection (or source table) the hit came from
    pub collection: String,

    /// Retrieved text
    pub content: String,

    /// Retrieval score; normalized to [0, 1] after merging
    pub score: f32,

    /// Structured payload
    #[serde(default)]
    pub payload: Payload,
}

impl SearchResult {
    /// Create a result whose content is taken from the payload body
    pub fn from_payload(
        id: impl Into<String>,
        collection: impl Into<String>,
        score: f32,
        payload: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            content: payload.body().unwrap_or_default().to_string(),
            score,
            payload,
        }
    }

    /// Identifier used in logs: `collection/id`
    #[must_use]
    pub fn source_id(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    /// Text inspected by the content filter: the content plus every
    /// string-valued payload field
    #[must_use]
    pub fn scannable_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.content.is_empty() {
            parts.push(self.content.as_str());
        }
        for field in self.payload.string_fields() {
            if field != self.content {
                parts.push(field);
            }
        }
        parts.join("\n")
    }

    /// Key used to merge the same hit found by two strategies
    pub(crate) fn merge_key(&self) -> (String, String) {
        (self.collection.clone(), self.id.clone())
    }
}

/// A point returned by the vector store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    /// Point identifier
    pub id: String,
    /// Similarity score
    pub score: f32,
    /// Stored payload
    #[serde(default)]
    pub payload: Payload,
}

/// A point to write into the vector store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Point identifier
    pub id: String,
    /// Embedding
    pub vector: Embedding,
    /// Payload stored alongside
    pub payload: Payload,
}
