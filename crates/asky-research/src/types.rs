use serde::{Deserialize, Serialize};

/// One outbound link extracted from a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Visible label text.
    pub text: String,
    /// Absolute href.
    pub href: String,
}

/// Lifecycle of a cache entry's background summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Pending => "pending",
            SummaryStatus::Processing => "processing",
            SummaryStatus::Completed => "completed",
            SummaryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => SummaryStatus::Processing,
            "completed" => SummaryStatus::Completed,
            "failed" => SummaryStatus::Failed,
            _ => SummaryStatus::Pending,
        }
    }
}

/// A cached page or local document, served only while unexpired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: i64,
    pub url: String,
    pub content: String,
    pub title: String,
    pub summary: Option<String>,
    pub summary_status: SummaryStatus,
    pub links: Vec<Link>,
    pub fetch_timestamp: String,
    pub expires_at: String,
}

/// A persisted research finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub finding_text: String,
    pub source_url: Option<String>,
    pub source_title: Option<String>,
    pub tags: Vec<String>,
    pub has_embedding: bool,
    pub embedding_model: Option<String>,
    pub created_at: String,
    /// Session scope; findings are global when absent. Stored as TEXT —
    /// the agent layer converts integer session ids at this boundary.
    pub session_id: Option<String>,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub summarized_entries: usize,
    pub total_chunks: usize,
}
