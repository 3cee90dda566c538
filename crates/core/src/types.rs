//! The catalog data model: entries, rules, resource sets, artifacts, jobs, sources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A cataloged filesystem node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub path: String,
    pub parent: Option<String>,
    pub size: u64,
    pub kind: EntryKind,
    pub ctime: i64,
    pub mtime: i64,
    pub last_scanned: i64,
}

// ---------------------------------------------------------------------------
// Media type inference — canonical table (§4.6 / §9 open question (b))
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Infer a media type from a path's extension, using the rule-engine's
/// canonical extension table (the media detector reuses this list rather
/// than keeping a diverging one).
pub fn infer_media_type(path: &str) -> Option<MediaType> {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    const IMAGE: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "heic"];
    const VIDEO: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"];
    const AUDIO: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "wma", "m4a"];
    const DOCUMENT: &[&str] = &["pdf", "doc", "docx", "txt", "rtf", "odt"];

    if IMAGE.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else if VIDEO.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else if AUDIO.contains(&ext.as_str()) {
        Some(MediaType::Audio)
    } else if DOCUMENT.contains(&ext.as_str()) {
        Some(MediaType::Document)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Rule / RuleCondition / RuleOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub priority: i64,
    pub condition: RuleCondition,
    pub outcome: RuleOutcome,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeLeaf {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeLeaf {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_ctime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ctime: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathLeaf {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// A recursive boolean predicate tree evaluated against an [`Entry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    All { children: Vec<RuleCondition> },
    Any { children: Vec<RuleCondition> },
    None { children: Vec<RuleCondition> },
    MediaType { media_type: MediaType },
    Size {
        #[serde(flatten)]
        leaf: SizeLeaf,
    },
    Time {
        #[serde(flatten)]
        leaf: TimeLeaf,
    },
    Path {
        #[serde(flatten)]
        leaf: PathLeaf,
    },
}

/// A single tool invocation, e.g. `classifier.generate_thumbnail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
}

/// The action a rule takes on a match: a single tool call, or an ordered chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleOutcome {
    Tool(ToolCall),
    Chained {
        outcomes: Vec<RuleOutcome>,
        #[serde(default)]
        stop_on_error: bool,
    },
}

impl RuleOutcome {
    /// Every `selection_set.add`-style call recursively carries a non-empty `set` name.
    pub fn validate(&self) -> crate::error::Result<()> {
        match self {
            RuleOutcome::Tool(call) => {
                if call.tool == "selection_set.add" {
                    let name = call.args.get("set").and_then(|v| v.as_str()).unwrap_or("");
                    if name.is_empty() {
                        return Err(crate::error::CatalogError::invalid(
                            "selection_set.add requires a non-empty 'set' argument",
                        ));
                    }
                }
                Ok(())
            }
            RuleOutcome::Chained { outcomes, .. } => {
                for o in outcomes {
                    o.validate()?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceSet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSet {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub criteria_type: String,
    pub created_at: i64,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Artifact / metadata record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub hash: String,
    pub source_path: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub mime_type: String,
    pub cache_path: String,
    pub file_size: u64,
    pub metadata_json: serde_json::Value,
    pub generator: String,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub resource: String,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Manual,
    Live,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub root_path: String,
    pub config_json: serde_json::Value,
    pub status: SourceStatus,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_error: Option<String>,
}

/// Per-source live-watcher configuration, parsed out of `Source::config_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSourceConfig {
    #[serde(default = "default_true")]
    pub watch_recursive: bool,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_batch_size() -> usize {
    100
}

impl Default for LiveSourceConfig {
    fn default() -> Self {
        Self {
            watch_recursive: true,
            ignore_patterns: Vec::new(),
            debounce_ms: default_debounce_ms(),
            batch_size: default_batch_size(),
        }
    }
}
