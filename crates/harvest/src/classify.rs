//! Fault classification and diagnostic capture.
//!
//! Every failure leaving the coordinator passes through [`ErrorClassifier`],
//! which assigns an [`ErrorKind`] and attaches a [`Diagnostic`] snapshot so
//! that a changed page can be inspected after the fact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ErrorKind, ExtractionError, Fault, FetchError};

/// Pipeline stage a fault was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Policy,
    Fetch,
    Extract,
    Normalize,
}

/// Snapshot captured alongside a classified failure.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub id: Uuid,
    pub stage: Stage,
    pub captured_at: DateTime<Utc>,
    /// Page content (extraction stages) or fault text (fetch stages).
    pub snapshot: String,
    /// Byte length before capping.
    pub original_len: usize,
    pub truncated: bool,
    /// Where the snapshot was persisted, if anywhere.
    pub path: Option<PathBuf>,
}

impl Diagnostic {
    /// Handle surfaced to callers: the persisted file, else the id.
    pub fn reference(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    snapshot_limit: usize,
    diagnostics_dir: Option<PathBuf>,
}

impl ErrorClassifier {
    pub fn new(snapshot_limit: usize, diagnostics_dir: Option<PathBuf>) -> Self {
        Self {
            snapshot_limit,
            diagnostics_dir,
        }
    }

    pub fn kind_of(fault: &Fault) -> ErrorKind {
        match fault {
            Fault::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            Fault::Fetch(FetchError::Timeout { .. }) | Fault::Deadline(_) => ErrorKind::Timeout,
            Fault::Fetch(_) | Fault::Aborted { .. } => ErrorKind::Network,
            Fault::StructureChanged { .. } => ErrorKind::StructureChanged,
            Fault::EmptyResult { .. } => ErrorKind::EmptyResult,
        }
    }

    /// Classify `fault`. `content` is the fetched page, when there was one.
    pub fn classify(&self, fault: Fault, content: Option<&str>) -> ExtractionError {
        let kind = Self::kind_of(&fault);
        let stage = match &fault {
            Fault::PolicyDenied { .. } => Stage::Policy,
            Fault::Fetch(_) | Fault::Deadline(_) | Fault::Aborted { .. } => Stage::Fetch,
            Fault::StructureChanged { .. } => Stage::Extract,
            Fault::EmptyResult { .. } => Stage::Normalize,
        };

        let diagnostic = match (stage, content) {
            (Stage::Policy, _) => None,
            (Stage::Extract | Stage::Normalize, Some(page)) => Some(self.capture(stage, page, true)),
            _ => Some(self.capture(stage, &fault.to_string(), false)),
        };

        ExtractionError::new(kind, fault, diagnostic)
    }

    fn capture(&self, stage: Stage, text: &str, persist: bool) -> Diagnostic {
        let snapshot = truncate_at_char_boundary(text, self.snapshot_limit);
        let mut diagnostic = Diagnostic {
            id: Uuid::new_v4(),
            stage,
            captured_at: Utc::now(),
            truncated: snapshot.len() < text.len(),
            snapshot: snapshot.to_string(),
            original_len: text.len(),
            path: None,
        };

        if persist {
            if let Some(dir) = &self.diagnostics_dir {
                diagnostic.path = write_snapshot(dir, &diagnostic);
            }
        }
        diagnostic
    }
}

fn write_snapshot(dir: &Path, diagnostic: &Diagnostic) -> Option<PathBuf> {
    let path = dir.join(format!("{}.html", diagnostic.id));
    let written = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&path, diagnostic.snapshot.as_bytes()));
    match written {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to persist diagnostic snapshot");
            None
        }
    }
}

fn truncate_at_char_boundary(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
