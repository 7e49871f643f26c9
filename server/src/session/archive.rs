//! Append-only archive of finished chat sessions
//!
//! Each chat message becomes one JSON line, so archives can be tailed and
//! concatenated without parsing the whole file.

use super::state::{ChatMessage, Session};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize archive record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One archived chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub session_id: String,
    pub email: String,
    pub name: Option<String>,
    pub message: ChatMessage,
    /// RFC 3339, UTC
    pub archived_at: String,
}

#[derive(Debug, Clone)]
pub struct SessionArchive {
    path: PathBuf,
}

impl SessionArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the session's chat history. Returns the number of records written.
    pub async fn archive(&self, session_id: &str, session: &Session) -> Result<usize, ArchiveError> {
        if session.chat_history.is_empty() {
            return Ok(0);
        }

        let archived_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let name = (!session.name.is_empty()).then(|| session.name.clone());

        let mut buf = Vec::new();
        for message in &session.chat_history {
            let record = ArchiveRecord {
                session_id: session_id.to_string(),
                email: session.email.clone(),
                name: name.clone(),
                message: message.clone(),
                archived_at: archived_at.clone(),
            };
            serde_json::to_writer(&mut buf, &record)?;
            buf.push(b'\n');
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        // An earlier interrupted write may have left a partial last line
        if file.metadata().await?.len() > 0 {
            file.seek(SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                warn!("Archive {:?} ends mid-record, starting a new line", self.path);
                buf.insert(0, b'\n');
            }
        }

        file.write_all(&buf).await?;
        file.flush().await?;

        let written = session.chat_history.len();
        info!(
            "Archived {} chat messages of session {} to {:?}",
            written, session_id, self.path
        );
        Ok(written)
    }
}
