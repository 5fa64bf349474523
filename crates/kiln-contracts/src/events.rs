use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Something observable that happened during a generation session.
///
/// Serialized with its snake_case name under `type`, so a `QueueUpdate`
/// becomes `{"type":"queue_update","status":...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StageChanged {
        from: String,
        stage: String,
    },
    QueueUpdate {
        status: String,
        queue_position: Option<u64>,
        logs: Vec<String>,
    },
    ImageSaved {
        path: PathBuf,
        source_url: String,
    },
    ArchiveCreated {
        path: PathBuf,
        files: usize,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::StageChanged { .. } => "stage_changed",
            SessionEvent::QueueUpdate { .. } => "queue_update",
            SessionEvent::ImageSaved { .. } => "image_saved",
            SessionEvent::ArchiveCreated { .. } => "archive_created",
        }
    }
}

#[derive(Serialize)]
struct Record<'a> {
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    event: &'a SessionEvent,
}

/// JSONL sink for one session's events. Clones share the same file handle.
#[derive(Debug, Clone)]
pub struct EventWriter {
    session_id: Arc<str>,
    sink: Arc<Mutex<Sink>>,
}

#[derive(Debug)]
struct Sink {
    path: PathBuf,
    file: Option<File>,
}

impl Sink {
    fn file(&mut self) -> anyhow::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create event log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("open event log {}", self.path.display()))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| anyhow!("event log {} is not open", self.path.display()))
    }
}

impl EventWriter {
    /// The file is opened on the first recorded event.
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: Arc::from(session_id.into()),
            sink: Arc::new(Mutex::new(Sink {
                path: path.into(),
                file: None,
            })),
        }
    }

    pub fn record(&self, event: &SessionEvent) -> anyhow::Result<()> {
        let record = Record {
            session_id: &self.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut sink = self
            .sink
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        let file = sink.file()?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{EventWriter, SessionEvent};

    fn rows(path: &Path) -> anyhow::Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    #[test]
    fn queue_update_is_stamped_with_session_and_time() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "fox-session");

        writer.record(&SessionEvent::QueueUpdate {
            status: "IN_QUEUE".to_string(),
            queue_position: Some(4),
            logs: Vec::new(),
        })?;

        let rows = rows(&path)?;
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["type"], json!("queue_update"));
        assert_eq!(row["session_id"], json!("fox-session"));
        assert_eq!(row["status"], json!("IN_QUEUE"));
        assert_eq!(row["queue_position"], json!(4));
        assert_eq!(row["logs"], json!([]));
        DateTime::parse_from_rfc3339(row["ts"].as_str().unwrap_or_default())?;
        Ok(())
    }

    #[test]
    fn clones_append_to_one_log_in_a_fresh_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("sessions").join("events.jsonl");
        let writer = EventWriter::new(&path, "s");
        let clone = writer.clone();

        writer.record(&SessionEvent::StageChanged {
            from: "idle".to_string(),
            stage: "submitting".to_string(),
        })?;
        clone.record(&SessionEvent::ArchiveCreated {
            path: PathBuf::from("generated_images_7.zip"),
            files: 2,
        })?;

        let rows = rows(&path)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["stage"], json!("submitting"));
        assert_eq!(rows[1]["type"], json!("archive_created"));
        assert_eq!(rows[1]["path"], json!("generated_images_7.zip"));
        assert_eq!(rows[1]["files"], json!(2));
        Ok(())
    }

    #[test]
    fn kind_matches_serialized_tag() -> anyhow::Result<()> {
        let events = [
            SessionEvent::StageChanged {
                from: "waiting".to_string(),
                stage: "failed".to_string(),
            },
            SessionEvent::QueueUpdate {
                status: "COMPLETED".to_string(),
                queue_position: None,
                logs: vec!["done".to_string()],
            },
            SessionEvent::ImageSaved {
                path: PathBuf::from("out/image_1_1.jpg"),
                source_url: "https://cdn.example/a.png".to_string(),
            },
            SessionEvent::ArchiveCreated {
                path: PathBuf::from("a.zip"),
                files: 3,
            },
        ];
        for event in &events {
            assert_eq!(serde_json::to_value(event)?["type"], json!(event.kind()));
        }
        Ok(())
    }
}
