use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

pub mod archive;
pub mod config;
pub mod materialize;
pub mod pipeline;
pub mod queue;

pub use archive::{package_downloads, DownloadArtifact};
pub use config::PipelineConfig;
pub use materialize::{image_urls, materialize_images, MaterializedImage};
pub use pipeline::{GenerationOutcome, GenerationSession, OutcomeKind, Stage};
pub use queue::{FalQueueClient, GenerationProvider, QueueUpdate};

fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        bail!("{label} request failed ({code}): {}", truncate_text(&body, 512));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{label} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::truncate_text;

    #[test]
    fn truncate_text_appends_ellipsis_only_when_cut() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
