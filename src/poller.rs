#![forbid(unsafe_code)]

//! Waits for an asynchronous conversion job to produce a download link.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GrabError, GrabResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    /// Maps the numeric codes used by the conversion APIs. `3` is the only
    /// finished state; negatives signal a failed conversion.
    pub fn from_code(code: i64) -> Self {
        match code {
            3 => Self::Done,
            0 => Self::Pending,
            code if code < 0 => Self::Failed,
            _ => Self::Running,
        }
    }

    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(number)) => number
                .as_i64()
                .map(Self::from_code)
                .unwrap_or(Self::Running),
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "done" | "finished" | "completed" | "success" => Self::Done,
                "failed" | "error" => Self::Failed,
                "pending" | "queued" => Self::Pending,
                other => other
                    .parse::<i64>()
                    .map(Self::from_code)
                    .unwrap_or(Self::Running),
            },
            _ => Self::Pending,
        }
    }
}

/// Snapshot of a conversion job. Every poll replaces the previous snapshot
/// wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub id: String,
    pub status: JobStatus,
    pub download_url: Option<String>,
}

impl ConversionJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            download_url: None,
        }
    }

    /// Builds a snapshot from a `{status, download_url}` payload.
    pub fn from_payload(id: impl Into<String>, payload: &Value) -> Self {
        let download_url = payload
            .get("download_url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        Self {
            id: id.into(),
            status: JobStatus::from_value(payload.get("status")),
            download_url,
        }
    }

    /// Finished and carrying a link.
    pub fn is_ready(&self) -> bool {
        self.status == JobStatus::Done && self.download_url.is_some()
    }
}

/// Floor for the per-read budget so the last read before the deadline still
/// gets a chance to connect.
const MIN_READ_BUDGET: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
    /// Optional cap on the number of status reads, on top of the deadline.
    pub max_attempts: Option<u32>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
            max_attempts: None,
        }
    }
}

/// Calls `fetch` at a fixed interval until it reports a ready job or the
/// deadline/attempt budget runs out.
///
/// A failed read (transport error, bad status, bad body) counts as "not ready
/// yet"; only running out of budget ends the loop with
/// [`GrabError::ConversionTimeout`]. `fetch` receives the time left before
/// the deadline and must not block longer than that; the sleep is clipped the
/// same way, so the loop never overshoots the deadline by a full interval.
pub fn poll_until_ready<F>(options: &PollOptions, mut fetch: F) -> GrabResult<ConversionJob>
where
    F: FnMut(Duration) -> GrabResult<ConversionJob>,
{
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(MIN_READ_BUDGET);
        match fetch(remaining) {
            Ok(job) if job.is_ready() => {
                debug!(job = %job.id, attempts, "conversion finished");
                return Ok(job);
            }
            Ok(job) => {
                debug!(job = %job.id, status = ?job.status, attempts, "conversion not ready");
            }
            Err(err) => {
                warn!(attempts, error = %err, "status poll failed, will retry");
            }
        }

        let now = Instant::now();
        let attempts_spent = options
            .max_attempts
            .is_some_and(|limit| attempts >= limit);
        if now >= deadline || attempts_spent {
            return Err(GrabError::ConversionTimeout {
                elapsed: now - started,
            });
        }
        thread::sleep(options.interval.min(deadline - now));
    }
}
