//! Progress Broadcaster
//!
//! One broadcast channel per analysis id plus a last-value cache:
//! - events for a job are published under a single lock, so subscribers see
//!   them in order; `progress` and `status` never move backwards
//! - a new subscriber first receives the most recent event, then live ones
//! - after the terminal event (`complete` or `error`) the channel ignores
//!   further publishes and is pruned once the retention window passes
//!
//! Subscribing may happen before the job exists (caller-supplied ids); the
//! channel is created on demand. Dropping a subscription never affects the job.

use async_stream::stream;
use futures::Stream;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ErrorBody;
use crate::models::{AnalysisId, AnalysisResult, JobState};

/// Per-job channel capacity
const CHANNEL_CAPACITY: usize = 64;

/// Event delivered to progress subscribers (WebSocket and SSE)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        analysis_id: AnalysisId,
        /// 0-100
        progress: u8,
        status: JobState,
        message: String,
    },
    Complete {
        analysis_id: AnalysisId,
        result: Box<AnalysisResult>,
    },
    Error {
        analysis_id: AnalysisId,
        error: ErrorBody,
    },
}

impl ProgressEvent {
    pub fn analysis_id(&self) -> &AnalysisId {
        match self {
            ProgressEvent::Progress { analysis_id, .. }
            | ProgressEvent::Complete { analysis_id, .. }
            | ProgressEvent::Error { analysis_id, .. } => analysis_id,
        }
    }

    /// Event name used on the SSE stream
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

struct JobChannel {
    sender: broadcast::Sender<ProgressEvent>,
    last: Option<ProgressEvent>,
    created_at: Instant,
    finished_at: Option<Instant>,
}

impl JobChannel {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            last: None,
            created_at: Instant::now(),
            finished_at: None,
        }
    }

    /// Highest progress and status published so far
    fn floor(&self) -> (u8, Option<JobState>) {
        match &self.last {
            Some(ProgressEvent::Progress {
                progress, status, ..
            }) => (*progress, Some(*status)),
            _ => (0, None),
        }
    }

    fn send(&mut self, event: ProgressEvent) {
        if event.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        self.last = Some(event.clone());
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Progress event broadcast"),
            Err(_) => debug!("Progress event cached; no live subscribers"),
        }
    }
}

/// Live subscription to one job's events
pub struct ProgressSubscription {
    /// Most recent event at subscription time
    pub initial: Option<ProgressEvent>,
    pub receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    /// Initial event followed by live events, ending after the terminal one
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let ProgressSubscription {
            initial,
            mut receiver,
        } = self;

        stream! {
            let mut finished = false;
            if let Some(event) = initial {
                finished = event.is_terminal();
                yield event;
            }
            while !finished {
                match receiver.recv().await {
                    Ok(event) => {
                        finished = event.is_terminal();
                        yield event;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Progress subscriber lagged; skipping to newer events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<AnalysisId, JobChannel>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<AnalysisId, JobChannel>> {
        // a panic while holding the lock leaves the map itself consistent
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a progress update, clamped so it never regresses
    pub fn publish(&self, analysis_id: &AnalysisId, status: JobState, progress: u8, message: &str) {
        let mut channels = self.channels();
        let channel = channels
            .entry(analysis_id.clone())
            .or_insert_with(JobChannel::new);
        if channel.finished_at.is_some() {
            debug!(analysis_id = %analysis_id, "Ignoring progress after terminal event");
            return;
        }

        let (floor, last_status) = channel.floor();
        let status = match last_status {
            Some(last) if last.rank() > status.rank() => last,
            _ => status,
        };
        channel.send(ProgressEvent::Progress {
            analysis_id: analysis_id.clone(),
            progress: progress.min(100).max(floor),
            status,
            message: message.to_string(),
        });
    }

    pub fn complete(&self, analysis_id: &AnalysisId, result: &AnalysisResult) {
        self.finish(ProgressEvent::Complete {
            analysis_id: analysis_id.clone(),
            result: Box::new(result.clone()),
        });
    }

    pub fn error(&self, analysis_id: &AnalysisId, error: ErrorBody) {
        self.finish(ProgressEvent::Error {
            analysis_id: analysis_id.clone(),
            error,
        });
    }

    fn finish(&self, event: ProgressEvent) {
        let mut channels = self.channels();
        let channel = channels
            .entry(event.analysis_id().clone())
            .or_insert_with(JobChannel::new);
        if channel.finished_at.is_some() {
            debug!(analysis_id = %event.analysis_id(), "Job already has a terminal event");
            return;
        }
        channel.send(event);
    }

    /// Subscribe to a job, creating its channel if needed
    pub fn subscribe(&self, analysis_id: &AnalysisId) -> ProgressSubscription {
        let mut channels = self.channels();
        let channel = channels
            .entry(analysis_id.clone())
            .or_insert_with(JobChannel::new);
        ProgressSubscription {
            initial: channel.last.clone(),
            receiver: channel.sender.subscribe(),
        }
    }

    pub fn last_event(&self, analysis_id: &AnalysisId) -> Option<ProgressEvent> {
        self.channels()
            .get(analysis_id)
            .and_then(|c| c.last.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    /// Drop finished channels older than `retention`, and idle channels that
    /// never saw an event or a subscriber within it
    pub fn prune(&self, retention: Duration) -> usize {
        let mut channels = self.channels();
        let before = channels.len();
        channels.retain(|_, c| match c.finished_at {
            Some(done) => done.elapsed() < retention,
            None => {
                c.last.is_some()
                    || c.sender.receiver_count() > 0
                    || c.created_at.elapsed() < retention
            }
        });
        before - channels.len()
    }
}
