//! Progress-log pipeline.
//!
//! Every goal invocation holds one logical log composed from an always-on
//! ephemeral sink and the first available persistent sink. Writes broadcast
//! to all sinks; buffering flushes by size or age; close is guaranteed on
//! every execution exit path before the goal's terminal state is published.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use sdm_core::SdmGoalEvent;

/// Flush once this many bytes are buffered.
pub const FLUSH_BYTES: usize = 1000;

/// Flush once the oldest buffered line is this old.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Errors raised by progress-log sinks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressLogError {
    /// The sink rejected the write or flush.
    #[error("progress log {name} failed: {message}")]
    Sink {
        /// The failing sink name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

/// One sink of goal execution output.
#[async_trait]
pub trait ProgressLog: Send + Sync {
    /// The sink name, for diagnostics.
    fn name(&self) -> &str;

    /// The public URL consumers can follow, when the sink has one.
    fn url(&self) -> Option<String> {
        None
    }

    /// Whether the sink can accept writes right now.
    fn is_available(&self) -> bool {
        true
    }

    /// Appends one line.
    async fn write(&self, line: &str);

    /// Flushes buffered output to the backing store.
    async fn flush(&self) -> Result<(), ProgressLogError>;

    /// Flushes and closes the sink. Further writes are dropped.
    async fn close(&self) -> Result<(), ProgressLogError>;
}

/// Creates persistent progress logs for goals, e.g. a remote log service.
pub trait ProgressLogService: Send + Sync {
    /// Creates the persistent log for one goal, when the service is
    /// reachable.
    fn create(&self, goal: &SdmGoalEvent) -> Option<Arc<dyn ProgressLog>>;
}

/// In-memory ephemeral log; always available, lost on process exit.
#[derive(Default)]
pub struct InMemoryProgressLog {
    lines: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl InMemoryProgressLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("progress log lock poisoned").clone()
    }

    /// Returns `true` once the log has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().expect("progress log lock poisoned")
    }
}

#[async_trait]
impl ProgressLog for InMemoryProgressLog {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn write(&self, line: &str) {
        if self.is_closed() {
            return;
        }
        self.lines
            .lock()
            .expect("progress log lock poisoned")
            .push(line.to_string());
    }

    async fn flush(&self) -> Result<(), ProgressLogError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ProgressLogError> {
        *self.closed.lock().expect("progress log lock poisoned") = true;
        Ok(())
    }
}

/// Fallback persistent sink writing through `tracing`.
pub struct TracingProgressLog {
    goal: String,
}

impl TracingProgressLog {
    /// Creates a sink labelled with the goal name.
    pub fn new(goal: impl Into<String>) -> Self {
        Self { goal: goal.into() }
    }
}

#[async_trait]
impl ProgressLog for TracingProgressLog {
    fn name(&self) -> &str {
        "logging"
    }

    async fn write(&self, line: &str) {
        debug!(goal = %self.goal, "{line}");
    }

    async fn flush(&self) -> Result<(), ProgressLogError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ProgressLogError> {
        Ok(())
    }
}

/// Broadcasts writes to every sink.
///
/// The url of the composite is the first sink url, so the persistent sink
/// should be listed before purely ephemeral ones when its URL matters.
pub struct WriteToAllProgressLog {
    name: String,
    sinks: Vec<Arc<dyn ProgressLog>>,
}

impl WriteToAllProgressLog {
    /// Composes `sinks` under one name.
    #[must_use]
    pub fn new(name: impl Into<String>, sinks: Vec<Arc<dyn ProgressLog>>) -> Self {
        Self {
            name: name.into(),
            sinks,
        }
    }
}

#[async_trait]
impl ProgressLog for WriteToAllProgressLog {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> Option<String> {
        self.sinks.iter().find_map(|s| s.url())
    }

    fn is_available(&self) -> bool {
        self.sinks.iter().any(|s| s.is_available())
    }

    async fn write(&self, line: &str) {
        for sink in &self.sinks {
            sink.write(line).await;
        }
    }

    async fn flush(&self) -> Result<(), ProgressLogError> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ProgressLogError> {
        for sink in &self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}

struct Buffer {
    lines: Vec<String>,
    bytes: usize,
    oldest: Option<Instant>,
}

/// Buffers writes to a slow sink, flushing by size or age.
pub struct BufferedProgressLog {
    inner: Arc<dyn ProgressLog>,
    buffer: Mutex<Buffer>,
    flush_bytes: usize,
    flush_interval: Duration,
}

impl BufferedProgressLog {
    /// Wraps `inner` with the default thresholds.
    #[must_use]
    pub fn new(inner: Arc<dyn ProgressLog>) -> Self {
        Self::with_thresholds(inner, FLUSH_BYTES, FLUSH_INTERVAL)
    }

    /// Wraps `inner` with explicit thresholds.
    #[must_use]
    pub fn with_thresholds(
        inner: Arc<dyn ProgressLog>,
        flush_bytes: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            inner,
            buffer: Mutex::new(Buffer {
                lines: Vec::new(),
                bytes: 0,
                oldest: None,
            }),
            flush_bytes,
            flush_interval,
        }
    }

    fn drain_if(&self, force: bool) -> Vec<String> {
        let mut buffer = self.buffer.lock().expect("progress log lock poisoned");
        let due = force
            || buffer.bytes >= self.flush_bytes
            || buffer
                .oldest
                .is_some_and(|t| t.elapsed() >= self.flush_interval);
        if !due {
            return Vec::new();
        }
        buffer.bytes = 0;
        buffer.oldest = None;
        std::mem::take(&mut buffer.lines)
    }
}

#[async_trait]
impl ProgressLog for BufferedProgressLog {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn url(&self) -> Option<String> {
        self.inner.url()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn write(&self, line: &str) {
        {
            let mut buffer = self.buffer.lock().expect("progress log lock poisoned");
            buffer.bytes += line.len();
            if buffer.oldest.is_none() {
                buffer.oldest = Some(Instant::now());
            }
            buffer.lines.push(line.to_string());
        }
        for line in self.drain_if(false) {
            self.inner.write(&line).await;
        }
    }

    async fn flush(&self) -> Result<(), ProgressLogError> {
        for line in self.drain_if(true) {
            self.inner.write(&line).await;
        }
        self.inner.flush().await
    }

    async fn close(&self) -> Result<(), ProgressLogError> {
        self.flush().await?;
        self.inner.close().await
    }
}

/// Composes the log for one invocation: ephemeral sink plus the first
/// available persistent sink (remote service, falling back to `tracing`).
#[must_use]
pub fn select_progress_log(
    service: Option<&dyn ProgressLogService>,
    goal: &SdmGoalEvent,
) -> Arc<dyn ProgressLog> {
    let ephemeral: Arc<dyn ProgressLog> = Arc::new(InMemoryProgressLog::new());

    let persistent: Arc<dyn ProgressLog> = service
        .and_then(|s| s.create(goal))
        .filter(|log| log.is_available())
        .map_or_else(
            || {
                Arc::new(TracingProgressLog::new(goal.unique_name.clone()))
                    as Arc<dyn ProgressLog>
            },
            |remote| Arc::new(BufferedProgressLog::new(remote)) as Arc<dyn ProgressLog>,
        );

    Arc::new(WriteToAllProgressLog::new(
        "composite",
        vec![persistent, ephemeral],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingRemote {
        log: Arc<InMemoryProgressLog>,
        url: String,
    }

    #[async_trait]
    impl ProgressLog for RecordingRemote {
        fn name(&self) -> &str {
            "remote"
        }

        fn url(&self) -> Option<String> {
            Some(self.url.clone())
        }

        async fn write(&self, line: &str) {
            self.log.write(line).await;
        }

        async fn flush(&self) -> Result<(), ProgressLogError> {
            self.log.flush().await
        }

        async fn close(&self) -> Result<(), ProgressLogError> {
            self.log.close().await
        }
    }

    #[tokio::test]
    async fn write_to_all_broadcasts() {
        let a = Arc::new(InMemoryProgressLog::new());
        let b = Arc::new(InMemoryProgressLog::new());
        let all = WriteToAllProgressLog::new("both", vec![a.clone(), b.clone()]);

        all.write("hello").await;
        all.close().await.unwrap();

        assert_eq!(a.lines(), vec!["hello"]);
        assert_eq!(b.lines(), vec!["hello"]);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn buffered_log_holds_small_writes_until_flush() {
        let sink = Arc::new(InMemoryProgressLog::new());
        let buffered = BufferedProgressLog::new(sink.clone());

        buffered.write("one").await;
        buffered.write("two").await;
        assert!(sink.lines().is_empty());

        buffered.flush().await.unwrap();
        assert_eq!(sink.lines(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn buffered_log_flushes_at_the_size_threshold() {
        let sink = Arc::new(InMemoryProgressLog::new());
        let buffered =
            BufferedProgressLog::with_thresholds(sink.clone(), 10, Duration::from_secs(60));

        buffered.write("0123456789abcdef").await;
        assert_eq!(sink.lines(), vec!["0123456789abcdef"]);
    }

    #[tokio::test]
    async fn buffered_log_flushes_after_the_interval() {
        let sink = Arc::new(InMemoryProgressLog::new());
        let buffered =
            BufferedProgressLog::with_thresholds(sink.clone(), 10_000, Duration::from_millis(10));

        buffered.write("early").await;
        assert!(sink.lines().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffered.write("late").await;
        assert_eq!(sink.lines(), vec!["early", "late"]);
    }

    #[tokio::test]
    async fn close_drains_the_buffer() {
        let sink = Arc::new(InMemoryProgressLog::new());
        let buffered = BufferedProgressLog::new(sink.clone());

        buffered.write("pending").await;
        buffered.close().await.unwrap();

        assert_eq!(sink.lines(), vec!["pending"]);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn select_falls_back_to_logging_without_a_service() {
        let goal = crate::test_support::requested_goal("build", "set-1");
        let log = select_progress_log(None, &goal);
        assert!(log.url().is_none());
        log.write("line").await;
        log.close().await.unwrap();
    }

    #[tokio::test]
    async fn select_prefers_the_remote_service_and_exposes_its_url() {
        struct Service(Arc<InMemoryProgressLog>);

        impl ProgressLogService for Service {
            fn create(&self, goal: &SdmGoalEvent) -> Option<Arc<dyn ProgressLog>> {
                Some(Arc::new(RecordingRemote {
                    log: self.0.clone(),
                    url: format!("https://logs.example.com/{}", goal.goal_set_id),
                }))
            }
        }

        let remote = Arc::new(InMemoryProgressLog::new());
        let goal = crate::test_support::requested_goal("build", "set-1");
        let log = select_progress_log(Some(&Service(remote.clone())), &goal);

        assert_eq!(
            log.url().as_deref(),
            Some("https://logs.example.com/set-1")
        );
        log.write("line").await;
        log.close().await.unwrap();
        assert_eq!(remote.lines(), vec!["line"]);
        assert!(remote.is_closed());
    }
}
