/// Heartbeat reporter: rewrites the target file on a fixed interval and
/// records each attempt in the shared [`Status`].
use crate::status::{now_ms, Status};
use chrono::{TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background task that writes `Written at <timestamp>` to a single target.
pub struct Reporter {
    target: PathBuf,
    interval: Duration,
    status: Arc<Status>,
}

/// Handle to a spawned reporter. Dropping it also stops the loop, since the
/// task treats a closed channel as cancellation.
pub struct ReporterHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Reporter {
    pub fn new(target: PathBuf, interval: Duration, status: Arc<Status>) -> Self {
        Self {
            target,
            interval,
            status,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Overwrite the target with a report for `timestamp_ms`.
    ///
    /// Writes through the path in place (truncate, then write), so symlinked
    /// targets and files in read-only directories keep working.
    pub async fn write_report(&self, timestamp_ms: i64) -> Result<(), ReportError> {
        let line = render_line(timestamp_ms);

        tokio::fs::write(&self.target, line.as_bytes())
            .await
            .map_err(|e| ReportError::Write {
                path: self.target.clone(),
                source: e,
            })
    }

    /// One iteration: capture the time, write the report, record the time.
    ///
    /// The status advances even when the write fails, so liveness tracks the
    /// loop rather than the destination.
    pub async fn tick(&self) -> i64 {
        let timestamp = now_ms();

        match self.write_report(timestamp).await {
            Ok(()) => debug!(path = %self.target.display(), timestamp, "heartbeat written"),
            Err(e) => warn!(error = %e, "failed to write heartbeat"),
        }

        self.status.record(timestamp);
        timestamp
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            path = %self.target.display(),
            interval_ms = self.interval.as_millis() as u64,
            "reporter started"
        );

        while !*shutdown.borrow() {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("reporter stopped");
    }

    /// Spawn the loop on the runtime and return a handle that can stop it.
    pub fn spawn(self) -> ReporterHandle {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        ReporterHandle { shutdown: tx, task }
    }
}

impl ReporterHandle {
    /// A receiver that observes the same cancellation as the reporter.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Cancel the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "reporter task did not exit cleanly");
        }
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// `Written at Thu Oct 09 08:53:20 UTC 2025`
pub fn render_line(timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms).single() {
        Some(at) => format!("Written at {}", at.format("%a %b %d %H:%M:%S UTC %Y")),
        None => format!("Written at {timestamp_ms}"),
    }
}

/// Errors from writing a single report.
#[derive(Debug)]
pub enum ReportError {
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Write { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Write { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reporter(target: PathBuf, interval: Duration) -> (Reporter, Arc<Status>) {
        let status = Arc::new(Status::new(Duration::from_secs(5)));
        (Reporter::new(target, interval, Arc::clone(&status)), status)
    }

    #[test]
    fn test_render_line() {
        assert_eq!(
            render_line(1_760_000_000_000),
            "Written at Thu Oct 09 08:53:20 UTC 2025"
        );
    }

    #[tokio::test]
    async fn test_write_report_overwrites_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        std::fs::write(&path, "stale content that is longer than a report line\nsecond").unwrap();
        let (r, _) = reporter(path.clone(), Duration::from_secs(1));

        r.write_report(1_760_000_000_000).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Written at Thu Oct 09 08:53:20 UTC 2025");
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_write_report_creates_only_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        let (r, _) = reporter(path, Duration::from_secs(1));

        r.write_report(now_ms()).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_write_report_unwritable_target_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("progress.txt");
        let (r, _) = reporter(path, Duration::from_secs(1));

        let err = r.write_report(now_ms()).await.unwrap_err();
        assert!(matches!(err, ReportError::Write { .. }));
    }

    #[tokio::test]
    async fn test_tick_records_status_on_success() {
        let dir = tempdir().unwrap();
        let (r, status) = reporter(dir.path().join("progress.txt"), Duration::from_secs(1));
        assert!(!status.is_alive());

        let ts = r.tick().await;
        assert_eq!(status.last_update(), Some(ts));
        assert!(status.is_alive());
    }

    #[tokio::test]
    async fn test_tick_records_status_even_when_write_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("progress.txt");
        let (r, status) = reporter(path.clone(), Duration::from_secs(1));

        let first = r.tick().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = r.tick().await;

        assert!(second > first);
        assert_eq!(status.last_update(), Some(second));
        assert!(status.is_alive());
        assert!(!path.exists());
    }

    fn written_at(content: &str) -> chrono::NaiveDateTime {
        let rendered = content
            .strip_prefix("Written at ")
            .expect("report line starts with 'Written at '");
        chrono::NaiveDateTime::parse_from_str(rendered, "%a %b %d %H:%M:%S UTC %Y").unwrap()
    }

    #[tokio::test]
    async fn test_successive_reports_are_non_decreasing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        let (r, status) = reporter(path.clone(), Duration::from_secs(1));

        let mut previous: Option<chrono::NaiveDateTime> = None;
        for _ in 0..4 {
            let ts = r.tick().await;
            assert_eq!(status.last_update(), Some(ts));

            let written = written_at(&std::fs::read_to_string(&path).unwrap());
            if let Some(prev) = previous {
                assert!(written >= prev, "{written} went backwards from {prev}");
            }
            previous = Some(written);
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_report_follows_symlinked_target() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.txt");
        let link = dir.path().join("progress.txt");
        std::fs::write(&real, "old").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let (r, _) = reporter(link.clone(), Duration::from_secs(1));

        r.write_report(1_760_000_000_000).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&real).unwrap(),
            "Written at Thu Oct 09 08:53:20 UTC 2025"
        );
        assert!(std::fs::symlink_metadata(&link)
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[tokio::test]
    async fn test_spawned_loop_writes_and_stays_alive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        let (r, status) = reporter(path.clone(), Duration::from_millis(20));

        let handle = r.spawn();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;

        // Read after shutdown so no write is in flight
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Written at "));
        assert_eq!(content.lines().count(), 1);
        assert!(status.is_alive());
        let age = now_ms() - status.last_update().unwrap();
        assert!(age < 1_000, "last heartbeat is {age}ms old");
    }

    #[tokio::test]
    async fn test_loop_survives_unwritable_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("progress.txt");
        let (r, status) = reporter(path, Duration::from_millis(20));

        let handle = r.spawn();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let first = status.last_update().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!handle.is_finished());
        assert!(status.last_update().unwrap() > first);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let dir = tempdir().unwrap();
        let (r, status) = reporter(dir.path().join("progress.txt"), Duration::from_secs(60));

        let handle = r.spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(status.last_update().is_some());

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("reporter should stop well within one interval");
    }

    #[tokio::test]
    async fn test_no_writes_after_shutdown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        let (r, status) = reporter(path.clone(), Duration::from_millis(20));

        let handle = r.spawn();
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;

        let last = status.last_update();
        std::fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(status.last_update(), last);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_loop() {
        let dir = tempdir().unwrap();
        let (r, status) = reporter(dir.path().join("progress.txt"), Duration::from_millis(20));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(r.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(status.last_update().is_some());
    }
}
