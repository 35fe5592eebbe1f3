//! Hot-reload configuration manager.
//!
//! Watches the configuration file with two independent triggers: an OS
//! file watcher (when the platform provides one) and an always-on mtime
//! poller. The poller exists because bind-mounted files (Docker volumes,
//! Kubernetes ConfigMaps) often deliver no inotify events at all.
//!
//! A reload waits out a short debounce, parses and validates the new file,
//! and on success swaps the published snapshot atomically. Validation
//! failures keep the previous snapshot live. Subscribers are invoked on
//! their own tasks after the swap; a panicking subscriber is contained to
//! its task and never blocks the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{EventKind, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Config;
use crate::error::ShoalResult;

/// Default cadence of the mtime poller.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Settle time before reading a changed file, so editor write-storms
/// produce one reload instead of several.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// A configuration-change subscriber.
pub type ConfigCallback = Arc<dyn Fn(Arc<Config>) + Send + Sync>;

/// Publishes [`Config`] snapshots and fans out changes to subscribers
/// while the service is running.
pub struct ConfigManager {
    inner: Arc<Inner>,
    poll_interval: Duration,
}

struct Inner {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
    subscribers: RwLock<Vec<ConfigCallback>>,
    last_mtime: Mutex<Option<SystemTime>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl ConfigManager {
    /// Load the initial snapshot from `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not validate.
    pub fn new(path: impl AsRef<Path>) -> ShoalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path)?;
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                current: RwLock::new(Arc::new(config)),
                subscribers: RwLock::new(Vec::new()),
                last_mtime: Mutex::new(mtime),
                shutdown: CancellationToken::new(),
            }),
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Override the poller cadence. Must be called before [`start`].
    ///
    /// [`start`]: Self::start
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Start both change detectors. Requires a running tokio runtime.
    pub fn start(&self) {
        self.start_watcher();
        self.start_poller();
    }

    /// A defensive copy of the current snapshot.
    #[must_use]
    pub fn get_config(&self) -> Config {
        self.inner.current.read().as_ref().clone()
    }

    /// Register a configuration-change callback.
    pub fn subscribe(&self, callback: impl Fn(Arc<Config>) + Send + Sync + 'static) {
        self.inner.subscribers.write().push(Arc::new(callback));
    }

    /// Stop the watcher and the poller.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn start_watcher(&self) {
        let inner = Arc::clone(&self.inner);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut watcher = match notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        }) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "file watcher unavailable, relying on polling");
                return;
            }
        };
        if let Err(e) = watcher.watch(&inner.path, RecursiveMode::NonRecursive) {
            warn!(error = %e, path = %inner.path.display(), "failed to watch config file, relying on polling");
            return;
        }
        debug!(path = %inner.path.display(), "file watcher enabled for config file");

        tokio::spawn(async move {
            // The watcher stops when dropped; keep it alive for the task's lifetime.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(Ok(event)) if is_change(&event.kind) => {
                            info!(path = %inner.path.display(), "config file modified (detected by watcher), reloading");
                            inner.note_current_mtime();
                            Arc::clone(&inner).reload().await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => warn!(error = %e, "config watcher error"),
                        None => break,
                    },
                }
            }
        });
    }

    fn start_poller(&self) {
        let inner = Arc::clone(&self.inner);
        let period = self.poll_interval;
        debug!(period_ms = period.as_millis() as u64, "config file polling enabled");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match std::fs::metadata(&inner.path).and_then(|m| m.modified()) {
                            Ok(mtime) => {
                                if inner.advance_mtime(mtime) {
                                    info!(path = %inner.path.display(), "config file modified (detected by polling), reloading");
                                    Arc::clone(&inner).reload().await;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to stat config file during polling");
                            }
                        }
                    }
                }
            }
        });
    }
}

impl Inner {
    /// Record `mtime` if it is newer than the last seen one. Returns
    /// whether it advanced.
    fn advance_mtime(&self, mtime: SystemTime) -> bool {
        let mut last = self.last_mtime.lock();
        if last.is_none_or(|seen| mtime > seen) {
            *last = Some(mtime);
            true
        } else {
            false
        }
    }

    /// Refresh the stored mtime from disk so the poller does not re-fire
    /// for a change the watcher already handled.
    fn note_current_mtime(&self) {
        if let Ok(mtime) = std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            *self.last_mtime.lock() = Some(mtime);
        }
    }

    async fn reload(self: Arc<Self>) {
        tokio::time::sleep(DEBOUNCE).await;

        let new_config = match Config::load(&self.path) {
            Ok(config) => Arc::new(config),
            Err(e) => {
                warn!(error = %e, "config reload failed, keeping previous snapshot");
                return;
            }
        };

        let (old_config, subscribers) = {
            let mut current = self.current.write();
            let old = std::mem::replace(&mut *current, Arc::clone(&new_config));
            (old, self.subscribers.read().clone())
        };
        info!("configuration reloaded");
        log_changes(&old_config, &new_config);

        for subscriber in subscribers {
            let config = Arc::clone(&new_config);
            // One task per subscriber: a panic is contained to that task.
            tokio::spawn(async move { subscriber(config) });
        }
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

/// Log the field transitions operators care about. Never blocks the reload.
fn log_changes(old: &Config, new: &Config) {
    if old.server.port != new.server.port {
        warn!(
            old = old.server.port,
            new = new.server.port,
            "server port changed (restart required)"
        );
    }
    if old.database.dsn != new.database.dsn {
        warn!("database DSN changed (restart required)");
    }
    if old.buckets.len() != new.buckets.len() {
        info!(
            old = old.buckets.len(),
            new = new.buckets.len(),
            "bucket count changed"
        );
    }
    if old.balancer.strategy != new.balancer.strategy {
        info!(
            old = %old.balancer.strategy,
            new = %new.balancer.strategy,
            "load balancer strategy changed"
        );
    }
    if old.s3api.proxy_mode != new.s3api.proxy_mode {
        info!(
            old = old.s3api.proxy_mode,
            new = new.s3api.proxy_mode,
            "S3 API proxy mode changed"
        );
    }
    if old.metrics.enabled != new.metrics.enabled {
        info!(
            old = old.metrics.enabled,
            new = new.metrics.enabled,
            "metrics enabled changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(file: &tempfile::NamedTempFile, port: u16) {
        let yaml = format!("server:\n  port: {port}\nbuckets: []\n");
        std::fs::write(file.path(), yaml).unwrap();
    }

    #[tokio::test]
    async fn test_should_reload_on_file_change() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, 8080);

        let mut manager = ConfigManager::new(file.path()).unwrap();
        manager.set_poll_interval(Duration::from_millis(50));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.subscribe(move |config: Arc<Config>| {
            let _ = tx.send(config.server.port);
        });
        manager.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        write_config(&file, 9001);

        let port = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reload notification")
            .expect("subscriber channel");
        assert_eq!(port, 9001);
        assert_eq!(manager.get_config().server.port, 9001);

        manager.shutdown();
    }

    #[tokio::test]
    async fn test_should_keep_old_snapshot_when_reload_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, 8080);

        let mut manager = ConfigManager::new(file.path()).unwrap();
        manager.set_poll_interval(Duration::from_millis(50));
        manager.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut handle = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(file.path())
            .unwrap();
        handle.write_all(b"buckets: [=notyaml").unwrap();
        drop(handle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.get_config().server.port, 8080);

        manager.shutdown();
    }

    #[tokio::test]
    async fn test_should_isolate_panicking_subscriber() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, 8080);

        let mut manager = ConfigManager::new(file.path()).unwrap();
        manager.set_poll_interval(Duration::from_millis(50));

        manager.subscribe(|_| panic!("subscriber bug"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.subscribe(move |config: Arc<Config>| {
            let _ = tx.send(config.server.port);
        });
        manager.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        write_config(&file, 9002);

        let port = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reload notification")
            .expect("subscriber channel");
        assert_eq!(port, 9002);

        manager.shutdown();
    }
}
