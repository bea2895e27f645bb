//! Debounced filesystem watcher for incremental live re-indexing.
//!
//! Events from every configured project path funnel into one channel; a
//! single drain thread coalesces them into a pending map keyed by path
//! (last event wins) and applies the batch after a quiet period. The same
//! thread runs the periodic reconcile, so watcher work is always serial.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::scan::Indexer;

/// What we still owe a path once the debounce window closes.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum PendingKind {
    Upsert,
    Unlink,
}

/// Fold one filesystem event into the pending map: create/modify and
/// remove map to upsert/unlink, everything else is dropped, and the last
/// event wins per path. Returns whether the event counted (resets the
/// debounce deadline).
fn coalesce(pending: &mut HashMap<PathBuf, PendingKind>, event: Event) -> bool {
    let kind = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => PendingKind::Upsert,
        EventKind::Remove(_) => PendingKind::Unlink,
        _ => return false,
    };
    for path in event.paths {
        pending.insert(path, kind);
    }
    true
}

/// Start watching all configured project paths. Returns the watcher handle;
/// dropping it stops event delivery.
pub fn start_watcher(indexer: Arc<Indexer>) -> Option<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(err) => {
            warn!(error = %err, "Failed to create file watcher");
            return None;
        }
    };

    for project in &indexer.config().projects {
        for root in &project.paths {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => info!(path = %root.display(), "Watching"),
                Err(err) => {
                    warn!(path = %root.display(), error = %err, "Failed to watch path")
                }
            }
        }
    }

    let debounce = Duration::from_millis(indexer.config().watcher.debounce_ms.max(1));
    let reconcile_every =
        Duration::from_secs(indexer.config().watcher.reconcile_interval_minutes.max(1) * 60);
    std::thread::Builder::new()
        .name("watch-drain".to_string())
        .spawn(move || drain_loop(rx, indexer, debounce, reconcile_every))
        .ok()?;

    Some(watcher)
}

/// Collect events into the pending map; drain after a quiet debounce
/// window; reconcile on the configured interval to catch missed events.
fn drain_loop(
    rx: mpsc::Receiver<Event>,
    indexer: Arc<Indexer>,
    debounce: Duration,
    reconcile_every: Duration,
) {
    let mut pending: HashMap<PathBuf, PendingKind> = HashMap::new();
    let mut last_event = Instant::now();
    let mut last_reconcile = Instant::now();

    loop {
        match rx.recv_timeout(debounce) {
            Ok(event) => {
                if coalesce(&mut pending, event) {
                    last_event = Instant::now();
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !pending.is_empty() && last_event.elapsed() >= debounce {
                    let batch = std::mem::take(&mut pending);
                    drain(&indexer, batch);
                }
                if last_reconcile.elapsed() >= reconcile_every {
                    last_reconcile = Instant::now();
                    for language in indexer.config().languages() {
                        if let Err(err) = indexer.reconcile(language) {
                            warn!(language = language.as_str(), error = %err, "Periodic reconcile failed");
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Apply one coalesced batch. Per-file errors are logged and never stop the
/// drain.
fn drain(indexer: &Arc<Indexer>, batch: HashMap<PathBuf, PendingKind>) {
    let mut ingested = 0usize;
    let mut removed = 0usize;
    for (path, kind) in batch {
        let outcome = match kind {
            PendingKind::Unlink => indexer.delete_path(&path).map(|did| {
                if did {
                    removed += 1;
                }
            }),
            PendingKind::Upsert => indexer.ingest_file_event(&path).map(|did| {
                if did {
                    ingested += 1;
                }
            }),
        };
        if let Err(err) = outcome {
            warn!(path = %path.display(), error = %err, "Watcher update failed");
        }
    }
    if ingested > 0 || removed > 0 {
        debug!(ingested, removed, "Watcher drain applied");
    }
}
