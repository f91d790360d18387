//! Change notifications for the game's score directory.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    fs,
    path::PathBuf,
    time::{Duration, SystemTime},
};

use futures::future::{BoxFuture, FutureExt};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

/// Source of "file finished writing" events inside a watched directory.
pub trait FileWatcher: Send {
    /// Wait for the next changed file name. `None` means the watcher is exhausted.
    fn next_event(&mut self) -> BoxFuture<'_, Option<String>>;
}

type Signature = Option<(Option<SystemTime>, u64)>;

/// Watches a fixed set of files by polling their metadata.
///
/// A file is reported once its `(modified, len)` signature has changed and then held still
/// for one poll, so a writer still appending is not reported mid-write.
pub struct PollingWatcher {
    dir: PathBuf,
    files: Vec<String>,
    interval: Interval,
    reported: HashMap<String, Signature>,
    settling: HashMap<String, Signature>,
    ready: VecDeque<String>,
}

impl PollingWatcher {
    /// Watch `files` inside `dir`, polling every `every`. Current file states form the baseline.
    pub fn new<I, S>(dir: impl Into<PathBuf>, files: I, every: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dir = dir.into();
        let files: Vec<String> = files
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let reported = files
            .iter()
            .map(|name| (name.clone(), signature(&dir, name)))
            .collect();
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            dir,
            files,
            interval,
            reported,
            settling: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    fn poll_files(&mut self) {
        for name in &self.files {
            let current = signature(&self.dir, name);
            if self.reported.get(name) == Some(&current) {
                self.settling.remove(name);
                continue;
            }

            if self.settling.get(name) == Some(&current) {
                debug!(file = %name, "score file settled");
                self.settling.remove(name);
                self.reported.insert(name.clone(), current);
                if current.is_some() {
                    self.ready.push_back(name.clone());
                }
            } else {
                self.settling.insert(name.clone(), current);
            }
        }
    }
}

impl FileWatcher for PollingWatcher {
    fn next_event(&mut self) -> BoxFuture<'_, Option<String>> {
        async move {
            loop {
                if let Some(name) = self.ready.pop_front() {
                    return Some(name);
                }
                self.interval.tick().await;
                self.poll_files();
            }
        }
        .boxed()
    }
}

fn signature(dir: &std::path::Path, name: &str) -> Signature {
    fs::metadata(dir.join(name))
        .ok()
        .map(|meta| (meta.modified().ok(), meta.len()))
}
