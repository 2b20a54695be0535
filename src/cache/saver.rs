use log::{debug, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use super::MetadataCache;
use crate::runtime::Runtime;

/// Fire-and-forget, coalescing writer for the metadata cache.
///
/// At most one save runs at a time. Requests made while a save is running
/// collapse into a single follow-up save.
pub struct CacheSaver<R: Runtime + 'static> {
    inner: Arc<SaverInner<R>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct SaverInner<R: Runtime> {
    cache: Arc<MetadataCache>,
    runtime: Arc<R>,
    path: PathBuf,
    in_flight: AtomicBool,
    pending: AtomicBool,
    saves: AtomicU64,
}

impl<R: Runtime + 'static> CacheSaver<R> {
    pub fn new(cache: Arc<MetadataCache>, runtime: Arc<R>, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(SaverInner {
                cache,
                runtime,
                path,
                in_flight: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                saves: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of completed save attempts.
    pub fn saves(&self) -> u64 {
        self.inner.saves.load(Ordering::SeqCst)
    }

    /// Schedule a save without waiting for it.
    pub fn request(&self) {
        if self.inner.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Cache save in flight, queueing one more");
            self.inner.pending.store(true, Ordering::SeqCst);
            return;
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("cache-save".to_string())
            .spawn(move || inner.run());
        match spawned {
            Ok(handle) => *self.handle.lock() = Some(handle),
            Err(e) => {
                warn!("Failed to start cache save thread: {}", e);
                self.inner.in_flight.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Block until the most recently started save has finished.
    pub fn flush(&self) {
        while let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Cache save thread panicked");
            }
        }
    }
}

impl<R: Runtime> SaverInner<R> {
    fn run(&self) {
        loop {
            self.pending.store(false, Ordering::SeqCst);
            if let Err(e) = self.cache.save(self.runtime.as_ref(), &self.path) {
                warn!("Skipping metadata cache save: {:#}", e);
            }
            self.saves.fetch_add(1, Ordering::SeqCst);

            if self.pending.load(Ordering::SeqCst) {
                continue;
            }
            self.in_flight.store(false, Ordering::SeqCst);
            // A request may have slipped in between the check and the release.
            if self.pending.load(Ordering::SeqCst) && !self.in_flight.swap(true, Ordering::SeqCst) {
                continue;
            }
            break;
        }
    }
}

impl<R: Runtime + 'static> Drop for CacheSaver<R> {
    fn drop(&mut self) {
        self.flush();
    }
}
