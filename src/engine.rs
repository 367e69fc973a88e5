//! Single process-wide handle owning the three shared maps, with lock
//! discipline visible at the type level.

use crate::dataframe::DataFrame;
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds `data_frames`, `pipelines`, and the two encodings (categories and
/// join keys) behind a read/write lock each. Readers take a read lock for
/// the whole critical section; mutations take an upgradable read lock
/// first (observing the pre-image, like the spec's "weak-write" mode) and
/// upgrade to an exclusive write lock only at the commit point.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    data_frames: RwLock<HashMap<String, DataFrame>>,
    pipelines: RwLock<HashMap<String, Pipeline>>,
    categories: Encoding,
    join_keys: Encoding,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                data_frames: RwLock::new(HashMap::new()),
                pipelines: RwLock::new(HashMap::new()),
                categories: Encoding::new(),
                join_keys: Encoding::new(),
            }),
        }
    }

    pub fn categories(&self) -> &Encoding {
        &self.inner.categories
    }

    pub fn join_keys(&self) -> &Encoding {
        &self.inner.join_keys
    }

    /// Inserts or replaces a named DataFrame. Takes the upgradable lock
    /// first so any reader racing to observe the map mid-insert still sees
    /// a consistent pre- or post-image, never a half-written one.
    pub fn put_data_frame(&self, name: impl Into<String>, frame: DataFrame) {
        let upgradable = self.inner.data_frames.upgradable_read();
        let mut writable = parking_lot::RwLockUpgradableReadGuard::upgrade(upgradable);
        writable.insert(name.into(), frame);
    }

    pub fn with_data_frame<T>(&self, name: &str, f: impl FnOnce(&DataFrame) -> T) -> Result<T> {
        let frames = self.inner.data_frames.read();
        let frame = frames
            .get(name)
            .ok_or_else(|| Error::invalid(format!("no data frame named '{name}'")))?;
        Ok(f(frame))
    }

    pub fn remove_data_frame(&self, name: &str) -> Option<DataFrame> {
        let upgradable = self.inner.data_frames.upgradable_read();
        let mut writable = parking_lot::RwLockUpgradableReadGuard::upgrade(upgradable);
        writable.remove(name)
    }

    pub fn data_frame_names(&self) -> Vec<String> {
        self.inner.data_frames.read().keys().cloned().collect()
    }

    pub fn put_pipeline(&self, name: impl Into<String>, pipeline: Pipeline) {
        let upgradable = self.inner.pipelines.upgradable_read();
        let mut writable = parking_lot::RwLockUpgradableReadGuard::upgrade(upgradable);
        writable.insert(name.into(), pipeline);
    }

    pub fn with_pipeline<T>(&self, name: &str, f: impl FnOnce(&Pipeline) -> T) -> Result<T> {
        let pipelines = self.inner.pipelines.read();
        let pipeline = pipelines
            .get(name)
            .ok_or_else(|| Error::invalid(format!("no pipeline named '{name}'")))?;
        Ok(f(pipeline))
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.inner.pipelines.read().keys().cloned().collect()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
