//! Hot-swappable configuration.
//!
//! `ConfigStore<T>` keeps the live value behind `Arc<RwLock<T>>`. Processors
//! read it per unit of work, so a SIGHUP reload takes effect on the next job
//! without restarting anything. Every swap bumps a version counter that the
//! reload handler logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard};

pub struct ConfigStore<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: RwLock<T>,
    version: AtomicU64,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(initial),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Swap in a new value.
    pub async fn update(&self, value: T) {
        let mut guard = self.inner.value.write().await;
        *guard = value;
        self.inner.version.fetch_add(1, Ordering::AcqRel);
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.value.read().await
    }

    /// Number of updates applied so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }
}

impl<T: Clone> ConfigStore<T> {
    pub async fn snapshot(&self) -> T {
        self.inner.value.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
