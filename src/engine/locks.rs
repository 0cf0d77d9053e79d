use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::model::ResourceRef;

/// Serialises check-then-commit per resource.
///
/// Named resources take the global lock shared plus their own mutex, so
/// proposals for different professionals run in parallel. The shared resource
/// can conflict with anything, so it takes the global lock exclusively.
#[derive(Default)]
pub struct ResourceLocks {
    global: Arc<RwLock<()>>,
    named: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

enum GlobalGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Held for the whole check-and-commit; released on drop.
pub struct CommitGuard {
    global: GlobalGuard,
    held: Vec<OwnedMutexGuard<()>>,
    names: Vec<String>,
    registry: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CommitGuard {
    pub fn is_exclusive(&self) -> bool {
        matches!(self.global, GlobalGuard::Exclusive(_))
    }
}

impl Drop for CommitGuard {
    /// A mutex nobody else holds or waits on is dropped from the map, so the
    /// map stays bounded by the resources currently in flight.
    fn drop(&mut self) {
        self.held.clear();
        for name in &self.names {
            self.registry
                .remove_if(name, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every resource in `resources`. Mutexes are taken in sorted name
    /// order so two multi-resource callers cannot deadlock.
    pub async fn acquire(&self, resources: &[&ResourceRef]) -> CommitGuard {
        if resources.iter().any(|r| r.is_shared()) {
            let guard = self.global.clone().write_owned().await;
            return CommitGuard {
                global: GlobalGuard::Exclusive(guard),
                held: Vec::new(),
                names: Vec::new(),
                registry: self.named.clone(),
            };
        }

        let global = GlobalGuard::Shared(self.global.clone().read_owned().await);
        let mut names: Vec<&str> = resources
            .iter()
            .filter_map(|r| match r {
                ResourceRef::Named(name) => Some(name.as_str()),
                ResourceRef::Shared => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();

        let mut held = Vec::with_capacity(names.len());
        for name in &names {
            let mutex = self.named.entry(name.to_string()).or_default().clone();
            held.push(mutex.lock_owned().await);
        }
        CommitGuard {
            global,
            held,
            names: names.into_iter().map(str::to_string).collect(),
            registry: self.named.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.named.len()
    }
}
