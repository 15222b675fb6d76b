use std::{collections::HashMap, sync::Arc};

use shared::domain::UserId;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::{api::PlatformApi, error::SyncResult, retry::RateLimitedCaller};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Pending,
    Resolved(String),
}

/// Outcome of a lookup that did not need the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached {
    Name(String),
    InFlight,
    Missing,
}

/// Shared `user id -> display name` cache with at most one fetch in flight per id.
#[derive(Clone, Default)]
pub struct UserDirectory {
    entries: Arc<RwLock<HashMap<UserId, Entry>>>,
    settled: Arc<Notify>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, names: impl IntoIterator<Item = (UserId, String)>) {
        let mut entries = self.entries.write().await;
        for (id, name) in names {
            entries.insert(id, Entry::Resolved(name));
        }
    }

    pub async fn cached(&self, user_id: &UserId) -> Cached {
        match self.entries.read().await.get(user_id) {
            Some(Entry::Resolved(name)) => Cached::Name(name.clone()),
            Some(Entry::Pending) => Cached::InFlight,
            None => Cached::Missing,
        }
    }

    pub async fn snapshot(&self) -> Vec<(UserId, String)> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Resolved(name) => Some((id.clone(), name.clone())),
                Entry::Pending => None,
            })
            .collect()
    }

    /// Resolves a display name, fetching it when no other task already is.
    ///
    /// Returns `Ok(None)` when another task holds the fetch for this id.
    pub async fn resolve(&self, api: &dyn PlatformApi, user_id: &UserId) -> SyncResult<Option<String>> {
        match self.cached(user_id).await {
            Cached::Name(name) => return Ok(Some(name)),
            Cached::InFlight => return Ok(None),
            Cached::Missing => {}
        }

        {
            let mut entries = self.entries.write().await;
            match entries.get(user_id) {
                Some(Entry::Resolved(name)) => return Ok(Some(name.clone())),
                Some(Entry::Pending) => return Ok(None),
                None => {
                    entries.insert(user_id.clone(), Entry::Pending);
                }
            }
        }

        debug!(user_id = %user_id, "users: fetching display name");
        let fetched = RateLimitedCaller::new("users.info")
            .call(|| api.user_info(user_id))
            .await;

        let outcome = {
            let mut entries = self.entries.write().await;
            match fetched {
                Ok(user) => {
                    let name = user.display_name();
                    entries.insert(user_id.clone(), Entry::Resolved(name.clone()));
                    Ok(Some(name))
                }
                Err(err) => {
                    entries.remove(user_id);
                    warn!(user_id = %user_id, error = %err, "users: display name lookup failed");
                    Err(err)
                }
            }
        };
        self.settled.notify_waiters();
        outcome
    }

    /// Like [`resolve`](Self::resolve), but waits out a fetch another task holds.
    ///
    /// When that fetch fails, this call takes over and fetches itself.
    pub async fn resolve_waiting(&self, api: &dyn PlatformApi, user_id: &UserId) -> SyncResult<String> {
        loop {
            let settled = self.settled.notified();
            if let Some(name) = self.resolve(api, user_id).await? {
                return Ok(name);
            }
            debug!(user_id = %user_id, "users: waiting for in-flight lookup");
            settled.await;
        }
    }
}
