use crate::registry::cache::Error;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

type Entries = RwLock<HashMap<String, Entry>>;

/// In-process cache; expired entries are dropped on read and by a periodic sweep.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Arc<Entries>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let entries = Arc::new(RwLock::new(HashMap::new()));
        // without a runtime (synchronous setup) expired entries are only dropped on read
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(sweep(Arc::downgrade(&entries)));
        }
        MemoryBackend { entries }
    }

    pub async fn store(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    pub async fn retrieve(&self, key: &str) -> Result<String, Error> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(entry.value.clone()),
                None => return Err(Error::Miss),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Err(Error::Miss)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

// Ends once the backend is dropped, e.g. after a configuration reload.
async fn sweep(entries: Weak<Entries>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            break;
        };
        let now = Instant::now();
        entries.write().await.retain(|_, entry| entry.is_live(now));
    }
}
