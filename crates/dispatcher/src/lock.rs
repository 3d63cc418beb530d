use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// 按键互斥，不同键之间互不阻塞
///
/// 没有持有者与等待者的键会在释放时从表中移除。
#[derive(Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, KeySlot>>,
}

struct KeySlot {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// 持有者与等待者总数
    users: usize,
}

pub struct KeyedGuard<'a> {
    // 先释放锁，再清理表项
    _guard: OwnedMutexGuard<()>,
    _entry: KeyEntry<'a>,
}

/// 对表项的占用，释放时计数归零则移除表项，等待中被取消也会释放
struct KeyEntry<'a> {
    owner: &'a KeyedMutex,
    key: String,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let lock = {
            let mut table = self.table();
            let slot = table.entry(key.to_string()).or_insert_with(|| KeySlot {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        let entry = KeyEntry {
            owner: self,
            key: key.to_string(),
        };
        let guard = lock.lock_owned().await;
        KeyedGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, KeySlot>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

impl Drop for KeyEntry<'_> {
    fn drop(&mut self) {
        let mut table = self.owner.table();
        if let Some(slot) = table.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                table.remove(&self.key);
            }
        }
    }
}
