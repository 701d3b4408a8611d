use std::sync::Mutex;

/// A simple shared object pool: `acquire` pops a reset value if one is
/// available, otherwise builds a fresh one with `Default`; `release` clears
/// the value and returns it to the pool. Shared by every shard (§4.3,
/// §5 "Allocation pools").
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Default> Pool<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    pub fn acquire(&self) -> T {
        self.free
            .lock()
            .expect("pool lock poisoned")
            .pop()
            .unwrap_or_default()
    }

    pub fn release(&self, value: T) {
        let mut free = self.free.lock().expect("pool lock poisoned");
        if free.len() < self.max_idle {
            free.push(value);
        }
        // else: drop it, letting its backing allocation be reclaimed.
    }

    pub fn idle_len(&self) -> usize {
        self.free.lock().expect("pool lock poisoned").len()
    }
}
