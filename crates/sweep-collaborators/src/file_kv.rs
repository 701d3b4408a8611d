use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{
    self,
    BoxStream,
};
use log::debug;
use sweep_engine::{
    KvError,
    KvStore,
};
use tokio_util::sync::CancellationToken;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

struct WatchState {
    path: PathBuf,
    last: Option<Vec<u8>>,
    ctx: CancellationToken,
    poll_interval: Duration,
}

async fn next_change(mut state: WatchState) -> Option<(Vec<u8>, WatchState)> {
    loop {
        tokio::select! {
            _ = state.ctx.cancelled() => return None,
            _ = tokio::time::sleep(state.poll_interval) => {}
        }

        match tokio::fs::read(&state.path).await {
            Ok(bytes) => {
                if state.last.as_ref() != Some(&bytes) {
                    state.last = Some(bytes.clone());
                    return Some((bytes, state));
                }
            }
            Err(e) => debug!("file kv store: failed to read {:?}: {e}", state.path),
        }
    }
}

/// A `KVStore` that watches a single JSON file by polling it on a fixed
/// interval and emitting its bytes whenever the content changes (§C.1).
/// Exists so `sweep-engine`'s config hot-reload path is exercisable without
/// a real external KV system; the `key` passed to `watch` is not consulted
/// since one instance is already bound to one file at construction time.
pub struct FileKvStore {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn watch(&self, ctx: CancellationToken, key: String) -> Result<BoxStream<'static, Vec<u8>>, KvError> {
        debug!("file kv store: watching {:?} (key '{key}' unused)", self.path);
        let state = WatchState {
            path: self.path.clone(),
            last: None,
            ctx,
            poll_interval: self.poll_interval,
        };
        Ok(stream::unfold(state, next_change).boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn write_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("sweep-file-kv-test-{}-{}.json", std::process::id(), contents.len()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn emits_file_contents_once_on_first_poll() {
        let path = write_file(r#"{"concurrency": 10}"#);
        let store = FileKvStore::with_poll_interval(path.clone(), Duration::from_millis(20));

        let ctx = CancellationToken::new();
        let mut stream = store.watch(ctx.clone(), "config".into()).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap();
        assert_eq!(first, br#"{"concurrency": 10}"#.to_vec());

        ctx.cancel();
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn stops_emitting_after_cancellation() {
        let path = write_file(r#"{}"#);
        let store = FileKvStore::with_poll_interval(path.clone(), Duration::from_millis(10));

        let ctx = CancellationToken::new();
        let mut stream = store.watch(ctx.clone(), "config".into()).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;

        ctx.cancel();
        let ended = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
        assert!(matches!(ended, Ok(None)) || ended.is_err());
        std::fs::remove_file(&path).ok();
    }
}
