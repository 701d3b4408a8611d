use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use std::time::{
    Duration,
    Instant,
};

use async_trait::async_trait;
use futures::stream::{
    self,
    BoxStream,
    StreamExt,
};
use log::debug;
use sweep_core::{
    ProbeResult,
    Target,
};
use sweep_engine::{
    Scanner,
    ScannerError,
};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONCURRENCY: usize = 50;

/// A real `Scanner` for `SweepMode::Tcp` targets: dials each address with
/// `tokio::net::TcpStream::connect`, bounded by a per-target timeout and a
/// concurrency limit the engine adjusts every cycle via `set_concurrency`
/// (§4.5 "Concurrency budgeting"). Grounded in the connect-with-timeout
/// pattern `kftray-server::proxy::tcp::handle_client` uses to dial a target
/// before relaying.
pub struct TcpConnectScanner {
    timeout: Duration,
    concurrency: AtomicUsize,
}

impl TcpConnectScanner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: if timeout.is_zero() { Duration::from_secs(2) } else { timeout },
            concurrency: AtomicUsize::new(DEFAULT_CONCURRENCY),
        }
    }

    async fn probe(target: Target, timeout: Duration, ctx: CancellationToken) -> ProbeResult {
        if ctx.is_cancelled() {
            return ProbeResult::new(target, false, Duration::ZERO, 100.0);
        }

        let addr = (target.host.as_str(), target.port);
        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => ProbeResult::new(target, true, started.elapsed(), 0.0),
            Ok(Err(e)) => {
                debug!("tcp connect to {}:{} failed: {e}", target.host, target.port);
                ProbeResult::new(target, false, started.elapsed(), 100.0)
            }
            Err(_) => ProbeResult::new(target, false, timeout, 100.0),
        }
    }
}

#[async_trait]
impl Scanner for TcpConnectScanner {
    async fn scan(&self, ctx: CancellationToken, targets: Vec<Target>) -> Result<BoxStream<'static, ProbeResult>, ScannerError> {
        let timeout = self.timeout;
        let concurrency = self.concurrency.load(Ordering::Acquire).max(1);

        let results = stream::iter(targets)
            .map(move |t| Self::probe(t, timeout, ctx.clone()))
            .buffer_unordered(concurrency);

        Ok(results.boxed())
    }

    async fn stop(&self, _ctx: CancellationToken) -> Result<(), ScannerError> {
        Ok(())
    }

    async fn set_concurrency(&self, limit: usize) {
        self.concurrency.store(limit.max(1), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use sweep_core::SweepMode;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn connects_to_an_open_port_successfully() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let scanner = TcpConnectScanner::new(Duration::from_secs(1));
        let target = Target::new("127.0.0.1", port, SweepMode::Tcp);
        let mut stream = scanner.scan(CancellationToken::new(), vec![target]).await.unwrap();
        let result = stream.next().await.unwrap();
        assert!(result.available);
    }

    #[tokio::test]
    async fn closed_port_is_reported_unavailable() {
        let scanner = TcpConnectScanner::new(Duration::from_millis(200));
        // Port 1 is a reserved, essentially never-open port.
        let target = Target::new("127.0.0.1", 1, SweepMode::Tcp);
        let mut stream = scanner.scan(CancellationToken::new(), vec![target]).await.unwrap();
        let result = stream.next().await.unwrap();
        assert!(!result.available);
    }

    #[tokio::test]
    async fn set_concurrency_updates_the_stored_limit() {
        let scanner = TcpConnectScanner::new(Duration::from_millis(200));
        scanner.set_concurrency(3).await;
        assert_eq!(scanner.concurrency.load(Ordering::Acquire), 3);
    }
}
