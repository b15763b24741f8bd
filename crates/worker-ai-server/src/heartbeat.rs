//! Keep-alive task: emits a tick periodically while a model load is in
//! flight so the connection handler can send `Heartbeat` responses to
//! a peer that would otherwise see no traffic for seconds.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default keep-alive cadence during model load, matching the original
/// worker's heartbeat-while-loading behavior.
pub const LOAD_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn spawn(interval: Duration) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; consume it
            loop {
                ticker.tick().await;
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
        (Self { handle }, rx)
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
