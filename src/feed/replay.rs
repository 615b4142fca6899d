use crate::feed::types::decode;
use crate::types::Tick;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Replays a JSONL tick file into the processor channel, standing in for
/// the broker consumer. Each line is one delivery; malformed lines are
/// dropped the way the consumer negative-acks them.
pub struct ReplayFeed {
    path: String,
    tx: mpsc::Sender<Tick>,
}

impl ReplayFeed {
    pub fn new(path: String, tx: mpsc::Sender<Tick>) -> Self {
        Self { path, tx }
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(path = %self.path, "Replay feed started");

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to read tick file {}: {}", self.path, e);
                return;
            }
        };

        let mut delivered = 0usize;
        let mut skipped = 0usize;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if *shutdown.borrow() {
                info!("Replay feed shutting down");
                return;
            }

            match decode(line) {
                Ok(tick) => {
                    if self.tx.send(tick).await.is_err() {
                        warn!("Tick channel closed, stopping replay");
                        return;
                    }
                    delivered += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Malformed tick skipped");
                    skipped += 1;
                }
            }
        }

        info!(delivered, skipped, "Replay complete");
    }
}
