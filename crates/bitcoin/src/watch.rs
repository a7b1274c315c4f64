//! Confirmation tracking with reorg detection.

use std::time::Duration;

use bitcoin::Txid;
use tracing::{debug, warn};

use crate::wallet::{BitcoinWallet, TxStatus};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Unseen,
    InMempool,
    Confirming { depth: u32, remaining: u32 },
    Confirmed { depth: u32 },
    /// Depth dropped below the deepest one observed.
    ReorgDetected { previous: u32, current: u32 },
}

/// Tracks one transaction towards a confirmation target.
///
/// The deepest observed depth is remembered; any later observation below it
/// is reported as a reorg and the watcher starts over from the new depth.
#[derive(Debug, Clone)]
pub struct TxWatcher {
    txid: Txid,
    min_confirmations: u32,
    max_depth: u32,
}

impl TxWatcher {
    #[must_use]
    pub fn new(txid: Txid, min_confirmations: u32) -> Self {
        Self {
            txid,
            min_confirmations,
            max_depth: 0,
        }
    }

    #[must_use]
    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn observe(&mut self, status: TxStatus) -> WatchEvent {
        let depth = status.depth();
        if depth < self.max_depth {
            warn!(
                txid = %self.txid,
                previous_depth = self.max_depth,
                current_depth = depth,
                "Reorg detected; re-waiting for confirmations"
            );
            let previous = self.max_depth;
            self.max_depth = depth;
            return WatchEvent::ReorgDetected {
                previous,
                current: depth,
            };
        }
        self.max_depth = depth;

        match status {
            TxStatus::Unseen => WatchEvent::Unseen,
            TxStatus::InMempool => WatchEvent::InMempool,
            TxStatus::Confirmed { depth } if depth >= self.min_confirmations => {
                WatchEvent::Confirmed { depth }
            }
            TxStatus::Confirmed { depth } => WatchEvent::Confirming {
                depth,
                remaining: self.min_confirmations - depth,
            },
        }
    }

    /// # Errors
    /// Propagates wallet errors.
    pub async fn poll(&mut self, wallet: &dyn BitcoinWallet) -> Result<WatchEvent> {
        let status = wallet.get_confirmations(self.txid).await?;
        Ok(self.observe(status))
    }
}

/// Waits until `txid` is buried under `min_confirmations` blocks.
///
/// Transient wallet errors are logged and polling continues; reorgs reset
/// the wait. Returns the depth at which the target was reached.
///
/// # Errors
/// Returns the first non-transient wallet error.
pub async fn wait_for_confirmations(
    wallet: &dyn BitcoinWallet,
    txid: Txid,
    min_confirmations: u32,
    poll_interval: Duration,
) -> Result<u32> {
    let mut watcher = TxWatcher::new(txid, min_confirmations);
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        match watcher.poll(wallet).await {
            Ok(WatchEvent::Confirmed { depth }) => return Ok(depth),
            Ok(event) => debug!(%txid, ?event, "Waiting for confirmations"),
            Err(e) if e.is_transient() => warn!(%txid, error = %e, "Poll failed; retrying"),
            Err(e) => return Err(e),
        }
    }
}
