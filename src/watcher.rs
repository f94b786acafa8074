//! Payment watcher (component F): a detached task that observes invoice
//! settlement and fires a user callback. Purely observational — it is
//! never on the admission path, which is driven entirely by the client
//! returning with a valid preimage.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::wallet::WalletAdapter;

/// What `on_payment` is told about a settled invoice.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub payment_hash: String,
    pub amount_sats: u64,
    pub endpoint: String,
    pub preimage: String,
    pub settled_at: u64,
    pub client_id: String,
}

pub type OnPayment = Arc<dyn Fn(PaymentEvent) + Send + Sync>;

/// Spawns the watcher. Cancelled by `shutdown`; independent of the
/// request scope that triggered the 402 — a client disconnect must not
/// tear this down, only process shutdown does.
pub fn spawn(
    wallet: Arc<dyn WalletAdapter>,
    payment_hash: String,
    amount_sats: u64,
    endpoint: String,
    client_id: String,
    timeout_ms: u64,
    on_payment: Option<OnPayment>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(on_payment) = on_payment else {
            // No callback registered: nothing to watch for.
            return;
        };

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => {
                trace!(payment_hash, "watcher cancelled by shutdown");
                return;
            }
            result = wallet.wait_for_payment(&payment_hash, timeout_ms) => result,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // Wallet errors are silently discarded, same as timeouts.
                warn!(error=%e, payment_hash, "watcher: wallet error while waiting for payment");
                return;
            }
        };

        if !outcome.paid {
            return;
        }

        let event = PaymentEvent {
            payment_hash,
            amount_sats,
            endpoint,
            preimage: outcome.preimage.unwrap_or_default(),
            settled_at: outcome.settled_at.unwrap_or(0),
            client_id,
        };

        // The callback runs off the request path; a panic inside it must
        // not take the watcher task — let alone the server — down with it.
        let result = catch_unwind(AssertUnwindSafe(|| on_payment(event)));
        if result.is_err() {
            warn!("watcher: onPayment callback panicked, swallowed");
        }
    })
}
