//! In-memory wallet adapter used by tests and the demo server's
//! `--no-lnd` mode: no real Lightning node required. Not part of the
//! spec's component list by name, but every adapter needs *some* way to
//! be exercised without a live node, and the teacher crate's own tests
//! never touch a real LND either.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hex::ToHex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{InvoiceHandle, PaymentOutcome, WalletAdapter};

struct MockInvoice {
    preimage_hex: String,
    settled: bool,
    settled_at: Option<u64>,
}

#[derive(Clone, Default)]
pub struct MockWallet {
    invoices: Arc<Mutex<HashMap<String, MockInvoice>>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: simulate the invoice settling out of band, and
    /// return the preimage a paying client would have learned.
    pub async fn settle(&self, payment_hash: &str, settled_at: u64) -> Option<String> {
        let mut invoices = self.invoices.lock().await;
        let inv = invoices.get_mut(payment_hash)?;
        inv.settled = true;
        inv.settled_at = Some(settled_at);
        Some(inv.preimage_hex.clone())
    }
}

#[async_trait]
impl WalletAdapter for MockWallet {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: &str,
        expiry_secs: u64,
    ) -> anyhow::Result<InvoiceHandle> {
        let mut preimage = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut preimage);
        let preimage_hex = preimage.encode_hex::<String>();

        let mut hasher = Sha256::new();
        hasher.update(preimage);
        let payment_hash: [u8; 32] = hasher.finalize().into();
        let payment_hash_hex = payment_hash.encode_hex::<String>();

        let invoice = format!(
            "lnmock1{payment_hash_hex}amt{amount_sats}exp{expiry_secs}desc{description}"
        );

        self.invoices.lock().await.insert(
            payment_hash_hex.clone(),
            MockInvoice {
                preimage_hex,
                settled: false,
                settled_at: None,
            },
        );

        Ok(InvoiceHandle {
            invoice,
            payment_hash: payment_hash_hex,
        })
    }

    async fn wait_for_payment(
        &self,
        payment_hash: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<PaymentOutcome> {
        let deadline = Duration::from_millis(timeout_ms);
        let poll_every = Duration::from_millis(20);

        let result = timeout(deadline, async {
            loop {
                {
                    let invoices = self.invoices.lock().await;
                    if let Some(inv) = invoices.get(payment_hash) {
                        if inv.settled {
                            return PaymentOutcome {
                                paid: true,
                                preimage: Some(inv.preimage_hex.clone()),
                                settled_at: inv.settled_at,
                            };
                        }
                    }
                }
                tokio::time::sleep(poll_every).await;
            }
        })
        .await;

        Ok(result.unwrap_or(PaymentOutcome {
            paid: false,
            preimage: None,
            settled_at: None,
        }))
    }

    async fn pay_invoice(&self, bolt11: &str) -> anyhow::Result<String> {
        let payment_hash_hex = bolt11
            .strip_prefix("lnmock1")
            .and_then(|rest| rest.get(..64))
            .ok_or_else(|| anyhow::anyhow!("not a mock invoice: {bolt11}"))?;

        self.settle(payment_hash_hex, 0)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown mock invoice"))
    }
}
