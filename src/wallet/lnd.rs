//! LND-backed wallet adapter, adapted from the teacher crate's own
//! `lnd.rs`: a cloneable client wrapping `tonic_lnd` behind an
//! `Arc<Mutex<_>>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hex::ToHex;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tonic_lnd::lnrpc::{self, invoice::InvoiceState};
use tracing::error;

use super::{InvoiceHandle, PaymentOutcome, WalletAdapter};

/// Clonable LND client; the `Arc<Mutex<_>>` wrapping matches the teacher
/// crate's own `lnd::Client` so it can be freely shared across route
/// gates and the payment watcher.
#[derive(Clone)]
pub struct LndWallet {
    lnd: Arc<Mutex<tonic_lnd::Client>>,
}

impl LndWallet {
    /// Construction mode 1: build the client from connection details
    /// (the "wallet-connection URL" style construction — host, TLS cert,
    /// macaroon file path).
    pub async fn connect(host: String, tls_path: String, mac_path: String) -> anyhow::Result<Self> {
        let client = tonic_lnd::connect(host, tls_path, mac_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to LND: {e}"))?;
        Ok(Self::from_client(client))
    }

    /// Construction mode 2: wrap an already-constructed client.
    pub fn from_client(client: tonic_lnd::Client) -> Self {
        Self {
            lnd: Arc::new(Mutex::new(client)),
        }
    }

    /// Polls the node directly for the current invoice state. Uncached —
    /// `wait_for_payment` needs to observe a state transition (open ->
    /// settled), and a read-through cache would keep returning the first,
    /// still-open lookup for the entire poll loop and never see settlement.
    async fn lookup_invoice(&self, r_hash: Vec<u8>) -> anyhow::Result<lnrpc::Invoice> {
        let inv = self
            .lnd
            .lock()
            .await
            .lightning()
            .lookup_invoice(lnrpc::PaymentHash {
                r_hash,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("lookup_invoice failed: {e}"))?
            .into_inner();
        Ok(inv)
    }
}

#[async_trait]
impl WalletAdapter for LndWallet {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: &str,
        expiry_secs: u64,
    ) -> anyhow::Result<InvoiceHandle> {
        let invoice = lnrpc::Invoice {
            memo: description.to_string(),
            value_msat: (amount_sats * 1000) as i64,
            expiry: expiry_secs as i64,
            ..Default::default()
        };

        let resp = self
            .lnd
            .lock()
            .await
            .lightning()
            .add_invoice(invoice)
            .await
            .map_err(|e| anyhow::anyhow!("failed to generate invoice: {e}"))?
            .into_inner();

        Ok(InvoiceHandle {
            invoice: resp.payment_request,
            payment_hash: resp.r_hash.encode_hex::<String>(),
        })
    }

    async fn wait_for_payment(
        &self,
        payment_hash: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<PaymentOutcome> {
        let r_hash = hex::decode(payment_hash)?;
        let poll_every = Duration::from_secs(2);
        let deadline = Duration::from_millis(timeout_ms);

        let result = timeout(deadline, async {
            loop {
                match self.lookup_invoice(r_hash.clone()).await {
                    Ok(inv) if inv.state() == InvoiceState::Settled => {
                        return PaymentOutcome {
                            paid: true,
                            preimage: Some(inv.r_preimage.encode_hex::<String>()),
                            settled_at: Some(inv.settle_date as u64),
                        };
                    }
                    Ok(_) => tokio::time::sleep(poll_every).await,
                    Err(e) => {
                        error!(error=%e, "error polling invoice state");
                        tokio::time::sleep(poll_every).await;
                    }
                }
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
        let resp = self
            .lnd
            .lock()
            .await
            .lightning()
            .send_payment_sync(lnrpc::SendRequest {
                payment_request: bolt11.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("send_payment_sync failed: {e}"))?
            .into_inner();

        if !resp.payment_error.is_empty() {
            anyhow::bail!("payment failed: {}", resp.payment_error);
        }

        Ok(resp.payment_preimage.encode_hex::<String>())
    }
}
