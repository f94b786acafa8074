//! Wallet adapter (component H): the narrow contract the gate core
//! depends on. Two concrete adapters ship: an LND-backed one built on
//! `tonic_lnd` (the teacher crate's own wallet binding), and an in-memory
//! one used by tests and examples that don't want to stand up a node.

pub mod lnd;
pub mod mock;

use async_trait::async_trait;

/// Opaque reference to a freshly-minted invoice. The gate never
/// interprets `invoice` beyond handing it to the client.
#[derive(Debug, Clone)]
pub struct InvoiceHandle {
    pub invoice: String,
    pub payment_hash: String,
}

/// Result of waiting for an invoice to settle.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub paid: bool,
    pub preimage: Option<String>,
    pub settled_at: Option<u64>,
}

/// The single narrow contract the core depends on. Implementors may be
/// constructed from a wallet-connection URL/credentials, or wrap an
/// already-constructed client — the core never special-cases either.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: &str,
        expiry_secs: u64,
    ) -> anyhow::Result<InvoiceHandle>;

    async fn wait_for_payment(
        &self,
        payment_hash: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<PaymentOutcome>;

    /// Used only by the client-side auto-pay helper, not by the gate's
    /// admission path; kept here because it's part of the same narrow
    /// wallet contract the spec defines.
    async fn pay_invoice(&self, bolt11: &str) -> anyhow::Result<String>;
}
