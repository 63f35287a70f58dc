//! chainscraper-steem: JSON-RPC ledger client and webhook notifier.

pub mod client;
pub mod notifier;

pub use client::{RpcClientConfig, SteemRpcLedger};
pub use notifier::WebhookNotifier;
