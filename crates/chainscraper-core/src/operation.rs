//! Ledger operations: the immutable facts the pipeline reads.
//!
//! Operations arrive from the ledger as JSON objects with a `type` tag and a
//! per-type field set. They are parsed once at the ingestion boundary into
//! [`Operation`]; anything the pipeline does not know about becomes
//! [`OperationBody::Unknown`] and is filtered out by type.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScraperError};

/// A single ledger operation plus the position it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub block_num: u64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub trx_id: String,
    #[serde(flatten)]
    pub body: OperationBody,
}

/// Account authority as carried by account-update operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Authority {
    #[serde(default)]
    pub weight_threshold: u32,
    #[serde(default)]
    pub account_auths: Vec<(String, u32)>,
    #[serde(default)]
    pub key_auths: Vec<(String, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationBody {
    Comment {
        #[serde(default)]
        parent_author: String,
        #[serde(default)]
        parent_permlink: String,
        author: String,
        permlink: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        body: String,
        #[serde(default)]
        json_metadata: String,
    },
    Vote {
        voter: String,
        author: String,
        permlink: String,
        #[serde(default)]
        weight: i64,
    },
    DeleteComment {
        author: String,
        permlink: String,
    },
    AuthorReward {
        author: String,
        permlink: String,
        #[serde(default)]
        sbd_payout: String,
        #[serde(default)]
        steem_payout: String,
        #[serde(default)]
        vesting_payout: String,
    },
    CurationReward {
        curator: String,
        #[serde(default)]
        reward: String,
        comment_author: String,
        comment_permlink: String,
    },
    Transfer {
        from: String,
        to: String,
        amount: String,
        #[serde(default)]
        memo: String,
    },
    DelegateVestingShares {
        delegator: String,
        delegatee: String,
        vesting_shares: String,
    },
    ReturnVestingDelegation {
        account: String,
        vesting_shares: String,
    },
    AccountUpdate {
        account: String,
        #[serde(default)]
        owner: Option<Authority>,
        #[serde(default)]
        active: Option<Authority>,
        #[serde(default)]
        posting: Option<Authority>,
        #[serde(default)]
        memo_key: String,
        #[serde(default)]
        json_metadata: String,
    },
    AccountCreate {
        creator: String,
        new_account_name: String,
        #[serde(default)]
        fee: String,
        #[serde(default)]
        owner: Option<Authority>,
        #[serde(default)]
        active: Option<Authority>,
        #[serde(default)]
        posting: Option<Authority>,
        #[serde(default)]
        memo_key: String,
        #[serde(default)]
        json_metadata: String,
    },
    #[serde(other)]
    Unknown,
}

impl Operation {
    pub fn new(block_num: u64, body: OperationBody) -> Self {
        Self {
            block_num,
            timestamp: String::new(),
            trx_id: String::new(),
            body,
        }
    }

    /// Parse an operation from its JSON representation (`{"type": ..., "block_num": ..., ...}`).
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| ScraperError::Codec(format!("malformed operation: {e}")))
    }

    /// The ledger type name, e.g. `"comment"`.
    pub fn op_type(&self) -> &'static str {
        match &self.body {
            OperationBody::Comment { .. } => "comment",
            OperationBody::Vote { .. } => "vote",
            OperationBody::DeleteComment { .. } => "delete_comment",
            OperationBody::AuthorReward { .. } => "author_reward",
            OperationBody::CurationReward { .. } => "curation_reward",
            OperationBody::Transfer { .. } => "transfer",
            OperationBody::DelegateVestingShares { .. } => "delegate_vesting_shares",
            OperationBody::ReturnVestingDelegation { .. } => "return_vesting_delegation",
            OperationBody::AccountUpdate { .. } => "account_update",
            OperationBody::AccountCreate { .. } => "account_create",
            OperationBody::Unknown => "unknown",
        }
    }

    /// `@author/permlink` of the content this operation touches, if any.
    pub fn identifier(&self) -> Option<String> {
        let (author, permlink) = match &self.body {
            OperationBody::Comment { author, permlink, .. }
            | OperationBody::Vote { author, permlink, .. }
            | OperationBody::DeleteComment { author, permlink }
            | OperationBody::AuthorReward { author, permlink, .. } => (author, permlink),
            OperationBody::CurationReward { comment_author, comment_permlink, .. } => {
                (comment_author, comment_permlink)
            }
            _ => return None,
        };
        (!author.is_empty()).then(|| format_identifier(author, permlink))
    }

    /// `@parent_author/parent_permlink` when the operation is a reply.
    pub fn parent_identifier(&self) -> Option<String> {
        match &self.body {
            OperationBody::Comment { parent_author, parent_permlink, .. } if !parent_author.is_empty() => {
                Some(format_identifier(parent_author, parent_permlink))
            }
            _ => None,
        }
    }

    /// Applications declared by the `app` key of the operation's JSON metadata.
    pub fn metadata_apps(&self) -> BTreeSet<String> {
        match &self.body {
            OperationBody::Comment { json_metadata, .. } => apps_from_metadata(json_metadata),
            _ => BTreeSet::new(),
        }
    }

    /// Accounts named by an account-update operation: the account itself plus
    /// every account authority it grants.
    pub fn authority_accounts(&self) -> Vec<&str> {
        let (account, authorities) = match &self.body {
            OperationBody::AccountUpdate { account, owner, active, posting, .. } => {
                (account, [owner, active, posting])
            }
            OperationBody::AccountCreate { new_account_name, owner, active, posting, .. } => {
                (new_account_name, [owner, active, posting])
            }
            _ => return Vec::new(),
        };
        let mut accounts = vec![account.as_str()];
        for auth in authorities.into_iter().flatten() {
            accounts.extend(auth.account_auths.iter().map(|(name, _)| name.as_str()));
        }
        accounts
    }
}

/// Format a content identifier.
pub fn format_identifier(author: &str, permlink: &str) -> String {
    format!("@{author}/{permlink}")
}

/// Split `@author/permlink` into its parts.
pub fn parse_identifier(identifier: &str) -> Option<(&str, &str)> {
    let rest = identifier.strip_prefix('@')?;
    let (author, permlink) = rest.split_once('/')?;
    (!author.is_empty() && !permlink.is_empty()).then_some((author, permlink))
}

/// Extract the application names from a `json_metadata` string.
///
/// `{"app": "steepshot/0.3.1"}` yields `steepshot`.
pub fn apps_from_metadata(json_metadata: &str) -> BTreeSet<String> {
    let mut apps = BTreeSet::new();
    let Ok(meta) = serde_json::from_str::<serde_json::Value>(json_metadata) else {
        return apps;
    };
    if let Some(app) = meta.get("app").and_then(|v| v.as_str()) {
        let name = app.split('/').next().unwrap_or_default().trim().to_lowercase();
        if !name.is_empty() {
            apps.insert(name);
        }
    }
    apps
}

// ─── Amount ───────────────────────────────────────────────────────────────────

/// An asset amount such as `"5.000 STEEM"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: f64,
    pub asset: String,
}

impl Amount {
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let (Some(value), Some(asset), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ScraperError::Codec(format!("malformed amount '{s}'")));
        };
        let amount = value
            .parse::<f64>()
            .map_err(|e| ScraperError::Codec(format!("malformed amount '{s}': {e}")))?;
        Ok(Self { amount, asset: asset.to_string() })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
