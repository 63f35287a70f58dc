//! Notification events derived from forward-mode operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::operation::{Operation, OperationBody};

/// Which event an operation type is translated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[serde(alias = "VoteEvent")]
    Vote,
    #[serde(alias = "CommentEvent")]
    Comment,
    #[serde(alias = "TransferEvent")]
    Transfer,
}

/// JSON body delivered to the notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    pub initiator: String,
    pub action_object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_data: Option<TransferData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferData {
    pub memo: String,
    pub amount: String,
}

/// A resolved notification event.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Vote {
        voter: String,
        identifier: String,
        weight: i64,
        /// The voted content is a reply rather than a root post.
        on_comment: bool,
    },
    Comment {
        author: String,
        /// Root of the thread for replies, the post itself otherwise.
        action_object: String,
        is_reply: bool,
    },
    Transfer {
        from: String,
        to: String,
        memo: String,
        amount: String,
    },
}

impl NotificationEvent {
    /// Translate `op` into an event of `kind`, consulting the ledger where the
    /// event needs the state of the content involved.
    ///
    /// Returns `Ok(None)` when `op` does not carry what `kind` needs.
    pub async fn resolve(kind: EventKind, op: &Operation, ledger: &dyn Ledger) -> Result<Option<Self>> {
        let event = match (kind, &op.body) {
            (EventKind::Vote, OperationBody::Vote { voter, weight, .. }) => {
                let Some(identifier) = op.identifier() else {
                    return Ok(None);
                };
                let on_comment = ledger.get_content(&identifier).await?.is_some_and(|post| !post.is_root());
                Self::Vote { voter: voter.clone(), identifier, weight: *weight, on_comment }
            }
            (EventKind::Comment, OperationBody::Comment { author, .. }) => {
                let Some(identifier) = op.identifier() else {
                    return Ok(None);
                };
                match op.parent_identifier() {
                    Some(parent) => {
                        let root = ledger.get_content(&parent).await?.and_then(|post| post.root_identifier());
                        Self::Comment { author: author.clone(), action_object: root.unwrap_or(parent), is_reply: true }
                    }
                    None => Self::Comment { author: author.clone(), action_object: identifier, is_reply: false },
                }
            }
            (EventKind::Transfer, OperationBody::Transfer { from, to, amount, memo }) => Self::Transfer {
                from: from.clone(),
                to: to.clone(),
                memo: memo.clone(),
                amount: amount.clone(),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn event_type(&self) -> String {
        match self {
            Self::Vote { weight, on_comment, .. } => {
                let base = match *weight {
                    w if w > 0 => "upvote",
                    0 => "downvote",
                    _ => "flag",
                };
                if *on_comment {
                    format!("{base}_comment")
                } else {
                    base.to_string()
                }
            }
            Self::Comment { is_reply: true, .. } => "comment".into(),
            Self::Comment { is_reply: false, .. } => "post".into(),
            Self::Transfer { .. } => "transfer".into(),
        }
    }

    pub fn payload(&self) -> EventPayload {
        let (initiator, action_object, transfer_data) = match self {
            Self::Vote { voter, identifier, .. } => (voter, identifier, None),
            Self::Comment { author, action_object, .. } => (author, action_object, None),
            Self::Transfer { from, to, memo, amount } => (
                from,
                to,
                Some(TransferData { memo: memo.clone(), amount: amount.clone() }),
            ),
        };
        EventPayload {
            event_type: self.event_type(),
            initiator: initiator.clone(),
            action_object: action_object.clone(),
            transfer_data,
        }
    }
}

/// External notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &EventPayload) -> Result<()>;
}

/// Drops every event. Used when notifications are disabled.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _payload: &EventPayload) -> Result<()> {
        Ok(())
    }
}
