//! Post schema: field table and coercion applied to root posts before they are
//! materialised.
//!
//! Only the fields listed in [`POST_FIELDS`] are checked; anything else the
//! ledger returns is passed through untouched.

use chrono::NaiveDateTime;
use serde_json::{Map, Number, Value};

use crate::error::{Result, ScraperError};
use crate::operation::Amount;
use crate::store::Document;

/// Stored datetime format.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Declared type of a post field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// A string; `non_empty` rejects `""`.
    Str { non_empty: bool },
    /// Integer, coerced from numeric strings and floats.
    Int,
    Float,
    Bool,
    /// `"x.xxx ASSET"` stored as `{amount, asset}`.
    Money,
    DateTime,
    /// A list of strings; `non_empty` rejects `[]`.
    StrList { non_empty: bool },
    /// Any list.
    List,
    /// A list of objects whose listed fields are coerced.
    Records(&'static [(&'static str, FieldKind)]),
    /// Parsed from its string form; unparseable metadata becomes `{}`.
    Metadata,
}

use FieldKind::*;

const BENEFICIARY: &[(&str, FieldKind)] = &[("weight", Int), ("account", Str { non_empty: false })];

const ACTIVE_VOTE: &[(&str, FieldKind)] = &[
    ("reputation", Int),
    ("percent", Int),
    ("voter", Str { non_empty: false }),
    ("weight", Int),
    ("time", Str { non_empty: false }),
    ("rshares", Int),
];

/// The materialised post schema.
pub const POST_FIELDS: &[(&str, FieldKind)] = &[
    ("identifier", Str { non_empty: true }),
    ("permlink", Str { non_empty: true }),
    ("author", Str { non_empty: true }),
    ("title", Str { non_empty: true }),
    ("body", Str { non_empty: true }),
    ("category", Str { non_empty: true }),
    ("parent_author", Str { non_empty: false }),
    ("parent_permlink", Str { non_empty: true }),
    ("root_title", Str { non_empty: true }),
    ("url", Str { non_empty: true }),
    ("community", Str { non_empty: false }),
    ("tags", StrList { non_empty: true }),
    ("reblogged_by", StrList { non_empty: false }),
    ("replies", List),
    ("json_metadata", Metadata),
    ("max_cashout_time", DateTime),
    ("cashout_time", DateTime),
    ("last_payout", DateTime),
    ("created", DateTime),
    ("last_update", DateTime),
    ("active", DateTime),
    ("percent_steem_dollars", Int),
    ("net_rshares", Int),
    ("vote_rshares", Int),
    ("abs_rshares", Int),
    ("children_abs_rshares", Int),
    ("author_rewards", Int),
    ("author_reputation", Int),
    ("net_votes", Int),
    ("total_vote_weight", Int),
    ("children", Int),
    ("reward_weight", Int),
    ("body_length", Int),
    ("depth", Int),
    ("id", Int),
    ("root_comment", Int),
    ("score_trending", Float),
    ("score_hot", Float),
    ("curator_payout_value", Money),
    ("promoted", Money),
    ("sum_payout_data", Money),
    ("total_pending_payout_value", Money),
    ("pending_payout_value", Money),
    ("total_payout_value", Money),
    ("max_accepted_payout", Money),
    ("allow_votes", Bool),
    ("allow_curation_rewards", Bool),
    ("allow_replies", Bool),
    ("beneficiaries", Records(BENEFICIARY)),
    ("active_votes", Records(ACTIVE_VOTE)),
];

/// Check and coerce a post document against [`POST_FIELDS`].
pub fn validate_post(mut doc: Document) -> Result<Document> {
    let identifier = doc.get("identifier").and_then(Value::as_str).unwrap_or_default().to_string();
    for (name, kind) in POST_FIELDS {
        let Some(value) = doc.remove(*name) else {
            continue;
        };
        let coerced = coerce(value, *kind).map_err(|reason| ScraperError::Validation {
            identifier: identifier.clone(),
            reason: format!("{name}: {reason}"),
        })?;
        doc.insert((*name).to_string(), coerced);
    }
    Ok(doc)
}

fn coerce(value: Value, kind: FieldKind) -> std::result::Result<Value, String> {
    match kind {
        Str { non_empty } => match value {
            Value::String(s) if non_empty && s.is_empty() => Err("must not be empty".into()),
            Value::String(s) => Ok(Value::String(s)),
            other => Err(format!("expected string, got {other}")),
        },
        Int => coerce_int(&value).map(Value::from),
        Float => match value {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected number, got '{s}'")),
            other => Err(format!("expected number, got {other}")),
        },
        Bool => match value {
            Value::Bool(_) => Ok(value),
            other => Err(format!("expected boolean, got {other}")),
        },
        Money => coerce_money(value),
        DateTime => match &value {
            Value::String(s) => parse_datetime(s)
                .map(|dt| Value::String(dt.format(DATETIME_FORMAT).to_string()))
                .ok_or_else(|| format!("invalid datetime '{s}'")),
            other => Err(format!("expected datetime, got {other}")),
        },
        StrList { non_empty } => match value {
            Value::Array(items) if non_empty && items.is_empty() => Err("must not be empty".into()),
            Value::Array(items) if items.iter().all(Value::is_string) => Ok(Value::Array(items)),
            Value::Array(_) => Err("expected a list of strings".into()),
            other => Err(format!("expected list, got {other}")),
        },
        List => match value {
            Value::Array(_) => Ok(value),
            other => Err(format!("expected list, got {other}")),
        },
        Records(fields) => match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => coerce_record(record, fields).map(Value::Object),
                    other => Err(format!("expected object in list, got {other}")),
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(format!("expected list, got {other}")),
        },
        Metadata => Ok(coerce_metadata(value)),
    }
}

fn coerce_record(mut record: Map<String, Value>, fields: &[(&str, FieldKind)]) -> std::result::Result<Map<String, Value>, String> {
    for (name, kind) in fields {
        if let Some(value) = record.remove(*name) {
            record.insert((*name).to_string(), coerce(value, *kind)?);
        }
    }
    Ok(record)
}

fn coerce_int(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| format!("integer out of range: {n}")),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| format!("expected integer, got '{s}'")),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!("expected integer, got {other}")),
    }
}

fn coerce_money(value: Value) -> std::result::Result<Value, String> {
    match value {
        Value::String(s) => {
            let amount = Amount::parse(&s).map_err(|e| e.to_string())?;
            serde_json::to_value(amount).map_err(|e| e.to_string())
        }
        Value::Object(map) if map.get("amount").is_some_and(Value::is_number) && map.get("asset").is_some_and(Value::is_string) => {
            Ok(Value::Object(map))
        }
        other => Err(format!("expected amount, got {other}")),
    }
}

fn coerce_metadata(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::Object(Map::new()),
        },
        _ => Value::Object(Map::new()),
    }
}

/// Parse a ledger timestamp, with or without a trailing `Z`.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}
