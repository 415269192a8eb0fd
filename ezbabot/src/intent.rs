//! The classification schema and its validation.
//!
//! The language model output is untrusted input. `Intent::from_json` is a
//! total function: anything that does not match the schema exactly comes
//! back as a `ValidationError`, which callers turn into a conversation
//! reply instead of a mutation.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    model::{Direction, EditTarget, StockCount, StockMovement, TransactionChanges, TransactionEdit},
    period::{DEFAULT_DETAILS_LIMIT, Period},
};

pub const MAX_DETAILS_LIMIT: usize = 50;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("model output is not a JSON object")]
    NotAnObject,
    #[error("unknown intent `{0}`")]
    UnknownIntent(String),
    #[error("missing or invalid field `{0}`")]
    InvalidField(&'static str),
}

/// A transaction the user asked to record, before it is timestamped
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub direction: Direction,
    pub item: String,
    pub amount: f64,
    pub category: String,
    pub notes: Option<String>,
    pub date: Option<NaiveDate>,
    pub stock: Option<StockMovement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Income,
    Expense,
    Net,
    /// Income, expense and net together
    Summary,
    Breakdown(Direction),
    /// Today's and this month's totals plus the inventory
    Daily,
}

impl Metric {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "income" => Some(Metric::Income),
            "expense" => Some(Metric::Expense),
            "net" | "profit" => Some(Metric::Net),
            "summary" | "" => Some(Metric::Summary),
            "income_breakdown" => Some(Metric::Breakdown(Direction::Income)),
            "expense_breakdown" => Some(Metric::Breakdown(Direction::Expense)),
            "daily" => Some(Metric::Daily),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    RecordTransaction(TransactionDraft),
    InventorySnapshot(Vec<StockCount>),
    Report {
        period: Period,
        metric: Metric,
        filter: Option<String>,
    },
    Details {
        period: Period,
        filter: Option<String>,
        direction: Option<Direction>,
        limit: usize,
    },
    Comparison {
        period_a: Period,
        period_b: Period,
    },
    Inventory,
    Edit {
        target: EditTarget,
        edit: TransactionEdit,
    },
    Conversation {
        reply: String,
    },
}

impl Intent {
    /// Intents that write to the ledger and therefore need the admin role
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Intent::RecordTransaction(_) | Intent::InventorySnapshot(_) | Intent::Edit { .. }
        )
    }

    /// Validate one decoded JSON value against the schema
    pub fn from_json(value: &Value) -> Result<Intent, ValidationError> {
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;
        let tag = text_field(obj, "intent").ok_or(ValidationError::InvalidField("intent"))?;

        match tag.as_str() {
            "record_transaction" => record_transaction(obj),
            "inventory_snapshot" => inventory_snapshot(obj),
            "report" => Ok(Intent::Report {
                period: period_field(obj, "period", Period::ThisMonth)?,
                metric: match text_field(obj, "metric") {
                    Some(metric) => {
                        Metric::parse(&metric).ok_or(ValidationError::InvalidField("metric"))?
                    }
                    None => Metric::Summary,
                },
                filter: text_field(obj, "filter"),
            }),
            "details" => Ok(Intent::Details {
                period: period_field(obj, "period", Period::All)?,
                filter: text_field(obj, "filter"),
                direction: optional_direction(obj)?,
                limit: match obj.get("limit") {
                    None | Some(Value::Null) => DEFAULT_DETAILS_LIMIT,
                    Some(value) => {
                        let limit = coerce_count(value).ok_or(ValidationError::InvalidField("limit"))?;
                        usize::try_from(limit)
                            .unwrap_or(MAX_DETAILS_LIMIT)
                            .clamp(1, MAX_DETAILS_LIMIT)
                    }
                },
            }),
            "comparison" => Ok(Intent::Comparison {
                period_a: period_field(obj, "period_a", Period::ThisMonth)?,
                period_b: period_field(obj, "period_b", Period::LastMonth)?,
            }),
            "inventory" => Ok(Intent::Inventory),
            "edit" => edit(obj),
            "conversation" => Ok(Intent::Conversation {
                reply: text_field(obj, "reply").unwrap_or_default(),
            }),
            other => Err(ValidationError::UnknownIntent(other.to_string())),
        }
    }
}

fn record_transaction(obj: &Map<String, Value>) -> Result<Intent, ValidationError> {
    let direction = text_field(obj, "direction")
        .and_then(|d| Direction::parse(&d))
        .ok_or(ValidationError::InvalidField("direction"))?;
    let item = text_field(obj, "item").ok_or(ValidationError::InvalidField("item"))?;
    let amount = obj
        .get("amount")
        .and_then(coerce_amount)
        .ok_or(ValidationError::InvalidField("amount"))?;

    let stock = match text_field(obj, "stock_item") {
        Some(name) => {
            let quantity = match obj.get("quantity") {
                None | Some(Value::Null) => 1,
                Some(value) => coerce_count(value).ok_or(ValidationError::InvalidField("quantity"))?,
            };
            Some(StockMovement {
                name,
                kind: text_field(obj, "stock_kind").unwrap_or_default(),
                quantity,
            })
        }
        None => None,
    };

    // A zero amount only makes sense as a pure head-count movement
    if amount == 0.0 && stock.as_ref().is_none_or(|s| s.quantity == 0) {
        return Err(ValidationError::InvalidField("amount"));
    }

    let date = match text_field(obj, "date") {
        Some(date) => Some(
            NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|_| ValidationError::InvalidField("date"))?,
        ),
        None => None,
    };

    Ok(Intent::RecordTransaction(TransactionDraft {
        direction,
        category: text_field(obj, "category").unwrap_or_else(|| item.clone()),
        item,
        amount,
        notes: text_field(obj, "notes"),
        date,
        stock,
    }))
}

fn inventory_snapshot(obj: &Map<String, Value>) -> Result<Intent, ValidationError> {
    let items = obj
        .get("items")
        .and_then(Value::as_array)
        .ok_or(ValidationError::InvalidField("items"))?;
    let mut counts = Vec::with_capacity(items.len());
    for item in items {
        let entry = item.as_object().ok_or(ValidationError::InvalidField("items"))?;
        let name = text_field(entry, "name").ok_or(ValidationError::InvalidField("name"))?;
        let quantity = entry
            .get("quantity")
            .and_then(coerce_count)
            .ok_or(ValidationError::InvalidField("quantity"))?;
        counts.push(StockCount {
            name,
            kind: text_field(entry, "kind").unwrap_or_default(),
            quantity,
            notes: text_field(entry, "notes"),
        });
    }
    if counts.is_empty() {
        return Err(ValidationError::InvalidField("items"));
    }
    Ok(Intent::InventorySnapshot(counts))
}

fn edit(obj: &Map<String, Value>) -> Result<Intent, ValidationError> {
    let action = text_field(obj, "action").ok_or(ValidationError::InvalidField("action"))?;
    let name = text_field(obj, "name");
    let target = match text_field(obj, "target").as_deref() {
        Some("last") => EditTarget::Last,
        Some("by_name") => EditTarget::ByName(name.ok_or(ValidationError::InvalidField("name"))?),
        Some(_) => return Err(ValidationError::InvalidField("target")),
        None => match name {
            Some(name) => EditTarget::ByName(name),
            None => EditTarget::Last,
        },
    };

    let edit = match action.as_str() {
        "delete" => TransactionEdit::Delete,
        "update" => {
            let amount = match obj.get("amount") {
                None | Some(Value::Null) => None,
                Some(value) => {
                    Some(coerce_amount(value).ok_or(ValidationError::InvalidField("amount"))?)
                }
            };
            let changes = TransactionChanges {
                description: text_field(obj, "item"),
                amount,
                category: text_field(obj, "category"),
                notes: text_field(obj, "notes"),
            };
            if changes.is_empty() {
                return Err(ValidationError::InvalidField("changes"));
            }
            TransactionEdit::Update(changes)
        }
        _ => return Err(ValidationError::InvalidField("action")),
    };
    Ok(Intent::Edit { target, edit })
}

/// Trimmed, non-empty string field
fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn period_field(
    obj: &Map<String, Value>,
    key: &'static str,
    default: Period,
) -> Result<Period, ValidationError> {
    match text_field(obj, key) {
        Some(period) => period
            .parse::<Period>()
            .map_err(|_| ValidationError::InvalidField(key)),
        None => Ok(default),
    }
}

fn optional_direction(obj: &Map<String, Value>) -> Result<Option<Direction>, ValidationError> {
    match text_field(obj, "direction").as_deref() {
        None | Some("none") | Some("all") => Ok(None),
        Some(direction) => Direction::parse(direction)
            .map(Some)
            .ok_or(ValidationError::InvalidField("direction")),
    }
}

/// Map Arabic-Indic and Persian digits to ASCII, drop thousands separators
fn normalize_number(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter_map(|c| match c {
            '٠'..='٩' => char::from_digit(c as u32 - '٠' as u32, 10),
            '۰'..='۹' => char::from_digit(c as u32 - '۰' as u32, 10),
            '٫' => Some('.'),
            ',' | '٬' | ' ' => None,
            _ => Some(c),
        })
        .collect()
}

/// A finite, non-negative number from a JSON number or numeric string
pub fn coerce_amount(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => normalize_number(s).parse::<f64>().ok()?,
        _ => return None,
    };
    (number.is_finite() && number >= 0.0).then_some(number)
}

/// A non-negative whole count
pub fn coerce_count(value: &Value) -> Option<u64> {
    let number = coerce_amount(value)?;
    (number.fract() == 0.0 && number <= u64::MAX as f64).then_some(number as u64)
}
