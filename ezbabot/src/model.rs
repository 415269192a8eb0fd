use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp layout used in the ledger tables
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Fallback category for rows that carry neither category nor item
pub const OTHER_CATEGORY: &str = "أخرى";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Income,
    Expense,
}

impl Direction {
    /// Label written to the Transactions table and shown to users
    pub fn label(self) -> &'static str {
        match self {
            Direction::Income => "دخل",
            Direction::Expense => "صرف",
        }
    }

    pub fn sign(self) -> &'static str {
        match self {
            Direction::Income => "+",
            Direction::Expense => "-",
        }
    }

    /// Accepts the schema names, the short `in`/`out` forms and the table labels
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "income" | "in" | "دخل" => Some(Direction::Income),
            "expense" | "out" | "صرف" => Some(Direction::Expense),
            _ => None,
        }
    }
}

/// One recorded financial event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub description: String,
    pub category: String,
    pub amount: f64,
    pub recorded_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
}

impl Transaction {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Category used for breakdowns: category, then item, then "other"
    pub fn category_or_item(&self) -> &str {
        if !self.category.trim().is_empty() {
            self.category.trim()
        } else if !self.description.trim().is_empty() {
            self.description.trim()
        } else {
            OTHER_CATEGORY
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Current count of a livestock/poultry/stock item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    pub quantity: u64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockAdjustment {
    /// Add to the current count, clamping the result at zero
    Delta(i64),
    /// Overwrite the current count (inventory count snapshot)
    Absolute(u64),
}

/// A requested change to one inventory row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryChange {
    pub name: String,
    pub kind: String,
    pub adjustment: StockAdjustment,
    pub notes: Option<String>,
}

impl InventoryChange {
    /// Quantity after applying this change to `current`
    pub fn apply(&self, current: u64) -> u64 {
        match self.adjustment {
            StockAdjustment::Absolute(quantity) => quantity,
            StockAdjustment::Delta(delta) => {
                let next = i128::from(current) + i128::from(delta);
                u64::try_from(next.max(0)).unwrap_or(u64::MAX)
            }
        }
    }
}

/// Head count bought or sold alongside a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub name: String,
    pub kind: String,
    pub quantity: u64,
}

impl StockMovement {
    /// Buying (expense) adds heads, selling (income) removes them
    pub fn to_change(&self, direction: Direction) -> InventoryChange {
        let quantity = i64::try_from(self.quantity).unwrap_or(i64::MAX);
        let delta = match direction {
            Direction::Expense => quantity,
            Direction::Income => -quantity,
        };
        InventoryChange {
            name: self.name.clone(),
            kind: self.kind.clone(),
            adjustment: StockAdjustment::Delta(delta),
            notes: None,
        }
    }
}

/// Absolute count of one item from an inventory snapshot message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCount {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    pub quantity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl StockCount {
    pub fn to_change(&self) -> InventoryChange {
        InventoryChange {
            name: self.name.clone(),
            kind: self.kind.clone(),
            adjustment: StockAdjustment::Absolute(self.quantity),
            notes: self.notes.clone(),
        }
    }
}

/// Payload of a staged, not yet committed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagedOperation {
    Transaction {
        transaction: Transaction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stock: Option<StockMovement>,
    },
    InventorySnapshot {
        items: Vec<StockCount>,
    },
}

impl StagedOperation {
    /// Value of the operation type column in the Pending table
    pub fn operation_type(&self) -> &'static str {
        match self {
            StagedOperation::Transaction { .. } => "transaction",
            StagedOperation::InventorySnapshot { .. } => "inventory_snapshot",
        }
    }
}

/// A staged operation awaiting explicit confirmation by the same user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub user_id: u64,
    pub created_at: NaiveDateTime,
    pub operation: StagedOperation,
}

/// Which transaction an edit refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    Last,
    /// Exact (trimmed, case-insensitive) match on the item description
    ByName(String),
}

/// Fields replaced by an update; `None` keeps the stored value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionChanges {
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<String>,
    pub notes: Option<String>,
}

impl TransactionChanges {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.amount.is_none()
            && self.category.is_none()
            && self.notes.is_none()
    }

    pub fn apply(&self, transaction: &Transaction) -> Transaction {
        let mut updated = transaction.clone();
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(amount) = self.amount {
            updated.amount = amount;
        }
        if let Some(category) = &self.category {
            updated.category = category.clone();
        }
        if let Some(notes) = &self.notes {
            updated.notes = Some(notes.clone());
        }
        updated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEdit {
    Delete,
    Update(TransactionChanges),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Deleted(Transaction),
    Updated {
        before: Transaction,
        after: Transaction,
    },
    /// Nothing matched; carries up to a handful of near matches
    NotFound { similar: Vec<Transaction> },
    /// More than one transaction matched exactly
    Ambiguous(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("income"), Some(Direction::Income));
        assert_eq!(Direction::parse(" OUT "), Some(Direction::Expense));
        assert_eq!(Direction::parse("دخل"), Some(Direction::Income));
        assert_eq!(Direction::parse("صرف"), Some(Direction::Expense));
        assert_eq!(Direction::parse("none"), None);
    }

    #[test]
    fn test_inventory_delta_clamps_at_zero() {
        let sell = StockMovement {
            name: "sheep".to_string(),
            kind: "livestock".to_string(),
            quantity: 5,
        }
        .to_change(Direction::Income);
        assert_eq!(sell.apply(3), 0);
        assert_eq!(sell.apply(8), 3);
    }

    #[test]
    fn test_inventory_buy_adds() {
        let buy = StockMovement {
            name: "دجاج".to_string(),
            kind: "دواجن".to_string(),
            quantity: 50,
        }
        .to_change(Direction::Expense);
        assert_eq!(buy.apply(10), 60);
    }

    #[test]
    fn test_snapshot_overwrites() {
        let count = StockCount {
            name: "غنم".to_string(),
            kind: String::new(),
            quantity: 12,
            notes: None,
        };
        assert_eq!(count.to_change().apply(40), 12);
    }

    #[test]
    fn test_changes_apply_keeps_untouched_fields() {
        let tx = Transaction {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            direction: Direction::Expense,
            description: "أعلاف".to_string(),
            category: "أعلاف".to_string(),
            amount: 800.0,
            recorded_by: "Khaled".to_string(),
            notes: None,
            quantity: None,
        };
        let changes = TransactionChanges {
            amount: Some(750.0),
            ..Default::default()
        };
        let updated = changes.apply(&tx);
        assert_eq!(updated.amount, 750.0);
        assert_eq!(updated.description, "أعلاف");
        assert_eq!(updated.timestamp, tx.timestamp);
    }

    #[test]
    fn test_staged_operation_json_is_tagged() {
        let op = StagedOperation::InventorySnapshot {
            items: vec![StockCount {
                name: "غنم".to_string(),
                kind: "مواشي".to_string(),
                quantity: 20,
                notes: None,
            }],
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"inventory_snapshot\""));
        assert_eq!(op.operation_type(), "inventory_snapshot");
    }
}
