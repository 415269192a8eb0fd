use thiserror::Error;

use crate::{
    model::{
        EditOutcome, EditTarget, InventoryChange, InventoryItem, PendingOperation, Transaction,
        TransactionEdit,
    },
    period::matches_filter,
};

/// How many near matches a failed edit lookup offers
pub const MAX_SIMILAR: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sheets API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed stored data: {0}")]
    Codec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// The system of record. Every operation is a single round trip (or a
/// read followed by one write); nothing is cached between messages.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// All transactions in write order
    async fn list_transactions(&self) -> Result<Vec<Transaction>, StoreError>;

    async fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Delete or update one transaction; refuses when the target is ambiguous
    async fn edit_transaction(
        &self,
        target: &EditTarget,
        edit: &TransactionEdit,
    ) -> Result<EditOutcome, StoreError>;

    async fn list_inventory(&self) -> Result<Vec<InventoryItem>, StoreError>;

    /// Create or adjust one inventory row, returning it as stored
    async fn update_inventory(&self, change: &InventoryChange) -> Result<InventoryItem, StoreError>;

    /// Stage an operation, superseding anything this user staged before
    async fn stage_pending(&self, pending: &PendingOperation) -> Result<(), StoreError>;

    /// The operation staged by this user, left in place
    async fn pending(&self, user_id: u64) -> Result<Option<PendingOperation>, StoreError>;

    /// Drop everything this user staged
    async fn clear_pending(&self, user_id: u64) -> Result<(), StoreError>;

    /// Remove and return the operation staged by this user. Rows that do
    /// not decode are dropped as well.
    async fn take_pending(&self, user_id: u64) -> Result<Option<PendingOperation>, StoreError> {
        let pending = self.pending(user_id).await?;
        self.clear_pending(user_id).await?;
        Ok(pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetMatch {
    /// Index into the slice passed to `resolve_target`
    Found(usize),
    NotFound(Vec<Transaction>),
    Ambiguous(usize),
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Find the one transaction an edit refers to
pub fn resolve_target(transactions: &[Transaction], target: &EditTarget) -> TargetMatch {
    match target {
        EditTarget::Last => match transactions.len() {
            0 => TargetMatch::NotFound(Vec::new()),
            len => TargetMatch::Found(len - 1),
        },
        EditTarget::ByName(name) => {
            let wanted = normalize_name(name);
            let exact: Vec<usize> = transactions
                .iter()
                .enumerate()
                .filter(|(_, tx)| normalize_name(&tx.description) == wanted)
                .map(|(index, _)| index)
                .collect();
            match exact.as_slice() {
                [index] => TargetMatch::Found(*index),
                [] => TargetMatch::NotFound(
                    transactions
                        .iter()
                        .rev()
                        .filter(|tx| matches_filter(tx, name))
                        .take(MAX_SIMILAR)
                        .cloned()
                        .collect(),
                ),
                many => TargetMatch::Ambiguous(many.len()),
            }
        }
    }
}

/// Outcome for an edit applied to `original`; `None` after means deletion
pub fn edit_result(original: &Transaction, edit: &TransactionEdit) -> (Option<Transaction>, EditOutcome) {
    match edit {
        TransactionEdit::Delete => (None, EditOutcome::Deleted(original.clone())),
        TransactionEdit::Update(changes) => {
            let after = changes.apply(original);
            (
                Some(after.clone()),
                EditOutcome::Updated {
                    before: original.clone(),
                    after,
                },
            )
        }
    }
}

/// Index of the inventory row with this name (trimmed, case-insensitive)
pub fn find_inventory(items: &[InventoryItem], name: &str) -> Option<usize> {
    let wanted = normalize_name(name);
    items
        .iter()
        .position(|item| normalize_name(&item.name) == wanted)
}

/// Row as it should be stored after applying `change` to `existing`
pub fn merged_item(existing: Option<&InventoryItem>, change: &InventoryChange) -> InventoryItem {
    match existing {
        Some(item) => InventoryItem {
            name: item.name.clone(),
            kind: if change.kind.trim().is_empty() {
                item.kind.clone()
            } else {
                change.kind.trim().to_string()
            },
            quantity: change.apply(item.quantity),
            notes: change.notes.clone().unwrap_or_else(|| item.notes.clone()),
        },
        None => InventoryItem {
            name: change.name.trim().to_string(),
            kind: change.kind.trim().to_string(),
            quantity: change.apply(0),
            notes: change.notes.clone().unwrap_or_default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::model::{Direction, StockAdjustment, TransactionChanges};

    fn tx(item: &str, amount: f64) -> Transaction {
        Transaction {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            direction: Direction::Expense,
            description: item.to_string(),
            category: String::new(),
            amount,
            recorded_by: "Hamad".to_string(),
            notes: None,
            quantity: None,
        }
    }

    #[test]
    fn test_resolve_last() {
        let ledger = vec![tx("أعلاف", 800.0), tx("كهرباء", 350.0)];
        assert_eq!(resolve_target(&ledger, &EditTarget::Last), TargetMatch::Found(1));
        assert_eq!(
            resolve_target(&[], &EditTarget::Last),
            TargetMatch::NotFound(Vec::new())
        );
    }

    #[test]
    fn test_resolve_by_name_exact_only() {
        let ledger = vec![tx("أعلاف", 800.0), tx("أعلاف دواجن", 300.0), tx("كهرباء", 350.0)];
        assert_eq!(
            resolve_target(&ledger, &EditTarget::ByName(" أعلاف ".to_string())),
            TargetMatch::Found(0)
        );
    }

    #[test]
    fn test_resolve_by_name_ambiguous() {
        let ledger = vec![tx("Feed", 800.0), tx("feed", 300.0)];
        assert_eq!(
            resolve_target(&ledger, &EditTarget::ByName("FEED".to_string())),
            TargetMatch::Ambiguous(2)
        );
    }

    #[test]
    fn test_resolve_by_name_suggests_similar() {
        let ledger = vec![tx("أعلاف دواجن", 300.0), tx("كهرباء", 350.0), tx("أعلاف غنم", 500.0)];
        match resolve_target(&ledger, &EditTarget::ByName("أعلاف".to_string())) {
            TargetMatch::NotFound(similar) => {
                let names: Vec<&str> = similar.iter().map(|t| t.description.as_str()).collect();
                assert_eq!(names, vec!["أعلاف غنم", "أعلاف دواجن"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_edit_result_update() {
        let original = tx("أعلاف", 800.0);
        let (after, outcome) = edit_result(
            &original,
            &TransactionEdit::Update(TransactionChanges {
                amount: Some(750.0),
                ..Default::default()
            }),
        );
        assert_eq!(after.unwrap().amount, 750.0);
        assert!(matches!(outcome, EditOutcome::Updated { before, .. } if before.amount == 800.0));
    }

    #[test]
    fn test_merged_item_keeps_kind_and_clamps() {
        let existing = InventoryItem {
            name: "غنم".to_string(),
            kind: "مواشي".to_string(),
            quantity: 3,
            notes: "حظيرة 1".to_string(),
        };
        let change = InventoryChange {
            name: "غنم".to_string(),
            kind: String::new(),
            adjustment: StockAdjustment::Delta(-5),
            notes: None,
        };
        let merged = merged_item(Some(&existing), &change);
        assert_eq!(merged.quantity, 0);
        assert_eq!(merged.kind, "مواشي");
        assert_eq!(merged.notes, "حظيرة 1");

        let fresh = merged_item(None, &change);
        assert_eq!(fresh.quantity, 0);
        assert_eq!(fresh.name, "غنم");
    }

    #[test]
    fn test_find_inventory_case_insensitive() {
        let items = vec![InventoryItem {
            name: "Sheep".to_string(),
            kind: String::new(),
            quantity: 1,
            notes: String::new(),
        }];
        assert_eq!(find_inventory(&items, " sheep"), Some(0));
        assert_eq!(find_inventory(&items, "goat"), None);
    }
}
