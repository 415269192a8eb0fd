use std::sync::Arc;

use super::{
    rows::{
        decode_inventory_rows, decode_pending, decode_transactions, encode_inventory,
        encode_pending, encode_transaction, pending_user, row_number, Row,
    },
    sheets_client::{SheetValues, a1_range},
    storage::{
        LedgerStore, StoreError, TargetMatch, edit_result, find_inventory, merged_item,
        resolve_target,
    },
};
use crate::model::{
    EditOutcome, EditTarget, InventoryChange, InventoryItem, PendingOperation, Transaction,
    TransactionEdit,
};

/// Tab names inside the spreadsheet
#[derive(Debug, Clone)]
pub struct SheetNames {
    pub transactions: String,
    pub inventory: String,
    pub pending: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            transactions: "Transactions".to_string(),
            inventory: "Inventory".to_string(),
            pending: "Pending".to_string(),
        }
    }
}

/// Ledger kept in a spreadsheet: one tab per table, data from row 2.
///
/// Deleted transactions leave a blank row behind. New rows always go
/// right after the last non-empty row, so sheet order stays record order.
#[derive(Clone)]
pub struct SheetsLedger {
    values: Arc<dyn SheetValues>,
    sheets: SheetNames,
}

impl SheetsLedger {
    pub fn new(values: Arc<dyn SheetValues>, sheets: SheetNames) -> Self {
        Self { values, sheets }
    }

    fn row_range(sheet: &str, row: usize, last_column: char) -> String {
        a1_range(sheet, &format!("A{row}:{last_column}{row}"))
    }

    async fn read_rows(&self, sheet: &str, last_column: char) -> Result<Vec<Row>, StoreError> {
        self.values
            .get_values(&a1_range(sheet, &format!("A{}:{}", row_number(0), last_column)))
            .await
    }

    /// Insert `row` below the `existing` data rows of the last read
    async fn append_after(
        &self,
        sheet: &str,
        existing: usize,
        last_column: char,
        row: Row,
    ) -> Result<(), StoreError> {
        let range = Self::row_range(sheet, row_number(existing), last_column);
        self.values.append_rows(&range, vec![row]).await?;
        log::debug!("Appended row at {}", range);
        Ok(())
    }

    async fn transaction_rows(&self) -> Result<Vec<(usize, Transaction)>, StoreError> {
        let rows = self.read_rows(&self.sheets.transactions, 'H').await?;
        Ok(decode_transactions(&rows))
    }
}

#[async_trait::async_trait]
impl LedgerStore for SheetsLedger {
    async fn list_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .transaction_rows()
            .await?
            .into_iter()
            .map(|(_, tx)| tx)
            .collect())
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let existing = self.read_rows(&self.sheets.transactions, 'H').await?.len();
        self.append_after(
            &self.sheets.transactions,
            existing,
            'H',
            encode_transaction(transaction),
        )
        .await
    }

    async fn edit_transaction(
        &self,
        target: &EditTarget,
        edit: &TransactionEdit,
    ) -> Result<EditOutcome, StoreError> {
        let (row_numbers, transactions): (Vec<usize>, Vec<Transaction>) =
            self.transaction_rows().await?.into_iter().unzip();

        let index = match resolve_target(&transactions, target) {
            TargetMatch::Found(index) => index,
            TargetMatch::NotFound(similar) => return Ok(EditOutcome::NotFound { similar }),
            TargetMatch::Ambiguous(count) => return Ok(EditOutcome::Ambiguous(count)),
        };
        let range = Self::row_range(&self.sheets.transactions, row_numbers[index], 'H');
        let (after, outcome) = edit_result(&transactions[index], edit);
        match after {
            Some(updated) => {
                self.values
                    .update_values(&range, vec![encode_transaction(&updated)])
                    .await?
            }
            // the row is blanked rather than removed; readers skip blank rows
            None => self.values.clear_range(&range).await?,
        }
        log::info!("Edited transaction at {}", range);
        Ok(outcome)
    }

    async fn list_inventory(&self) -> Result<Vec<InventoryItem>, StoreError> {
        let rows = self.read_rows(&self.sheets.inventory, 'D').await?;
        Ok(decode_inventory_rows(&rows)
            .into_iter()
            .map(|(_, item)| item)
            .collect())
    }

    async fn update_inventory(&self, change: &InventoryChange) -> Result<InventoryItem, StoreError> {
        let rows = self.read_rows(&self.sheets.inventory, 'D').await?;
        let (row_numbers, items): (Vec<usize>, Vec<InventoryItem>) =
            decode_inventory_rows(&rows).into_iter().unzip();

        match find_inventory(&items, &change.name) {
            Some(index) => {
                let item = merged_item(Some(&items[index]), change);
                let range = Self::row_range(&self.sheets.inventory, row_numbers[index], 'D');
                self.values
                    .update_values(&range, vec![encode_inventory(&item)])
                    .await?;
                Ok(item)
            }
            None => {
                let item = merged_item(None, change);
                self.append_after(&self.sheets.inventory, rows.len(), 'D', encode_inventory(&item))
                    .await?;
                Ok(item)
            }
        }
    }

    async fn stage_pending(&self, pending: &PendingOperation) -> Result<(), StoreError> {
        let row = encode_pending(pending)?;
        self.clear_pending(pending.user_id).await?;
        let existing = self.read_rows(&self.sheets.pending, 'D').await?.len();
        self.append_after(&self.sheets.pending, existing, 'D', row).await
    }

    async fn pending(&self, user_id: u64) -> Result<Option<PendingOperation>, StoreError> {
        let rows = self.read_rows(&self.sheets.pending, 'D').await?;
        let Some(row) = rows.iter().rev().find(|row| pending_user(row) == Some(user_id)) else {
            return Ok(None);
        };
        match decode_pending(row) {
            Ok(pending) => Ok(Some(pending)),
            Err(e) => {
                log::warn!("Ignoring undecodable pending row of user {}: {}", user_id, e);
                Ok(None)
            }
        }
    }

    async fn clear_pending(&self, user_id: u64) -> Result<(), StoreError> {
        let rows = self.read_rows(&self.sheets.pending, 'D').await?;
        for (index, row) in rows.iter().enumerate() {
            if pending_user(row) == Some(user_id) {
                self.values
                    .clear_range(&Self::row_range(&self.sheets.pending, row_number(index), 'D'))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use chrono::{NaiveDate, NaiveDateTime};
    use serde_json::json;

    use super::*;
    use crate::{
        model::{Direction, StagedOperation, StockAdjustment, StockCount, TransactionChanges},
        storages::rows::is_blank,
    };

    /// Spreadsheet kept in memory, answering ranges like `'Sheet'!A5:H5`
    /// the way the values API does
    #[derive(Default)]
    struct FakeSheet {
        tabs: Mutex<HashMap<String, Vec<Row>>>,
    }

    impl FakeSheet {
        fn with_tab(self, name: &str, rows: Vec<Row>) -> Self {
            self.tabs.lock().unwrap().insert(name.to_string(), rows);
            self
        }

        /// All rows of a tab, row 1 first
        fn tab(&self, name: &str) -> Vec<Row> {
            self.tabs.lock().unwrap().get(name).cloned().unwrap_or_default()
        }

        /// Tab name and zero-based index of the first row of `range`
        fn parse(range: &str) -> (String, usize) {
            let (sheet, cells) = range.rsplit_once("'!").unwrap();
            let name = sheet.trim_start_matches('\'').replace("''", "'");
            let start = cells.split(':').next().unwrap();
            let row: usize = start
                .trim_start_matches(|c: char| c.is_ascii_alphabetic())
                .parse()
                .unwrap();
            (name, row - 1)
        }

        fn with_rows<R>(&self, range: &str, f: impl FnOnce(&mut Vec<Row>, usize) -> R) -> R {
            let (name, start) = Self::parse(range);
            let mut tabs = self.tabs.lock().unwrap();
            let rows = tabs.entry(name).or_default();
            if rows.len() < start {
                rows.resize(start, Vec::new());
            }
            f(rows, start)
        }
    }

    #[async_trait::async_trait]
    impl SheetValues for FakeSheet {
        async fn get_values(&self, range: &str) -> Result<Vec<Row>, StoreError> {
            Ok(self.with_rows(range, |rows, start| {
                let mut found = rows[start..].to_vec();
                while found.last().is_some_and(|row| is_blank(row)) {
                    found.pop();
                }
                found
            }))
        }

        async fn append_rows(&self, range: &str, new_rows: Vec<Row>) -> Result<(), StoreError> {
            self.with_rows(range, |rows, start| {
                for (offset, row) in new_rows.into_iter().enumerate() {
                    rows.insert(start + offset, row);
                }
            });
            Ok(())
        }

        async fn update_values(&self, range: &str, new_rows: Vec<Row>) -> Result<(), StoreError> {
            self.with_rows(range, |rows, start| {
                for (offset, row) in new_rows.into_iter().enumerate() {
                    match rows.get_mut(start + offset) {
                        Some(slot) => *slot = row,
                        None => rows.push(row),
                    }
                }
            });
            Ok(())
        }

        async fn clear_range(&self, range: &str) -> Result<(), StoreError> {
            self.with_rows(range, |rows, start| {
                if let Some(row) = rows.get_mut(start) {
                    row.clear();
                }
            });
            Ok(())
        }
    }

    fn header(cells: &[&str]) -> Row {
        cells.iter().map(|c| json!(c)).collect()
    }

    fn ledger(sheet: FakeSheet) -> (SheetsLedger, Arc<FakeSheet>) {
        let sheet = Arc::new(
            sheet
                .with_tab("Transactions", vec![header(&["التاريخ", "النوع", "البند"])])
                .with_tab("Inventory", vec![header(&["الصنف", "النوع", "العدد"])])
                .with_tab("Pending", vec![header(&["user", "created", "type", "payload"])]),
        );
        (SheetsLedger::new(sheet.clone(), SheetNames::default()), sheet)
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn tx(item: &str, hour: u32) -> Transaction {
        Transaction {
            timestamp: at(hour),
            direction: Direction::Expense,
            description: item.to_string(),
            category: "مصاريف".to_string(),
            amount: 50.0,
            recorded_by: "Khaled".to_string(),
            notes: None,
            quantity: None,
        }
    }

    fn descriptions(transactions: &[Transaction]) -> Vec<&str> {
        transactions.iter().map(|t| t.description.as_str()).collect()
    }

    fn snapshot_op(user_id: u64, quantity: u64) -> PendingOperation {
        PendingOperation {
            user_id,
            created_at: at(9),
            operation: StagedOperation::InventorySnapshot {
                items: vec![StockCount {
                    name: "غنم".to_string(),
                    kind: "مواشي".to_string(),
                    quantity,
                    notes: None,
                }],
            },
        }
    }

    #[test]
    fn test_row_range() {
        assert_eq!(
            SheetsLedger::row_range("Transactions", 7, 'H'),
            "'Transactions'!A7:H7"
        );
        assert_eq!(SheetsLedger::row_range("Inventory", 2, 'D'), "'Inventory'!A2:D2");
    }

    #[test]
    fn test_default_sheet_names() {
        let names = SheetNames::default();
        assert_eq!(names.transactions, "Transactions");
        assert_eq!(names.inventory, "Inventory");
        assert_eq!(names.pending, "Pending");
    }

    #[tokio::test]
    async fn test_append_after_deleted_row_keeps_order() {
        let (ledger, sheet) = ledger(FakeSheet::default());
        for (item, hour) in [("أعلاف", 8), ("علاج", 9), ("كهرباء", 10)] {
            ledger.append_transaction(&tx(item, hour)).await.unwrap();
        }
        ledger
            .edit_transaction(&EditTarget::ByName("علاج".to_string()), &TransactionEdit::Delete)
            .await
            .unwrap();
        assert!(sheet.tab("Transactions")[2].is_empty());

        ledger.append_transaction(&tx("ماء", 11)).await.unwrap();
        let all = ledger.list_transactions().await.unwrap();
        assert_eq!(descriptions(&all), vec!["أعلاف", "كهرباء", "ماء"]);
        // the blank row is left alone, the new row goes below the last one
        assert!(sheet.tab("Transactions")[2].is_empty());
        assert_eq!(sheet.tab("Transactions")[4][2], json!("ماء"));

        let outcome = ledger
            .edit_transaction(&EditTarget::Last, &TransactionEdit::Delete)
            .await
            .unwrap();
        assert!(matches!(outcome, EditOutcome::Deleted(t) if t.description == "ماء"));

        ledger.append_transaction(&tx("وقود", 12)).await.unwrap();
        let all = ledger.list_transactions().await.unwrap();
        assert_eq!(descriptions(&all), vec!["أعلاف", "كهرباء", "وقود"]);
    }

    #[tokio::test]
    async fn test_edit_writes_the_matching_sheet_row() {
        let (ledger, sheet) = ledger(FakeSheet::default());
        ledger.append_transaction(&tx("أعلاف", 8)).await.unwrap();
        // a hand-typed note between records does not decode
        sheet
            .update_values("'Transactions'!A3:H3", vec![header(&["ملاحظة"])])
            .await
            .unwrap();
        ledger.append_transaction(&tx("علاج", 9)).await.unwrap();

        let outcome = ledger
            .edit_transaction(
                &EditTarget::ByName("علاج".to_string()),
                &TransactionEdit::Update(TransactionChanges {
                    amount: Some(75.0),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, EditOutcome::Updated { after, .. } if after.amount == 75.0));

        let rows = sheet.tab("Transactions");
        assert_eq!(rows[0][0], json!("التاريخ"));
        assert_eq!(rows[1][4], json!(50.0));
        assert_eq!(rows[2], header(&["ملاحظة"]));
        assert_eq!(rows[3][2], json!("علاج"));
        assert_eq!(rows[3][4], json!(75.0));
    }

    #[tokio::test]
    async fn test_inventory_updates_in_place_and_appends_new_items() {
        let (ledger, sheet) = ledger(FakeSheet::default());
        sheet
            .update_values(
                "'Inventory'!A2:D3",
                vec![
                    vec![json!("غنم"), json!("مواشي"), json!(20)],
                    vec![json!("دجاج"), json!("دواجن"), json!(35)],
                ],
            )
            .await
            .unwrap();

        let item = ledger
            .update_inventory(&InventoryChange {
                name: "غنم".to_string(),
                kind: String::new(),
                adjustment: StockAdjustment::Delta(-2),
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(item.quantity, 18);
        ledger
            .update_inventory(&InventoryChange {
                name: "بط".to_string(),
                kind: "دواجن".to_string(),
                adjustment: StockAdjustment::Absolute(6),
                notes: None,
            })
            .await
            .unwrap();

        let rows = sheet.tab("Inventory");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1][2], json!(18));
        assert_eq!(rows[3][0], json!("بط"));
        let names: Vec<String> = ledger
            .list_inventory()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["غنم", "دجاج", "بط"]);
    }

    #[tokio::test]
    async fn test_staging_supersedes_earlier_rows_of_the_same_user() {
        let (ledger, sheet) = ledger(FakeSheet::default());
        ledger.stage_pending(&snapshot_op(1, 10)).await.unwrap();
        ledger.stage_pending(&snapshot_op(2, 99)).await.unwrap();
        ledger.stage_pending(&snapshot_op(1, 20)).await.unwrap();

        let user_rows = sheet
            .tab("Pending")
            .iter()
            .filter(|row| pending_user(row) == Some(1))
            .count();
        assert_eq!(user_rows, 1);
        assert_eq!(ledger.pending(1).await.unwrap(), Some(snapshot_op(1, 20)));
        // peeking leaves the row in place
        assert_eq!(ledger.pending(1).await.unwrap(), Some(snapshot_op(1, 20)));

        assert_eq!(ledger.take_pending(1).await.unwrap(), Some(snapshot_op(1, 20)));
        assert!(ledger.pending(1).await.unwrap().is_none());
        assert_eq!(ledger.pending(2).await.unwrap(), Some(snapshot_op(2, 99)));
    }

    #[tokio::test]
    async fn test_undecodable_pending_row_is_dropped() {
        let (ledger, sheet) = ledger(FakeSheet::default());
        sheet
            .append_rows(
                "'Pending'!A2:D2",
                vec![vec![
                    json!("5"),
                    json!("2024-03-15 09:00"),
                    json!("inventory_snapshot"),
                    json!("{not json"),
                ]],
            )
            .await
            .unwrap();

        assert!(ledger.pending(5).await.unwrap().is_none());
        assert!(ledger.take_pending(5).await.unwrap().is_none());
        assert!(sheet.tab("Pending")[1].is_empty());
    }
}
