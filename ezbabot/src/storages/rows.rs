//! Cell-level codec between spreadsheet rows and ledger records.
//!
//! Rows come back from the values API as JSON arrays with trailing empty
//! cells dropped. Decoding tolerates a header row, blank (cleared) rows
//! and cells typed in by hand: anything that does not decode is skipped.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::{Value, json};

use super::storage::StoreError;
use crate::{
    intent::{coerce_amount, coerce_count},
    model::{Direction, InventoryItem, PendingOperation, StagedOperation, TIMESTAMP_FORMAT, Transaction},
};

/// Data starts on the second sheet row; row 1 holds the headers
pub const FIRST_DATA_ROW: usize = 2;

pub type Row = Vec<Value>;

/// Sheet row number of the n-th data row returned by an `A2:` read
pub fn row_number(index: usize) -> usize {
    index + FIRST_DATA_ROW
}

pub fn cell_text(row: &[Value], index: usize) -> String {
    match row.get(index) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn optional_text(row: &[Value], index: usize) -> Option<String> {
    Some(cell_text(row, index)).filter(|s| !s.is_empty())
}

pub fn is_blank(row: &[Value]) -> bool {
    (0..row.len()).all(|i| cell_text(row, i).is_empty())
}

/// Serial day number used by spreadsheets for dates typed into a cell
fn from_serial(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let minutes = (serial * 24.0 * 60.0).round();
    if !minutes.is_finite() || minutes < 0.0 {
        return None;
    }
    epoch.checked_add_signed(Duration::minutes(minutes as i64))
}

pub fn parse_timestamp(cell: &Value) -> Option<NaiveDateTime> {
    match cell {
        Value::Number(n) => from_serial(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

/// Transactions: A=date B=direction C=item D=category E=amount F=user G=notes H=quantity
pub fn encode_transaction(tx: &Transaction) -> Row {
    vec![
        json!(tx.formatted_timestamp()),
        json!(tx.direction.label()),
        json!(tx.description),
        json!(tx.category),
        json!(tx.amount),
        json!(tx.recorded_by),
        json!(tx.notes.clone().unwrap_or_default()),
        tx.quantity.map(|q| json!(q)).unwrap_or_else(|| json!("")),
    ]
}

pub fn decode_transaction(row: &[Value]) -> Option<Transaction> {
    if row.len() < 5 {
        return None;
    }
    let timestamp = parse_timestamp(&row[0])?;
    let direction = Direction::parse(&cell_text(row, 1))?;
    let amount = coerce_amount(&row[4])?;
    Some(Transaction {
        timestamp,
        direction,
        description: cell_text(row, 2),
        category: cell_text(row, 3),
        amount,
        recorded_by: cell_text(row, 5),
        notes: optional_text(row, 6),
        quantity: row.get(7).and_then(coerce_count),
    })
}

/// Decoded transactions with their sheet row numbers, in sheet order
pub fn decode_transactions(rows: &[Row]) -> Vec<(usize, Transaction)> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| !is_blank(row))
        .filter_map(|(index, row)| match decode_transaction(row) {
            Some(tx) => Some((row_number(index), tx)),
            None => {
                log::debug!("Skipping undecodable transaction row {}", row_number(index));
                None
            }
        })
        .collect()
}

/// Inventory: A=item B=kind C=quantity D=notes
pub fn encode_inventory(item: &InventoryItem) -> Row {
    vec![
        json!(item.name),
        json!(item.kind),
        json!(item.quantity),
        json!(item.notes),
    ]
}

pub fn decode_inventory(row: &[Value]) -> Option<InventoryItem> {
    let name = cell_text(row, 0);
    if name.is_empty() {
        return None;
    }
    let quantity = match row.get(2) {
        None => 0,
        Some(cell) if cell_text(row, 2).is_empty() && !cell.is_number() => 0,
        Some(cell) => coerce_count(cell)?,
    };
    Some(InventoryItem {
        name,
        kind: cell_text(row, 1),
        quantity,
        notes: cell_text(row, 3),
    })
}

pub fn decode_inventory_rows(rows: &[Row]) -> Vec<(usize, InventoryItem)> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| decode_inventory(row).map(|item| (row_number(index), item)))
        .collect()
}

/// Pending: A=user id B=created at C=operation type D=payload JSON
pub fn encode_pending(pending: &PendingOperation) -> Result<Row, StoreError> {
    Ok(vec![
        json!(pending.user_id.to_string()),
        json!(pending.created_at.format(TIMESTAMP_FORMAT).to_string()),
        json!(pending.operation.operation_type()),
        json!(serde_json::to_string(&pending.operation)?),
    ])
}

pub fn pending_user(row: &[Value]) -> Option<u64> {
    cell_text(row, 0).parse().ok()
}

pub fn decode_pending(row: &[Value]) -> Result<PendingOperation, StoreError> {
    let user_id = pending_user(row)
        .ok_or_else(|| StoreError::Codec("pending row without user id".to_string()))?;
    let created_at = row
        .get(1)
        .and_then(parse_timestamp)
        .ok_or_else(|| StoreError::Codec("pending row without timestamp".to_string()))?;
    let operation: StagedOperation = serde_json::from_str(&cell_text(row, 3))?;
    Ok(PendingOperation {
        user_id,
        created_at,
        operation,
    })
}
