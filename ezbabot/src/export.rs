//! CSV export of transactions, for opening the ledger in a spreadsheet app.

use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::Serialize;

use crate::{model::Transaction, period::format_amount};

/// Byte order mark so spreadsheet apps detect UTF-8 (Arabic text)
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Serialize)]
struct CsvOutRow<'a> {
    date: String,
    direction: &'a str,
    item: &'a str,
    category: &'a str,
    amount: String,
    recorded_by: &'a str,
    notes: &'a str,
    quantity: Option<u64>,
}

pub fn file_name(today: NaiveDate) -> String {
    format!("ezba-transactions-{}.csv", today.format("%Y-%m-%d"))
}

pub fn transactions_csv(transactions: &[&Transaction]) -> Result<Vec<u8>, csv::Error> {
    let mut wrt = WriterBuilder::new().from_writer(UTF8_BOM.to_vec());
    for tx in transactions {
        wrt.serialize(CsvOutRow {
            date: tx.formatted_timestamp(),
            direction: tx.direction.label(),
            item: &tx.description,
            category: &tx.category,
            amount: format_amount(tx.amount),
            recorded_by: &tx.recorded_by,
            notes: tx.notes.as_deref().unwrap_or(""),
            quantity: tx.quantity,
        })?;
    }
    wrt.flush()?;
    wrt.into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
