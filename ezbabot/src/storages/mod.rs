mod memory_storage;
mod rows;
mod sheets_client;
mod sheets_storage;
mod storage;

pub use memory_storage::{MemoryLedger, YamlLedger};
pub use sheets_client::{ServiceAccountKey, SheetsClient};
pub use sheets_storage::{SheetNames, SheetsLedger};
pub use storage::{LedgerStore, StoreError};
