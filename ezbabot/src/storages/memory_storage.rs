use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use super::storage::{
    LedgerStore, StoreError, TargetMatch, edit_result, find_inventory, merged_item, resolve_target,
};
use crate::model::{
    EditOutcome, EditTarget, InventoryChange, InventoryItem, PendingOperation, Transaction,
    TransactionEdit,
};

/// Serializable contents of a whole ledger
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LedgerData {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub pending: Vec<PendingOperation>,
}

impl LedgerData {
    fn edit(&mut self, target: &EditTarget, edit: &TransactionEdit) -> EditOutcome {
        match resolve_target(&self.transactions, target) {
            TargetMatch::Found(index) => {
                let (after, outcome) = edit_result(&self.transactions[index], edit);
                match after {
                    Some(updated) => self.transactions[index] = updated,
                    None => {
                        self.transactions.remove(index);
                    }
                }
                outcome
            }
            TargetMatch::NotFound(similar) => EditOutcome::NotFound { similar },
            TargetMatch::Ambiguous(count) => EditOutcome::Ambiguous(count),
        }
    }

    fn update_inventory(&mut self, change: &InventoryChange) -> InventoryItem {
        match find_inventory(&self.inventory, &change.name) {
            Some(index) => {
                let item = merged_item(Some(&self.inventory[index]), change);
                self.inventory[index] = item.clone();
                item
            }
            None => {
                let item = merged_item(None, change);
                self.inventory.push(item.clone());
                item
            }
        }
    }

    fn stage_pending(&mut self, pending: &PendingOperation) {
        self.pending.retain(|p| p.user_id != pending.user_id);
        self.pending.push(pending.clone());
    }

    fn pending_of(&self, user_id: u64) -> Option<PendingOperation> {
        self.pending.iter().rev().find(|p| p.user_id == user_id).cloned()
    }

    /// Whether anything was removed
    fn clear_pending(&mut self, user_id: u64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.user_id != user_id);
        self.pending.len() != before
    }
}

/// In-process ledger
#[derive(Clone, Default)]
pub struct MemoryLedger {
    data: Arc<Mutex<LedgerData>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> LedgerData {
        self.data.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedger {
    async fn list_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.data.lock().await.transactions.clone())
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.data.lock().await.transactions.push(transaction.clone());
        Ok(())
    }

    async fn edit_transaction(
        &self,
        target: &EditTarget,
        edit: &TransactionEdit,
    ) -> Result<EditOutcome, StoreError> {
        Ok(self.data.lock().await.edit(target, edit))
    }

    async fn list_inventory(&self) -> Result<Vec<InventoryItem>, StoreError> {
        Ok(self.data.lock().await.inventory.clone())
    }

    async fn update_inventory(&self, change: &InventoryChange) -> Result<InventoryItem, StoreError> {
        Ok(self.data.lock().await.update_inventory(change))
    }

    async fn stage_pending(&self, pending: &PendingOperation) -> Result<(), StoreError> {
        self.data.lock().await.stage_pending(pending);
        Ok(())
    }

    async fn pending(&self, user_id: u64) -> Result<Option<PendingOperation>, StoreError> {
        Ok(self.data.lock().await.pending_of(user_id))
    }

    async fn clear_pending(&self, user_id: u64) -> Result<(), StoreError> {
        self.data.lock().await.clear_pending(user_id);
        Ok(())
    }
}

/// Memory ledger mirrored to a single YAML file.
/// Loaded on first access, rewritten in full after every mutation. A
/// mutation becomes visible only once the file write succeeded.
#[derive(Clone)]
pub struct YamlLedger {
    path: PathBuf,
    memory: MemoryLedger,
    loaded: Arc<Mutex<bool>>,
}

impl YamlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memory: MemoryLedger::new(),
            loaded: Arc::new(Mutex::new(false)),
        }
    }

    async fn load(&self) -> Result<LedgerData, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(LedgerData::default()),
            Ok(content) => Ok(serde_yaml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerData::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, data: &LedgerData) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let content = serde_yaml::to_string(data)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }

    async fn ensure_loaded(&self) -> Result<(), StoreError> {
        // lock held across the read so two first requests cannot both load
        let mut loaded = self.loaded.lock().await;
        if !*loaded {
            let data = self.load().await?;
            log::info!(
                "Loaded ledger file {} ({} transactions, {} inventory rows)",
                self.path.display(),
                data.transactions.len(),
                data.inventory.len()
            );
            *self.memory.data.lock().await = data;
            *loaded = true;
        }
        Ok(())
    }

    /// Apply `change` to a copy, write the copy, then make it current.
    /// `change` reports whether it modified anything worth saving.
    async fn mutate<R, F>(&self, change: F) -> Result<R, StoreError>
    where
        R: Send,
        F: FnOnce(&mut LedgerData) -> (R, bool) + Send,
    {
        self.ensure_loaded().await?;
        let mut current = self.memory.data.lock().await;
        let mut next = current.clone();
        let (result, changed) = change(&mut next);
        if changed {
            self.save(&next).await?;
            *current = next;
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl LedgerStore for YamlLedger {
    async fn list_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        self.ensure_loaded().await?;
        self.memory.list_transactions().await
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.transactions.push(transaction.clone());
            ((), true)
        })
        .await
    }

    async fn edit_transaction(
        &self,
        target: &EditTarget,
        edit: &TransactionEdit,
    ) -> Result<EditOutcome, StoreError> {
        self.mutate(|data| {
            let outcome = data.edit(target, edit);
            let changed = matches!(outcome, EditOutcome::Deleted(_) | EditOutcome::Updated { .. });
            (outcome, changed)
        })
        .await
    }

    async fn list_inventory(&self) -> Result<Vec<InventoryItem>, StoreError> {
        self.ensure_loaded().await?;
        self.memory.list_inventory().await
    }

    async fn update_inventory(&self, change: &InventoryChange) -> Result<InventoryItem, StoreError> {
        self.mutate(|data| (data.update_inventory(change), true)).await
    }

    async fn stage_pending(&self, pending: &PendingOperation) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.stage_pending(pending);
            ((), true)
        })
        .await
    }

    async fn pending(&self, user_id: u64) -> Result<Option<PendingOperation>, StoreError> {
        self.ensure_loaded().await?;
        self.memory.pending(user_id).await
    }

    async fn clear_pending(&self, user_id: u64) -> Result<(), StoreError> {
        self.mutate(|data| ((), data.clear_pending(user_id))).await
    }
}
