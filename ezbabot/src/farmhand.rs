//! Per-message dispatch: authorize, classify, stage or commit, reply.
//!
//! One message is one pass through `handle_message`. The only state that
//! outlives a message is the pending operation, and that lives in the
//! ledger store keyed by user id, so any process can serve the confirm.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    classifier::{Classifier, PromptContext, prompt::RECENT_CONTEXT_SIZE},
    commands::{Command, parse_command},
    config::{AllowList, AllowedUser},
    export,
    intent::{Intent, Metric, TransactionDraft, coerce_amount},
    model::{
        Direction, EditTarget, InventoryItem, PendingOperation, StagedOperation, Transaction,
        TransactionEdit,
    },
    period::{
        Period, Totals, breakdown_by_category, compute_totals, filter_by_direction,
        filter_by_period, filter_by_text, top_n,
    },
    reply::{self, Reply},
    storages::{LedgerStore, StoreError},
};

const DEFAULT_UTC_OFFSET_SECS: i32 = 4 * 3600;

#[derive(Debug, Clone)]
pub struct FarmSettings {
    /// Stage mutations until the same user confirms them
    pub require_confirmation: bool,
    pub monthly_expense_alert: Option<f64>,
    pub utc_offset: FixedOffset,
}

impl Default for FarmSettings {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            monthly_expense_alert: None,
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// All-time totals as the web app reads them
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub income: f64,
    pub expense: f64,
    pub profit: f64,
}

impl From<Totals> for Summary {
    fn from(totals: Totals) -> Self {
        Self {
            income: totals.income,
            expense: totals.expense,
            profit: totals.net,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerView {
    pub transactions: Vec<Transaction>,
    pub inventory: Vec<InventoryItem>,
    pub summary: Summary,
}

/// A transaction posted by the web app
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub user_id: u64,
    /// `دخل`/`صرف` or `income`/`expense`
    #[serde(rename = "type")]
    pub kind: String,
    pub item: String,
    #[serde(default)]
    pub category: Option<String>,
    pub amount: Value,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("user {0} may not record transactions")]
    NotAllowed(u64),
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wall clock time at the farm
pub fn local_now(offset: FixedOffset) -> NaiveDateTime {
    Utc::now().with_timezone(&offset).naive_local()
}

pub struct Farmhand {
    store: Arc<dyn LedgerStore>,
    classifier: Classifier,
    allow_list: AllowList,
    settings: FarmSettings,
    bot_name: String,
}

impl Farmhand {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        classifier: Classifier,
        allow_list: AllowList,
        settings: FarmSettings,
        bot_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            classifier,
            allow_list,
            settings,
            bot_name: bot_name.into(),
        }
    }

    /// Whether `user_id` is on the allow-list at all
    pub fn is_allowed(&self, user_id: u64) -> bool {
        self.allow_list.get(user_id).is_some()
    }

    /// Private chats of everyone on the allow-list
    pub fn notify_chats(&self) -> Vec<u64> {
        let mut chats: Vec<u64> = self.allow_list.ids().collect();
        chats.sort_unstable();
        chats
    }

    pub async fn ledger_view(&self) -> Result<LedgerView, StoreError> {
        let transactions = self.store.list_transactions().await?;
        let inventory = self.store.list_inventory().await?;
        let summary = compute_totals(&transactions).into();
        Ok(LedgerView {
            transactions,
            inventory,
            summary,
        })
    }

    /// Record a web app submission straight away; the form is its own confirmation
    pub async fn record_submission(&self, submission: Submission) -> Result<Transaction, SubmitError> {
        self.record_submission_at(submission, local_now(self.settings.utc_offset))
            .await
    }

    pub async fn record_submission_at(
        &self,
        submission: Submission,
        now: NaiveDateTime,
    ) -> Result<Transaction, SubmitError> {
        let user = self
            .allow_list
            .get(submission.user_id)
            .filter(|user| user.role.can_write())
            .ok_or(SubmitError::NotAllowed(submission.user_id))?;
        let direction =
            Direction::parse(&submission.kind).ok_or(SubmitError::Invalid("unknown type"))?;
        let item = submission.item.trim();
        if item.is_empty() {
            return Err(SubmitError::Invalid("item is required"));
        }
        let amount = coerce_amount(&submission.amount)
            .filter(|amount| *amount > 0.0)
            .ok_or(SubmitError::Invalid("amount must be a positive number"))?;

        let transaction = Transaction {
            timestamp: now,
            direction,
            description: item.to_string(),
            category: submission
                .category
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| item.to_string()),
            amount,
            recorded_by: user.name.clone(),
            notes: submission.notes.filter(|n| !n.trim().is_empty()),
            quantity: None,
        };
        self.store.append_transaction(&transaction).await?;
        log::info!(
            "Recorded {} {} from the web app for {}",
            direction.label(),
            amount,
            user.name
        );
        Ok(transaction)
    }

    pub async fn handle_message(&self, user_id: u64, text: &str) -> Reply {
        self.handle_message_at(user_id, text, local_now(self.settings.utc_offset))
            .await
    }

    pub async fn handle_message_at(&self, user_id: u64, text: &str, now: NaiveDateTime) -> Reply {
        // Nothing is read or classified for strangers
        let Some(user) = self.allow_list.get(user_id) else {
            log::warn!("Rejected message from unauthorized user {}", user_id);
            return Reply::text(reply::not_authorized());
        };

        let text = text.trim();
        let result = if text.is_empty() {
            Ok(Reply::text(reply::help()))
        } else if let Some(command) = parse_command(text, &self.bot_name) {
            log::info!("User {} ({}) sent command {:?}", user.id, user.name, command);
            self.handle_command(user, command, now).await
        } else if text.starts_with('/') {
            Ok(Reply::text(reply::unknown_command()))
        } else {
            self.handle_free_text(user, text, now).await
        };

        result.unwrap_or_else(|err| {
            log::error!("Ledger store failure for user {}: {}", user.id, err);
            Reply::text(reply::store_error(&err))
        })
    }

    async fn handle_command(
        &self,
        user: &AllowedUser,
        command: Command,
        now: NaiveDateTime,
    ) -> Result<Reply, StoreError> {
        if command.is_mutating() && !user.role.can_write() {
            return Ok(Reply::text(reply::permission_denied()));
        }
        match command {
            Command::Start => Ok(Reply::text(reply::welcome(&user.name))),
            Command::Help => Ok(Reply::text(reply::help())),
            Command::Confirm => {
                // the staged operation stays until the commit went through
                let Some(pending) = self.store.pending(user.id).await? else {
                    return Ok(Reply::text(reply::nothing_pending()));
                };
                let receipt = self.commit(pending.operation, now).await?;
                if let Err(err) = self.store.clear_pending(user.id).await {
                    log::error!("Committed, but could not clear pending of {}: {}", user.id, err);
                }
                Ok(receipt)
            }
            Command::Cancel => match self.store.take_pending(user.id).await? {
                Some(pending) => {
                    log::info!(
                        "User {} cancelled a staged {}",
                        user.id,
                        pending.operation.operation_type()
                    );
                    Ok(Reply::text(reply::cancelled()))
                }
                None => Ok(Reply::text(reply::nothing_pending())),
            },
            Command::Undo => {
                let outcome = self
                    .store
                    .edit_transaction(&EditTarget::Last, &TransactionEdit::Delete)
                    .await?;
                Ok(Reply::text(reply::edit_outcome(&outcome)))
            }
            Command::Export(period) => self.export(&period, now.date()).await,
            Command::Inventory => {
                let items = self.store.list_inventory().await?;
                Ok(Reply::text(reply::inventory(&items)))
            }
            Command::Today => {
                let transactions = self.store.list_transactions().await?;
                self.daily_report(&transactions, now.date()).await
            }
        }
    }

    async fn handle_free_text(
        &self,
        user: &AllowedUser,
        text: &str,
        now: NaiveDateTime,
    ) -> Result<Reply, StoreError> {
        let transactions = self.store.list_transactions().await?;
        let today = now.date();

        let all: Vec<&Transaction> = transactions.iter().collect();
        let context = PromptContext {
            today,
            recent: top_n(&all, RECENT_CONTEXT_SIZE),
        };
        let intent = self.classifier.classify(text, &context).await;
        log::debug!("User {} intent: {:?}", user.id, intent);

        if intent.is_mutating() && !user.role.can_write() {
            log::info!("Viewer {} attempted a mutation", user.id);
            return Ok(Reply::text(reply::permission_denied()));
        }

        match intent {
            Intent::RecordTransaction(draft) => {
                let operation = StagedOperation::Transaction {
                    transaction: draft_transaction(&draft, &user.name, now),
                    stock: draft.stock,
                };
                self.stage_or_commit(user, operation, now).await
            }
            Intent::InventorySnapshot(items) => {
                self.stage_or_commit(user, StagedOperation::InventorySnapshot { items }, now)
                    .await
            }
            Intent::Report {
                period,
                metric,
                filter,
            } => {
                self.report(&transactions, period, metric, filter.as_deref(), today)
                    .await
            }
            Intent::Details {
                period,
                filter,
                direction,
                limit,
            } => {
                let mut selected = filter_by_period(&transactions, &period, today);
                if let Some(filter) = &filter {
                    selected = filter_by_text(selected, filter);
                }
                if let Some(direction) = direction {
                    selected = filter_by_direction(selected, direction);
                }
                Ok(Reply::text(reply::details(&period, &top_n(&selected, limit))))
            }
            Intent::Comparison { period_a, period_b } => {
                let totals_a = compute_totals(filter_by_period(&transactions, &period_a, today));
                let totals_b = compute_totals(filter_by_period(&transactions, &period_b, today));
                Ok(Reply::text(reply::comparison(
                    (&period_a, &totals_a),
                    (&period_b, &totals_b),
                )))
            }
            Intent::Inventory => {
                let items = self.store.list_inventory().await?;
                Ok(Reply::text(reply::inventory(&items)))
            }
            Intent::Edit { target, edit } => {
                let outcome = self.store.edit_transaction(&target, &edit).await?;
                log::info!("User {} edit {:?}: {:?}", user.id, target, outcome);
                Ok(Reply::text(reply::edit_outcome(&outcome)))
            }
            Intent::Conversation { reply: text } if text.trim().is_empty() => {
                Ok(Reply::text(reply::fallback_conversation()))
            }
            Intent::Conversation { reply: text } => Ok(Reply::text(text)),
        }
    }

    async fn stage_or_commit(
        &self,
        user: &AllowedUser,
        operation: StagedOperation,
        now: NaiveDateTime,
    ) -> Result<Reply, StoreError> {
        if !self.settings.require_confirmation {
            return self.commit(operation, now).await;
        }
        let preview = reply::pending_preview(&operation);
        self.store
            .stage_pending(&PendingOperation {
                user_id: user.id,
                created_at: now,
                operation,
            })
            .await?;
        log::info!("Staged operation for user {}", user.id);
        Ok(preview)
    }

    /// Write a confirmed operation to the ledger
    async fn commit(&self, operation: StagedOperation, now: NaiveDateTime) -> Result<Reply, StoreError> {
        match operation {
            StagedOperation::Transaction { transaction, stock } => {
                // a head-count move without a price only touches inventory
                let recorded = transaction.amount > 0.0;
                if recorded {
                    self.store.append_transaction(&transaction).await?;
                }
                let mut warnings = Vec::new();
                let stock_item = match &stock {
                    Some(movement) => {
                        let change = movement.to_change(transaction.direction);
                        match self.store.update_inventory(&change).await {
                            Ok(item) => Some(item),
                            // the money side is already written, so report it as recorded
                            Err(err) if recorded => {
                                log::error!("Recorded, but stock of {} not updated: {}", movement.name, err);
                                warnings.push(reply::stock_update_failed(&movement.name));
                                None
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    None => None,
                };
                log::info!(
                    "Committed {} {} by {} (stock: {:?})",
                    transaction.direction.label(),
                    transaction.amount,
                    transaction.recorded_by,
                    stock_item.as_ref().map(|item| (&item.name, item.quantity))
                );

                let month = match self.store.list_transactions().await {
                    Ok(all) => Some(month_totals(&all, now.date())),
                    Err(err) => {
                        log::warn!("Committed, but could not re-read totals: {}", err);
                        None
                    }
                };
                if let (Some(month), Direction::Expense) = (&month, transaction.direction) {
                    warnings.extend(expense_warnings(month, self.settings.monthly_expense_alert));
                }
                Ok(Reply::text(reply::transaction_receipt(
                    &transaction,
                    recorded,
                    stock_item.as_ref(),
                    month.as_ref(),
                    &warnings,
                )))
            }
            StagedOperation::InventorySnapshot { items } => {
                let mut updated = Vec::with_capacity(items.len());
                for count in &items {
                    updated.push(self.store.update_inventory(&count.to_change()).await?);
                }
                log::info!("Committed inventory snapshot of {} items", updated.len());
                Ok(Reply::text(reply::snapshot_receipt(&updated)))
            }
        }
    }

    async fn report(
        &self,
        transactions: &[Transaction],
        period: Period,
        metric: Metric,
        filter: Option<&str>,
        today: NaiveDate,
    ) -> Result<Reply, StoreError> {
        let mut selected = filter_by_period(transactions, &period, today);
        if let Some(filter) = filter {
            selected = filter_by_text(selected, filter);
        }
        let totals = compute_totals(selected.iter().copied());
        let text = match metric {
            Metric::Income => reply::single_total("الدخل", &period, filter, totals.income),
            Metric::Expense => reply::single_total("المصروف", &period, filter, totals.expense),
            Metric::Net => reply::single_total("الصافي", &period, filter, totals.net),
            Metric::Summary => reply::summary(&period, filter, &totals),
            Metric::Breakdown(direction) => {
                let rows = breakdown_by_category(filter_by_direction(selected, direction));
                reply::breakdown(direction, &period, &rows)
            }
            Metric::Daily => return self.daily_report(transactions, today).await,
        };
        Ok(Reply::text(text))
    }

    async fn daily_report(
        &self,
        transactions: &[Transaction],
        today: NaiveDate,
    ) -> Result<Reply, StoreError> {
        let items = self.store.list_inventory().await?;
        let day = compute_totals(filter_by_period(transactions, &Period::Today, today));
        let month = month_totals(transactions, today);
        Ok(Reply::text(reply::daily_report(today, &day, &month, &items)))
    }

    async fn export(&self, raw_period: &str, today: NaiveDate) -> Result<Reply, StoreError> {
        let Ok(period) = raw_period.parse::<Period>() else {
            return Ok(Reply::text(reply::invalid_period(raw_period)));
        };
        let transactions = self.store.list_transactions().await?;
        let selected = filter_by_period(&transactions, &period, today);
        if selected.is_empty() {
            return Ok(Reply::text(reply::details(&period, &[])));
        }
        match export::transactions_csv(&selected) {
            Ok(bytes) => Ok(Reply::Document {
                file_name: export::file_name(today),
                bytes,
                caption: reply::export_caption(&period, selected.len()),
            }),
            Err(err) => Err(StoreError::Codec(err.to_string())),
        }
    }
}

/// Timestamp the draft: an explicit date keeps the current time of day
fn draft_transaction(draft: &TransactionDraft, recorded_by: &str, now: NaiveDateTime) -> Transaction {
    Transaction {
        timestamp: draft
            .date
            .map(|date| date.and_time(now.time()))
            .unwrap_or(now),
        direction: draft.direction,
        description: draft.item.clone(),
        category: draft.category.clone(),
        amount: draft.amount,
        recorded_by: recorded_by.to_string(),
        notes: draft.notes.clone(),
        quantity: draft.stock.as_ref().map(|stock| stock.quantity),
    }
}

fn month_totals(transactions: &[Transaction], today: NaiveDate) -> Totals {
    compute_totals(filter_by_period(transactions, &Period::ThisMonth, today))
}

fn expense_warnings(month: &Totals, alert: Option<f64>) -> Vec<String> {
    let mut warnings = Vec::new();
    if month.expense > month.income {
        warnings.push(reply::expense_exceeds_income());
    }
    if let Some(threshold) = alert.filter(|t| *t > 0.0) {
        if month.expense >= threshold {
            warnings.push(reply::expense_alert(threshold));
        }
    }
    warnings
}
