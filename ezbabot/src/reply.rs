//! Arabic reply texts. Everything here is formatting only: numbers come
//! in already computed, nothing is read from the ledger.

use chrono::NaiveDate;
use teloxide::utils::command::BotCommands;
use yoroolbot::buttons::ButtonData;

use crate::{
    commands::Command,
    model::{Direction, EditOutcome, InventoryItem, StagedOperation, Transaction},
    period::{Period, Totals, format_amount},
    storages::StoreError,
};

pub const DIVIDER: &str = "──────────────";
pub const CURRENCY: &str = "د.إ";

/// What the transport should send back for one update
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text {
        text: String,
        buttons: Vec<Vec<ButtonData>>,
    },
    Document {
        file_name: String,
        bytes: Vec<u8>,
        caption: String,
    },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(text: impl Into<String>, buttons: Vec<Vec<ButtonData>>) -> Self {
        Reply::Text {
            text: text.into(),
            buttons,
        }
    }

    /// Text body, or the caption for documents
    pub fn body(&self) -> &str {
        match self {
            Reply::Text { text, .. } => text,
            Reply::Document { caption, .. } => caption,
        }
    }
}

fn money(value: f64) -> String {
    format!("{} {}", format_amount(value), CURRENCY)
}

fn totals_line(totals: &Totals) -> String {
    format!(
        "  دخل: {} | صرف: {} | صافي: {}",
        format_amount(totals.income),
        format_amount(totals.expense),
        format_amount(totals.net)
    )
}

fn net_emoji(net: f64) -> &'static str {
    if net >= 0.0 { "📈" } else { "📉" }
}

pub fn help() -> String {
    format!(
        "🌾 بوت العزبة\n\
         اكتب بالعربي كما تتكلم، وأنا أسجل وأحسب.\n\n\
         💰 تسجيل دخل:\n  • بعت بيض بـ 200\n  • وردة غنم 4699\n\n\
         📤 تسجيل صرف:\n  • صرفنا على الأعلاف 800\n  • دفعنا فاتورة كهرباء 350\n  • راتب محمد 2000\n\n\
         🐄 مواشي ودواجن:\n  • اشترينا 10 غنم بـ 15000\n  • بعنا 2 ثور بـ 8000\n  • الجرد: عندنا 20 غنم و 35 دجاجة\n\n\
         📊 استعلامات:\n  • كم الربح هذا الشهر؟\n  • كم صرفنا على الأعلاف؟\n  • آخر العمليات\n  • قارن هذا الشهر بالشهر الماضي\n  • تقرير اليوم\n\n\
         ✏️ تعديل:\n  • احذف آخر عملية\n  • عدل مبلغ الأعلاف إلى 750\n\n\
         {}",
        Command::descriptions()
    )
}

pub fn welcome(name: &str) -> String {
    format!("أهلاً {} 👋\n\n{}", name, help())
}

pub fn not_authorized() -> String {
    "⛔ غير مصرح. هذا البوت خاص بأصحاب العزبة.".to_string()
}

pub fn permission_denied() -> String {
    "🔒 صلاحيتك للاطلاع فقط. التسجيل والتعديل للمشرفين.".to_string()
}

pub fn unknown_command() -> String {
    "❓ أمر غير معروف. اكتب /help لعرض الأوامر.".to_string()
}

pub fn store_error(err: &StoreError) -> String {
    match err {
        StoreError::Codec(_) | StoreError::Yaml(_) => {
            "❌ بيانات السجل غير مقروءة. راجع الجدول ثم حاول مرة ثانية.".to_string()
        }
        StoreError::Auth(_) => {
            "❌ تعذر الدخول إلى سجل الحسابات (صلاحيات الحساب). أبلغ المسؤول.".to_string()
        }
        StoreError::Http(_) | StoreError::Api { .. } | StoreError::Io(_) => {
            "❌ تعذر الوصول إلى سجل الحسابات الآن. حاول بعد قليل.".to_string()
        }
    }
}

pub fn fallback_conversation() -> String {
    "أنا مساعد حسابات العزبة. أقدر أسجل دخل وصرف وأسوي لك تقارير.\n\
     جرّب مثلاً: \"بعت بيض بـ 200\" أو \"كم الربح هذا الشهر؟\""
        .to_string()
}

fn transaction_lines(tx: &Transaction, lines: &mut Vec<String>) {
    lines.push(format!("البند: {}", tx.description));
    lines.push(format!("التصنيف: {}", tx.category_or_item()));
    lines.push(format!("المبلغ: {}", money(tx.amount)));
    if let Some(quantity) = tx.quantity {
        lines.push(format!("العدد: {}", quantity));
    }
    if let Some(notes) = &tx.notes {
        lines.push(format!("ملاحظات: {}", notes));
    }
}

/// Receipt for a committed transaction (and its inventory effect)
pub fn transaction_receipt(
    tx: &Transaction,
    recorded: bool,
    stock: Option<&InventoryItem>,
    month: Option<&Totals>,
    warnings: &[String],
) -> String {
    let mut lines = vec![DIVIDER.to_string()];
    if recorded {
        lines.push(format!("✅ {} مسجل", tx.direction.label()));
        transaction_lines(tx, &mut lines);
        lines.push(format!("بواسطة: {}", tx.recorded_by));
    } else {
        lines.push("✅ تم تحديث الجرد".to_string());
        lines.push(format!("البند: {}", tx.description));
    }
    if let Some(item) = stock {
        lines.push(format!("🐄 رصيد {} الحالي: {}", item.name, item.quantity));
    }
    lines.push(DIVIDER.to_string());
    if let Some(month) = month {
        lines.push("📊 هذا الشهر:".to_string());
        lines.push(totals_line(month));
    }
    lines.extend(warnings.iter().cloned());
    lines.join("\n")
}

pub fn expense_exceeds_income() -> String {
    "⚠️ المصروفات تجاوزت الدخل!".to_string()
}

pub fn expense_alert(threshold: f64) -> String {
    format!("🚨 مصروفات هذا الشهر بلغت حد التنبيه ({})", money(threshold))
}

/// Told to the allowed chats when the web app records something
pub fn app_notification(tx: &Transaction) -> String {
    let emoji = match tx.direction {
        Direction::Income => "💰",
        Direction::Expense => "📤",
    };
    format!(
        "{} [من التطبيق]\n{}: {}\nالمبلغ: {}\nبواسطة: {}",
        emoji,
        tx.direction.label(),
        tx.description,
        money(tx.amount),
        tx.recorded_by
    )
}

pub fn stock_update_failed(name: &str) -> String {
    format!("⚠️ العملية سُجلت، لكن تعذر تحديث رصيد {}. حدّث الجرد يدويًا.", name)
}

/// Preview of a staged operation with confirm/cancel buttons
pub fn pending_preview(operation: &StagedOperation) -> Reply {
    let mut lines = vec![DIVIDER.to_string(), "📝 راجع العملية قبل الحفظ".to_string()];
    match operation {
        StagedOperation::Transaction { transaction, stock } => {
            lines.push(format!("النوع: {}", transaction.direction.label()));
            transaction_lines(transaction, &mut lines);
            if let Some(stock) = stock {
                let verb = match transaction.direction {
                    Direction::Expense => "إضافة",
                    Direction::Income => "خصم",
                };
                lines.push(format!("الجرد: {} {} {}", verb, stock.quantity, stock.name));
            }
            lines.push(format!("التاريخ: {}", transaction.formatted_timestamp()));
        }
        StagedOperation::InventorySnapshot { items } => {
            lines.push("📦 جرد جديد:".to_string());
            for item in items {
                lines.push(format!("  {}: {}", item.name, item.quantity));
            }
        }
    }
    lines.push(DIVIDER.to_string());
    lines.push("اضغط ✅ للحفظ أو ❌ للإلغاء (أو اكتب تأكيد / إلغاء)".to_string());
    Reply::with_buttons(
        lines.join("\n"),
        vec![vec![
            ButtonData::Callback("✅ تأكيد".to_string(), Command::Confirm.to_command_string()),
            ButtonData::Callback("❌ إلغاء".to_string(), Command::Cancel.to_command_string()),
        ]],
    )
}

pub fn nothing_pending() -> String {
    "ℹ️ لا توجد عملية بانتظار التأكيد.".to_string()
}

pub fn cancelled() -> String {
    "🗑️ تم إلغاء العملية، لم يُحفظ شيء.".to_string()
}

pub fn snapshot_receipt(items: &[InventoryItem]) -> String {
    let mut lines = vec![DIVIDER.to_string(), "✅ تم تحديث الجرد".to_string()];
    for item in items {
        lines.push(format!("  {}: {}", item.name, item.quantity));
    }
    lines.push(DIVIDER.to_string());
    lines.join("\n")
}

pub fn single_total(title: &str, period: &Period, filter: Option<&str>, value: f64) -> String {
    let subject = match filter {
        Some(filter) => format!("{} من {}", title, filter),
        None => title.to_string(),
    };
    format!(
        "{}\n📊 {} ({}): {}\n{}",
        DIVIDER,
        subject,
        period.label(),
        money(value),
        DIVIDER
    )
}

pub fn summary(period: &Period, filter: Option<&str>, totals: &Totals) -> String {
    let title = match filter {
        Some(filter) => format!("💰 ملخص {} ({})", period.label(), filter),
        None => format!("💰 ملخص {}", period.label()),
    };
    format!(
        "{DIVIDER}\n{title}\nالدخل:   {}\nالصرف:   {}\n{} الصافي: {}\n{DIVIDER}",
        money(totals.income),
        money(totals.expense),
        net_emoji(totals.net),
        money(totals.net),
    )
}

pub fn breakdown(direction: Direction, period: &Period, rows: &[(String, f64)]) -> String {
    if rows.is_empty() {
        return "لا توجد بيانات كافية لهذه الفترة.".to_string();
    }
    let kind = match direction {
        Direction::Income => "الدخل",
        Direction::Expense => "المصروف",
    };
    let mut lines = vec![
        DIVIDER.to_string(),
        format!("📊 {} حسب البند ({})", kind, period.label()),
    ];
    for (category, amount) in rows {
        lines.push(format!("{}: {}", category, money(*amount)));
    }
    lines.push(DIVIDER.to_string());
    let total: f64 = rows.iter().map(|(_, amount)| amount).sum();
    lines.push(format!("الإجمالي: {}", money(total)));
    lines.join("\n")
}

pub fn details(period: &Period, transactions: &[&Transaction]) -> String {
    if transactions.is_empty() {
        return "لا توجد عمليات مسجلة لهذه الفترة.".to_string();
    }
    let mut lines = vec![
        DIVIDER.to_string(),
        format!("🕐 آخر العمليات ({})", period.label()),
    ];
    for tx in transactions {
        lines.push(format!(
            "{}  {}{} {}  {}",
            tx.date().format("%Y-%m-%d"),
            tx.direction.sign(),
            format_amount(tx.amount),
            CURRENCY,
            tx.description
        ));
    }
    lines.push(DIVIDER.to_string());
    lines.join("\n")
}

pub fn comparison(a: (&Period, &Totals), b: (&Period, &Totals)) -> String {
    let (period_a, totals_a) = a;
    let (period_b, totals_b) = b;
    let diff = totals_a.net - totals_b.net;
    let trend = if diff > 0.0 {
        "📈 أفضل"
    } else if diff < 0.0 {
        "📉 أقل"
    } else {
        "➖ نفس"
    };
    format!(
        "{DIVIDER}\n⚖️ مقارنة\n{}\n{}\n{DIVIDER}\n{}\n{}\n{DIVIDER}\nفرق الصافي: {} ({})",
        period_a.label(),
        totals_line(totals_a),
        period_b.label(),
        totals_line(totals_b),
        money(diff),
        trend
    )
}

pub fn inventory(items: &[InventoryItem]) -> String {
    if items.is_empty() {
        return "📋 الجرد فارغ حالياً.".to_string();
    }
    let mut lines = vec![DIVIDER.to_string(), "📦 الجرد الحالي".to_string()];
    for item in items {
        let kind = if item.kind.is_empty() { "-" } else { &item.kind };
        lines.push(format!("  {} ({}): {}", item.name, kind, item.quantity));
    }
    lines.push(DIVIDER.to_string());
    lines.join("\n")
}

pub fn daily_report(
    today: NaiveDate,
    day: &Totals,
    month: &Totals,
    items: &[InventoryItem],
) -> String {
    let stock = if items.is_empty() {
        "  لا يوجد".to_string()
    } else {
        let parts: Vec<String> = items
            .iter()
            .map(|item| format!("{}: {}", item.name, item.quantity))
            .collect();
        format!("  {}", parts.join(" | "))
    };
    format!(
        "{DIVIDER}\n📋 التقرير اليومي - {}\n{DIVIDER}\n📅 اليوم\n{}\n{DIVIDER}\n📆 هذا الشهر\n{}\n{DIVIDER}\n📦 الجرد الحالي\n{}\n{DIVIDER}",
        today.format("%Y-%m-%d"),
        totals_line(day),
        totals_line(month),
        stock
    )
}

pub fn edit_outcome(outcome: &EditOutcome) -> String {
    match outcome {
        EditOutcome::Deleted(tx) => format!(
            "{DIVIDER}\n🗑️ تم حذف العملية\n{} | {} | {}\n{DIVIDER}",
            tx.direction.label(),
            tx.description,
            money(tx.amount)
        ),
        EditOutcome::Updated { before, after } => format!(
            "{DIVIDER}\n✏️ تم تعديل العملية\nقبل: {} | {} | {}\nبعد: {} | {} | {}\n{DIVIDER}",
            before.description,
            before.category_or_item(),
            money(before.amount),
            after.description,
            after.category_or_item(),
            money(after.amount)
        ),
        EditOutcome::NotFound { similar } if similar.is_empty() => {
            "❓ ما لقيت عملية بهذا الاسم.".to_string()
        }
        EditOutcome::NotFound { similar } => {
            let mut lines = vec!["❓ ما لقيت عملية بهذا الاسم بالضبط. هل تقصد:".to_string()];
            for tx in similar {
                lines.push(format!(
                    "  • {} ({}، {})",
                    tx.description,
                    money(tx.amount),
                    tx.date().format("%Y-%m-%d")
                ));
            }
            lines.join("\n")
        }
        EditOutcome::Ambiguous(count) => format!(
            "⚠️ يوجد {} عمليات بنفس الاسم. حدد أكثر (مثلاً: احذف آخر عملية) ولم يتم تعديل شيء.",
            count
        ),
    }
}

pub fn export_caption(period: &Period, count: usize) -> String {
    format!("📄 تصدير {} عملية ({})", count, period.label())
}

pub fn invalid_period(raw: &str) -> String {
    format!(
        "❓ فترة غير معروفة: {}\nاستخدم today أو week أو month أو last_month أو all أو YYYY-MM",
        raw
    )
}
