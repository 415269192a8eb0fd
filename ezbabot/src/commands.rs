use teloxide::utils::command::BotCommands;

/// Bot commands
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(
    rename_rule = "lowercase",
    description = "الأوامر المتاحة:"
)]
pub enum Command {
    #[command(description = "بدء المحادثة")]
    Start,
    #[command(description = "عرض هذه المساعدة")]
    Help,
    #[command(description = "تأكيد العملية المعلقة")]
    Confirm,
    #[command(description = "إلغاء العملية المعلقة")]
    Cancel,
    #[command(description = "حذف آخر عملية مسجلة")]
    Undo,
    #[command(description = "تصدير العمليات كملف CSV (today/week/month/last_month/all)")]
    Export(String),
    #[command(description = "عرض الجرد الحالي")]
    Inventory,
    #[command(description = "تقرير اليوم")]
    Today,
}

impl Command {
    /// Command text, usable as inline button callback data
    pub fn to_command_string(&self) -> String {
        match self {
            Command::Start => "/start".to_string(),
            Command::Help => "/help".to_string(),
            Command::Confirm => "/confirm".to_string(),
            Command::Cancel => "/cancel".to_string(),
            Command::Undo => "/undo".to_string(),
            Command::Export(period) if period.trim().is_empty() => "/export".to_string(),
            Command::Export(period) => format!("/export {}", period.trim()),
            Command::Inventory => "/inventory".to_string(),
            Command::Today => "/today".to_string(),
        }
    }

    /// Commands that change the ledger
    pub fn is_mutating(&self) -> bool {
        matches!(self, Command::Confirm | Command::Undo)
    }
}

/// Slash command or one of the bare-word synonyms, if `text` is one
pub fn parse_command(text: &str, bot_name: &str) -> Option<Command> {
    let text = text.trim();
    if text.starts_with('/') {
        return Command::parse(text, bot_name).ok();
    }
    match text.to_lowercase().as_str() {
        "help" | "مساعدة" | "المساعدة" => Some(Command::Help),
        "تأكيد" | "تاكيد" | "confirm" | "نعم" => Some(Command::Confirm),
        "إلغاء" | "الغاء" | "cancel" => Some(Command::Cancel),
        "الجرد" => Some(Command::Inventory),
        "تقرير اليوم" => Some(Command::Today),
        _ => None,
    }
}
