use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Represents different types of inline keyboard buttons
#[derive(Debug, Clone, PartialEq)]
pub enum ButtonData {
    /// Callback button with label and callback data
    Callback(String, String),
}

/// Telegram rejects callback data longer than this many bytes
const MAX_CALLBACK_DATA_BYTES: usize = 64;

/// Build an InlineKeyboardMarkup from rows of button data.
///
/// Callback data longer than Telegram's 64-byte limit is truncated at a
/// character boundary, so keep callback payloads short (command strings).
pub fn keyboard<R>(rows: impl IntoIterator<Item = R>) -> InlineKeyboardMarkup
where
    R: IntoIterator<Item = ButtonData>,
{
    let button_rows: Vec<Vec<InlineKeyboardButton>> = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|item| match item {
                    ButtonData::Callback(label, data) => {
                        InlineKeyboardButton::callback(label, clip_callback_data(data))
                    }
                })
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(button_rows)
}

fn clip_callback_data(mut data: String) -> String {
    if data.len() <= MAX_CALLBACK_DATA_BYTES {
        return data;
    }
    let mut cut = MAX_CALLBACK_DATA_BYTES;
    while !data.is_char_boundary(cut) {
        cut -= 1;
    }
    data.truncate(cut);
    data
}
