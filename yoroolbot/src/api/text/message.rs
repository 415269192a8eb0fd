use teloxide::{
    Bot,
    payloads::SendMessageSetters,
    prelude::{Requester, ResponseResult},
    types::{ChatId, InlineKeyboardMarkup, Message},
};

use super::chunks::{TELEGRAM_MAX_MESSAGE_LENGTH, split_by_max_length};

/// Trait for sending plain text of any length with Bot
///
/// Long texts are split by lines into several messages, each within
/// Telegram's 4096 character limit. The inline keyboard, if any, is
/// attached to the last message only.
#[async_trait::async_trait]
pub trait PlainTextMessage: Requester {
    async fn send_long_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> ResponseResult<Vec<Message>>;
}

#[async_trait::async_trait]
impl PlainTextMessage for Bot {
    async fn send_long_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> ResponseResult<Vec<Message>> {
        let chunks = split_by_max_length(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        let mut sent = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let request = self.send_message(chat_id, chunk);
            let message = match (&keyboard, idx == last) {
                (Some(markup), true) => request.reply_markup(markup.clone()).await?,
                _ => request.await?,
            };
            sent.push(message);
        }
        Ok(sent)
    }
}
