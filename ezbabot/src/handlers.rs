use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, InputFile, UpdateKind},
};
use yoroolbot::{buttons::keyboard, text::PlainTextMessage};

use crate::{farmhand::Farmhand, reply::Reply};

/// Handle a text message: everything, commands included, goes through the farmhand
pub async fn handle_text_message(
    bot: Bot,
    msg: Message,
    farmhand: Arc<Farmhand>,
) -> ResponseResult<()> {
    let (Some(text), Some(user)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };
    log::info!("Message from user {} in chat {}", user.id, msg.chat.id);

    let reply = farmhand.handle_message(user.id.0, text).await;
    send_reply(&bot, msg.chat.id, reply).await;
    Ok(())
}

/// Handle callback queries from the confirm/cancel buttons
pub async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    farmhand: Arc<Farmhand>,
) -> ResponseResult<()> {
    // Answer the callback query to remove the loading state
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(msg) = q.message.as_ref().and_then(|m| m.regular_message()) else {
        return Ok(());
    };
    let Some(data) = &q.data else {
        return Ok(());
    };
    log::info!("Received callback data from user {}: {}", q.from.id, data);

    // Button data is a command string, so it takes the same path as typed text
    let reply = farmhand.handle_message(q.from.id.0, data).await;
    send_reply(&bot, msg.chat.id, reply).await;
    Ok(())
}

/// Process one update delivered by the webhook
pub async fn process_update(bot: Bot, farmhand: Arc<Farmhand>, update: Update) {
    let update_id = update.id.0;
    let result = match update.kind {
        UpdateKind::Message(msg) => handle_text_message(bot, msg, farmhand).await,
        UpdateKind::CallbackQuery(q) => handle_callback_query(bot, q, farmhand).await,
        other => {
            log::debug!("Ignoring update {:?}", other);
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("Failed to process update {}: {}", update_id, e);
    }
}

/// Send a reply; delivery failures are logged, never retried
pub async fn send_reply(bot: &Bot, chat_id: ChatId, reply: Reply) {
    let result = match reply {
        Reply::Text { text, buttons } => {
            let markup = (!buttons.is_empty()).then(|| keyboard(buttons));
            bot.send_long_text(chat_id, &text, markup).await.map(|_| ())
        }
        Reply::Document {
            file_name,
            bytes,
            caption,
        } => bot
            .send_document(chat_id, InputFile::memory(bytes).file_name(file_name))
            .caption(caption)
            .await
            .map(|_| ()),
    };
    if let Err(e) = result {
        log::error!("Failed to send reply to chat {}: {}", chat_id, e);
    }
}
