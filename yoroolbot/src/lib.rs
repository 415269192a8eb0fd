//! Yoroolbot - small reusable helpers for teloxide bots

// Private API modules
pub(crate) mod api;

// Public text module with re-exports
pub mod text {
    // Re-export types and traits from internal API
    pub use crate::api::text::{
        chunks::{TELEGRAM_MAX_MESSAGE_LENGTH, split_by_max_length, telegram_length},
        message::PlainTextMessage,
    };
}

// Public buttons module with re-exports
pub mod buttons {
    // Re-export types and traits from internal API
    pub use crate::api::buttons::{ButtonData, keyboard};
}
