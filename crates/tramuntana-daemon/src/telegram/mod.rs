//! Thin typed client for the Telegram Bot HTTP API.
//!
//! Only the slice of the API this bridge needs: long-poll updates, message
//! send/edit/delete into forum topics, callback answers, pinning, topic
//! creation and document upload.

mod client;
mod types;

pub use client::{Telegram, TelegramError};
pub use types::{
    CallbackQuery, Chat, InlineKeyboardButton, InlineKeyboardMarkup, Message, Update, User,
};
