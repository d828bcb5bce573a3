//! HTTP client for the Bot API.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use super::types::{ForumTopic, InlineKeyboardMarkup, Message, Update};

/// Long-poll timeout for `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API said no. The description is kept verbatim (including the
    /// `Too Many Requests: retry after N` wording) so flood control can
    /// pattern-match it.
    #[error("telegram API error: {0}")]
    Api(String),
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ApiParameters>,
}

#[derive(Deserialize)]
struct ApiParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Bot API client. Cloning is cheap; the underlying connection pool is
/// shared.
#[derive(Debug, Clone)]
pub struct Telegram {
    http: reqwest::Client,
    base: String,
}

impl Telegram {
    pub fn new(token: &str) -> Self {
        let http = reqwest::Client::builder()
            // Long polls hold the connection open for POLL_TIMEOUT_SECS.
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base: format!("https://api.telegram.org/bot{token}"),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, TelegramError> {
        let url = format!("{}/{}", self.base, method);
        let response = self.http.post(&url).json(&body).send().await?;
        let api: ApiResponse<T> = response.json().await?;
        Self::unwrap_response(api)
    }

    fn unwrap_response<T>(api: ApiResponse<T>) -> Result<T, TelegramError> {
        if api.ok {
            return api
                .result
                .ok_or_else(|| TelegramError::Api("ok response without result".into()));
        }

        let mut description = api.description.unwrap_or_else(|| "unknown error".into());
        if let Some(retry) = api.parameters.and_then(|p| p.retry_after)
            && !description.contains("retry after")
        {
            description = format!("{description}: retry after {retry}");
        }
        Err(TelegramError::Api(description))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    /// Send a plain text message into a topic. `thread_id` 0 targets the
    /// general topic.
    pub async fn send_message(
        &self,
        chat_id: i64,
        thread_id: i64,
        text: &str,
    ) -> Result<Message, TelegramError> {
        self.call("sendMessage", message_body(chat_id, thread_id, text, None))
            .await
    }

    pub async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        thread_id: i64,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<Message, TelegramError> {
        self.call(
            "sendMessage",
            message_body(chat_id, thread_id, text, Some(keyboard)),
        )
        .await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramError> {
        self.call::<serde_json::Value>(
            "editMessageText",
            json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
        )
        .await
        .map(drop)
    }

    pub async fn edit_message_with_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<(), TelegramError> {
        self.call::<serde_json::Value>(
            "editMessageText",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
                "reply_markup": keyboard,
            }),
        )
        .await
        .map(drop)
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        self.call::<serde_json::Value>(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
        .map(drop)
    }

    /// Answer a callback query, dismissing the client-side spinner.
    pub async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), TelegramError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if !text.is_empty() {
            body["text"] = json!(text);
        }
        self.call::<serde_json::Value>("answerCallbackQuery", body)
            .await
            .map(drop)
    }

    pub async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        self.call::<serde_json::Value>(
            "pinChatMessage",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "disable_notification": true,
            }),
        )
        .await
        .map(drop)
    }

    /// Create a forum topic and return its thread id.
    pub async fn create_forum_topic(&self, chat_id: i64, name: &str) -> Result<i64, TelegramError> {
        let topic: ForumTopic = self
            .call(
                "createForumTopic",
                json!({ "chat_id": chat_id, "name": name }),
            )
            .await?;
        Ok(topic.message_thread_id)
    }

    /// Upload a local file into a topic.
    pub async fn send_document(
        &self,
        chat_id: i64,
        thread_id: i64,
        path: &Path,
    ) -> Result<(), TelegramError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| TelegramError::Api(format!("cannot read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );
        if thread_id != 0 {
            form = form.text("message_thread_id", thread_id.to_string());
        }

        let url = format!("{}/sendDocument", self.base);
        let response = self.http.post(&url).multipart(form).send().await?;
        let api: ApiResponse<serde_json::Value> = response.json().await?;
        Self::unwrap_response(api).map(drop)
    }
}

fn message_body(
    chat_id: i64,
    thread_id: i64,
    text: &str,
    keyboard: Option<&InlineKeyboardMarkup>,
) -> serde_json::Value {
    let mut body = json!({ "chat_id": chat_id, "text": text });
    if thread_id != 0 {
        body["message_thread_id"] = json!(thread_id);
    }
    if let Some(kb) = keyboard {
        body["reply_markup"] = json!(kb);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_description_is_preserved() {
        let api: ApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok":false,"description":"Too Many Requests: retry after 5","parameters":{"retry_after":5}}"#,
        )
        .unwrap();
        let err = Telegram::unwrap_response(api).unwrap_err();
        assert!(err.to_string().contains("Too Many Requests: retry after 5"));
    }

    #[test]
    fn retry_after_appended_when_missing_from_description() {
        let api: ApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok":false,"description":"Too Many Requests","parameters":{"retry_after":7}}"#,
        )
        .unwrap();
        let err = Telegram::unwrap_response(api).unwrap_err();
        assert!(err.to_string().contains("retry after 7"));
    }

    #[test]
    fn thread_zero_targets_general_topic() {
        let body = message_body(-100, 0, "hi", None);
        assert!(body.get("message_thread_id").is_none());

        let body = message_body(-100, 42, "hi", None);
        assert_eq!(body["message_thread_id"], 42);
    }
}
