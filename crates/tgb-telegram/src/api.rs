//! Typed Bot API methods. Each one only shapes parameters and reuses
//! [`BotClient::call`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tgb_core::{
    domain::{ChatId, MessageId},
    errors::Error,
    messaging::{
        keyboard::ReplyMarkup,
        queue::{JobQueue, SendMessageJob, SendOptions},
        types::{ChatAction, ParseMode, User},
    },
    Result,
};

use crate::client::{ApiResponse, BotClient, EndpointCall, Params};

/// Options for `editMessageText`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_markup: Option<ReplyMarkup>,
    pub extra: std::collections::BTreeMap<String, serde_json::Value>,
    pub attempts: Option<u32>,
}

/// `getFile` result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_path: Option<String>,
}

fn markup_param(markup: Option<&ReplyMarkup>) -> Result<Option<String>> {
    markup.map(ReplyMarkup::to_wire).transpose()
}

impl BotClient {
    /// `sendMessage`. Checked against the bot-scope limiter first.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &SendOptions,
    ) -> Result<ApiResponse> {
        self.admit_outbound().await?;

        let params = Params::new()
            .set("chat_id", chat_id.0)
            .set("text", text)
            .set(
                "parse_mode",
                options.parse_mode.unwrap_or_default().as_str(),
            )
            .set(
                "disable_web_page_preview",
                options.disable_web_page_preview.unwrap_or(true),
            )
            .set_opt("reply_markup", markup_param(options.reply_markup.as_ref())?)
            .merge(&options.extra);

        self.call(
            "sendMessage",
            params,
            options.attempts.unwrap_or(self.config().retry_attempts),
        )
        .await
    }

    pub async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: &str,
        caption: Option<&str>,
        markup: Option<&ReplyMarkup>,
    ) -> Result<ApiResponse> {
        let params = Params::new()
            .set("chat_id", chat_id.0)
            .set("photo", photo)
            .set("parse_mode", ParseMode::MarkdownV2.as_str())
            .set_opt("caption", caption)
            .set_opt("reply_markup", markup_param(markup)?);
        self.call_default("sendPhoto", params).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        options: &EditOptions,
    ) -> Result<ApiResponse> {
        let params = Params::new()
            .set("chat_id", chat_id.0)
            .set("message_id", message_id.0)
            .set("text", text)
            .set(
                "parse_mode",
                options.parse_mode.unwrap_or_default().as_str(),
            )
            .set_opt("reply_markup", markup_param(options.reply_markup.as_ref())?)
            .merge(&options.extra);

        self.call(
            "editMessageText",
            params,
            options.attempts.unwrap_or(self.config().retry_attempts),
        )
        .await
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<ApiResponse> {
        let params = Params::new()
            .set("callback_query_id", callback_query_id)
            .set_opt("text", text)
            .set("show_alert", show_alert);
        self.call_default("answerCallbackQuery", params).await
    }

    pub async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<ApiResponse> {
        let params = Params::new()
            .set("chat_id", chat_id.0)
            .set("action", action.as_str());
        self.call_default("sendChatAction", params).await
    }

    /// Long-poll for updates. The HTTP timeout is stretched by the long-poll
    /// timeout so the server gets to hold the request. Items are returned raw
    /// so one malformed event cannot poison the batch.
    pub async fn get_updates(
        &self,
        offset: i64,
        limit: u32,
        timeout: Duration,
        allowed_updates: Option<&[String]>,
    ) -> Result<Vec<serde_json::Value>> {
        let params = Params::new()
            .set("offset", offset)
            .set("limit", limit)
            .set("timeout", timeout.as_secs())
            .set_opt(
                "allowed_updates",
                allowed_updates.map(|u| serde_json::Value::from(u.to_vec())),
            );
        let call = EndpointCall::new("getUpdates", params);
        let resp = self
            .execute(
                &call,
                self.config().retry_attempts,
                self.config().http_timeout + timeout,
            )
            .await?;
        resp.result_as::<Vec<serde_json::Value>>()
    }

    pub async fn set_webhook(&self, url: &str) -> Result<ApiResponse> {
        self.call_default("setWebhook", Params::new().set("url", url))
            .await
    }

    pub async fn delete_webhook(&self) -> Result<ApiResponse> {
        self.call_default("deleteWebhook", Params::new()).await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<FileInfo> {
        let resp = self
            .call_default("getFile", Params::new().set("file_id", file_id))
            .await?;
        resp.result_as::<FileInfo>()
    }

    pub async fn get_me(&self) -> Result<User> {
        let resp = self.call_default("getMe", Params::new()).await?;
        resp.result_as::<User>()
    }

    /// Hand a send to `queue` for later delivery by a worker.
    pub async fn enqueue_send_message(
        &self,
        queue: &dyn JobQueue,
        chat_id: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<()> {
        if self.token().trim().is_empty() {
            return Err(Error::Config("bot token is not set".to_string()));
        }
        queue
            .push(SendMessageJob {
                bot_token: self.token().to_string(),
                chat_id,
                text: text.to_string(),
                options,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tgb_core::{
        admission::{AdmissionControl, AdmissionPolicy, Scope},
        messaging::{
            keyboard::{InlineButton, InlineKeyboard},
            queue::ChannelQueue,
        },
        store::{CounterStore, MemoryCounterStore},
    };

    use crate::{client::ClientConfig, fake::FakeSender};

    fn client(sender: Arc<FakeSender>) -> BotClient {
        BotClient::with_sender("1:t", ClientConfig::default(), sender)
    }

    #[tokio::test]
    async fn send_message_defaults_and_omitted_markup() {
        let sender = FakeSender::new();
        let c = client(sender.clone());
        c.send_message(ChatId(42), "hi", &SendOptions::default())
            .await
            .unwrap();

        let calls = sender.calls_to("sendMessage");
        assert_eq!(calls.len(), 1);
        let p = &calls[0];
        assert_eq!(p.get("chat_id"), Some(&serde_json::json!(42)));
        assert_eq!(p.get("text"), Some(&serde_json::json!("hi")));
        assert_eq!(p.get("parse_mode"), Some(&serde_json::json!("MarkdownV2")));
        assert_eq!(
            p.get("disable_web_page_preview"),
            Some(&serde_json::json!(true))
        );
        assert!(!p.contains("reply_markup"));
    }

    #[tokio::test]
    async fn send_message_serializes_markup_and_merges_extra() {
        let sender = FakeSender::new();
        let c = client(sender.clone());
        let opts = SendOptions::with_markup(InlineKeyboard::new(vec![vec![
            InlineButton::callback("Stats", "stats"),
        ]]))
        .parse_mode(ParseMode::Html)
        .extra("protect_content", true);
        c.send_message(ChatId(1), "x", &opts).await.unwrap();

        let p = &sender.calls_to("sendMessage")[0];
        assert_eq!(p.get("parse_mode"), Some(&serde_json::json!("HTML")));
        assert_eq!(p.get("protect_content"), Some(&serde_json::json!(true)));
        let markup = p.get("reply_markup").and_then(|v| v.as_str()).unwrap();
        assert!(markup.starts_with(r#"{"inline_keyboard":"#));
    }

    #[tokio::test]
    async fn send_message_respects_bot_admission() {
        let sender = FakeSender::new();
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let limiter = Arc::new(AdmissionControl::new(
            Scope::Bot,
            2,
            Duration::from_secs(60),
            AdmissionPolicy::FixedWindow,
            Some(store),
        ));
        let c = client(sender.clone()).with_bot_admission(limiter);

        c.send_message(ChatId(1), "a", &SendOptions::default()).await.unwrap();
        c.send_message(ChatId(1), "b", &SendOptions::default()).await.unwrap();
        let err = c
            .send_message(ChatId(1), "c", &SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { ref scope } if scope == "bot"));
        assert_eq!(sender.calls_to("sendMessage").len(), 2);
    }

    #[tokio::test]
    async fn photo_caption_only_when_present() {
        let sender = FakeSender::new();
        let c = client(sender.clone());
        c.send_photo(ChatId(1), "file-id", None, None).await.unwrap();
        c.send_photo(ChatId(1), "file-id", Some("cap"), None)
            .await
            .unwrap();

        let calls = sender.calls_to("sendPhoto");
        assert!(!calls[0].contains("caption"));
        assert_eq!(calls[1].get("caption"), Some(&serde_json::json!("cap")));
    }

    #[tokio::test]
    async fn answer_callback_omits_empty_text() {
        let sender = FakeSender::new();
        let c = client(sender.clone());
        c.answer_callback_query("cb", None, false).await.unwrap();
        let p = &sender.calls_to("answerCallbackQuery")[0];
        assert_eq!(p.get("callback_query_id"), Some(&serde_json::json!("cb")));
        assert_eq!(p.get("show_alert"), Some(&serde_json::json!(false)));
        assert!(!p.contains("text"));
    }

    #[tokio::test]
    async fn edit_and_chat_action_shapes() {
        let sender = FakeSender::new();
        let c = client(sender.clone());
        c.edit_message_text(ChatId(5), MessageId(9), "new", &EditOptions::default())
            .await
            .unwrap();
        c.send_chat_action(ChatId(5), ChatAction::Typing).await.unwrap();

        let edit = &sender.calls_to("editMessageText")[0];
        assert_eq!(edit.get("message_id"), Some(&serde_json::json!(9)));
        let action = &sender.calls_to("sendChatAction")[0];
        assert_eq!(action.get("action"), Some(&serde_json::json!("typing")));
    }

    #[tokio::test]
    async fn get_updates_returns_raw_items() {
        let sender = FakeSender::new();
        sender.push_ok(
            "getUpdates",
            serde_json::json!([{"update_id": 1}, {"update_id": 2}]),
        );
        let c = client(sender.clone());
        let items = c
            .get_updates(0, 100, Duration::from_secs(30), None)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);

        let p = &sender.calls_to("getUpdates")[0];
        assert_eq!(p.get("timeout"), Some(&serde_json::json!(30)));
        assert!(!p.contains("allowed_updates"));
    }

    #[tokio::test]
    async fn get_me_and_get_file_decode_results() {
        let sender = FakeSender::new();
        sender.push_ok(
            "getMe",
            serde_json::json!({"id": 99, "is_bot": true, "username": "demo_bot"}),
        );
        sender.push_ok(
            "getFile",
            serde_json::json!({"file_id": "f", "file_path": "photos/a.jpg"}),
        );
        let c = client(sender);
        assert_eq!(c.get_me().await.unwrap().username.as_deref(), Some("demo_bot"));
        assert_eq!(
            c.get_file("f").await.unwrap().file_path.as_deref(),
            Some("photos/a.jpg")
        );
    }

    #[tokio::test]
    async fn webhook_management_calls() {
        let sender = FakeSender::new();
        let c = client(sender.clone());
        c.set_webhook("https://example.com/hook").await.unwrap();
        c.delete_webhook().await.unwrap();
        assert_eq!(
            sender.calls_to("setWebhook")[0].get("url"),
            Some(&serde_json::json!("https://example.com/hook"))
        );
        assert_eq!(sender.calls_to("deleteWebhook").len(), 1);
    }

    #[tokio::test]
    async fn enqueue_pushes_job_with_token() {
        let (queue, mut rx) = ChannelQueue::new();
        let c = client(FakeSender::new());
        c.enqueue_send_message(&queue, ChatId(3), "later", SendOptions::default())
            .await
            .unwrap();
        let job = rx.recv().await.unwrap();
        assert_eq!(job.bot_token, "1:t");
        assert_eq!(job.chat_id, ChatId(3));
        assert_eq!(job.text, "later");
    }
}
