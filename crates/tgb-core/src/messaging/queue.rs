//! Deferred sends: jobs pushed now, delivered later by a worker.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    domain::ChatId,
    errors::Error,
    messaging::{keyboard::ReplyMarkup, types::ParseMode},
    Result,
};

/// Optional knobs for `sendMessage`. Unset fields fall back to the client
/// defaults (`MarkdownV2`, link previews disabled, configured attempts).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_web_page_preview: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<ReplyMarkup>,
    /// Raw parameters merged over the computed ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl SendOptions {
    pub fn with_markup(markup: impl Into<ReplyMarkup>) -> Self {
        Self {
            reply_markup: Some(markup.into()),
            ..Self::default()
        }
    }

    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A message to send later, possibly from another process.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessageJob {
    pub bot_token: String,
    pub chat_id: ChatId,
    pub text: String,
    #[serde(default)]
    pub options: SendOptions,
}

impl std::fmt::Debug for SendMessageJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendMessageJob")
            .field("bot_token", &crate::logging::mask_token(&self.bot_token))
            .field("chat_id", &self.chat_id)
            .field("text_len", &self.text.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Sink for deferred sends. Delivery failures belong to the consumer.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: SendMessageJob) -> Result<()>;
}

/// In-process queue backed by an unbounded tokio channel.
#[derive(Clone, Debug)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<SendMessageJob>,
}

impl ChannelQueue {
    /// Create the queue and the receiving end for a worker.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SendMessageJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn push(&self, job: SendMessageJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| Error::External("send queue closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::keyboard::{InlineButton, InlineKeyboard};

    #[tokio::test]
    async fn channel_queue_delivers_in_order() {
        let (queue, mut rx) = ChannelQueue::new();
        for i in 0..3 {
            queue
                .push(SendMessageJob {
                    bot_token: "t".to_string(),
                    chat_id: ChatId(i),
                    text: format!("m{i}"),
                    options: SendOptions::default(),
                })
                .await
                .unwrap();
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().chat_id, ChatId(i));
        }
    }

    #[tokio::test]
    async fn push_after_receiver_dropped_fails() {
        let (queue, rx) = ChannelQueue::new();
        drop(rx);
        let err = queue
            .push(SendMessageJob {
                bot_token: "t".to_string(),
                chat_id: ChatId(1),
                text: "x".to_string(),
                options: SendOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::External(_)));
    }

    #[test]
    fn job_survives_serialization() {
        let job = SendMessageJob {
            bot_token: "123:abc".to_string(),
            chat_id: ChatId(42),
            text: "hi".to_string(),
            options: SendOptions::with_markup(InlineKeyboard::new(vec![vec![
                InlineButton::callback("A", "a"),
            ]]))
            .parse_mode(ParseMode::Html),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains(r#""parse_mode":"HTML""#));
        let back: SendMessageJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn debug_masks_token() {
        let job = SendMessageJob {
            bot_token: "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw".to_string(),
            chat_id: ChatId(1),
            text: "x".to_string(),
            options: SendOptions::default(),
        };
        assert!(!format!("{job:?}").contains("AAHdqTcv"));
    }
}
