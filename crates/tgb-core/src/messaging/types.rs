//! Wire model of inbound Bot API events.
//!
//! Only the fields the dispatch layer reads are typed; anything else in the
//! payload is ignored on decode.

use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, MessageId, MessageRef, UserId};

/// One inbound event from `getUpdates` or a webhook push.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

/// Borrowed view of the event an [`Update`] carries.
#[derive(Clone, Copy, Debug)]
pub enum UpdateKind<'a> {
    Message(&'a Message),
    CallbackQuery(&'a CallbackQuery),
    /// Event types this client does not dispatch (edited messages, polls, ...).
    Other,
}

impl Update {
    pub fn kind(&self) -> UpdateKind<'_> {
        if let Some(m) = &self.message {
            return UpdateKind::Message(m);
        }
        if let Some(q) = &self.callback_query {
            return UpdateKind::CallbackQuery(q);
        }
        UpdateKind::Other
    }

    /// Originating user, if the event carries one.
    pub fn user_id(&self) -> Option<UserId> {
        match self.kind() {
            UpdateKind::Message(m) => m.user_id(),
            UpdateKind::CallbackQuery(q) => q.user_id(),
            UpdateKind::Other => None,
        }
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        match self.kind() {
            UpdateKind::Message(m) => Some(m.chat_id()),
            UpdateKind::CallbackQuery(q) => q.message_ref().map(|r| r.chat_id),
            UpdateKind::Other => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Message {
    pub fn chat_id(&self) -> ChatId {
        ChatId(self.chat.id)
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.from.as_ref().map(|u| UserId(u.id))
    }

    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id(),
            message_id: MessageId(self.message_id),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Button press on an inline keyboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl CallbackQuery {
    pub fn user_id(&self) -> Option<UserId> {
        self.from.as_ref().map(|u| UserId(u.id))
    }

    /// The message carrying the pressed keyboard.
    pub fn message_ref(&self) -> Option<MessageRef> {
        self.message.as_ref().map(Message::message_ref)
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }
}

/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    Typing,
    UploadPhoto,
    RecordVideo,
    UploadVideo,
    RecordVoice,
    UploadVoice,
    UploadDocument,
    FindLocation,
    RecordVideoNote,
    UploadVideoNote,
}

impl ChatAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatAction::Typing => "typing",
            ChatAction::UploadPhoto => "upload_photo",
            ChatAction::RecordVideo => "record_video",
            ChatAction::UploadVideo => "upload_video",
            ChatAction::RecordVoice => "record_voice",
            ChatAction::UploadVoice => "upload_voice",
            ChatAction::UploadDocument => "upload_document",
            ChatAction::FindLocation => "find_location",
            ChatAction::RecordVideoNote => "record_video_note",
            ChatAction::UploadVideoNote => "upload_video_note",
        }
    }
}

/// Telegram parse modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    Markdown,
    #[default]
    MarkdownV2,
    #[serde(rename = "HTML")]
    Html,
}

impl ParseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseMode::Markdown => "Markdown",
            ParseMode::MarkdownV2 => "MarkdownV2",
            ParseMode::Html => "HTML",
        }
    }
}
