//! Keyboard markup builders.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Inline keyboard (buttons attached to a message).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<InlineButton>>) -> Self {
        Self {
            inline_keyboard: rows,
        }
    }

    /// Append a row of buttons.
    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        self.inline_keyboard.push(buttons);
        self
    }
}

/// Custom reply keyboard (replaces the user's on-screen keyboard).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyKeyboard {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
}

impl KeyboardButton {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ReplyKeyboard {
    /// Resized to fit by default.
    pub fn new(rows: Vec<Vec<KeyboardButton>>) -> Self {
        Self {
            keyboard: rows,
            resize_keyboard: true,
        }
    }

    pub fn resize(mut self, resize: bool) -> Self {
        self.resize_keyboard = resize;
        self
    }
}

/// Any markup accepted in the `reply_markup` parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Inline(InlineKeyboard),
    Reply(ReplyKeyboard),
}

impl ReplyMarkup {
    /// JSON string form expected by the Bot API.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<InlineKeyboard> for ReplyMarkup {
    fn from(k: InlineKeyboard) -> Self {
        ReplyMarkup::Inline(k)
    }
}

impl From<ReplyKeyboard> for ReplyMarkup {
    fn from(k: ReplyKeyboard) -> Self {
        ReplyMarkup::Reply(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_keyboard_wire_form() {
        let kb = InlineKeyboard::new(vec![vec![
            InlineButton::callback("Stats", "stats"),
            InlineButton::url("Docs", "https://example.com"),
        ]]);
        let wire = ReplyMarkup::from(kb).to_wire().unwrap();
        assert_eq!(
            wire,
            r#"{"inline_keyboard":[[{"text":"Stats","callback_data":"stats"},{"text":"Docs","url":"https://example.com"}]]}"#
        );
    }

    #[test]
    fn reply_keyboard_wire_form() {
        let kb = ReplyKeyboard::new(vec![vec![KeyboardButton::new("A")]]).resize(false);
        let wire = ReplyMarkup::from(kb).to_wire().unwrap();
        assert_eq!(
            wire,
            r#"{"keyboard":[[{"text":"A"}]],"resize_keyboard":false}"#
        );
    }

    #[test]
    fn rows_append_in_order() {
        let kb = InlineKeyboard::default()
            .row(vec![InlineButton::callback("1", "one")])
            .row(vec![InlineButton::callback("2", "two")]);
        assert_eq!(kb.inline_keyboard.len(), 2);
        assert_eq!(kb.inline_keyboard[1][0].callback_data.as_deref(), Some("two"));
    }
}
