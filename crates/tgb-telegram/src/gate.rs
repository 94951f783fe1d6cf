//! Per-user admission in front of the dispatcher.

use std::sync::Arc;

use tgb_core::{
    admission::AdmissionControl,
    messaging::types::{Update, UpdateKind},
};

use crate::{client::BotClient, dispatcher::Dispatcher};

pub const RATE_LIMITED_TEXT: &str = "Too many requests, try again later";

/// What happened to one update at the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// Forwarded; carries the dispatcher's result.
    Dispatched(bool),
    /// Denied by the user-scope limiter, never forwarded.
    RateLimited,
}

#[derive(Clone, Debug)]
pub struct UpdateGate {
    dispatcher: Arc<Dispatcher>,
    admission: Arc<AdmissionControl>,
}

impl UpdateGate {
    pub fn new(dispatcher: Arc<Dispatcher>, admission: Arc<AdmissionControl>) -> Self {
        Self {
            dispatcher,
            admission,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Updates without a sender skip admission.
    pub async fn handle(&self, update: &Update, client: &BotClient) -> GateOutcome {
        if let Some(user_id) = update.user_id() {
            if !self.admission.allow_user(user_id).await {
                tracing::debug!(
                    update_id = update.update_id,
                    user_id = %user_id,
                    "rate limited"
                );
                if let UpdateKind::CallbackQuery(query) = update.kind() {
                    if let Err(e) = client
                        .answer_callback_query(&query.id, Some(RATE_LIMITED_TEXT), false)
                        .await
                    {
                        tracing::debug!(error = %e, "failed to acknowledge rate-limited callback");
                    }
                }
                return GateOutcome::RateLimited;
            }
        }

        GateOutcome::Dispatched(self.dispatcher.handle_update(update, client).await)
    }
}
