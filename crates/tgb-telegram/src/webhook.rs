//! Webhook entry: one pushed update body in, one gate decision out.
//!
//! Serving HTTP is the host's job; it passes the raw request body here.

use tgb_core::{messaging::types::Update, Result};

use crate::{
    client::BotClient,
    gate::{GateOutcome, UpdateGate},
};

/// Decode `body` as one update and run it through `gate`. A body that is not
/// an update fails with [`tgb_core::Error::Json`] and dispatches nothing.
pub async fn handle_webhook_body(
    gate: &UpdateGate,
    client: &BotClient,
    body: &[u8],
) -> Result<GateOutcome> {
    let update: Update = serde_json::from_slice(body)?;
    tracing::debug!(update_id = update.update_id, "webhook update received");
    Ok(gate.handle(&update, client).await)
}
