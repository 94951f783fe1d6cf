//! Worker draining deferred sends.

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use tgb_core::messaging::queue::SendMessageJob;

use crate::client::BotClient;

/// Deliver queued jobs until the queue closes or `cancel` fires. Each job is
/// sent with a client for its own token, sharing `base`'s sender and config.
/// Failures are logged and the job is dropped. Returns the number delivered.
pub async fn run_send_worker(
    mut rx: UnboundedReceiver<SendMessageJob>,
    base: BotClient,
    cancel: CancellationToken,
) -> usize {
    let mut delivered = 0;
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let client = base.for_token(job.bot_token.clone());
        match client.send_message(job.chat_id, &job.text, &job.options).await {
            Ok(_) => delivered += 1,
            Err(e) => tracing::warn!(
                chat_id = %job.chat_id,
                transient = e.is_transient(),
                error = %e,
                "deferred send failed"
            ),
        }
    }
    tracing::debug!(delivered, "send worker stopped");
    delivered
}
