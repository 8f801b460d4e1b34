//! Long-polling update loop and log-chat command handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use noraids_core::{GateAction, already_text, changed_text, now_unix_millis};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::dispatch::Dispatcher;
use crate::gate::{GateError, RemoteGate};
use crate::notify::{Notice, Notifier};
use crate::session::Transport;
use crate::telegram::{AdminCommand, BotApi, Routed, route};

const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Poll until `shutdown` fires. Updates queued while the daemon was down are
/// discarded; each remaining update is handled on its own task.
pub async fn run<C>(
    api: Arc<BotApi>,
    dispatcher: Arc<Dispatcher<C, BotApi>>,
    started_at: String,
    shutdown: CancellationToken,
    tasks: TaskTracker,
) -> anyhow::Result<()>
where
    C: Transport + RemoteGate,
{
    let mut offset = skip_pending(&api)
        .await
        .context("failed to reach the bot API")?;
    tracing::info!("polling for updates");

    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            batch = api.get_updates(offset, POLL_TIMEOUT_SECS) => batch,
        };
        let updates = match batch {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("getUpdates failed: {e:#}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => continue,
                }
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let routed = route(&update, dispatcher.settings().log_chat_id);
            if routed == Routed::Skip {
                continue;
            }
            let dispatcher = Arc::clone(&dispatcher);
            let started_at = started_at.clone();
            tasks.spawn(async move { handle_routed(&dispatcher, routed, &started_at).await });
        }
    }

    tracing::info!("update polling stopped");
    Ok(())
}

/// Offset just past the newest queued update, or `None` when nothing is queued.
async fn skip_pending(api: &BotApi) -> anyhow::Result<Option<i64>> {
    let pending = api.get_updates(Some(-1), 0).await?;
    Ok(pending.last().map(|update| update.update_id + 1))
}

pub async fn handle_routed<C, N>(dispatcher: &Dispatcher<C, N>, routed: Routed, started_at: &str)
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    match routed {
        Routed::Skip => {}
        Routed::Event(event) => {
            if let Err(e) = dispatcher.handle_event(&event, now_unix_millis()).await {
                tracing::error!("failed to handle event in {}: {e}", event.space_id);
                dispatcher.report_error(&e).await;
            }
        }
        Routed::Command(command) => match execute_command(dispatcher, &command, started_at).await
        {
            Ok(reply) => dispatcher.tell_log_chat(Notice::Text(reply)).await,
            Err(e) => {
                tracing::error!("command {command:?} failed: {e}");
                dispatcher.report_error(&e).await;
            }
        },
    }
}

/// Run an operator command and build the reply text.
pub async fn execute_command<C, N>(
    dispatcher: &Dispatcher<C, N>,
    command: &AdminCommand,
    started_at: &str,
) -> Result<String, GateError>
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    match command {
        AdminCommand::Status => Ok(format!(
            "Up since {started_at}.\nGate session: {}.\nTracked spaces: {}.",
            dispatcher.session_phase().as_str(),
            dispatcher.tracked_keys()
        )),
        AdminCommand::Enable(handle) => {
            let started = Instant::now();
            let changed = dispatcher.force_enable(handle).await?;
            Ok(toggle_reply(GateAction::Enable, handle, changed, started))
        }
        AdminCommand::Disable(handle) => {
            let started = Instant::now();
            let changed = dispatcher.force_disable(handle).await?;
            Ok(toggle_reply(GateAction::Disable, handle, changed, started))
        }
    }
}

fn toggle_reply(action: GateAction, handle: &str, changed: bool, started: Instant) -> String {
    if changed {
        changed_text(action, Some(handle), started.elapsed())
    } else {
        already_text(action, Some(handle))
    }
}
