//! Progress UI (bar) for a running transfer.

use indicatif::{ProgressBar, ProgressStyle};
use segfetch_core::download::{ProgressEvent, TransferState};
use tokio::sync::watch;

const BAR_TEMPLATE: &str =
    "{msg:>10} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {binary_bytes_per_sec} eta {eta}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg:>10} {bytes} {binary_bytes_per_sec}";

/// Spawns a task that renders progress events until a terminal state arrives.
///
/// Returns `None` when the bar is disabled.
pub(crate) fn spawn_progress_ui(
    use_bar: bool,
    mut events: watch::Receiver<ProgressEvent>,
) -> Option<tokio::task::JoinHandle<()>> {
    if !use_bar {
        return None;
    }
    Some(tokio::spawn(async move {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        let mut sized = false;

        while events.changed().await.is_ok() {
            let event = events.borrow_and_update().clone();
            if let (Some(total), false) = (event.bytes_total, sized) {
                bar.set_length(total);
                bar.set_style(bar_style());
                sized = true;
            }
            bar.set_position(event.bytes_downloaded);
            bar.set_message(event.state.to_string());

            match event.state {
                TransferState::Completed => {
                    bar.finish_and_clear();
                    return;
                }
                TransferState::Paused | TransferState::Failed => {
                    bar.abandon();
                    return;
                }
                _ => {}
            }
        }
        bar.finish_and_clear();
    }))
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_progress_ui_when_disabled_returns_none() {
        let (_tx, rx) = watch::channel(ProgressEvent::default());
        assert!(spawn_progress_ui(false, rx).is_none());
    }

    #[tokio::test]
    async fn spawn_progress_ui_exits_on_terminal_state() {
        let (tx, rx) = watch::channel(ProgressEvent::default());
        let handle = spawn_progress_ui(true, rx).unwrap();

        tx.send_replace(ProgressEvent::new(TransferState::Running, 10, Some(100), 5.0));
        tx.send_replace(ProgressEvent::new(TransferState::Completed, 100, Some(100), 0.0));

        // Returning at all proves the task observed the terminal state.
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn spawn_progress_ui_exits_when_sender_dropped() {
        let (tx, rx) = watch::channel(ProgressEvent::default());
        let handle = spawn_progress_ui(true, rx).unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
