//! Spinner display for long-running polls.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nerctl::services::PollEvent;

/// Shows poll events on a spinner until the sending side is dropped.
pub struct PollProgress {
    task: JoinHandle<()>,
}

impl PollProgress {
    /// Start the display. Hand the returned sender to the poller.
    pub fn start(title: &str) -> (mpsc::Sender<PollEvent>, Self) {
        let (tx, mut rx) = mpsc::channel::<PollEvent>(32);

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("Waiting for {}...", title));

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    PollEvent::Queried {
                        job,
                        attempt,
                        status,
                    } => pb.set_message(format!("{}: {} (check {})", job, status, attempt)),
                    PollEvent::Sleeping { job, delay } => {
                        pb.set_message(format!("{}: next check in {}s", job, delay.as_secs()))
                    }
                    PollEvent::Finished { .. } => pb.finish_and_clear(),
                }
            }
            pb.finish_and_clear();
        });

        (tx, Self { task })
    }

    /// Wait for the display to clear.
    pub async fn finish(self) {
        let _ = self.task.await;
    }
}
