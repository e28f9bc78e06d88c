//! Terminal progress for conveyor runs.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar advanced once per conveyor iteration.
pub struct ConveyorProgress {
    bar: ProgressBar,
}

impl ConveyorProgress {
    /// Bar over the `total + 2` iterations of a run, hidden unless `visible`.
    pub fn new(total_chunks: usize, visible: bool) -> Self {
        let iterations = (total_chunks + 2) as u64;
        let bar = if visible {
            let bar = ProgressBar::new(iterations);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            bar.set_style(style);
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    /// Record a finished iteration and the queue depth seen at its end.
    pub fn advance(&self, queue_depth: usize) {
        self.bar.set_message(format!("queue {}", queue_depth));
        self.bar.inc(1);
    }

    /// Iterations recorded so far.
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Close the bar with a final message.
    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }

    /// Leave the bar where it stopped.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}
