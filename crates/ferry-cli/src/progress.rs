//! Console progress bar fed by orchestrator updates.

use ferry_migrate::{JobPhase, JobStatus, ProgressCallback, ProgressUpdate};
use indicatif::{ProgressBar, ProgressStyle};

/// Console progress reporter using indicatif.
pub struct ConsoleProgressReporter {
    progress_bar: ProgressBar,
}

impl ConsoleProgressReporter {
    /// Create a reporter for a batch of `total` jobs.
    pub fn new(total: u64) -> Self {
        let progress_bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);
        progress_bar.enable_steady_tick(std::time::Duration::from_millis(120));

        Self { progress_bar }
    }

    /// Create a progress callback for the orchestrator.
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.progress_bar.clone();
        Box::new(move |update: ProgressUpdate| {
            pb.set_length(update.total);
            pb.set_position(update.completed);
            if let JobPhase::Finished(status) = update.phase {
                pb.println(finished_line(&update.current_item, status, update.message.as_deref()));
            }
            pb.set_message(format!("{}: {}", update.phase, update.current_item));
        })
    }

    /// Finish the progress bar.
    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }
}

fn finished_line(item: &str, status: JobStatus, message: Option<&str>) -> String {
    let mark = match status {
        JobStatus::Done => console::style("✓").green(),
        JobStatus::SkippedConflict => console::style("-").yellow(),
        _ => console::style("✗").red(),
    };
    match message {
        Some(message) => format!("{mark} {item}: {message}"),
        None => format!("{mark} {item} ({status})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_line() {
        console::set_colors_enabled(false);
        assert_eq!(finished_line("demo", JobStatus::Done, None), "✓ demo (DONE)");
        assert_eq!(
            finished_line("big", JobStatus::CodeFailed, Some("too large")),
            "✗ big: too large"
        );
    }

    #[test]
    fn test_callback_tracks_position() {
        let reporter = ConsoleProgressReporter::new(2);
        let callback = reporter.callback();
        callback(ProgressUpdate {
            phase: JobPhase::Finished(JobStatus::Done),
            current_item: "demo".into(),
            completed: 1,
            total: 2,
            message: None,
        });
        assert_eq!(reporter.progress_bar.position(), 1);
        reporter.finish("done");
    }
}
