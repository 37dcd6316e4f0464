use bindery_archive::ProgressListener;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Progress on stderr; cancelled by Ctrl-C.
#[derive(Debug, Default)]
pub(crate) struct ConsoleProgress {
    position: AtomicU64,
    max: AtomicU64,
    cancelled: AtomicBool,
    step: Mutex<String>,
    quiet: bool,
}

impl ConsoleProgress {
    pub(crate) fn new(quiet: bool) -> Self {
        Self { quiet, ..Self::default() }
    }

    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::warn!("Cancelling, finishing the current entry first");
        }
    }

    /// End the progress line.
    pub(crate) fn finish(&self) {
        if !self.quiet && self.position.load(Ordering::SeqCst) > 0 {
            eprintln!();
        }
    }

    fn render(&self) {
        if self.quiet {
            return;
        }
        let position = self.position.load(Ordering::SeqCst);
        let max = self.max.load(Ordering::SeqCst);
        let step = self.step.lock().map(|step| step.clone()).unwrap_or_default();
        let mut stderr = std::io::stderr().lock();
        let _ = match max {
            0 => write!(stderr, "\r{step}: {position}"),
            _ => write!(stderr, "\r{step}: {position}/{max} ({}%)", position.min(max) * 100 / max),
        };
        let _ = stderr.flush();
    }
}

impl ProgressListener for ConsoleProgress {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn publish_progress(&self, delta: u64, message: Option<&str>) {
        self.position.fetch_add(delta, Ordering::SeqCst);
        if let Some(message) = message
            && let Ok(mut step) = self.step.lock()
        {
            tracing::debug!(step = message, "Next step");
            *step = message.to_string();
        }
        self.render();
    }

    fn max_pos(&self) -> u64 {
        self.max.load(Ordering::SeqCst)
    }

    fn set_max_pos(&self, max_pos: u64) {
        self.max.store(max_pos, Ordering::SeqCst);
    }
}
