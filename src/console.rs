//! Seams towards whatever presents the run to a user: an append-only console
//! and a yes/no confirmation prompt.

use std::sync::{Arc, Mutex};

use log::info;

/// Append-only line sink. One line per notable event.
pub trait Console: Send + Sync {
    fn line(&self, line: &str);
}

/// Forwards console lines to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConsole;

impl Console for LogConsole {
    fn line(&self, line: &str) {
        info!("{line}");
    }
}

/// Keeps every line in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryConsole {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.lines.lock() {
            Ok(mut lines) => lines.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Console for MemoryConsole {
    fn line(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

impl<C: Console + ?Sized> Console for &C {
    fn line(&self, line: &str) {
        (**self).line(line)
    }
}

/// Asks the user before anything destructive happens.
pub trait Prompter {
    fn confirm(&self, title: &str, message: &str) -> bool;
}

impl<F> Prompter for F
where
    F: Fn(&str, &str) -> bool,
{
    fn confirm(&self, title: &str, message: &str) -> bool {
        self(title, message)
    }
}

/// Answers every prompt the same way, e.g. for `--yes`.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysAnswer(pub bool);

impl Prompter for AlwaysAnswer {
    fn confirm(&self, _title: &str, _message: &str) -> bool {
        self.0
    }
}
