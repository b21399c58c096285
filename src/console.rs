use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::lock;

pub const DEFAULT_CONSOLE_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleKind {
    Output,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    pub kind: ConsoleKind,
    pub text: String,
}

/// Bounded console sink shared by a foreground context and its background descendants.
///
/// `print` appends to the open line; `print_line` and `error` close it. Oldest
/// lines are evicted once the capacity is reached.
#[derive(Debug, Clone)]
pub struct ConsoleBuffer {
    inner: Arc<Mutex<ConsoleState>>,
}

#[derive(Debug)]
struct ConsoleState {
    lines: VecDeque<ConsoleLine>,
    open_line: Option<String>,
    capacity: usize,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConsoleState {
                lines: VecDeque::new(),
                open_line: None,
                capacity: capacity.max(1),
            })),
        }
    }

    pub fn print(&self, text: &str) {
        let mut state = lock(&self.inner);
        state.open_line.get_or_insert_with(String::new).push_str(text);
    }

    pub fn print_line(&self, text: &str) {
        let mut state = lock(&self.inner);
        let mut line = state.open_line.take().unwrap_or_default();
        line.push_str(text);
        state.push(ConsoleLine { kind: ConsoleKind::Output, text: line });
    }

    pub fn error(&self, text: &str) {
        let mut state = lock(&self.inner);
        state.flush_open();
        state.push(ConsoleLine { kind: ConsoleKind::Error, text: text.to_string() });
    }

    /// Snapshot of the closed lines followed by the open one, if any.
    pub fn entries(&self) -> Vec<ConsoleLine> {
        let state = lock(&self.inner);
        let mut out: Vec<ConsoleLine> = state.lines.iter().cloned().collect();
        if let Some(open) = &state.open_line {
            out.push(ConsoleLine { kind: ConsoleKind::Output, text: open.clone() });
        }
        out
    }

    /// Removes and returns every line, closing the open one.
    pub fn drain(&self) -> Vec<ConsoleLine> {
        let mut state = lock(&self.inner);
        state.flush_open();
        state.lines.drain(..).collect()
    }

    pub fn clear(&self) {
        let mut state = lock(&self.inner);
        state.lines.clear();
        state.open_line = None;
    }

    pub fn len(&self) -> usize {
        let state = lock(&self.inner);
        state.lines.len() + usize::from(state.open_line.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn same_buffer(&self, other: &ConsoleBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_CAPACITY)
    }
}

impl ConsoleState {
    fn push(&mut self, line: ConsoleLine) {
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    fn flush_open(&mut self) {
        if let Some(open) = self.open_line.take() {
            self.push(ConsoleLine { kind: ConsoleKind::Output, text: open });
        }
    }
}
