use crate::common::*;
use std::{cell::RefCell, rc::Rc};

/// The single side-effecting primitive the evaluator needs from its
/// embedding. Where the text ends up is up to the host.
pub trait Host: Debug {
    fn emit(&mut self, text: &str);
}

#[derive(Debug, Default)]
pub struct StdoutHost;

/// Keeps every emitted line, mostly useful for tests and REPL-like hosts.
/// Clones share the same buffer, so a caller can keep one handle and give
/// the other to the evaluator.
#[derive(Debug, Default, Clone)]
pub struct BufferHost {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Host for StdoutHost {
    fn emit(&mut self, text: &str) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{}", text);
    }
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
    pub fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }
}

impl Host for BufferHost {
    fn emit(&mut self, text: &str) {
        self.lines.borrow_mut().push(text.to_string());
    }
}
