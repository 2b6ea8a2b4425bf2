use crate::common::*;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sink for evaluator log lines. Every call to `line_writer` starts a new
/// line (the prefix is already written); returning `None` discards it.
pub trait Logger: Debug {
    fn line_writer(&mut self) -> Option<&mut dyn Write>;
}

#[derive(Debug, Default)]
pub struct DummyLogger;

/// Keeps all lines in memory. Lines nobody took out with `take_contents`
/// are written to stderr when the logger is dropped.
#[derive(Debug)]
pub struct VecLogger {
    instance_id: InstanceId,
    buffer: Vec<u8>,
}

#[derive(Debug)]
pub struct FileLogger {
    instance_id: InstanceId,
    file: std::fs::File,
}

// "EVAL(<instance>) at <unix seconds> "
fn write_line_prefix(w: &mut dyn Write, instance_id: InstanceId) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.);
    let _ = write!(w, "EVAL({}) at {:.6} ", instance_id, secs);
}

impl VecLogger {
    pub fn new(instance_id: InstanceId) -> Self {
        Self{ instance_id, buffer: Vec::new() }
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn take_contents(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

impl FileLogger {
    pub fn new(instance_id: InstanceId, file: std::fs::File) -> Self {
        Self{ instance_id, file }
    }
}

impl Logger for DummyLogger {
    fn line_writer(&mut self) -> Option<&mut dyn Write> {
        None
    }
}

impl Logger for VecLogger {
    fn line_writer(&mut self) -> Option<&mut dyn Write> {
        write_line_prefix(&mut self.buffer, self.instance_id);
        Some(&mut self.buffer)
    }
}

impl Logger for FileLogger {
    fn line_writer(&mut self) -> Option<&mut dyn Write> {
        write_line_prefix(&mut self.file, self.instance_id);
        Some(&mut self.file)
    }
}

impl Drop for VecLogger {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let stderr = std::io::stderr();
        let mut lock = stderr.lock();
        let _ = writeln!(lock, "--- EVAL({}) LOG ---", self.instance_id);
        let _ = lock.write_all(&self.buffer);
    }
}
