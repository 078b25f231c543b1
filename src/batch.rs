//! Accumulates SQL lines until a batch terminator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Empty,
    Accumulating,
}

#[derive(Debug, Default)]
pub struct BatchAccumulator {
    lines: Vec<String>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BatchState {
        if self.lines.is_empty() {
            BatchState::Empty
        } else {
            BatchState::Accumulating
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Append a SQL fragment or blank line. Blank lines are only kept once a
    /// batch has started.
    pub fn push_line(&mut self, line: &str) {
        if self.lines.is_empty() && line.trim().is_empty() {
            return;
        }
        self.lines.push(line.to_string());
    }

    /// Handle a terminator line. Returns the batch to execute, leaving the
    /// accumulator empty, or `None` if there is nothing to run.
    pub fn terminate(&mut self, trailing: Option<&str>) -> Option<String> {
        if let Some(text) = trailing {
            self.push_line(text);
        }
        if self.lines.is_empty() {
            return None;
        }
        let batch = self.lines.join("\n");
        self.lines.clear();
        Some(batch)
    }

    /// Discard the pending batch. Returns the number of lines dropped.
    pub fn reset(&mut self) -> usize {
        let dropped = self.lines.len();
        self.lines.clear();
        dropped
    }
}
