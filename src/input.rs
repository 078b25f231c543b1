//! Line sources for the session: an interactive line editor, plain stdin and
//! pre-scripted input.
use crate::prompt::ShellPrompt;
use reedline::{FileBackedHistory, Reedline, Signal};
use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// May hold several lines when text was pasted.
    Line(String),
    /// Ctrl+C.
    Interrupted,
    /// Ctrl+D or end of input.
    Eof,
}

pub trait LineReader {
    fn read_line(&mut self, prompt: &ShellPrompt) -> io::Result<ReadOutcome>;

    /// Ask for a value without echoing it. `None` on end of input.
    fn read_secret(&mut self, label: &str) -> io::Result<Option<String>>;
}

/// Interactive editor with file-backed history.
pub struct ReedlineReader {
    editor: Reedline,
}

impl ReedlineReader {
    pub fn new(history_path: Option<PathBuf>, history_size: usize) -> Self {
        let mut editor = Reedline::create().use_bracketed_paste(true);
        if let Some(path) = history_path {
            match FileBackedHistory::with_file(history_size, path.clone()) {
                Ok(history) => editor = editor.with_history(Box::new(history)),
                Err(e) => debug!(
                    "[ReedlineReader::new] history disabled, cannot use {}: {e}",
                    path.display()
                ),
            }
        }
        Self { editor }
    }
}

impl LineReader for ReedlineReader {
    fn read_line(&mut self, prompt: &ShellPrompt) -> io::Result<ReadOutcome> {
        match self.editor.read_line(prompt)? {
            Signal::Success(buffer) => Ok(ReadOutcome::Line(buffer)),
            Signal::CtrlC => Ok(ReadOutcome::Interrupted),
            Signal::CtrlD => Ok(ReadOutcome::Eof),
        }
    }

    fn read_secret(&mut self, label: &str) -> io::Result<Option<String>> {
        rpassword::prompt_password(format!("{label}: ")).map(Some)
    }
}

/// Reads piped standard input. Nothing is echoed.
pub struct StdinReader {
    stdin: io::StdinLock<'static>,
}

impl StdinReader {
    pub fn new() -> Self {
        Self {
            stdin: io::stdin().lock(),
        }
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.stdin.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

impl Default for StdinReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReader for StdinReader {
    fn read_line(&mut self, _prompt: &ShellPrompt) -> io::Result<ReadOutcome> {
        Ok(match self.next_line()? {
            Some(line) => ReadOutcome::Line(line),
            None => ReadOutcome::Eof,
        })
    }

    fn read_secret(&mut self, _label: &str) -> io::Result<Option<String>> {
        self.next_line()
    }
}

/// Fixed input: `-c` commands, tests.
#[derive(Debug, Default)]
pub struct ScriptedReader {
    lines: VecDeque<String>,
    secrets: VecDeque<String>,
}

impl ScriptedReader {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Answers for [`LineReader::read_secret`], in order.
    pub fn with_secrets<I, S>(mut self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secrets = secrets.into_iter().map(Into::into).collect();
        self
    }
}

impl LineReader for ScriptedReader {
    fn read_line(&mut self, _prompt: &ShellPrompt) -> io::Result<ReadOutcome> {
        Ok(match self.lines.pop_front() {
            Some(line) => ReadOutcome::Line(line),
            None => ReadOutcome::Eof,
        })
    }

    fn read_secret(&mut self, _label: &str) -> io::Result<Option<String>> {
        Ok(self.secrets.pop_front())
    }
}
