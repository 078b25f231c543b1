//! The read-eval loop: classifies each input line, runs meta-commands
//! immediately and feeds SQL into the batch accumulator.
use crate::batch::BatchAccumulator;
use crate::commands::{self, Command, LineKind, classify, help_text};
use crate::database::{ConnectionManager, DatabaseError};
use crate::format::{RenderOptions, render_result};
use crate::input::{LineReader, ReadOutcome};
use crate::prompt::ShellPrompt;
use crate::script::load_script_from_file;
use crate::templates::{PendingParam, TemplateRegistry};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    /// The connection died; the session cannot continue.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Terminal error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub truncate_chars: usize,
    pub max_rows: usize,
    pub commands_file: Option<PathBuf>,
}

pub struct Session<R: LineReader, W: Write> {
    connection: ConnectionManager,
    registry: TemplateRegistry,
    batch: BatchAccumulator,
    reader: R,
    out: W,
    prompt: ShellPrompt,
    settings: SessionSettings,
}

impl<R: LineReader, W: Write> Session<R, W> {
    /// Build a session around an open connection and load the command
    /// templates for its dialect.
    pub fn new(
        connection: ConnectionManager,
        reader: R,
        out: W,
        settings: SessionSettings,
    ) -> io::Result<Self> {
        let descriptor = connection.descriptor();
        let prompt = ShellPrompt::new(&descriptor.server.to_string(), &descriptor.database);
        let registry = TemplateRegistry::with_builtins(connection.database_type());

        let mut session = Self {
            connection,
            registry,
            batch: BatchAccumulator::new(),
            reader,
            out,
            prompt,
            settings,
        };
        session.load_templates()?;
        Ok(session)
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Read and process lines until `:quit` or end of input. The connection
    /// is closed on the way out, including after a fatal error.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let outcome = self.read_eval_loop().await;
        self.connection.close().await;
        self.out.flush()?;
        outcome
    }

    async fn read_eval_loop(&mut self) -> Result<(), SessionError> {
        loop {
            match self.reader.read_line(&self.prompt)? {
                ReadOutcome::Line(text) => {
                    if text.is_empty() {
                        self.handle_line("").await?;
                        continue;
                    }
                    for line in text.lines() {
                        if self.handle_line(line).await? == Flow::Quit {
                            return Ok(());
                        }
                    }
                }
                ReadOutcome::Interrupted => {
                    let dropped = self.batch.reset();
                    if dropped > 0 {
                        writeln!(self.out, "Pending batch discarded ({dropped} line(s))")?;
                    }
                }
                ReadOutcome::Eof => return Ok(()),
            }
            self.out.flush()?;
        }
    }

    /// Process one input line.
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow, SessionError> {
        match classify(line) {
            LineKind::MetaCommand => self.handle_meta(line).await,
            kind => {
                self.handle_batch_line(kind, line).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_batch_line(&mut self, kind: LineKind, line: &str) -> Result<(), SessionError> {
        match kind {
            LineKind::SqlFragment | LineKind::Empty => self.batch.push_line(line),
            LineKind::Terminator { trailing } => {
                if let Some(batch) = self.batch.terminate(trailing.as_deref()) {
                    debug!("[Session::handle_batch_line] executing {} byte batch", batch.len());
                    self.execute_and_render(&batch, &[], false).await?;
                }
            }
            LineKind::MetaCommand => {}
        }
        Ok(())
    }

    async fn handle_meta(&mut self, line: &str) -> Result<Flow, SessionError> {
        match commands::resolve(&self.registry, line) {
            Ok(Command::File { path, encoding }) => self.run_file(&path, encoding.as_deref()).await,
            Ok(command) => self.perform(command).await,
            Err(e) => {
                writeln!(self.out, "Error: {e}")?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn perform(&mut self, command: Command) -> Result<Flow, SessionError> {
        match command {
            Command::Help => write!(self.out, "{}", help_text(&self.registry))?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Reset => {
                let dropped = self.batch.reset();
                writeln!(self.out, "Batch reset ({dropped} line(s) discarded)")?;
            }
            Command::Reload => self.load_templates()?,
            Command::Truncate(Some(chars)) => {
                self.settings.truncate_chars = chars;
                writeln!(self.out, "Truncate value set to {chars}")?;
            }
            Command::Truncate(None) => {
                writeln!(self.out, "Truncate value is {}", self.settings.truncate_chars)?
            }
            Command::Rows(Some(rows)) => {
                self.settings.max_rows = rows;
                writeln!(self.out, "Row limit set to {rows}")?;
            }
            Command::Rows(None) => writeln!(self.out, "Row limit is {}", self.settings.max_rows)?,
            Command::Timeout(Some(seconds)) => {
                self.connection.set_timeout(seconds);
                writeln!(self.out, "Timeout set to {seconds} seconds")?;
            }
            Command::Timeout(None) => writeln!(
                self.out,
                "Timeout is {} seconds",
                self.connection.timeout_seconds()
            )?,
            Command::Use(database) => self.switch_database(&database).await?,
            Command::File { .. } => writeln!(self.out, "Error: :file cannot be used inside a script")?,
            Command::Query(query) => {
                writeln!(self.out, "Query: {}", query.text)?;
                match self.solicit(&query.pending)? {
                    Some(params) => {
                        self.execute_and_render(&query.text, &params, query.full_width)
                            .await?
                    }
                    None => writeln!(self.out, "Error: no value supplied, command cancelled")?,
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn switch_database(&mut self, database: &str) -> Result<(), SessionError> {
        match self.connection.switch_database(database).await {
            Ok(()) => writeln!(self.out, "Connected to database {database}")?,
            Err(e) => writeln!(self.out, "Error: {e}")?,
        }
        self.prompt.update(
            &self.connection.descriptor().database,
            self.connection.is_connected(),
        );
        Ok(())
    }

    /// Ask for a value per bind marker. A placeholder that appears more than
    /// once is asked for once. `None` if input ends first.
    fn solicit(&mut self, pending: &[PendingParam]) -> io::Result<Option<Vec<String>>> {
        let mut answered: HashMap<PendingParam, String> = HashMap::new();
        let mut params = Vec::with_capacity(pending.len());

        for param in pending {
            let value = match answered.get(param) {
                Some(value) => value.clone(),
                None => {
                    let Some(value) = self.reader.read_secret(&param.label())? else {
                        return Ok(None);
                    };
                    answered.insert(*param, value.clone());
                    value
                }
            };
            params.push(value);
        }
        Ok(Some(params))
    }

    async fn execute_and_render(
        &mut self,
        sql: &str,
        params: &[String],
        full_width: bool,
    ) -> Result<(), SessionError> {
        let options = RenderOptions {
            truncate_chars: if full_width { 0 } else { self.settings.truncate_chars },
            max_rows: self.settings.max_rows,
        };

        match self.connection.execute(sql, params).await {
            Ok(results) => {
                for result in &results {
                    writeln!(self.out)?;
                    write!(self.out, "{}", render_result(result, options))?;
                }
                writeln!(self.out)?;
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                writeln!(self.out, "Error: {e}")?;
                Err(SessionError::Database(e))
            }
            Err(e) => {
                writeln!(self.out, "Error: {e}")?;
                Ok(())
            }
        }
    }

    /// Run a script with its own batch. A batch left open at the end of the
    /// file is executed.
    async fn run_file(&mut self, path: &str, encoding: Option<&str>) -> Result<Flow, SessionError> {
        let content = match load_script_from_file(path, encoding) {
            Ok(content) => content,
            Err(e) => {
                writeln!(self.out, "Error: {e}")?;
                return Ok(Flow::Continue);
            }
        };
        debug!("[Session::run_file] {} line(s) from {path}", content.lines().count());

        let interactive_batch = std::mem::take(&mut self.batch);
        let flow = self.run_script_lines(&content).await;
        self.batch = interactive_batch;
        flow
    }

    async fn run_script_lines(&mut self, content: &str) -> Result<Flow, SessionError> {
        for line in content.lines() {
            match classify(line) {
                LineKind::MetaCommand => match commands::resolve(&self.registry, line) {
                    Ok(command) => {
                        if self.perform(command).await? == Flow::Quit {
                            return Ok(Flow::Quit);
                        }
                    }
                    Err(e) => writeln!(self.out, "Error: {e}")?,
                },
                kind => self.handle_batch_line(kind, line).await?,
            }
        }

        if let Some(batch) = self.batch.terminate(None) {
            self.execute_and_render(&batch, &[], false).await?;
        }
        Ok(Flow::Continue)
    }

    /// Run a script file as the whole session (`-i`).
    pub async fn run_script_file(&mut self, path: &str, encoding: Option<&str>) -> Result<(), SessionError> {
        let outcome = self.run_file(path, encoding).await.map(|_| ());
        self.connection.close().await;
        self.out.flush()?;
        outcome
    }

    /// Rebuild the registry from the built-ins and the definitions file.
    fn load_templates(&mut self) -> io::Result<()> {
        let mut registry = TemplateRegistry::with_builtins(self.connection.database_type());

        if let Some(path) = self.settings.commands_file.as_deref() {
            match registry.load_file(path) {
                Ok(skipped) => {
                    for error in skipped {
                        writeln!(
                            self.out,
                            "Warning: skipped command definition in {}, {error}",
                            path.display()
                        )?;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                    writeln!(self.out, "Warning: {e}")?;
                }
            }
        }

        debug!("[Session::load_templates] {} command(s) registered", registry.len());
        self.registry = registry;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        CellValue, ConnectionDescriptor, Credentials, ResultSet, ServerSpec, StatementResult,
    };
    use crate::input::ScriptedReader;
    use crate::test_support::{FakeConnector, FakeLog, FakeResponse};
    use std::io::Write as _;
    use std::sync::{Arc, Mutex};

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            server: ServerSpec::parse("db1", None, false),
            database: "sales".to_string(),
            credentials: Credentials::Integrated,
            driver: "postgres".to_string(),
        }
    }

    fn settings(commands_file: Option<PathBuf>) -> SessionSettings {
        SessionSettings {
            truncate_chars: 100,
            max_rows: 0,
            commands_file,
        }
    }

    async fn run_lines(
        connector: FakeConnector,
        lines: &[&str],
        secrets: &[&str],
        commands_file: Option<PathBuf>,
    ) -> (Result<(), SessionError>, String, Arc<Mutex<FakeLog>>) {
        let log = connector.log();
        let connection = ConnectionManager::open(Box::new(connector), descriptor(), 30)
            .await
            .unwrap();
        let reader = ScriptedReader::new(lines.iter().copied()).with_secrets(secrets.iter().copied());
        let mut session = Session::new(connection, reader, Vec::new(), settings(commands_file)).unwrap();
        let result = session.run().await;
        let out = String::from_utf8(session.into_output()).unwrap();
        (result, out, log)
    }

    fn one_row(value: &str) -> FakeResponse {
        FakeResponse::Results(vec![StatementResult::Rows(ResultSet {
            columns: vec!["value".to_string()],
            rows: vec![vec![CellValue::Text(value.to_string())]],
        })])
    }

    #[tokio::test]
    async fn test_batch_runs_once_on_go() {
        let connector = FakeConnector::new();
        connector.respond(one_row("x"));
        let (result, out, log) =
            run_lines(connector, &["SELECT *", "FROM Employees", "GO", "GO"], &[], None).await;

        assert!(result.is_ok());
        let log = log.lock().unwrap();
        assert_eq!(log.statements(), vec!["SELECT *\nFROM Employees"]);
        assert!(out.contains("Rows returned: 1"));
        assert_eq!(log.closed, 1);
    }

    #[tokio::test]
    async fn test_double_semicolon_terminator_carries_text() {
        let (_, _, log) = run_lines(FakeConnector::new(), &["SELECT 1", "UNION SELECT 2;;"], &[], None).await;
        assert_eq!(log.lock().unwrap().statements(), vec!["SELECT 1\nUNION SELECT 2"]);
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_batch() {
        let (result, out, log) =
            run_lines(FakeConnector::new(), &["SELECT 1", ":bogus", "GO"], &[], None).await;

        assert!(result.is_ok());
        assert!(out.contains("Error: Unknown command: :bogus"));
        assert_eq!(log.lock().unwrap().statements(), vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn test_meta_command_prints_query_and_runs_immediately() {
        let (_, out, log) = run_lines(FakeConnector::new(), &["SELECT 1", ":tables emp"], &[], None).await;

        let log = log.lock().unwrap();
        assert_eq!(log.executed.len(), 1);
        assert!(log.executed[0].0.contains("ILIKE '%emp%'"));
        assert!(out.contains("Query: SELECT table_catalog"));
    }

    #[tokio::test]
    async fn test_pending_parameters_are_solicited_and_bound() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ":top-field SELECT TOP {{0}} * FROM {{1}} WHERE {{2}} = ?").unwrap();
        writeln!(file, ":pair SELECT * FROM t WHERE a = {{0}} OR b = {{0}}").unwrap();

        let (_, _, log) = run_lines(
            FakeConnector::new(),
            &[":top-field 10 Employees Department", ":pair"],
            &["Sales", "7"],
            Some(file.path().to_path_buf()),
        )
        .await;

        let log = log.lock().unwrap();
        assert_eq!(
            log.executed[0],
            (
                "SELECT TOP 10 * FROM Employees WHERE Department = ?".to_string(),
                vec!["Sales".to_string()]
            )
        );
        assert_eq!(log.executed[1].1, vec!["7".to_string(), "7".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_solicited_value_cancels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ":emp SELECT * FROM Employees WHERE Id = {{0}}").unwrap();
        let (_, out, log) = run_lines(FakeConnector::new(), &[":emp"], &[], Some(file.path().to_path_buf())).await;
        assert!(out.contains("command cancelled"));
        assert!(log.lock().unwrap().executed.is_empty());
    }

    #[tokio::test]
    async fn test_execution_error_is_reported_and_batch_cleared() {
        let connector = FakeConnector::new();
        connector.respond(FakeResponse::Error("relation \"nope\" does not exist".to_string()));
        let (result, out, log) =
            run_lines(connector, &["SELECT * FROM nope", "GO", "GO"], &[], None).await;

        assert!(result.is_ok());
        assert!(out.contains("Error: relation \"nope\" does not exist"));
        assert_eq!(log.lock().unwrap().executed.len(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_loss_ends_session() {
        let connector = FakeConnector::new();
        connector.respond(FakeResponse::Lost("server closed the connection".to_string()));
        let (result, out, log) =
            run_lines(connector, &["SELECT 1", "GO", "SELECT 2", "GO"], &[], None).await;

        assert!(matches!(result, Err(SessionError::Database(DatabaseError::ConnectivityLost(_)))));
        assert!(out.contains("Error: Connection lost"));
        assert_eq!(log.lock().unwrap().executed.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_use_leaves_session_disconnected() {
        let connector = FakeConnector::new().refuse_database("missing");
        let (result, out, log) = run_lines(
            connector,
            &[":use missing", "SELECT 1", "GO", ":use archive", "SELECT 2", "GO"],
            &[],
            None,
        )
        .await;

        assert!(result.is_ok());
        assert!(out.contains("Error: Connection error"));
        assert!(out.contains("Error: Not connected"));
        assert!(out.contains("Connected to database archive"));
        assert_eq!(log.lock().unwrap().statements(), vec!["SELECT 2"]);
    }

    #[tokio::test]
    async fn test_settings_commands() {
        let connector = FakeConnector::new();
        connector.respond(one_row(&"x".repeat(40)));
        let (_, out, _) = run_lines(
            connector,
            &[":truncate 10", ":rows 5", ":timeout 0", ":timeout", "SELECT 1", "GO"],
            &[],
            None,
        )
        .await;

        assert!(out.contains("Truncate value set to 10"));
        assert!(out.contains("Row limit set to 5"));
        assert!(out.contains("Timeout is 0 seconds"));
        assert!(out.contains("xxxxxxxxxx[...]"));
        assert!(!out.contains(&"x".repeat(11)));
    }

    #[tokio::test]
    async fn test_src_output_is_never_truncated() {
        let connector = FakeConnector::new();
        connector.respond(one_row(&"y".repeat(200)));
        let (_, out, _) = run_lines(connector, &[":truncate 10", ":src public.v_orders"], &[], None).await;
        assert!(out.contains(&"y".repeat(200)));
    }

    #[tokio::test]
    async fn test_reset_and_quit() {
        let (result, out, log) = run_lines(
            FakeConnector::new(),
            &["DELETE FROM t", ":reset", "GO", ":quit", "SELECT 1", "GO"],
            &[],
            None,
        )
        .await;

        assert!(result.is_ok());
        assert!(out.contains("1 line(s) discarded"));
        assert!(log.lock().unwrap().executed.is_empty());
    }

    #[tokio::test]
    async fn test_pasted_text_is_split_into_lines() {
        let (_, _, log) = run_lines(FakeConnector::new(), &["SELECT 1\nGO\nSELECT 2\nGO"], &[], None).await;
        assert_eq!(log.lock().unwrap().statements(), vec!["SELECT 1", "SELECT 2"]);
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.txt");
        std::fs::write(&path, ":one SELECT 1\n").unwrap();

        let connector = FakeConnector::new();
        let log = connector.log();
        let connection = ConnectionManager::open(Box::new(connector), descriptor(), 30)
            .await
            .unwrap();
        let mut session = Session::new(
            connection,
            ScriptedReader::new(Vec::<String>::new()),
            Vec::new(),
            settings(Some(path.clone())),
        )
        .unwrap();
        assert!(session.registry().resolve(":one").is_some());

        std::fs::write(&path, ":two SELECT 2\nbroken line\n").unwrap();
        session.handle_line(":reload").await.unwrap();
        session.handle_line(":two").await.unwrap();

        assert!(session.registry().resolve(":one").is_none());
        assert_eq!(log.lock().unwrap().statements(), vec!["SELECT 2"]);
        let out = String::from_utf8(session.into_output()).unwrap();
        assert!(out.contains("Warning: skipped command definition"));
    }

    #[tokio::test]
    async fn test_file_runs_with_its_own_batch() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "INSERT INTO t VALUES (1)").unwrap();
        writeln!(script, "GO").unwrap();
        writeln!(script, ":file other.sql").unwrap();
        writeln!(script, "INSERT INTO t VALUES (2)").unwrap();
        let file_line = format!(":file {}", script.path().display());

        let (_, out, log) = run_lines(
            FakeConnector::new(),
            &["SELECT 'pending'", file_line.as_str(), "GO"],
            &[],
            None,
        )
        .await;

        assert!(out.contains("Error: :file cannot be used inside a script"));
        assert_eq!(
            log.lock().unwrap().statements(),
            vec!["INSERT INTO t VALUES (1)", "INSERT INTO t VALUES (2)", "SELECT 'pending'"]
        );
    }

    #[tokio::test]
    async fn test_templates_follow_the_dialect() {
        let connector = FakeConnector::new().with_database_type(crate::database::DatabaseType::SQLite);
        let (_, out, log) = run_lines(connector, &[":procs", ":tables"], &[], None).await;

        assert!(out.contains("Error: Unknown command: :procs"));
        assert!(log.lock().unwrap().statements()[0].contains("sqlite_master"));
    }

    #[tokio::test]
    async fn test_missing_script_is_reported() {
        let (result, out, _) = run_lines(FakeConnector::new(), &[":file /no/such/script.sql"], &[], None).await;
        assert!(result.is_ok());
        assert!(out.contains("Error: File not found"));
    }
}
