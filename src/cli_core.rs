use crate::cli::{Args, Shell};
use crate::config::Config;
use crate::database::{
    ConnectionDescriptor, ConnectionManager, Credentials, DSN_DRIVER, DatabaseError,
    DatabaseType, DatabaseTypeExt, ServerSpec, SqlxConnector,
};
use crate::input::{LineReader, ReedlineReader, ScriptedReader, StdinReader};
use crate::logging;
use crate::session::{Session, SessionError, SessionSettings};
use clap::CommandFactory;
use nu_ansi_term::Color;
use std::io::{self, IsTerminal, Write};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Terminal error: {0}")]
    Io(#[from] io::Error),
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Database(e) => CliError::Database(e),
            SessionError::Io(e) => CliError::Io(e),
        }
    }
}

/// Startup: configuration, logging, the initial connection and the choice of
/// input source.
pub struct CliCore {
    config: Config,
}

impl CliCore {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Entry point for the binary. Returns the process exit status.
    pub async fn run_with_args(args: Args) -> Result<i32, CliError> {
        let config = Config::load();
        let _guard = match logging::init(&config.logging) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {e}");
                None
            }
        };
        debug!("sqlprompt started");

        if let Some(shell) = args.completions {
            Self::generate_completions(shell, &mut io::stdout());
            return Ok(0);
        }

        Self::new(config).run(args).await
    }

    pub fn generate_completions(shell: Shell, out: &mut dyn Write) {
        let mut cmd = Args::command();
        clap_complete::generate(clap_complete::Shell::from(shell), &mut cmd, "sqlprompt", out);
    }

    /// Connect and run the session. A failed initial connection and a lost
    /// connection both yield status 1.
    pub async fn run(&self, args: Args) -> Result<i32, CliError> {
        self.log_system_info(&args);

        let descriptor = self.descriptor(&args)?;
        let timeout = args.timeout.unwrap_or(self.config.query_timeout_seconds);
        let connector = SqlxConnector::new(self.config.dsn.clone());

        let connection = match ConnectionManager::open(Box::new(connector), descriptor, timeout).await {
            Ok(connection) => connection,
            Err(e) => {
                eprintln!("Error: {e}");
                return Ok(1);
            }
        };

        let settings = SessionSettings {
            truncate_chars: args.truncate.unwrap_or(self.config.truncate_chars),
            max_rows: args.rows.unwrap_or(self.config.max_rows),
            commands_file: args
                .commands_file
                .clone()
                .or_else(|| self.config.commands_file_path()),
        };

        let outcome = if let Some(path) = &args.input_file {
            let mut session = Session::new(connection, ScriptedReader::default(), io::stdout(), settings)?;
            session.run_script_file(path, args.enc.as_deref()).await
        } else if !args.command.is_empty() {
            // A trailing terminator runs whatever the commands left pending.
            let lines = args.command.iter().cloned().chain(std::iter::once("GO".to_string()));
            Self::run_session(connection, ScriptedReader::new(lines), settings).await
        } else if io::stdin().is_terminal() {
            Self::print_banner(connection.descriptor())?;
            let reader = ReedlineReader::new(Config::history_file_path(), self.config.history_size);
            Self::run_session(connection, reader, settings).await
        } else {
            Self::run_session(connection, StdinReader::new(), settings).await
        };

        exit_status(outcome)
    }

    async fn run_session<R: LineReader>(
        connection: ConnectionManager,
        reader: R,
        settings: SessionSettings,
    ) -> Result<(), SessionError> {
        let mut session = Session::new(connection, reader, io::stdout(), settings)?;
        session.run().await
    }

    /// Build the initial descriptor, prompting for the password when a user
    /// was given without one.
    fn descriptor(&self, args: &Args) -> Result<ConnectionDescriptor, CliError> {
        let driver = args
            .driver
            .clone()
            .unwrap_or_else(|| self.config.default_driver.clone());
        let dsn = driver.eq_ignore_ascii_case(DSN_DRIVER);

        let credentials = match (&args.user, &args.password) {
            _ if args.integrated => Credentials::Integrated,
            (Some(user), Some(password)) => Credentials::Password {
                user: user.clone(),
                password: password.clone(),
            },
            (Some(user), None) => Credentials::Password {
                user: user.clone(),
                password: rpassword::prompt_password(format!("Password for {user}: "))?,
            },
            (None, _) => Credentials::Integrated,
        };

        let file_based = DatabaseType::from_driver_name(&driver).is_some_and(|t| t.is_file_based());
        let database = if args.database.is_empty() && file_based {
            ":memory:".to_string()
        } else {
            args.database.clone()
        };

        let descriptor = ConnectionDescriptor {
            server: ServerSpec::parse(&args.server, args.port, dsn),
            database,
            credentials,
            driver,
        };
        debug!("[CliCore::descriptor] {}", descriptor.connection_string());
        Ok(descriptor)
    }

    fn print_banner(descriptor: &ConnectionDescriptor) -> io::Result<()> {
        let mut out = io::stdout();
        writeln!(
            out,
            "{}",
            Color::Green.bold().paint(format!(
                "Connected to {} database {}",
                descriptor.server, descriptor.database
            ))
        )?;
        writeln!(
            out,
            "Type :help for commands. End a batch with GO or ;; and leave with :quit."
        )?;
        Ok(())
    }

    fn log_system_info(&self, args: &Args) {
        debug!("Operating System: {}", std::env::consts::OS);
        debug!("Architecture: {}", std::env::consts::ARCH);
        debug!("CLI Arguments: {args:?}");
    }
}

/// Map the session outcome to a process exit status. A lost connection was
/// already reported by the session.
fn exit_status(outcome: Result<(), SessionError>) -> Result<i32, CliError> {
    match outcome {
        Ok(()) => Ok(0),
        Err(SessionError::Database(e)) => {
            debug!("[cli_core::exit_status] session ended by {e}");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("sqlprompt").chain(argv.iter().copied())).unwrap()
    }

    #[rstest]
    fn test_descriptor_from_arguments() {
        let core = CliCore::new(Config::default());
        let descriptor = core
            .descriptor(&args(&["-S", "db1,5433", "-d", "sales", "-U", "app", "-P", "secret"]))
            .unwrap();

        assert_eq!(descriptor.server.name, "db1");
        assert_eq!(descriptor.server.port, Some(5433));
        assert_eq!(descriptor.driver, "postgres");
        assert_eq!(
            descriptor.credentials,
            Credentials::Password {
                user: "app".to_string(),
                password: "secret".to_string()
            }
        );
    }

    #[rstest]
    fn test_dsn_driver_and_sqlite_default() {
        let core = CliCore::new(Config::default());

        let descriptor = core.descriptor(&args(&["-S", "reporting", "--driver", "dsn", "-E"])).unwrap();
        assert!(descriptor.server.dsn);
        assert_eq!(descriptor.credentials, Credentials::Integrated);

        let descriptor = core.descriptor(&args(&["--driver", "sqlite"])).unwrap();
        assert_eq!(descriptor.database, ":memory:");
    }

    #[rstest]
    fn test_exit_status() {
        assert_eq!(exit_status(Ok(())).unwrap(), 0);
        let lost = SessionError::Database(DatabaseError::ConnectivityLost("reset".to_string()));
        assert_eq!(exit_status(Err(lost)).unwrap(), 1);
        let io = SessionError::Io(io::Error::other("broken pipe"));
        assert!(exit_status(Err(io)).is_err());
    }

    #[rstest]
    fn test_completions_are_generated() {
        let mut out = Vec::new();
        CliCore::generate_completions(Shell::Bash, &mut out);
        assert!(String::from_utf8(out).unwrap().contains("sqlprompt"));
    }

    #[tokio::test]
    async fn test_command_mode_against_sqlite() {
        let core = CliCore::new(Config::default());
        let status = core
            .run(args(&["--driver", "sqlite", "-c", "SELECT 1 AS one", "--commands-file", "/nonexistent/commands.txt"]))
            .await
            .unwrap();
        assert_eq!(status, 0);
    }

    #[tokio::test]
    async fn test_failed_initial_connection_is_status_one() {
        let core = CliCore::new(Config::default());
        let status = core
            .run(args(&["--driver", "sqlite", "-d", "/nonexistent/dir/app.db", "-c", "SELECT 1"]))
            .await
            .unwrap();
        assert_eq!(status, 1);
    }
}
