use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// sqlprompt - interactive SQL shell with colon meta-commands
#[derive(Parser, Clone)]
#[command(name = "sqlprompt")]
#[command(version, long_about = None)]
#[command(about = "Interactive SQL shell with colon meta-commands and query templates")]
pub struct Args {
    /// Server as host, host,port or host:port. A DSN name with --driver dsn.
    #[arg(short = 'S', long, default_value = "localhost")]
    pub server: String,

    /// Server port, overrides one given with -S
    #[arg(long)]
    pub port: Option<u16>,

    /// Database name (file path for SQLite, :memory: for an in-memory database)
    #[arg(short = 'd', long, default_value = "")]
    pub database: String,

    /// Use integrated authentication
    #[arg(short = 'E', long, conflicts_with_all = ["user", "password"])]
    pub integrated: bool,

    /// Login user
    #[arg(short = 'U', long)]
    pub user: Option<String>,

    /// Login password, prompted for when -U is given without it
    #[arg(short = 'P', long, env = "SQLPROMPT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Driver: postgres, mysql, sqlite or dsn [default: from config]
    #[arg(long)]
    pub driver: Option<String>,

    /// Query timeout in seconds, 0 for none
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Cut cells longer than this many characters, 0 to disable
    #[arg(long)]
    pub truncate: Option<usize>,

    /// Render at most this many rows per result, 0 for all
    #[arg(long)]
    pub rows: Option<usize>,

    /// Run a line and exit (repeatable)
    #[arg(short, long, action = clap::ArgAction::Append)]
    pub command: Vec<String>,

    /// Run a script file and exit
    #[arg(short = 'i', long = "input-file", value_name = "FILE", conflicts_with = "command")]
    pub input_file: Option<String>,

    /// Encoding of the -i script
    #[arg(long, requires = "input_file")]
    pub enc: Option<String>,

    /// Command template definitions file
    #[arg(long, value_name = "FILE")]
    pub commands_file: Option<PathBuf>,

    /// Generate shell completions
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("integrated", &self.integrated)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("driver", &self.driver)
            .field("timeout", &self.timeout)
            .field("truncate", &self.truncate)
            .field("rows", &self.rows)
            .field("command", &self.command)
            .field("input_file", &self.input_file)
            .field("enc", &self.enc)
            .field("commands_file", &self.commands_file)
            .field("completions", &self.completions)
            .finish()
    }
}

/// Supported shells for completion generation
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<Shell> for clap_complete::Shell {
    fn from(shell: Shell) -> Self {
        match shell {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[rstest]
    fn test_arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[rstest]
    fn test_full_argument_set() {
        let args = Args::try_parse_from([
            "sqlprompt", "-S", "db1,5433", "-d", "sales", "-U", "app", "-P", "secret", "--driver",
            "postgres", "-t", "5", "--truncate", "40", "--rows", "10", "-c", "SELECT 1", "-c", "GO",
        ])
        .unwrap();

        assert_eq!(args.server, "db1,5433");
        assert_eq!(args.database, "sales");
        assert_eq!(args.user.as_deref(), Some("app"));
        assert_eq!(args.timeout, Some(5));
        assert_eq!(args.truncate, Some(40));
        assert_eq!(args.rows, Some(10));
        assert_eq!(args.command, vec!["SELECT 1", "GO"]);
    }

    #[rstest]
    fn test_debug_redacts_password() {
        let args = Args::try_parse_from(["sqlprompt", "-U", "app", "-P", "hunter2"]).unwrap();
        let debug = format!("{args:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[rstest]
    #[case(&["sqlprompt", "-E", "-U", "app"])]
    #[case(&["sqlprompt", "-c", "SELECT 1", "-i", "setup.sql"])]
    #[case(&["sqlprompt", "--enc", "latin1"])]
    fn test_conflicting_arguments(#[case] argv: &[&str]) {
        assert!(Args::try_parse_from(argv).is_err());
    }
}
