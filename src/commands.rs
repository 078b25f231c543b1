//! Line classification and meta-command resolution.
//!
//! Resolution is a pure function of the template registry and the typed line:
//! built-in actions become [`Command`] variants, everything else is looked up
//! in the registry and substituted into a ready-to-run [`ResolvedQuery`].

use crate::templates::{
    COMMAND_PREFIX, PendingParam, TemplateError, TemplateRegistry, TemplateSource, substitute,
};
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;
use tracing::debug;

/// What a single input line means to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    MetaCommand,
    SqlFragment,
    /// `GO` or a line ending in `;;`. Carries any text before the `;;`.
    Terminator { trailing: Option<String> },
    Empty,
}

pub fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Empty;
    }
    if trimmed.starts_with(COMMAND_PREFIX) {
        return LineKind::MetaCommand;
    }
    if trimmed.eq_ignore_ascii_case("GO") {
        return LineKind::Terminator { trailing: None };
    }
    if let Some(before) = line.trim_end().strip_suffix(";;") {
        let trailing = (!before.trim().is_empty()).then(|| before.to_string());
        return LineKind::Terminator { trailing };
    }
    LineKind::SqlFragment
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}. Use :help for a list of available commands")]
    UnknownCommand(String),

    #[error("Unsupported modifier {modifier} for {command}")]
    UnsupportedModifier { command: String, modifier: String },

    #[error("Invalid arguments for {command}: {detail}")]
    ArgumentCountMismatch { command: String, detail: String },

    #[error("Invalid argument for {command}: {detail}")]
    InvalidArgument { command: String, detail: String },
}

/// A meta-command split into name, modifier flags and positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Without the `:` prefix.
    pub name: String,
    /// Without the leading `-`, in the order typed.
    pub modifiers: Vec<String>,
    pub args: Vec<String>,
}

impl ParsedCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?.strip_prefix(COMMAND_PREFIX)?.to_string();

        let mut modifiers = Vec::new();
        let mut args = Vec::new();
        for token in tokens {
            match token.strip_prefix('-') {
                Some(flag) if flag.starts_with(|c: char| c.is_ascii_alphabetic()) => {
                    modifiers.push(flag.to_string())
                }
                _ => args.push(token.to_string()),
            }
        }

        Some(Self {
            name,
            modifiers,
            args,
        })
    }

    fn display_name(&self) -> String {
        format!("{COMMAND_PREFIX}{}", self.name)
    }

    fn reject_modifiers(&self, allowed: &[&str]) -> Result<(), CommandError> {
        match self.modifiers.iter().find(|m| !allowed.contains(&m.as_str())) {
            Some(modifier) => Err(CommandError::UnsupportedModifier {
                command: self.display_name(),
                modifier: format!("-{modifier}"),
            }),
            None => Ok(()),
        }
    }

    fn at_most(&self, count: usize) -> Result<(), CommandError> {
        if self.args.len() > count {
            return Err(CommandError::ArgumentCountMismatch {
                command: self.display_name(),
                detail: format!("expected at most {count} argument(s), got {}", self.args.len()),
            });
        }
        Ok(())
    }

    fn optional_number<T: std::str::FromStr>(&self) -> Result<Option<T>, CommandError> {
        self.at_most(1)?;
        self.args
            .first()
            .map(|raw| {
                raw.parse::<T>().map_err(|_| CommandError::InvalidArgument {
                    command: self.display_name(),
                    detail: format!("'{raw}' is not a non-negative number"),
                })
            })
            .transpose()
    }
}

/// A template resolved against its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    /// Registry key that produced the query, variant suffixes included.
    pub template: String,
    pub text: String,
    pub pending: Vec<PendingParam>,
    pub full_width: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Reset,
    Reload,
    /// `None` reports the current value.
    Truncate(Option<usize>),
    Rows(Option<usize>),
    Timeout(Option<u64>),
    Use(String),
    File {
        path: String,
        encoding: Option<String>,
    },
    Query(ResolvedQuery),
}

/// Actions handled by the shell itself, with their help metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum BuiltinCommand {
    Help,
    Truncate,
    Rows,
    Use,
    Timeout,
    File,
    Reset,
    Reload,
    Quit,
}

impl BuiltinCommand {
    /// Names accepted for this action, primary name first.
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            BuiltinCommand::Help => &["help"],
            BuiltinCommand::Truncate => &["truncate"],
            BuiltinCommand::Rows => &["rows"],
            BuiltinCommand::Use => &["use"],
            BuiltinCommand::Timeout => &["timeout"],
            BuiltinCommand::File => &["file"],
            BuiltinCommand::Reset => &["reset"],
            BuiltinCommand::Reload => &["reload"],
            BuiltinCommand::Quit => &["quit", "exit", "q"],
        }
    }

    pub fn usage(&self) -> &'static str {
        match self {
            BuiltinCommand::Help => ":help",
            BuiltinCommand::Truncate => ":truncate [chars]",
            BuiltinCommand::Rows => ":rows [n]",
            BuiltinCommand::Use => ":use database_name",
            BuiltinCommand::Timeout => ":timeout [seconds]",
            BuiltinCommand::File => ":file [-enc encoding] path",
            BuiltinCommand::Reset => ":reset",
            BuiltinCommand::Reload => ":reload",
            BuiltinCommand::Quit => ":quit | :exit | :q",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinCommand::Help => "prints the command list",
            BuiltinCommand::Truncate => "truncates result cells to at most chars characters. 0 shows full contents",
            BuiltinCommand::Rows => "shows at most n rows per result. 0 shows every row",
            BuiltinCommand::Use => "reconnects to another database on the same server",
            BuiltinCommand::Timeout => "sets the query timeout. 0 disables it",
            BuiltinCommand::File => "runs the statements in a script file",
            BuiltinCommand::Reset => "discards the pending batch",
            BuiltinCommand::Reload => "reloads user-defined commands from the definitions file",
            BuiltinCommand::Quit => "ends the session",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::iter().find(|b| b.names().contains(&name))
    }
}

/// Help lines for the stock query commands. Only entries the current
/// dialect registers are listed.
const QUERY_COMMAND_HELP: &[(&str, &str, &str)] = &[
    (":tables", ":tables [table_name]", "lists tables, or tables like table_name"),
    (":cols", ":cols [-eq] table_name [-full]", "lists columns of tables like (or equal to) table_name"),
    (":views", ":views [view_name] [-full]", "lists views, or views like view_name"),
    (":procs", ":procs [proc_name] [-full]", "lists procedures, or procedures like proc_name"),
    (":funcs", ":funcs [func_name] [-full]", "lists functions, or functions like func_name"),
    (":src", ":src obj.name", "shows the source of a view or routine, never truncated"),
    (":deps", ":deps [to|from] obj.name", "shows view dependencies of an object"),
    (":dbs", ":dbs [name]", "lists databases, or databases like name"),
];

/// Text printed by `:help`.
pub fn help_text(registry: &TemplateRegistry) -> String {
    let mut out = String::new();
    out.push_str("Syntax: :command required_parameter [optional_parameter]\n");
    out.push_str("Modifiers:\n");
    out.push_str("  -eq    exact match instead of LIKE comparisons\n");
    out.push_str("  -full  return every column instead of a smaller subset\n");
    out.push_str("Batches end with a line containing GO, or a line ending in ;;\n\n");

    let width = BuiltinCommand::iter()
        .map(|b| b.usage().len())
        .chain(QUERY_COMMAND_HELP.iter().map(|(_, usage, _)| usage.len()))
        .max()
        .unwrap_or(0);

    out.push_str("Shell commands:\n");
    for builtin in BuiltinCommand::iter() {
        out.push_str(&format!("  {:<width$} -- {}\n", builtin.usage(), builtin.description()));
    }

    out.push_str("\nQuery commands:\n");
    for (name, usage, description) in QUERY_COMMAND_HELP {
        let is_builtin = registry
            .resolve(name)
            .is_some_and(|t| t.source == TemplateSource::BuiltIn);
        if is_builtin {
            out.push_str(&format!("  {usage:<width$} -- {description}\n"));
        }
    }

    let user_defined: Vec<_> = registry
        .iter()
        .filter(|t| t.source == TemplateSource::UserDefined)
        .collect();
    if !user_defined.is_empty() {
        out.push_str("\nUser-defined commands:\n");
        let name_width = user_defined.iter().map(|t| t.name.len()).max().unwrap_or(0);
        for template in user_defined {
            out.push_str(&format!(
                "  {:<name_width$} -- {}\n",
                template.name, template.query_pattern
            ));
        }
    }

    out
}

/// Resolve a meta-command line.
pub fn resolve(registry: &TemplateRegistry, line: &str) -> Result<Command, CommandError> {
    let parsed = ParsedCommand::parse(line.trim())
        .ok_or_else(|| CommandError::UnknownCommand(line.trim().to_string()))?;
    debug!(
        "[commands::resolve] name={} modifiers={:?} args={:?}",
        parsed.name, parsed.modifiers, parsed.args
    );

    match BuiltinCommand::from_name(&parsed.name) {
        Some(builtin) => resolve_builtin(builtin, &parsed),
        None => resolve_template(registry, parsed).map(Command::Query),
    }
}

fn resolve_builtin(builtin: BuiltinCommand, parsed: &ParsedCommand) -> Result<Command, CommandError> {
    if builtin == BuiltinCommand::File {
        parsed.reject_modifiers(&["enc"])?;
        return resolve_file(parsed);
    }
    parsed.reject_modifiers(&[])?;

    match builtin {
        BuiltinCommand::Help => {
            parsed.at_most(0)?;
            Ok(Command::Help)
        }
        BuiltinCommand::Quit => {
            parsed.at_most(0)?;
            Ok(Command::Quit)
        }
        BuiltinCommand::Reset => {
            parsed.at_most(0)?;
            Ok(Command::Reset)
        }
        BuiltinCommand::Reload => {
            parsed.at_most(0)?;
            Ok(Command::Reload)
        }
        BuiltinCommand::Truncate => parsed.optional_number().map(Command::Truncate),
        BuiltinCommand::Rows => parsed.optional_number().map(Command::Rows),
        BuiltinCommand::Timeout => parsed.optional_number().map(Command::Timeout),
        BuiltinCommand::Use => match parsed.args.as_slice() {
            [database] => Ok(Command::Use(database.clone())),
            _ => Err(CommandError::ArgumentCountMismatch {
                command: parsed.display_name(),
                detail: "expected exactly one database name".to_string(),
            }),
        },
        BuiltinCommand::File => resolve_file(parsed),
    }
}

fn resolve_file(parsed: &ParsedCommand) -> Result<Command, CommandError> {
    let with_encoding = parsed.modifiers.iter().any(|m| m == "enc");
    match (with_encoding, parsed.args.as_slice()) {
        (false, [path]) => Ok(Command::File {
            path: path.clone(),
            encoding: None,
        }),
        (true, [encoding, path]) => Ok(Command::File {
            path: path.clone(),
            encoding: Some(encoding.clone()),
        }),
        _ => Err(CommandError::ArgumentCountMismatch {
            command: parsed.display_name(),
            detail: "usage is :file [-enc encoding] path".to_string(),
        }),
    }
}

/// Leading words that pick a sub-template instead of being an argument.
const SUB_COMMANDS: &[(&str, &[&str])] = &[(":deps", &["to", "from"])];

fn is_sub_command(base: &str, word: &str) -> bool {
    SUB_COMMANDS
        .iter()
        .any(|(command, words)| *command == base && words.contains(&word))
}

fn resolve_template(registry: &TemplateRegistry, parsed: ParsedCommand) -> Result<ResolvedQuery, CommandError> {
    let mut base = parsed.display_name();
    let mut args = parsed.args;

    // `:deps to x` selects `:deps-to`. A lone `to` is an object name.
    if args.len() > 1 && is_sub_command(&base, &args[0]) {
        let sub = format!("{base}-{}", args[0]);
        if registry.resolve(&sub).is_some() {
            base = sub;
            args.remove(0);
        }
    }

    let mut modifiers = parsed.modifiers;
    modifiers.sort();
    modifiers.dedup();

    let key = std::iter::once(base.as_str())
        .chain(modifiers.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join("-");

    let Some(template) = registry.resolve(&key) else {
        if registry.resolve(&base).is_none() {
            return Err(CommandError::UnknownCommand(base));
        }
        return Err(CommandError::UnsupportedModifier {
            command: base,
            modifier: modifiers
                .iter()
                .map(|m| format!("-{m}"))
                .collect::<Vec<_>>()
                .join(" "),
        });
    };

    let substitution = substitute(&template.query_pattern, &args).map_err(|e| match e {
        TemplateError::TooManyArguments { .. } | TemplateError::MissingQuotedArgument { .. } => {
            CommandError::ArgumentCountMismatch {
                command: key.clone(),
                detail: e.to_string(),
            }
        }
        other => CommandError::InvalidArgument {
            command: key.clone(),
            detail: other.to_string(),
        },
    })?;

    Ok(ResolvedQuery {
        template: key,
        text: substitution.text,
        pending: substitution.pending,
        full_width: template.full_width,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseType;
    use rstest::{fixture, rstest};

    #[fixture]
    fn registry() -> TemplateRegistry {
        let mut registry = TemplateRegistry::with_builtins(DatabaseType::PostgreSQL);
        registry.load_definitions(
            ":top SELECT TOP {0} * FROM {1}\n\
             :top-field SELECT TOP {0} * FROM {1} WHERE {2} = ?\n",
        );
        registry
    }

    fn query(command: Command) -> ResolvedQuery {
        match command {
            Command::Query(q) => q,
            other => panic!("expected a query, got {other:?}"),
        }
    }

    #[rstest]
    #[case("", LineKind::Empty)]
    #[case("   \t", LineKind::Empty)]
    #[case(":tables", LineKind::MetaCommand)]
    #[case("  :help", LineKind::MetaCommand)]
    #[case("GO", LineKind::Terminator { trailing: None })]
    #[case("  go ", LineKind::Terminator { trailing: None })]
    #[case(";;", LineKind::Terminator { trailing: None })]
    #[case("SELECT 1;;", LineKind::Terminator { trailing: Some("SELECT 1".to_string()) })]
    #[case("SELECT 1;; ", LineKind::Terminator { trailing: Some("SELECT 1".to_string()) })]
    #[case("SELECT 1;", LineKind::SqlFragment)]
    #[case("GOTO", LineKind::SqlFragment)]
    #[case("SELECT * FROM Employees", LineKind::SqlFragment)]
    fn test_classify(#[case] line: &str, #[case] expected: LineKind) {
        assert_eq!(classify(line), expected);
    }

    #[rstest]
    fn test_parse_extracts_modifiers_out_of_order() {
        let parsed = ParsedCommand::parse(":cols Employees -full -eq").unwrap();
        assert_eq!(parsed.name, "cols");
        assert_eq!(parsed.modifiers, vec!["full", "eq"]);
        assert_eq!(parsed.args, vec!["Employees"]);

        let parsed = ParsedCommand::parse(":top -5 x").unwrap();
        assert!(parsed.modifiers.is_empty());
        assert_eq!(parsed.args, vec!["-5", "x"]);
    }

    #[rstest]
    fn test_top_with_all_arguments(registry: TemplateRegistry) {
        let q = query(resolve(&registry, ":top 5 Employees").unwrap());
        assert_eq!(q.text, "SELECT TOP 5 * FROM Employees");
        assert!(q.pending.is_empty());
    }

    #[rstest]
    fn test_top_field_leaves_one_pending_parameter(registry: TemplateRegistry) {
        let q = query(resolve(&registry, ":top-field 10 Employees Department").unwrap());
        assert_eq!(q.text, "SELECT TOP 10 * FROM Employees WHERE Department = ?");
        assert_eq!(q.pending.len(), 1);
    }

    #[rstest]
    fn test_missing_unquoted_argument_is_solicited(registry: TemplateRegistry) {
        let q = query(resolve(&registry, ":top 5").unwrap());
        assert_eq!(q.text, "SELECT TOP 5 * FROM ?");
        assert_eq!(q.pending, vec![PendingParam::Argument(1)]);
    }

    #[rstest]
    #[case(":cols Employees", ":cols", "ILIKE '%Employees%'")]
    #[case(":cols -eq Employees", ":cols-eq", "table_name = 'Employees'")]
    #[case(":cols Employees -full -eq", ":cols-eq-full", "SELECT * FROM")]
    #[case(":views -full", ":views-full", "ILIKE '%%'")]
    #[case(":deps to public.orders", ":deps-to", "= 'public.orders'")]
    #[case(":deps from v_orders", ":deps-from", "= 'v_orders'")]
    #[case(":deps orders", ":deps", "= 'orders'")]
    #[case(":deps to", ":deps", "= 'to'")]
    #[case(":views full", ":views", "ILIKE '%full%'")]
    #[case(":cols eq", ":cols", "ILIKE '%eq%'")]
    fn test_modifier_variants(
        registry: TemplateRegistry,
        #[case] line: &str,
        #[case] template: &str,
        #[case] fragment: &str,
    ) {
        let q = query(resolve(&registry, line).unwrap());
        assert_eq!(q.template, template);
        assert!(q.text.contains(fragment), "{} does not contain {fragment}", q.text);
    }

    #[rstest]
    fn test_src_is_full_width(registry: TemplateRegistry) {
        let q = query(resolve(&registry, ":src public.v_orders").unwrap());
        assert!(q.full_width);
    }

    #[rstest]
    #[case(":bogus", CommandError::UnknownCommand(":bogus".to_string()))]
    #[case(":tables -full", CommandError::UnsupportedModifier { command: ":tables".to_string(), modifier: "-full".to_string() })]
    #[case(":help -x", CommandError::UnsupportedModifier { command: ":help".to_string(), modifier: "-x".to_string() })]
    fn test_resolution_errors(registry: TemplateRegistry, #[case] line: &str, #[case] expected: CommandError) {
        assert_eq!(resolve(&registry, line).unwrap_err(), expected);
    }

    #[rstest]
    #[case(":cols")]
    #[case(":top 1 2 3")]
    #[case(":use")]
    #[case(":use a b")]
    #[case(":truncate 1 2")]
    #[case(":file")]
    #[case(":file -enc utf-16")]
    fn test_argument_count_mismatch(registry: TemplateRegistry, #[case] line: &str) {
        assert!(matches!(
            resolve(&registry, line),
            Err(CommandError::ArgumentCountMismatch { .. })
        ));
    }

    #[rstest]
    #[case(":truncate abc")]
    #[case(":rows -5")]
    #[case(":timeout soon")]
    fn test_invalid_numbers(registry: TemplateRegistry, #[case] line: &str) {
        assert!(matches!(
            resolve(&registry, line),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[rstest]
    #[case(":help", Command::Help)]
    #[case(":quit", Command::Quit)]
    #[case(":exit", Command::Quit)]
    #[case(":q", Command::Quit)]
    #[case(":reset", Command::Reset)]
    #[case(":reload", Command::Reload)]
    #[case(":truncate", Command::Truncate(None))]
    #[case(":truncate 0", Command::Truncate(Some(0)))]
    #[case(":rows 20", Command::Rows(Some(20)))]
    #[case(":timeout 5", Command::Timeout(Some(5)))]
    #[case(":use archive", Command::Use("archive".to_string()))]
    #[case(":file load.sql", Command::File { path: "load.sql".to_string(), encoding: None })]
    #[case(":file -enc utf-16 load.sql", Command::File { path: "load.sql".to_string(), encoding: Some("utf-16".to_string()) })]
    fn test_builtin_actions(registry: TemplateRegistry, #[case] line: &str, #[case] expected: Command) {
        assert_eq!(resolve(&registry, line).unwrap(), expected);
    }

    #[rstest]
    fn test_builtin_actions_win_over_templates() {
        let mut registry = TemplateRegistry::new();
        registry.register(":quit", "SELECT 1", TemplateSource::UserDefined);
        assert_eq!(resolve(&registry, ":quit").unwrap(), Command::Quit);
    }

    #[rstest]
    fn test_every_builtin_name_is_reserved() {
        for builtin in BuiltinCommand::iter() {
            for name in builtin.names() {
                assert!(crate::templates::RESERVED_ACTIONS.contains(name), "{name} not reserved");
            }
        }
    }

    #[rstest]
    fn test_help_lists_commands(mut registry: TemplateRegistry) {
        registry.register(":emp", "SELECT * FROM Employees", TemplateSource::UserDefined);
        let help = help_text(&registry);
        assert!(help.contains(":cols [-eq] table_name [-full]"));
        assert!(help.contains(":file [-enc encoding] path"));
        assert!(help.contains(":emp"));
        assert!(help.contains("SELECT TOP {0} * FROM {1}"));

        let sqlite = help_text(&TemplateRegistry::with_builtins(DatabaseType::SQLite));
        assert!(!sqlite.contains(":procs"));
    }
}
