//! Named command templates and positional placeholder substitution.
//!
//! A template maps a command name such as `:cols` to a query pattern. Patterns
//! use `{N}` for the N-th (zero-based) argument and `{N:default}` for an
//! argument with a fallback. Arguments are injected as text; an argument that
//! is not supplied becomes a `?` bind marker whose value is asked for just
//! before execution.
use crate::database::DatabaseType;
use crate::sql_text::{bind_marker_offsets, is_quoted_at};
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

pub const COMMAND_PREFIX: char = ':';

/// Names handled directly by the shell. They cannot be redefined.
pub const RESERVED_ACTIONS: &[&str] = &[
    "help", "quit", "exit", "q", "truncate", "rows", "use", "timeout", "file", "reset", "reload",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("line {line}: {reason}")]
    MalformedDefinition { line: usize, reason: String },

    #[error("Cannot read command definitions from {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("expected at most {expected} argument(s), got {supplied}")]
    TooManyArguments { expected: usize, supplied: usize },

    #[error("argument {index} is required here")]
    MissingQuotedArgument { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSource {
    BuiltIn,
    UserDefined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub name: String,
    pub query_pattern: String,
    pub source: TemplateSource,
    /// Output is never truncated (object source text).
    pub full_width: bool,
}

/// A value to be solicited from the user for one `?` bind marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingParam {
    /// Stands in for an argument that was not supplied.
    Argument(usize),
    /// A `?` written into the template itself, numbered from 1.
    Marker(usize),
}

impl PendingParam {
    pub fn label(&self) -> String {
        match self {
            PendingParam::Argument(index) => format!("Value for {{{index}}}"),
            PendingParam::Marker(n) => format!("Value for parameter {n}"),
        }
    }
}

/// Resolved query text plus one entry per `?` bind marker, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    pub pending: Vec<PendingParam>,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{(\d+)(?::([^}]*))?\}").expect("placeholder pattern is valid")
    })
}

/// Fill `pattern` with `args`, left to right.
pub fn substitute(pattern: &str, args: &[String]) -> Result<Substitution, TemplateError> {
    let placeholders: Vec<_> = placeholder_regex()
        .captures_iter(pattern)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let index = caps[1].parse::<usize>().ok()?;
            let default = caps.get(2).map(|m| m.as_str());
            Some((whole.range(), index, default))
        })
        .collect();

    let expected = placeholders
        .iter()
        .map(|(_, index, _)| index + 1)
        .max()
        .unwrap_or(0);
    if args.len() > expected {
        return Err(TemplateError::TooManyArguments {
            expected,
            supplied: args.len(),
        });
    }

    let mut text = String::with_capacity(pattern.len());
    let mut injected: Vec<Range<usize>> = Vec::new();
    let mut unfilled: Vec<(usize, usize)> = Vec::new();
    let mut last = 0;

    for (range, index, default) in placeholders {
        text.push_str(&pattern[last..range.start]);
        last = range.end;

        let start = text.len();
        match (args.get(index), default) {
            (Some(arg), _) => text.push_str(arg),
            (None, Some(default)) => text.push_str(default),
            (None, None) if is_quoted_at(pattern, range.start) => {
                return Err(TemplateError::MissingQuotedArgument { index });
            }
            (None, None) => {
                unfilled.push((start, index));
                text.push('?');
                continue;
            }
        }
        injected.push(start..text.len());
    }
    text.push_str(&pattern[last..]);

    let mut pending = Vec::new();
    let mut marker = 0;
    for offset in bind_marker_offsets(&text) {
        if injected.iter().any(|r| r.contains(&offset)) {
            continue;
        }
        match unfilled.iter().find(|(at, _)| *at == offset) {
            Some((_, index)) => pending.push(PendingParam::Argument(*index)),
            None => {
                marker += 1;
                pending.push(PendingParam::Marker(marker));
            }
        }
    }

    Ok(Substitution { text, pending })
}

/// Command templates by name. User-defined entries replace built-ins of the
/// same name.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, CommandTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in commands for a SQL dialect.
    pub fn with_builtins(database_type: DatabaseType) -> Self {
        let mut registry = Self::new();
        for (name, pattern) in builtin_templates(database_type) {
            registry.insert(CommandTemplate {
                name: name.to_string(),
                query_pattern: pattern.to_string(),
                source: TemplateSource::BuiltIn,
                full_width: FULL_WIDTH_BUILTINS.contains(name),
            });
        }
        debug!(
            "[TemplateRegistry::with_builtins] {} built-in templates for {}",
            registry.len(),
            database_type
        );
        registry
    }

    pub fn register(&mut self, name: &str, pattern: &str, source: TemplateSource) {
        self.insert(CommandTemplate {
            name: name.to_string(),
            query_pattern: pattern.to_string(),
            source,
            full_width: false,
        });
    }

    fn insert(&mut self, template: CommandTemplate) {
        if let Some(previous) = self.templates.get(&template.name) {
            debug!(
                "[TemplateRegistry::insert] {} ({:?}) overrides {:?} definition",
                template.name, template.source, previous.source
            );
        }
        self.templates.insert(template.name.clone(), template);
    }

    pub fn resolve(&self, name: &str) -> Option<&CommandTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates in name order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandTemplate> {
        self.templates.values()
    }

    /// Register every well-formed `:name pattern` line of `content`.
    /// Malformed lines are skipped and returned.
    pub fn load_definitions(&mut self, content: &str) -> Vec<TemplateError> {
        let mut skipped = Vec::new();

        for (number, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("--") {
                continue;
            }

            match parse_definition(line) {
                Ok((name, pattern)) => self.register(name, pattern, TemplateSource::UserDefined),
                Err(reason) => {
                    let error = TemplateError::MalformedDefinition {
                        line: number + 1,
                        reason,
                    };
                    warn!("Skipping command definition, {error}");
                    skipped.push(error);
                }
            }
        }

        skipped
    }

    /// Load a definitions file. A missing file is not an error.
    pub fn load_file(&mut self, path: &Path) -> Result<Vec<TemplateError>, TemplateError> {
        if !path.exists() {
            debug!("[TemplateRegistry::load_file] {} not present", path.display());
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(path).map_err(|e| TemplateError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let before = self.len();
        let skipped = self.load_definitions(&content);
        debug!(
            "[TemplateRegistry::load_file] {} loaded, registry grew from {} to {}",
            path.display(),
            before,
            self.len()
        );
        Ok(skipped)
    }
}

fn parse_definition(line: &str) -> Result<(&str, &str), String> {
    let (name, pattern) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let Some(bare) = name.strip_prefix(COMMAND_PREFIX) else {
        return Err(format!("command name '{name}' must start with '{COMMAND_PREFIX}'"));
    };
    if bare.is_empty() {
        return Err("missing command name".to_string());
    }
    if RESERVED_ACTIONS.contains(&bare) {
        return Err(format!("'{name}' is a built-in action and cannot be redefined"));
    }
    if pattern.is_empty() {
        return Err(format!("missing query pattern for '{name}'"));
    }
    Ok((name, pattern))
}

const FULL_WIDTH_BUILTINS: &[&str] = &[":src", ":def"];

fn builtin_templates(database_type: DatabaseType) -> &'static [(&'static str, &'static str)] {
    match database_type {
        DatabaseType::PostgreSQL => POSTGRESQL_TEMPLATES,
        DatabaseType::MySQL => MYSQL_TEMPLATES,
        DatabaseType::SQLite => SQLITE_TEMPLATES,
    }
}

const POSTGRESQL_TEMPLATES: &[(&str, &str)] = &[
    (
        ":tables",
        "SELECT table_catalog, table_schema, table_name, table_type FROM information_schema.tables \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema') AND table_name ILIKE '%{0:}%' \
         ORDER BY table_schema, table_name",
    ),
    (
        ":cols",
        "SELECT table_catalog, table_schema, table_name, column_name, data_type FROM information_schema.columns \
         WHERE table_name ILIKE '%{0}%' ORDER BY table_schema, table_name, ordinal_position",
    ),
    (
        ":cols-eq",
        "SELECT table_catalog, table_schema, table_name, column_name, data_type FROM information_schema.columns \
         WHERE table_name = '{0}' ORDER BY table_schema, ordinal_position",
    ),
    (
        ":cols-full",
        "SELECT * FROM information_schema.columns \
         WHERE table_name ILIKE '%{0}%' ORDER BY table_schema, table_name, ordinal_position",
    ),
    (
        ":cols-eq-full",
        "SELECT * FROM information_schema.columns \
         WHERE table_name = '{0}' ORDER BY table_schema, ordinal_position",
    ),
    (
        ":views",
        "SELECT table_catalog, table_schema, table_name, check_option, is_updatable FROM information_schema.views \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema') AND table_name ILIKE '%{0:}%' \
         ORDER BY table_schema, table_name",
    ),
    (
        ":views-full",
        "SELECT * FROM information_schema.views \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema') AND table_name ILIKE '%{0:}%' \
         ORDER BY table_schema, table_name",
    ),
    (
        ":procs",
        "SELECT routine_catalog, routine_schema, routine_name, data_type, created, last_altered \
         FROM information_schema.routines WHERE routine_type = 'PROCEDURE' \
         AND routine_schema NOT IN ('pg_catalog', 'information_schema') AND routine_name ILIKE '%{0:}%' \
         ORDER BY routine_schema, routine_name",
    ),
    (
        ":procs-full",
        "SELECT * FROM information_schema.routines WHERE routine_type = 'PROCEDURE' \
         AND routine_schema NOT IN ('pg_catalog', 'information_schema') AND routine_name ILIKE '%{0:}%' \
         ORDER BY routine_schema, routine_name",
    ),
    (
        ":funcs",
        "SELECT routine_catalog, routine_schema, routine_name, data_type, created, last_altered \
         FROM information_schema.routines WHERE routine_type = 'FUNCTION' \
         AND routine_schema NOT IN ('pg_catalog', 'information_schema') AND routine_name ILIKE '%{0:}%' \
         ORDER BY routine_schema, routine_name",
    ),
    (
        ":funcs-full",
        "SELECT * FROM information_schema.routines WHERE routine_type = 'FUNCTION' \
         AND routine_schema NOT IN ('pg_catalog', 'information_schema') AND routine_name ILIKE '%{0:}%' \
         ORDER BY routine_schema, routine_name",
    ),
    (
        ":src",
        "SELECT COALESCE(\
         (SELECT pg_get_viewdef(c.oid, true) FROM pg_class c WHERE c.oid = to_regclass('{0}') AND c.relkind IN ('v', 'm')), \
         (SELECT pg_get_functiondef(p.oid) FROM pg_proc p WHERE p.oid = to_regproc('{0}'))) AS definition",
    ),
    (
        ":def",
        "SELECT COALESCE(\
         (SELECT pg_get_viewdef(c.oid, true) FROM pg_class c WHERE c.oid = to_regclass('{0}') AND c.relkind IN ('v', 'm')), \
         (SELECT pg_get_functiondef(p.oid) FROM pg_proc p WHERE p.oid = to_regproc('{0}'))) AS definition",
    ),
    (
        ":deps",
        "SELECT view_schema, view_name, table_schema, table_name FROM information_schema.view_table_usage \
         WHERE table_name = '{0}' OR table_schema || '.' || table_name = '{0}' \
         OR view_name = '{0}' OR view_schema || '.' || view_name = '{0}' \
         ORDER BY view_schema, view_name, table_schema, table_name",
    ),
    (
        ":deps-to",
        "SELECT view_schema AS dependent_schema, view_name AS dependent_name, table_schema, table_name \
         FROM information_schema.view_table_usage \
         WHERE table_name = '{0}' OR table_schema || '.' || table_name = '{0}' \
         ORDER BY view_schema, view_name",
    ),
    (
        ":deps-from",
        "SELECT view_schema, view_name, table_schema AS referenced_schema, table_name AS referenced_name \
         FROM information_schema.view_table_usage \
         WHERE view_name = '{0}' OR view_schema || '.' || view_name = '{0}' \
         ORDER BY table_schema, table_name",
    ),
    (
        ":dbs",
        "SELECT datname AS database_name FROM pg_database \
         WHERE NOT datistemplate AND datname ILIKE '%{0:}%' ORDER BY datname",
    ),
];

const MYSQL_TEMPLATES: &[(&str, &str)] = &[
    (
        ":tables",
        "SELECT TABLE_CATALOG, TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA NOT IN ('mysql', 'information_schema', 'performance_schema', 'sys') \
         AND TABLE_NAME LIKE '%{0:}%' ORDER BY TABLE_SCHEMA, TABLE_NAME",
    ),
    (
        ":cols",
        "SELECT TABLE_CATALOG, TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_NAME LIKE '%{0}%' ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION",
    ),
    (
        ":cols-eq",
        "SELECT TABLE_CATALOG, TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_NAME = '{0}' ORDER BY TABLE_SCHEMA, ORDINAL_POSITION",
    ),
    (
        ":cols-full",
        "SELECT * FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_NAME LIKE '%{0}%' ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION",
    ),
    (
        ":cols-eq-full",
        "SELECT * FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_NAME = '{0}' ORDER BY TABLE_SCHEMA, ORDINAL_POSITION",
    ),
    (
        ":views",
        "SELECT TABLE_CATALOG, TABLE_SCHEMA, TABLE_NAME, CHECK_OPTION, IS_UPDATABLE FROM INFORMATION_SCHEMA.VIEWS \
         WHERE TABLE_NAME LIKE '%{0:}%' ORDER BY TABLE_SCHEMA, TABLE_NAME",
    ),
    (
        ":views-full",
        "SELECT * FROM INFORMATION_SCHEMA.VIEWS WHERE TABLE_NAME LIKE '%{0:}%' ORDER BY TABLE_SCHEMA, TABLE_NAME",
    ),
    (
        ":procs",
        "SELECT ROUTINE_CATALOG, ROUTINE_SCHEMA, ROUTINE_NAME, DATA_TYPE, CREATED, LAST_ALTERED \
         FROM INFORMATION_SCHEMA.ROUTINES WHERE ROUTINE_TYPE = 'PROCEDURE' AND ROUTINE_NAME LIKE '%{0:}%' \
         ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME",
    ),
    (
        ":procs-full",
        "SELECT * FROM INFORMATION_SCHEMA.ROUTINES WHERE ROUTINE_TYPE = 'PROCEDURE' AND ROUTINE_NAME LIKE '%{0:}%' \
         ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME",
    ),
    (
        ":funcs",
        "SELECT ROUTINE_CATALOG, ROUTINE_SCHEMA, ROUTINE_NAME, DATA_TYPE, CREATED, LAST_ALTERED \
         FROM INFORMATION_SCHEMA.ROUTINES WHERE ROUTINE_TYPE = 'FUNCTION' AND ROUTINE_NAME LIKE '%{0:}%' \
         ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME",
    ),
    (
        ":funcs-full",
        "SELECT * FROM INFORMATION_SCHEMA.ROUTINES WHERE ROUTINE_TYPE = 'FUNCTION' AND ROUTINE_NAME LIKE '%{0:}%' \
         ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME",
    ),
    (
        ":src",
        "SELECT ROUTINE_DEFINITION AS definition FROM INFORMATION_SCHEMA.ROUTINES \
         WHERE ROUTINE_NAME = '{0}' OR CONCAT(ROUTINE_SCHEMA, '.', ROUTINE_NAME) = '{0}' \
         UNION ALL SELECT VIEW_DEFINITION FROM INFORMATION_SCHEMA.VIEWS \
         WHERE TABLE_NAME = '{0}' OR CONCAT(TABLE_SCHEMA, '.', TABLE_NAME) = '{0}'",
    ),
    (
        ":def",
        "SELECT ROUTINE_DEFINITION AS definition FROM INFORMATION_SCHEMA.ROUTINES \
         WHERE ROUTINE_NAME = '{0}' OR CONCAT(ROUTINE_SCHEMA, '.', ROUTINE_NAME) = '{0}' \
         UNION ALL SELECT VIEW_DEFINITION FROM INFORMATION_SCHEMA.VIEWS \
         WHERE TABLE_NAME = '{0}' OR CONCAT(TABLE_SCHEMA, '.', TABLE_NAME) = '{0}'",
    ),
    (
        ":deps",
        "SELECT VIEW_SCHEMA, VIEW_NAME, TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.VIEW_TABLE_USAGE \
         WHERE TABLE_NAME = '{0}' OR CONCAT(TABLE_SCHEMA, '.', TABLE_NAME) = '{0}' \
         OR VIEW_NAME = '{0}' OR CONCAT(VIEW_SCHEMA, '.', VIEW_NAME) = '{0}' \
         ORDER BY VIEW_SCHEMA, VIEW_NAME, TABLE_SCHEMA, TABLE_NAME",
    ),
    (
        ":deps-to",
        "SELECT VIEW_SCHEMA AS DEPENDENT_SCHEMA, VIEW_NAME AS DEPENDENT_NAME, TABLE_SCHEMA, TABLE_NAME \
         FROM INFORMATION_SCHEMA.VIEW_TABLE_USAGE \
         WHERE TABLE_NAME = '{0}' OR CONCAT(TABLE_SCHEMA, '.', TABLE_NAME) = '{0}' \
         ORDER BY VIEW_SCHEMA, VIEW_NAME",
    ),
    (
        ":deps-from",
        "SELECT VIEW_SCHEMA, VIEW_NAME, TABLE_SCHEMA AS REFERENCED_SCHEMA, TABLE_NAME AS REFERENCED_NAME \
         FROM INFORMATION_SCHEMA.VIEW_TABLE_USAGE \
         WHERE VIEW_NAME = '{0}' OR CONCAT(VIEW_SCHEMA, '.', VIEW_NAME) = '{0}' \
         ORDER BY TABLE_SCHEMA, TABLE_NAME",
    ),
    (
        ":dbs",
        "SELECT SCHEMA_NAME AS DATABASE_NAME FROM INFORMATION_SCHEMA.SCHEMATA \
         WHERE SCHEMA_NAME LIKE '%{0:}%' ORDER BY SCHEMA_NAME",
    ),
];

const SQLITE_TEMPLATES: &[(&str, &str)] = &[
    (
        ":tables",
        "SELECT name AS table_name, type AS table_type FROM sqlite_master \
         WHERE type = 'table' AND name LIKE '%{0:}%' ORDER BY name",
    ),
    (
        ":cols",
        "SELECT m.name AS table_name, p.name AS column_name, p.type AS data_type \
         FROM sqlite_master m JOIN pragma_table_info(m.name) p \
         WHERE m.type IN ('table', 'view') AND m.name LIKE '%{0}%' ORDER BY m.name, p.cid",
    ),
    (
        ":cols-eq",
        "SELECT m.name AS table_name, p.name AS column_name, p.type AS data_type \
         FROM sqlite_master m JOIN pragma_table_info(m.name) p \
         WHERE m.type IN ('table', 'view') AND m.name = '{0}' ORDER BY p.cid",
    ),
    (
        ":cols-full",
        "SELECT m.name AS table_name, p.* FROM sqlite_master m JOIN pragma_table_info(m.name) p \
         WHERE m.type IN ('table', 'view') AND m.name LIKE '%{0}%' ORDER BY m.name, p.cid",
    ),
    (
        ":cols-eq-full",
        "SELECT m.name AS table_name, p.* FROM sqlite_master m JOIN pragma_table_info(m.name) p \
         WHERE m.type IN ('table', 'view') AND m.name = '{0}' ORDER BY p.cid",
    ),
    (
        ":views",
        "SELECT name AS view_name FROM sqlite_master WHERE type = 'view' AND name LIKE '%{0:}%' ORDER BY name",
    ),
    (
        ":views-full",
        "SELECT * FROM sqlite_master WHERE type = 'view' AND name LIKE '%{0:}%' ORDER BY name",
    ),
    (
        ":funcs",
        "SELECT name AS function_name, type, narg FROM pragma_function_list \
         WHERE name LIKE '%{0:}%' ORDER BY name",
    ),
    (
        ":funcs-full",
        "SELECT * FROM pragma_function_list WHERE name LIKE '%{0:}%' ORDER BY name",
    ),
    (":src", "SELECT sql AS definition FROM sqlite_master WHERE name = '{0}'"),
    (":def", "SELECT sql AS definition FROM sqlite_master WHERE name = '{0}'"),
    (
        ":deps",
        "SELECT d.name AS dependent_name, d.type AS dependent_type, r.name AS referenced_name \
         FROM sqlite_master d JOIN sqlite_master r ON d.name <> r.name AND d.sql LIKE '%' || r.name || '%' \
         WHERE r.name = '{0}' OR d.name = '{0}' ORDER BY d.name, r.name",
    ),
    (
        ":deps-to",
        "SELECT d.name AS dependent_name, d.type AS dependent_type FROM sqlite_master d \
         WHERE d.name <> '{0}' AND d.sql LIKE '%{0}%' ORDER BY d.name",
    ),
    (
        ":deps-from",
        "SELECT r.name AS referenced_name, r.type AS referenced_type \
         FROM sqlite_master d JOIN sqlite_master r ON d.name <> r.name AND d.sql LIKE '%' || r.name || '%' \
         WHERE d.name = '{0}' ORDER BY r.name",
    ),
    (
        ":dbs",
        "SELECT name AS database_name, file FROM pragma_database_list WHERE name LIKE '%{0:}%' ORDER BY seq",
    ),
];
