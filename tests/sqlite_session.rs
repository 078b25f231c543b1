use sqlprompt::database::{
    ConnectionDescriptor, ConnectionManager, Credentials, ServerSpec, SqlxConnector,
};
use sqlprompt::input::ScriptedReader;
use sqlprompt::session::{Session, SessionSettings};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

const SETUP: &[&str] = &[
    "CREATE TABLE employees (id INTEGER PRIMARY KEY, name TEXT, department TEXT, badge BLOB);",
    "INSERT INTO employees VALUES (1, 'Ada', 'Engineering', x'cafe');",
    "INSERT INTO employees VALUES (2, 'Grace', 'Sales', NULL)",
    "GO",
];

async fn run_session(lines: &[&str], secrets: &[&str], commands_file: Option<PathBuf>) -> String {
    let descriptor = ConnectionDescriptor {
        server: ServerSpec::parse("local", None, false),
        database: ":memory:".to_string(),
        credentials: Credentials::Integrated,
        driver: "sqlite".to_string(),
    };
    let connection = ConnectionManager::open(Box::new(SqlxConnector::new(HashMap::new())), descriptor, 30)
        .await
        .unwrap();

    let script: Vec<&str> = SETUP.iter().chain(lines.iter()).copied().collect();
    let reader = ScriptedReader::new(script).with_secrets(secrets.iter().copied());
    let settings = SessionSettings {
        truncate_chars: 100,
        max_rows: 0,
        commands_file,
    };

    let mut session = Session::new(connection, reader, Vec::new(), settings).unwrap();
    session.run().await.unwrap();
    String::from_utf8(session.into_output()).unwrap()
}

#[tokio::test]
async fn test_batch_renders_rows() {
    let out = run_session(&["SELECT id, name, badge FROM employees ORDER BY id", "GO"], &[], None).await;

    assert!(out.contains("Rows affected: 1"));
    assert!(out.contains("Ada"));
    assert!(out.contains("0xcafe"));
    assert!(out.contains("[NULL]"));
    assert!(out.contains("Rows returned: 2"));
}

#[tokio::test]
async fn test_row_limit_and_double_semicolon() {
    let out = run_session(
        &[":rows 1", "SELECT name FROM employees ORDER BY id;;"],
        &[],
        None,
    )
    .await;

    assert!(out.contains("Ada"));
    assert!(!out.contains("Grace"));
    assert!(out.contains("1 more row(s) not shown"));
}

#[tokio::test]
async fn test_builtin_tables_command() {
    let out = run_session(&[":tables emp"], &[], None).await;
    assert!(out.contains("Query: SELECT name AS table_name"));
    assert!(out.contains("employees"));
}

#[tokio::test]
async fn test_user_template_binds_solicited_value() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, ":who SELECT name FROM employees WHERE department = {{0}}").unwrap();

    let out = run_session(&[":who"], &["Sales"], Some(file.path().to_path_buf())).await;

    assert!(out.contains("Query: SELECT name FROM employees WHERE department = ?"));
    assert!(out.contains("Grace"));
    assert!(!out.contains("Ada"));
}

#[tokio::test]
async fn test_driver_errors_are_reported() {
    let out = run_session(&["SELECT * FROM nope", "GO", "SELECT COUNT(*) AS n FROM employees", "GO"], &[], None).await;
    assert!(out.contains("Error: no such table: nope"));
    assert!(out.contains("Rows returned: 1"));
}

#[tokio::test]
async fn test_empty_result_sets_keep_their_headers() {
    let out = run_session(
        &["SELECT id, name FROM employees WHERE id = 99", "GO", ":tables nomatch"],
        &[],
        None,
    )
    .await;

    assert!(out.contains(" id | name "), "{out}");
    assert!(out.contains("table_name"));
    assert_eq!(out.matches("Rows returned: 0").count(), 2);
}
