//! SQL front end: batches, transaction boundaries, and the statements
//! the parser does not cover.
//!
//! A statement batch is implicitly wrapped in `BEGIN TRAN … COMMIT`
//! unless it already carries the keywords itself (case-insensitive,
//! whitespace-trimmed). An explicit `ROLLBACK` rolls the transaction
//! back at that point; later statements are not executed.

pub mod ast;

use crate::db::engine::{Engine, TxFinish};
use crate::db::ops::Operation;
use crate::error::{DBError, PlanError};
use crate::format;

/// A compiled batch: the operations to run and how to finish.
#[derive(Debug)]
pub struct Batch {
    pub ops: Vec<Operation>,
    pub finish: TxFinish,
}

/// Compiles a semicolon-separated statement batch.
pub fn compile_batch(sql: &str) -> Result<Batch, DBError> {
    let mut ops = Vec::new();
    let mut finish = TxFinish::Commit;
    for (position, statement) in split_statements(sql).into_iter().enumerate() {
        let keyword = statement.to_ascii_uppercase();
        let keyword = keyword.split_whitespace().collect::<Vec<_>>().join(" ");
        match keyword.as_str() {
            "BEGIN" | "BEGIN TRAN" | "BEGIN TRANSACTION" => {
                if position != 0 {
                    return Err(PlanError::Unsupported {
                        feature: "BEGIN TRAN inside a batch".into(),
                    }
                    .into());
                }
            }
            "COMMIT" => break,
            "ROLLBACK" => {
                finish = TxFinish::Rollback;
                break;
            }
            _ => match compile_meta(&statement) {
                Some(op) => ops.push(op),
                None => ops.extend(ast::compile_statement(&statement).map_err(DBError::from)?),
            },
        }
    }
    Ok(Batch { ops, finish })
}

/// Compiles and runs a batch, returning the rendered reply.
pub fn execute_sql(engine: &Engine, sql: &str) -> Result<String, DBError> {
    let batch = compile_batch(sql)?;
    let results = engine.exec(batch.ops, batch.finish)?;
    Ok(format::render_results(&results))
}

/// Statements the parser has no syntax for: `SHOW COLUMNS FROM t`,
/// `DESCRIBE t`, `SHOW INDEXES FROM t`.
fn compile_meta(statement: &str) -> Option<Operation> {
    let words: Vec<&str> = statement.split_whitespace().collect();
    let kw = |s: &str, word: usize| words.get(word).is_some_and(|w| w.eq_ignore_ascii_case(s));
    match words.len() {
        2 if kw("DESCRIBE", 0) || kw("DESC", 0) => Some(Operation::ReadMetadata {
            table: words[1].to_owned(),
        }),
        4 if kw("SHOW", 0) && kw("COLUMNS", 1) && kw("FROM", 2) => Some(Operation::ReadMetadata {
            table: words[3].to_owned(),
        }),
        4 if kw("SHOW", 0) && (kw("INDEXES", 1) || kw("INDEX", 1)) && kw("FROM", 2) => {
            Some(Operation::ListIndexes {
                table: words[3].to_owned(),
            })
        }
        _ => None,
    }
}

/// Splits on `;` outside single-quoted literals; empty statements are
/// dropped.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            ';' if !in_string => {
                statements.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    statements.push(current);
    statements
        .into_iter()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}
