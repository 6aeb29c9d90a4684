//! Boxed-text rendering of batch replies.

use crate::db::engine::Response;
use crate::db::ops::OpResult;
use itertools::Itertools;
use liminaldb_lib::schema::{IndexSchema, TableSchema};
use liminaldb_lib::value::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

fn boxed<C, R>(columns: C, rows: R) -> String
where
    C: IntoIterator,
    C::Item: Into<String>,
    R: IntoIterator,
    R::Item: IntoIterator,
    <R::Item as IntoIterator>::Item: Into<String>,
{
    let mut builder = Builder::default();
    builder.set_header(columns);
    for row in rows {
        builder.push_record(row);
    }
    builder.build().with(Style::ascii()).to_string()
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

/// Renders a query result with the trailing row-count line.
pub fn render_query(columns: &[String], rows: &[Vec<Value>]) -> String {
    let table = boxed(
        columns.iter().map(String::as_str),
        rows.iter().map(|row| row.iter().map(Value::to_string)),
    );
    format!("{table}\n{} row(s) in set", rows.len())
}

/// Renders table metadata as Field / Type / Null / Primary Key.
pub fn render_metadata(schema: &TableSchema) -> String {
    let table = boxed(
        ["Field", "Type", "Null", "Primary Key"],
        schema.columns.iter().map(|col| {
            [
                col.name.clone(),
                col.type_name(),
                yes_no(col.nullable).to_owned(),
                yes_no(col.primary_key).to_owned(),
            ]
        }),
    );
    format!("{table}\n{} row(s) in set", schema.columns.len())
}

pub fn render_indexes(indexes: &[IndexSchema]) -> String {
    let table = boxed(
        ["Index", "Columns", "Unique", "Primary"],
        indexes.iter().map(|index| {
            [
                index.name.clone(),
                index.cols.join(", "),
                yes_no(index.unique).to_owned(),
                yes_no(index.primary).to_owned(),
            ]
        }),
    );
    format!("{table}\n{} row(s) in set", indexes.len())
}

pub fn render_result(result: &OpResult) -> String {
    match result {
        OpResult::Query { columns, rows } => render_query(columns, rows),
        OpResult::Snapshot(table) => {
            let columns: Vec<String> = table.schema.columns.iter().map(|c| c.name.clone()).collect();
            render_query(&columns, &table.rows)
        }
        OpResult::Metadata(schema) => render_metadata(schema),
        OpResult::Indexes(indexes) => render_indexes(indexes),
        OpResult::RowsAffected(n) => format!("{n} row(s) affected"),
        OpResult::Message(message) => message.clone(),
    }
}

/// Renders a whole batch reply, one block per operation.
pub fn render_results(results: &Response) -> String {
    results
        .iter()
        .map(|result| match result {
            Ok(result) => render_result(result),
            Err(e) => format!("ERROR: {e}"),
        })
        .join("\n")
}
