//! Compilation of parsed SQL statements into operation records.
//!
//! The parser is the `sqlparser` crate with the PostgreSQL dialect;
//! everything outside the supported surface is rejected with an
//! explicit unsupported-feature error rather than silently ignored.

use crate::db::filter::{BinOp, Expr};
use crate::db::ops::{NewColumn, Operation};
use crate::error::PlanError;
use liminaldb_lib::schema::{ColumnDef, ForeignKeyDef, IndexSchema, TableSchema};
use liminaldb_lib::value::{DataKind, Value};
use sqlparser::ast::{
    AlterTableOperation, Assignment, BinaryOperator, ColumnDef as SqlColumnDef, ColumnOption, DataType,
    Expr as SqlExpr, Ident, ObjectName, ObjectType, Query, Select, SelectItem, SetExpr, Statement, TableConstraint,
    TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Detects syntax we parse but do not execute.
trait Unsupported {
    fn unsupported(&self) -> bool;
}

impl Unsupported for bool {
    fn unsupported(&self) -> bool {
        *self
    }
}

impl<T> Unsupported for Option<T> {
    fn unsupported(&self) -> bool {
        self.is_some()
    }
}

impl<T> Unsupported for Vec<T> {
    fn unsupported(&self) -> bool {
        !self.is_empty()
    }
}

impl Unsupported for sqlparser::ast::GroupByExpr {
    fn unsupported(&self) -> bool {
        match self {
            sqlparser::ast::GroupByExpr::All => true,
            sqlparser::ast::GroupByExpr::Expressions(exprs) => !exprs.is_empty(),
        }
    }
}

macro_rules! unsupported {
    ($name:literal, $a:expr) => {{
        let it = stringify!($a);
        if $a.unsupported() {
            return Err(PlanError::Unsupported {
                feature: format!("{} with `{it}`", $name),
            });
        }
    }};
    ($name:literal, $($a:expr),+ $(,)?) => {{
        $(unsupported!($name, $a);)+
    }};
}

/// Parses one SQL statement string and compiles it into operations.
pub fn compile_statement(sql: &str) -> Result<Vec<Operation>, PlanError> {
    let dialect = PostgreSqlDialect {};
    let sql = normalize_string_type(sql);
    let statements = Parser::parse_sql(&dialect, &sql)?;
    statements.into_iter().map(compile_one).collect()
}

/// Respells `string(n)` as `varchar(n)` outside quoted literals.
///
/// The parser accepts bare `STRING` as a complete type and has no
/// grammar for a length argument after it, so the length-carrying
/// spelling has to be rewritten before parsing.
fn normalize_string_type(sql: &str) -> String {
    fn is_ident_byte(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_'
    }
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 8);
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            in_string = !in_string;
        }
        if !in_string
            && i + 6 <= bytes.len()
            && bytes[i..i + 6].eq_ignore_ascii_case(b"string")
            && (i == 0 || !is_ident_byte(bytes[i - 1]))
            && (i + 6 == bytes.len() || !is_ident_byte(bytes[i + 6]))
        {
            let mut j = i + 6;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'(' {
                out.extend_from_slice(b"varchar");
                i += 6;
                continue;
            }
        }
        out.push(b);
        i += 1;
    }
    String::from_utf8(out).expect("ascii-for-ascii rewrite keeps utf-8 intact")
}

fn compile_one(statement: Statement) -> Result<Operation, PlanError> {
    match statement {
        Statement::Query(query) => compile_query(*query),
        Statement::Insert {
            or,
            into,
            table_name,
            columns,
            overwrite,
            source,
            partitioned,
            after_columns,
            table,
            on,
            returning,
            ..
        } => {
            unsupported!("INSERT", or, overwrite, partitioned, after_columns, table, on, returning);
            if !into {
                return Err(PlanError::Unsupported {
                    feature: "INSERT without INTO".into(),
                });
            }
            compile_insert(table_name, columns, *source)
        }
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            returning,
            ..
        } => {
            unsupported!("UPDATE", from, returning);
            compile_update(table, assignments, selection)
        }
        Statement::Delete {
            tables,
            from,
            using,
            selection,
            returning,
            ..
        } => {
            unsupported!("DELETE", tables, using, returning);
            let table = single_table(&from)?;
            Ok(Operation::DeleteRows {
                table,
                filter: selection.map(compile_expr).transpose()?,
            })
        }
        Statement::CreateTable {
            name,
            columns,
            constraints,
            ..
        } => compile_create_table(name, columns, constraints),
        Statement::Drop {
            object_type,
            if_exists,
            names,
            cascade,
            restrict,
            purge,
            temporary,
            ..
        } => {
            unsupported!("DROP", if_exists, cascade, restrict, purge, temporary);
            let [name] = names.as_slice() else {
                return Err(PlanError::Unsupported {
                    feature: "DROP with multiple names".into(),
                });
            };
            match object_type {
                ObjectType::Table => Ok(Operation::DropTable {
                    table: object_name(name),
                }),
                ObjectType::Index => Ok(Operation::DropIndex {
                    table: None,
                    name: object_name(name),
                }),
                other => Err(PlanError::Unsupported {
                    feature: format!("DROP {other}"),
                }),
            }
        }
        Statement::CreateIndex {
            name,
            table_name,
            columns,
            unique,
            ..
        } => {
            let table = object_name(&table_name);
            let columns: Vec<String> = columns
                .into_iter()
                .map(|ordered| match ordered.expr {
                    SqlExpr::Identifier(ident) => Ok(ident.value),
                    other => Err(PlanError::Unsupported {
                        feature: format!("index on expression `{other}`"),
                    }),
                })
                .collect::<Result<_, _>>()?;
            let name = match name {
                Some(name) => object_name(&name),
                None => format!("ix_{table}_{}", columns.join("_")),
            };
            Ok(Operation::CreateIndex {
                table,
                name,
                columns,
                unique,
            })
        }
        Statement::AlterTable { name, operations, .. } => compile_alter_table(name, operations),
        other => Err(PlanError::Unsupported {
            feature: format!("statement `{other}`"),
        }),
    }
}

fn compile_query(query: Query) -> Result<Operation, PlanError> {
    unsupported!(
        "SELECT",
        query.order_by,
        query.limit,
        query.offset,
        query.fetch,
        query.locks,
        query.with
    );
    let select = match *query.body {
        SetExpr::Select(select) => *select,
        other => {
            return Err(PlanError::Unsupported {
                feature: format!("query body `{other}`"),
            });
        }
    };
    compile_select(select)
}

fn compile_select(select: Select) -> Result<Operation, PlanError> {
    unsupported!(
        "SELECT",
        select.distinct,
        select.top,
        select.into,
        select.lateral_views,
        select.group_by,
        select.having,
        select.sort_by
    );
    let table = single_table(&select.from)?;

    let mut projection = Vec::new();
    let mut wildcard = false;
    for item in select.projection {
        match item {
            SelectItem::Wildcard(_) => wildcard = true,
            SelectItem::UnnamedExpr(SqlExpr::Identifier(ident)) => projection.push(ident.value),
            SelectItem::UnnamedExpr(SqlExpr::CompoundIdentifier(parts)) => {
                projection.push(last_ident(parts)?);
            }
            other => {
                return Err(PlanError::Unsupported {
                    feature: format!("projection `{other}`"),
                });
            }
        }
    }
    if wildcard && !projection.is_empty() {
        return Err(PlanError::Unsupported {
            feature: "mixing `*` with named columns".into(),
        });
    }

    Ok(Operation::ReadRows {
        table,
        projection: if wildcard { None } else { Some(projection) },
        filter: select.selection.map(compile_expr).transpose()?,
    })
}

fn compile_insert(table_name: ObjectName, columns: Vec<Ident>, source: Query) -> Result<Operation, PlanError> {
    let values = match *source.body {
        SetExpr::Values(values) => values,
        _ => {
            return Err(PlanError::Unsupported {
                feature: "INSERT without VALUES".into(),
            });
        }
    };
    let mut rows = Vec::with_capacity(values.rows.len());
    for row in values.rows {
        let mut compiled = Vec::with_capacity(row.len());
        for expr in row {
            let expr = compile_expr(expr)?;
            let value = expr.fold_const().ok_or_else(|| PlanError::Unsupported {
                feature: "non-literal INSERT value".into(),
            })?;
            compiled.push(value);
        }
        rows.push(compiled);
    }
    Ok(Operation::WriteRows {
        table: object_name(&table_name),
        columns: columns.into_iter().map(|c| c.value).collect(),
        rows,
    })
}

fn compile_update(
    table: TableWithJoins,
    assignments: Vec<Assignment>,
    selection: Option<SqlExpr>,
) -> Result<Operation, PlanError> {
    let table = table_factor_name(&table.relation)?;
    let assignments = assignments
        .into_iter()
        .map(|assignment| {
            let column = last_ident(assignment.id)?;
            Ok((column, compile_expr(assignment.value)?))
        })
        .collect::<Result<Vec<_>, PlanError>>()?;
    Ok(Operation::UpdateRows {
        table,
        assignments,
        filter: selection.map(compile_expr).transpose()?,
    })
}

fn compile_alter_table(name: ObjectName, operations: Vec<AlterTableOperation>) -> Result<Operation, PlanError> {
    let table = object_name(&name);
    let mut added = Vec::new();
    let mut dropped_constraint = None;
    for operation in operations {
        match operation {
            AlterTableOperation::AddColumn { column_def, .. } => {
                added.push(compile_new_column(column_def)?);
            }
            AlterTableOperation::DropConstraint { name, .. } => {
                dropped_constraint = Some(name.value);
            }
            other => {
                return Err(PlanError::Unsupported {
                    feature: format!("ALTER TABLE `{other}`"),
                });
            }
        }
    }
    match (added.is_empty(), dropped_constraint) {
        (false, None) => Ok(Operation::AddColumns { table, columns: added }),
        (true, Some(name)) => Ok(Operation::DropConstraint { table, name }),
        _ => Err(PlanError::Unsupported {
            feature: "mixed or empty ALTER TABLE".into(),
        }),
    }
}

fn compile_new_column(column: SqlColumnDef) -> Result<NewColumn, PlanError> {
    let name = column.name.value.clone();
    let (kind, len) = column_type(&name, &column.data_type)?;
    let mut def = ColumnDef::new(name, kind).with_len(len).nullable(true);
    let mut default = None;
    for option in column.options {
        match option.option {
            ColumnOption::Null => def.nullable = true,
            ColumnOption::NotNull => def.nullable = false,
            ColumnOption::Default(expr) => {
                let folded = compile_expr(expr)?.fold_const().ok_or_else(|| PlanError::Unsupported {
                    feature: "non-literal DEFAULT".into(),
                })?;
                default = Some(folded);
            }
            other => {
                return Err(PlanError::Unsupported {
                    feature: format!("ADD COLUMN option `{other}`"),
                });
            }
        }
    }
    Ok(NewColumn { def, default })
}

fn compile_create_table(
    name: ObjectName,
    columns: Vec<SqlColumnDef>,
    constraints: Vec<TableConstraint>,
) -> Result<Operation, PlanError> {
    let table = object_name(&name);

    let mut defs = Vec::with_capacity(columns.len());
    let mut foreign_keys = Vec::new();
    for column in columns {
        let col_name = column.name.value.clone();
        let (kind, len) = column_type(&col_name, &column.data_type)?;
        let mut def = ColumnDef::new(col_name.clone(), kind).with_len(len).nullable(true);
        for option in column.options {
            match option.option {
                ColumnOption::Null => def.nullable = true,
                ColumnOption::NotNull => def.nullable = false,
                ColumnOption::Unique { is_primary, .. } => {
                    if is_primary {
                        def.primary_key = true;
                        def.nullable = false;
                    } else {
                        return Err(PlanError::Unsupported {
                            feature: "column-level UNIQUE (use CREATE UNIQUE INDEX)".into(),
                        });
                    }
                }
                ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    on_delete,
                    on_update,
                    ..
                } => {
                    unsupported!("REFERENCES", on_delete, on_update);
                    let [referred] = referred_columns.as_slice() else {
                        return Err(PlanError::Unsupported {
                            feature: "REFERENCES with multiple columns".into(),
                        });
                    };
                    let ref_table = object_name(&foreign_table);
                    foreign_keys.push(ForeignKeyDef {
                        name: format!("fk_{table}_{ref_table}"),
                        ref_table,
                        pairs: vec![(col_name.clone(), referred.value.clone())],
                    });
                }
                other => {
                    return Err(PlanError::Unsupported {
                        feature: format!("column option `{other}`"),
                    });
                }
            }
        }
        defs.push(def);
    }

    for constraint in constraints {
        match constraint {
            TableConstraint::Unique { columns, is_primary, .. } => {
                if !is_primary {
                    return Err(PlanError::Unsupported {
                        feature: "table-level UNIQUE (use CREATE UNIQUE INDEX)".into(),
                    });
                }
                for ident in columns {
                    let def = defs
                        .iter_mut()
                        .find(|d| d.name == ident.value)
                        .ok_or_else(|| PlanError::Unsupported {
                            feature: format!("PRIMARY KEY over unknown column `{}`", ident.value),
                        })?;
                    def.primary_key = true;
                    def.nullable = false;
                }
            }
            TableConstraint::ForeignKey {
                name,
                columns,
                foreign_table,
                referred_columns,
                on_delete,
                on_update,
                ..
            } => {
                unsupported!("FOREIGN KEY", on_delete, on_update);
                let ref_table = object_name(&foreign_table);
                let fk_name = name
                    .map(|n| n.value)
                    .unwrap_or_else(|| format!("fk_{table}_{ref_table}"));
                let pairs = columns
                    .into_iter()
                    .zip(referred_columns)
                    .map(|(local, referenced)| (local.value, referenced.value))
                    .collect();
                foreign_keys.push(ForeignKeyDef {
                    name: fk_name,
                    ref_table,
                    pairs,
                });
            }
            other => {
                return Err(PlanError::Unsupported {
                    feature: format!("table constraint `{other}`"),
                });
            }
        }
    }

    // Structural validation happens when the operation executes; the
    // primary-key index is derived here so the schema is complete.
    let pk_cols: Vec<String> = defs.iter().filter(|d| d.primary_key).map(|d| d.name.clone()).collect();
    let indexes = if pk_cols.is_empty() {
        Vec::new()
    } else {
        vec![IndexSchema {
            name: TableSchema::pk_index_name(&table),
            cols: pk_cols,
            unique: true,
            primary: true,
        }]
    };
    Ok(Operation::CreateTable {
        schema: TableSchema {
            table_name: table,
            columns: defs,
            row_count: 0,
            data_offset: 0,
            foreign_keys,
            indexes,
        },
    })
}

/// Maps a SQL type to a column kind and declared length.
fn column_type(column: &str, data_type: &DataType) -> Result<(DataKind, u16), PlanError> {
    Ok(match data_type {
        DataType::Int(_) | DataType::Integer(_) | DataType::BigInt(_) | DataType::SmallInt(_) | DataType::TinyInt(_) => {
            (DataKind::Int64, 0)
        }
        DataType::Float(_) | DataType::Real | DataType::Double | DataType::DoublePrecision => (DataKind::Float64, 0),
        DataType::Boolean => (DataKind::Bool, 0),
        DataType::Date | DataType::Datetime(_) | DataType::Timestamp(..) => (DataKind::DateTime, 0),
        DataType::Varchar(Some(size)) | DataType::Char(Some(size)) | DataType::CharacterVarying(Some(size)) => {
            (DataKind::Str, size.length as u16)
        }
        DataType::Custom(name, args) => {
            let type_name = name.to_string().to_ascii_lowercase();
            match (type_name.as_str(), args.as_slice()) {
                ("string", [len]) => {
                    let len = len.parse::<u16>().map_err(|_| PlanError::Unsupported {
                        feature: format!("string length `{len}` on column `{column}`"),
                    })?;
                    (DataKind::Str, len)
                }
                ("bool", []) => (DataKind::Bool, 0),
                ("datetime", []) => (DataKind::DateTime, 0),
                _ => {
                    return Err(PlanError::Unsupported {
                        feature: format!("column `{column}` of type `{name}`"),
                    });
                }
            }
        }
        // A length-less string type fails schema validation downstream
        // with the precise zero-length error.
        DataType::Text | DataType::String | DataType::Varchar(None) | DataType::Char(None) => (DataKind::Str, 0),
        other => {
            return Err(PlanError::Unsupported {
                feature: format!("column `{column}` of type `{other}`"),
            });
        }
    })
}

/// Compiles a scalar SQL expression into the predicate AST.
pub fn compile_expr(expr: SqlExpr) -> Result<Expr, PlanError> {
    Ok(match expr {
        SqlExpr::Identifier(ident) => Expr::Column(ident.value),
        SqlExpr::CompoundIdentifier(parts) => Expr::Column(last_ident(parts)?),
        SqlExpr::Value(value) => Expr::Value(compile_value(value)?),
        SqlExpr::Nested(inner) => compile_expr(*inner)?,
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match compile_expr(*expr)? {
            Expr::Value(Value::Int64(v)) => Expr::Value(Value::Int64(-v)),
            Expr::Value(Value::Float64(v)) => Expr::Value(Value::Float64(-v)),
            inner => Expr::bin(BinOp::Sub, Expr::Value(Value::Int64(0)), inner),
        },
        SqlExpr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => compile_expr(*expr)?,
        SqlExpr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Eq => BinOp::Eq,
                BinaryOperator::NotEq => BinOp::NotEq,
                BinaryOperator::Lt => BinOp::Lt,
                BinaryOperator::LtEq => BinOp::LtEq,
                BinaryOperator::Gt => BinOp::Gt,
                BinaryOperator::GtEq => BinOp::GtEq,
                BinaryOperator::And => BinOp::And,
                BinaryOperator::Or => BinOp::Or,
                BinaryOperator::Plus => BinOp::Add,
                BinaryOperator::Minus => BinOp::Sub,
                BinaryOperator::Multiply => BinOp::Mul,
                BinaryOperator::Divide => BinOp::Div,
                other => {
                    return Err(PlanError::Unsupported {
                        feature: format!("operator `{other}`"),
                    });
                }
            };
            Expr::bin(op, compile_expr(*left)?, compile_expr(*right)?)
        }
        other => {
            return Err(PlanError::Unsupported {
                feature: format!("expression `{other}`"),
            });
        }
    })
}

fn compile_value(value: SqlValue) -> Result<Value, PlanError> {
    Ok(match value {
        SqlValue::Number(text, _) => {
            if text.contains('.') || text.contains('e') || text.contains('E') {
                Value::Float64(text.parse().map_err(|_| bad_number(&text))?)
            } else {
                Value::Int64(text.parse().map_err(|_| bad_number(&text))?)
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => Value::Str(s),
        SqlValue::Boolean(b) => Value::Bool(b),
        SqlValue::Null => Value::Null,
        other => {
            return Err(PlanError::Unsupported {
                feature: format!("literal `{other}`"),
            });
        }
    })
}

fn bad_number(text: &str) -> PlanError {
    PlanError::Unsupported {
        feature: format!("numeric literal `{text}`"),
    }
}

fn single_table(from: &[TableWithJoins]) -> Result<String, PlanError> {
    let [table] = from else {
        return Err(PlanError::Unsupported {
            feature: "multiple tables in FROM".into(),
        });
    };
    unsupported!("FROM", table.joins);
    table_factor_name(&table.relation)
}

fn table_factor_name(factor: &TableFactor) -> Result<String, PlanError> {
    match factor {
        TableFactor::Table {
            name,
            alias,
            args,
            with_hints,
            version,
            partitions,
            ..
        } => {
            unsupported!("table reference", alias, args, with_hints, version, partitions);
            Ok(object_name(name))
        }
        other => Err(PlanError::Unsupported {
            feature: format!("table factor `{other}`"),
        }),
    }
}

fn object_name(name: &ObjectName) -> String {
    name.to_string()
}

fn last_ident(mut parts: Vec<Ident>) -> Result<String, PlanError> {
    parts.pop().map(|ident| ident.value).ok_or(PlanError::Unsupported {
        feature: "empty identifier".into(),
    })
}
