// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Minimal SQL dialect understood by the in-memory relational engine
//!
//! Supported statements:
//! - `CREATE TABLE [IF NOT EXISTS] t (col TYPE ..., ...)` (SERIAL columns auto-increment)
//! - `DROP TABLE [IF EXISTS] t`
//! - `INSERT INTO t [(cols)] VALUES (...)[, (...)]`
//! - `SELECT * | COUNT(*) | a, b FROM t [WHERE col = literal [AND ...]]`
//! - `UPDATE t SET a = literal[, ...] [WHERE ...]`
//! - `DELETE FROM t [WHERE ...]`
//! - `TRUNCATE [TABLE] a[, b] [RESTART IDENTITY] [CASCADE]`
//!
//! Literals: single-quoted strings (`''` escapes a quote), integers, decimals,
//! `NULL`, `TRUE`, `FALSE`.

use crate::engine::relational::{QueryOutput, Row};
use crate::error::{EngineError, EngineResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_]*";

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?({IDENT})\s*\((.*)\)\s*;?\s*$"
    ))
    .expect("CREATE TABLE pattern is valid")
});

static DROP_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*DROP\s+TABLE\s+(IF\s+EXISTS\s+)?({IDENT})\s*;?\s*$"
    ))
    .expect("DROP TABLE pattern is valid")
});

static INSERT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*INSERT\s+INTO\s+({IDENT})\s*(?:\(([^)]*)\))?\s*VALUES\s*(.+?)\s*;?\s*$"
    ))
    .expect("INSERT pattern is valid")
});

static SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*SELECT\s+(.+?)\s+FROM\s+({IDENT})(?:\s+WHERE\s+(.+?))?\s*;?\s*$"
    ))
    .expect("SELECT pattern is valid")
});

static UPDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*UPDATE\s+({IDENT})\s+SET\s+(.+?)(?:\s+WHERE\s+(.+?))?\s*;?\s*$"
    ))
    .expect("UPDATE pattern is valid")
});

static DELETE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^\s*DELETE\s+FROM\s+({IDENT})(?:\s+WHERE\s+(.+?))?\s*;?\s*$"
    ))
    .expect("DELETE pattern is valid")
});

static TRUNCATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*TRUNCATE\s+(?:TABLE\s+)?(.+?)(?:\s+RESTART\s+IDENTITY)?(?:\s+CASCADE)?\s*;?\s*$",
    )
    .expect("TRUNCATE pattern is valid")
});

static COUNT_STAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^COUNT\s*\(\s*\*\s*\)$").expect("COUNT(*) pattern is valid")
});

static CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?s)^\s*({IDENT})\s*=\s*(.+?)\s*$")).expect("condition pattern is valid")
});

static IDENT_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{IDENT}$")).expect("identifier pattern is valid"));

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Column {
    pub name: String,
    pub serial: bool,
}

/// Table contents
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    next_serial: HashMap<String, i64>,
}

impl Table {
    fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            next_serial: HashMap::new(),
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn truncate(&mut self, restart_identity: bool) {
        self.rows.clear();
        if restart_identity {
            self.next_serial.clear();
        }
    }

    fn next_serial(&mut self, column: &str) -> i64 {
        let next = self.next_serial.entry(column.to_string()).or_insert(1);
        let value = *next;
        *next += 1;
        value
    }
}

/// All tables of one database
pub(crate) type Tables = BTreeMap<String, Table>;

#[derive(Debug, Clone, PartialEq)]
enum Projection {
    All,
    Count,
    Columns(Vec<String>),
}

type Filter = Vec<(String, Value)>;

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<Column>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Value>>,
    },
    Select {
        table: String,
        projection: Projection,
        filter: Filter,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        filter: Filter,
    },
    Delete {
        table: String,
        filter: Filter,
    },
    Truncate {
        tables: Vec<String>,
        restart_identity: bool,
    },
}

/// Parse and apply one statement to `tables`
pub(crate) fn execute(tables: &mut Tables, sql: &str) -> EngineResult<QueryOutput> {
    match parse(sql)? {
        Statement::CreateTable {
            name,
            if_not_exists,
            columns,
        } => {
            if tables.contains_key(&name) {
                if if_not_exists {
                    return Ok(QueryOutput::affected(0));
                }
                return Err(EngineError::AlreadyExists(format!(
                    "relation \"{}\" already exists",
                    name
                )));
            }
            tables.insert(name, Table::new(columns));
            Ok(QueryOutput::affected(0))
        }
        Statement::DropTable { name, if_exists } => {
            if tables.remove(&name).is_none() && !if_exists {
                return Err(missing_table(&name));
            }
            Ok(QueryOutput::affected(0))
        }
        Statement::Insert {
            table,
            columns,
            rows,
        } => {
            let target = tables.get_mut(&table).ok_or_else(|| missing_table(&table))?;
            let column_names: Vec<String> = match columns {
                Some(names) => names,
                None => target.columns.iter().map(|c| c.name.clone()).collect(),
            };
            for name in &column_names {
                if !target.has_column(name) {
                    return Err(missing_column(name, &table));
                }
            }

            let mut inserted = 0;
            for values in rows {
                if values.len() != column_names.len() {
                    return Err(EngineError::Query(format!(
                        "INSERT has {} values for {} columns",
                        values.len(),
                        column_names.len()
                    )));
                }
                let mut row = Row::new();
                for (name, value) in column_names.iter().zip(values) {
                    row.insert(name.clone(), value);
                }
                let defaults: Vec<Column> = target
                    .columns
                    .iter()
                    .filter(|c| !row.contains_key(&c.name))
                    .cloned()
                    .collect();
                for column in defaults {
                    let value = if column.serial {
                        Value::from(target.next_serial(&column.name))
                    } else {
                        Value::Null
                    };
                    row.insert(column.name, value);
                }
                target.rows.push(row);
                inserted += 1;
            }
            Ok(QueryOutput::affected(inserted))
        }
        Statement::Select {
            table,
            projection,
            filter,
        } => {
            let source = tables.get(&table).ok_or_else(|| missing_table(&table))?;
            check_columns(source, filter.iter().map(|(c, _)| c), &table)?;
            let matching = source.rows.iter().filter(|row| matches(row, &filter));

            match projection {
                Projection::Count => {
                    let mut row = Row::new();
                    row.insert("count".to_string(), Value::from(matching.count() as i64));
                    Ok(QueryOutput {
                        rows: vec![row],
                        rows_affected: 1,
                    })
                }
                Projection::All => Ok(QueryOutput::with_rows(matching.cloned().collect())),
                Projection::Columns(names) => {
                    check_columns(source, names.iter(), &table)?;
                    let rows = matching
                        .map(|row| {
                            names
                                .iter()
                                .map(|n| (n.clone(), row.get(n).cloned().unwrap_or(Value::Null)))
                                .collect::<Row>()
                        })
                        .collect();
                    Ok(QueryOutput::with_rows(rows))
                }
            }
        }
        Statement::Update {
            table,
            assignments,
            filter,
        } => {
            let target = tables.get_mut(&table).ok_or_else(|| missing_table(&table))?;
            check_columns(target, filter.iter().map(|(c, _)| c), &table)?;
            check_columns(target, assignments.iter().map(|(c, _)| c), &table)?;
            let mut updated = 0;
            for row in target.rows.iter_mut().filter(|row| matches(row, &filter)) {
                for (column, value) in &assignments {
                    row.insert(column.clone(), value.clone());
                }
                updated += 1;
            }
            Ok(QueryOutput::affected(updated))
        }
        Statement::Delete { table, filter } => {
            let target = tables.get_mut(&table).ok_or_else(|| missing_table(&table))?;
            check_columns(target, filter.iter().map(|(c, _)| c), &table)?;
            let before = target.rows.len();
            target.rows.retain(|row| !matches(row, &filter));
            Ok(QueryOutput::affected((before - target.rows.len()) as u64))
        }
        Statement::Truncate {
            tables: names,
            restart_identity,
        } => {
            for name in &names {
                if !tables.contains_key(name) {
                    return Err(missing_table(name));
                }
            }
            for name in &names {
                if let Some(table) = tables.get_mut(name) {
                    table.truncate(restart_identity);
                }
            }
            Ok(QueryOutput::affected(0))
        }
    }
}

fn parse(sql: &str) -> EngineResult<Statement> {
    if let Some(caps) = CREATE_TABLE.captures(sql) {
        return Ok(Statement::CreateTable {
            name: caps[2].to_string(),
            if_not_exists: caps.get(1).is_some(),
            columns: parse_column_defs(&caps[3])?,
        });
    }
    if let Some(caps) = DROP_TABLE.captures(sql) {
        return Ok(Statement::DropTable {
            name: caps[2].to_string(),
            if_exists: caps.get(1).is_some(),
        });
    }
    if let Some(caps) = INSERT.captures(sql) {
        let columns = match caps.get(2) {
            Some(list) => Some(parse_ident_list(list.as_str())?),
            None => None,
        };
        return Ok(Statement::Insert {
            table: caps[1].to_string(),
            columns,
            rows: parse_tuples(&caps[3])?,
        });
    }
    if let Some(caps) = SELECT.captures(sql) {
        let raw = caps[1].trim();
        let projection = if raw == "*" {
            Projection::All
        } else if COUNT_STAR.is_match(raw) {
            Projection::Count
        } else {
            Projection::Columns(parse_ident_list(raw)?)
        };
        return Ok(Statement::Select {
            table: caps[2].to_string(),
            projection,
            filter: parse_filter(caps.get(3).map(|m| m.as_str()))?,
        });
    }
    if let Some(caps) = UPDATE.captures(sql) {
        let mut assignments = Vec::new();
        for part in split_top_level(&caps[2], ',')? {
            assignments.push(parse_condition(&part)?);
        }
        return Ok(Statement::Update {
            table: caps[1].to_string(),
            assignments,
            filter: parse_filter(caps.get(3).map(|m| m.as_str()))?,
        });
    }
    if let Some(caps) = DELETE.captures(sql) {
        return Ok(Statement::Delete {
            table: caps[1].to_string(),
            filter: parse_filter(caps.get(2).map(|m| m.as_str()))?,
        });
    }
    if let Some(caps) = TRUNCATE.captures(sql) {
        return Ok(Statement::Truncate {
            tables: parse_ident_list(&caps[1])?,
            restart_identity: sql.to_uppercase().contains("RESTART IDENTITY"),
        });
    }
    Err(EngineError::Query(format!("unsupported statement: {}", sql.trim())))
}

fn parse_column_defs(body: &str) -> EngineResult<Vec<Column>> {
    let mut columns = Vec::new();
    for def in split_top_level(body, ',')? {
        let mut words = def.split_whitespace();
        let Some(name) = words.next() else {
            continue;
        };
        let upper = name.to_uppercase();
        if matches!(
            upper.as_str(),
            "PRIMARY" | "UNIQUE" | "CONSTRAINT" | "FOREIGN" | "CHECK"
        ) {
            continue;
        }
        if !IDENT_ONLY.is_match(name) {
            return Err(EngineError::Query(format!("invalid column name '{}'", name)));
        }
        let serial = words
            .next()
            .map(|ty| matches!(ty.to_uppercase().as_str(), "SERIAL" | "BIGSERIAL" | "SMALLSERIAL"))
            .unwrap_or(false);
        columns.push(Column {
            name: name.to_string(),
            serial,
        });
    }
    if columns.is_empty() {
        return Err(EngineError::Query("table must declare at least one column".into()));
    }
    Ok(columns)
}

fn parse_ident_list(raw: &str) -> EngineResult<Vec<String>> {
    raw.split(',')
        .map(|part| {
            let name = part.trim();
            if IDENT_ONLY.is_match(name) {
                Ok(name.to_string())
            } else {
                Err(EngineError::Query(format!("invalid identifier '{}'", name)))
            }
        })
        .collect()
}

fn parse_filter(raw: Option<&str>) -> EngineResult<Filter> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    split_on_and(raw)?
        .iter()
        .map(|part| parse_condition(part))
        .collect()
}

fn parse_condition(raw: &str) -> EngineResult<(String, Value)> {
    let caps = CONDITION
        .captures(raw)
        .ok_or_else(|| EngineError::Query(format!("unsupported condition '{}'", raw.trim())))?;
    Ok((caps[1].to_string(), parse_literal(&caps[2])?))
}

fn parse_tuples(raw: &str) -> EngineResult<Vec<Vec<Value>>> {
    let mut tuples = Vec::new();
    for part in split_top_level(raw, ',')? {
        let inner = part
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| EngineError::Query(format!("malformed VALUES tuple '{}'", part)))?;
        let values = split_top_level(inner, ',')?
            .iter()
            .map(|v| parse_literal(v))
            .collect::<EngineResult<Vec<_>>>()?;
        tuples.push(values);
    }
    if tuples.is_empty() {
        return Err(EngineError::Query("INSERT without VALUES".into()));
    }
    Ok(tuples)
}

fn parse_literal(raw: &str) -> EngineResult<Value> {
    let text = raw.trim();
    if let Some(quoted) = text.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Ok(Value::String(quoted.replace("''", "'")));
    }
    match text.to_uppercase().as_str() {
        "NULL" => return Ok(Value::Null),
        "TRUE" => return Ok(Value::Bool(true)),
        "FALSE" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Value::from(int));
    }
    if let Ok(float) = text.parse::<f64>() {
        return Ok(Value::from(float));
    }
    Err(EngineError::Query(format!("unsupported literal '{}'", text)))
}

/// Split on `sep` outside quotes and parentheses
fn split_top_level(raw: &str, sep: char) -> EngineResult<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_quotes = false;

    for c in raw.chars() {
        match c {
            '\'' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth -= 1,
            _ => {}
        }
        if c == sep && depth == 0 && !in_quotes {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    if in_quotes || depth != 0 {
        return Err(EngineError::Query(format!("unbalanced input '{}'", raw)));
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    Ok(parts)
}

/// Split a WHERE clause on `AND` outside quotes
fn split_on_and(raw: &str) -> EngineResult<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut words = raw.split_inclusive(char::is_whitespace).peekable();

    while let Some(word) = words.next() {
        in_quotes ^= word.matches('\'').count() % 2 == 1;
        if !in_quotes && word.trim().eq_ignore_ascii_case("AND") && !current.trim().is_empty() {
            parts.push(current.trim().to_string());
            current.clear();
            continue;
        }
        current.push_str(word);
    }
    if in_quotes {
        return Err(EngineError::Query(format!("unbalanced quotes in '{}'", raw)));
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    Ok(parts)
}

fn matches(row: &Row, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(column, expected)| row.get(column).map_or(false, |v| v == expected))
}

fn check_columns<'a>(
    table: &Table,
    mut names: impl Iterator<Item = &'a String>,
    table_name: &str,
) -> EngineResult<()> {
    match names.find(|n| !table.has_column(n)) {
        Some(missing) => Err(missing_column(missing, table_name)),
        None => Ok(()),
    }
}

fn missing_table(name: &str) -> EngineError {
    EngineError::NotFound(format!("relation \"{}\" does not exist", name))
}

fn missing_column(column: &str, table: &str) -> EngineError {
    EngineError::Query(format!(
        "column \"{}\" of relation \"{}\" does not exist",
        column, table
    ))
}
