use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Which of the requester's bookings `my_bookings` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    /// No WHERE clause: everything from the server's today onward.
    FromToday,
    From(NaiveDate),
    On(NaiveDate),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectPlaces,
    InsertPlace {
        id: Ulid,
        name: String,
        description: Option<String>,
        schedule: Option<Vec<TimeOfDay>>,
    },
    DeletePlace {
        id: Ulid,
    },
    SelectSlots {
        place_id: Ulid,
        date: NaiveDate,
    },
    SelectQuotaStatus {
        date: NaiveDate,
    },
    InsertBooking(NewBooking),
    DeleteBooking {
        id: Ulid,
    },
    SelectMyBookings {
        filter: BookingFilter,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

const PLACE_COLUMNS: [&str; 4] = ["id", "name", "description", "schedule"];
const BOOKING_COLUMNS: [&str; 4] = ["place_id", "date", "time", "reason"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "places" => {
            let row = InsertRow::bind(insert, values, "places", &PLACE_COLUMNS, 2)?;
            let schedule = match row.get("schedule") {
                Some(expr) => parse_string_or_null(expr)?
                    .map(|s| parse_schedule(&s))
                    .transpose()?,
                None => None,
            };
            Ok(Command::InsertPlace {
                id: parse_ulid_expr(row.require("id")?)?,
                name: parse_string(row.require("name")?)?,
                description: match row.get("description") {
                    Some(expr) => parse_string_or_null(expr)?,
                    None => None,
                },
                schedule,
            })
        }
        "bookings" => {
            let row = InsertRow::bind(insert, values, "bookings", &BOOKING_COLUMNS, 4)?;
            Ok(Command::InsertBooking(NewBooking {
                place_id: parse_ulid_expr(row.require("place_id")?)?,
                date: parse_date(&parse_string(row.require("date")?)?)?,
                time: TimeOfDay::parse(&parse_string(row.require("time")?)?)?,
                reason: parse_string(row.require("reason")?)?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One INSERT row keyed by column name. Without a column list the values are
/// taken in the table's declared column order.
struct InsertRow {
    cells: Vec<(&'static str, Expr)>,
}

impl InsertRow {
    fn bind(
        insert: &ast::Insert,
        values: Vec<Expr>,
        table: &'static str,
        columns: &[&'static str],
        required: usize,
    ) -> Result<Self, SqlError> {
        if insert.columns.is_empty() {
            if values.len() < required {
                return Err(SqlError::WrongArity(table, required, values.len()));
            }
            if values.len() > columns.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            let cells = columns.iter().copied().zip(values).collect();
            return Ok(Self { cells });
        }

        if insert.columns.len() != values.len() {
            return Err(SqlError::Parse(format!(
                "{} columns but {} values",
                insert.columns.len(),
                values.len()
            )));
        }
        let mut cells = Vec::with_capacity(values.len());
        for (ident, expr) in insert.columns.iter().zip(values) {
            let name = ident.value.to_lowercase();
            let Some(column) = columns.iter().copied().find(|c| *c == name) else {
                return Err(SqlError::UnknownColumn(name));
            };
            if cells.iter().any(|(c, _)| *c == column) {
                return Err(SqlError::Parse(format!("column {column} given twice")));
            }
            cells.push((column, expr));
        }
        Ok(Self { cells })
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.cells
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, expr)| expr)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "places" => Ok(Command::DeletePlace { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "places" => Ok(Command::SelectPlaces),
        "slots" => Ok(Command::SelectSlots {
            place_id: filters.place_id.ok_or(SqlError::MissingFilter("place_id"))?,
            date: filters.date_eq.ok_or(SqlError::MissingFilter("date"))?,
        }),
        "quota_status" => Ok(Command::SelectQuotaStatus {
            date: filters.date_eq.ok_or(SqlError::MissingFilter("date"))?,
        }),
        "my_bookings" => {
            let filter = match (filters.date_eq, filters.date_from) {
                (Some(on), _) => BookingFilter::On(on),
                (None, Some(from)) => BookingFilter::From(from),
                (None, None) => BookingFilter::FromToday,
            };
            Ok(Command::SelectMyBookings { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    place_id: Option<Ulid>,
    date_eq: Option<NaiveDate>,
    date_from: Option<NaiveDate>,
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("place_id") => filters.place_id = Some(parse_ulid_expr(right)?),
                Some("date") => filters.date_eq = Some(parse_date(&parse_string(right)?)?),
                Some(col) => return Err(SqlError::UnknownColumn(col.to_string())),
                None => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            },
            ast::BinaryOperator::GtEq => match expr_column_name(left).as_deref() {
                Some("date") => filters.date_from = Some(parse_date(&parse_string(right)?)?),
                _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            },
            _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
        },
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single row of an INSERT; multi-row inserts are refused.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::BadId(format!("{s:?}: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected at least {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    /// Well-formed SQL carrying a value the domain rejects.
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("bad id {0}")]
    BadId(String),
}
