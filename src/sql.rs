use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_INSERT_ROWS;
use crate::model::{parse_date, BookingRequest};

/// Column order for `INSERT INTO reservations VALUES (...)` without a column list.
pub const INSERT_COLUMNS: [&str; 8] = [
    "space_id",
    "space_name",
    "date",
    "start_time",
    "end_time",
    "is_anonymous",
    "user_id",
    "user_name",
];

/// Which reservations a `SELECT FROM reservations` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    Id(Ulid),
    Space(String),
    User(String),
    Date(NaiveDate),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        request: BookingRequest,
        returning: bool,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectAvailability {
        space_id: String,
        date: String,
        start_time: String,
        end_time: String,
    },
    SelectFreeSlots {
        space_id: String,
        date: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [one] => one,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_insert_rows(insert)?;
    if rows.len() > MAX_INSERT_ROWS {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let values = &rows[0];

    let columns: Vec<String> = if insert.columns.is_empty() {
        INSERT_COLUMNS[..values.len().min(INSERT_COLUMNS.len())]
            .iter()
            .map(|c| c.to_string())
            .collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("reservations", columns.len(), values.len()));
    }

    let mut request = BookingRequest::default();
    for (column, value) in columns.iter().zip(values) {
        match column.as_str() {
            "space_id" => request.space_id = parse_text(value)?,
            "space_name" => request.space_name = parse_text(value)?,
            "date" => request.date = parse_text(value)?,
            "start_time" => request.start_time = parse_text(value)?,
            "end_time" => request.end_time = parse_text(value)?,
            "is_anonymous" => request.is_anonymous = parse_bool_or_null(value)?.unwrap_or(false),
            "user_id" => request.user_id = parse_text(value)?,
            "user_name" => request.user_name = parse_text(value)?,
            "id" => return Err(SqlError::Unsupported("id is assigned by the server".into())),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::InsertReservation {
        request,
        returning: insert.returning.is_some(),
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = where_equalities(&delete.selection)?;
    match filters.as_slice() {
        [(col, value)] if col == "id" => Ok(Command::DeleteReservation {
            id: parse_ulid_expr(value)?,
        }),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = where_equalities(&select.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::SelectReservations {
            filter: reservation_filter(&filters)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            space_id: required_text(&filters, "space_id")?,
            date: required_text(&filters, "date")?,
            start_time: required_text(&filters, "start_time")?,
            end_time: required_text(&filters, "end_time")?,
        }),
        "free_slots" => Ok(Command::SelectFreeSlots {
            space_id: required_text(&filters, "space_id")?,
            date: required_text(&filters, "date")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn reservation_filter(filters: &[(String, Expr)]) -> Result<ReservationFilter, SqlError> {
    let (col, value) = match filters {
        [] => return Ok(ReservationFilter::All),
        [one] => one,
        _ => {
            return Err(SqlError::Unsupported(
                "reservations accept at most one filter".into(),
            ));
        }
    };
    let text = || parse_text(value)?.ok_or(SqlError::InvalidValue(format!("{col} cannot be NULL")));
    match col.as_str() {
        "id" => Ok(ReservationFilter::Id(parse_ulid_expr(value)?)),
        "space_id" => Ok(ReservationFilter::Space(text()?)),
        "user_name" => Ok(ReservationFilter::User(text()?)),
        "date" => {
            let raw = text()?;
            parse_date(raw.trim())
                .map(ReservationFilter::Date)
                .ok_or_else(|| SqlError::InvalidValue(format!("date must be YYYY-MM-DD, got {raw:?}")))
        }
        other => Err(SqlError::UnknownColumn(other.to_string())),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Flatten `a = x AND (b = y AND ...)` into `(column, value)` pairs.
fn where_equalities(selection: &Option<Expr>) -> Result<Vec<(String, Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_equalities(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_equalities(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            if out.iter().any(|(c, _)| *c == col) {
                return Err(SqlError::Unsupported(format!("duplicate filter on {col}")));
            }
            out.push((col, right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn required_text(filters: &[(String, Expr)], col: &'static str) -> Result<String, SqlError> {
    let (_, value) = filters
        .iter()
        .find(|(c, _)| c == col)
        .ok_or(SqlError::MissingFilter(col))?;
    parse_text(value)?.ok_or(SqlError::MissingFilter(col))
}

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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.clone()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

/// A text-ish literal. `NULL` is `None`; numbers and booleans keep their
/// literal spelling so validation can report them.
fn parse_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(SqlError::InvalidValue(format!("expected string, got {other}"))),
        None => Err(SqlError::InvalidValue(format!("expected literal, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let text = parse_text(expr)?.ok_or(SqlError::InvalidValue("id cannot be NULL".into()))?;
    Ulid::from_string(&text).map_err(|e| SqlError::InvalidValue(format!("bad reservation id {text:?}: {e}")))
}

fn parse_bool_or_null(expr: &Expr) -> Result<Option<bool>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::Boolean(b)) => Ok(Some(*b)),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Some(true)),
            "false" | "f" | "0" => Ok(Some(false)),
            _ => Err(SqlError::InvalidValue(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(Some(n != "0")),
        Some(other) => Err(SqlError::InvalidValue(format!("expected bool, got {other}"))),
        None => Err(SqlError::InvalidValue(format!("expected literal, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a value the engine can't use.
    InvalidValue(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_with_columns() {
        let sql = "INSERT INTO reservations (space_id, space_name, date, start_time, end_time, user_id, user_name) \
                   VALUES ('S1', 'Room 101', '2024-03-01', '09:00', '10:00', 'u1', 'ada')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request, returning } => {
                assert!(!returning);
                assert_eq!(
                    request,
                    BookingRequest::new("S1", "Room 101", "2024-03-01", "09:00", "10:00").by_user("u1", "ada")
                );
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_positional_and_returning() {
        let sql = "INSERT INTO reservations VALUES ('S1', 'Room 101', '2024-03-01', '09:00', '10:00', true) RETURNING *";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request, returning } => {
                assert!(returning);
                assert!(request.is_anonymous);
                assert_eq!(request.user_name, None);
                assert_eq!(request.end_time.as_deref(), Some("10:00"));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_missing_columns_left_for_validation() {
        let sql = "INSERT INTO reservations (space_id, date) VALUES ('S1', '2024-03-01')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request, .. } => {
                assert_eq!(request.space_id.as_deref(), Some("S1"));
                assert_eq!(request.start_time, None);
                assert_eq!(request.space_name, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_null_identity() {
        let sql = "INSERT INTO reservations (space_id, space_name, date, start_time, end_time, is_anonymous, user_id, user_name) \
                   VALUES ('S1', 'Room', '2024-03-01', '09:00', '10:00', NULL, NULL, NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request, .. } => {
                assert!(!request.is_anonymous);
                assert_eq!(request.user_id, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_rejects_bad_shapes() {
        let arity = "INSERT INTO reservations (space_id, date) VALUES ('S1')";
        assert!(matches!(parse_sql(arity), Err(SqlError::WrongArity(..))));

        let unknown = "INSERT INTO reservations (space_id, colour) VALUES ('S1', 'red')";
        assert!(matches!(parse_sql(unknown), Err(SqlError::UnknownColumn(_))));

        let id = format!("INSERT INTO reservations (id, space_id) VALUES ('{ID}', 'S1')");
        assert!(matches!(parse_sql(&id), Err(SqlError::Unsupported(_))));

        let multi = "INSERT INTO reservations (space_id) VALUES ('S1'), ('S2')";
        assert!(matches!(parse_sql(multi), Err(SqlError::Unsupported(_))));

        let table = "INSERT INTO spaces (space_id) VALUES ('S1')";
        assert!(matches!(parse_sql(table), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_delete_by_id() {
        let cmd = parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::DeleteReservation { id: Ulid::from_string(ID).unwrap() });
    }

    #[test]
    fn parse_delete_requires_id() {
        let sql = "DELETE FROM reservations WHERE space_id = 'S1'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
        assert!(matches!(parse_sql("DELETE FROM reservations"), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_select_filters() {
        let all = parse_sql("SELECT * FROM reservations").unwrap();
        assert_eq!(all, Command::SelectReservations { filter: ReservationFilter::All });

        let by_id = parse_sql(&format!("SELECT * FROM reservations WHERE id = '{ID}'")).unwrap();
        assert_eq!(
            by_id,
            Command::SelectReservations { filter: ReservationFilter::Id(Ulid::from_string(ID).unwrap()) }
        );

        let by_space = parse_sql("SELECT * FROM reservations WHERE space_id = 'S1'").unwrap();
        assert_eq!(
            by_space,
            Command::SelectReservations { filter: ReservationFilter::Space("S1".into()) }
        );

        let by_user = parse_sql("SELECT * FROM reservations WHERE user_name = 'ada'").unwrap();
        assert_eq!(
            by_user,
            Command::SelectReservations { filter: ReservationFilter::User("ada".into()) }
        );

        let by_date = parse_sql("SELECT * FROM reservations WHERE \"date\" = '2024-03-01'").unwrap();
        assert_eq!(
            by_date,
            Command::SelectReservations {
                filter: ReservationFilter::Date(parse_date("2024-03-01").unwrap())
            }
        );
    }

    #[test]
    fn parse_select_bad_date_is_invalid_value() {
        let sql = "SELECT * FROM reservations WHERE \"date\" = '2024-02-30'";
        assert!(matches!(parse_sql(sql), Err(SqlError::InvalidValue(_))));
    }

    #[test]
    fn parse_select_rejects_combined_filters() {
        let sql = "SELECT * FROM reservations WHERE space_id = 'S1' AND user_name = 'ada'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE space_id = 'S1' AND \"date\" = '2024-03-01' \
                   AND start_time = '09:15' AND end_time = '09:45'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                space_id: "S1".into(),
                date: "2024-03-01".into(),
                start_time: "09:15".into(),
                end_time: "09:45".into(),
            }
        );
    }

    #[test]
    fn parse_select_availability_missing_filter() {
        let sql = "SELECT * FROM availability WHERE space_id = 'S1' AND \"date\" = '2024-03-01' AND start_time = '09:15'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end_time"))));
    }

    #[test]
    fn parse_select_free_slots() {
        let sql = "SELECT * FROM free_slots WHERE (space_id = 'S1' AND \"date\" = '2024-03-01')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectFreeSlots { space_id: "S1".into(), date: "2024-03-01".into() }
        );
    }

    #[test]
    fn parse_non_equality_filter_unsupported() {
        let sql = "SELECT * FROM reservations WHERE space_id <> 'S1'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_multiple_statements_unsupported() {
        let sql = "SELECT * FROM reservations; SELECT * FROM reservations";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }
}
