use crate::config::QuerySettings;
use crate::error::PhaseError;
use sqlx::AnyConnection;

/// Random single-row sample of one numeric column.
///
/// Two stages for portability: the inner select shuffles every row, the outer
/// select keeps the first. Servers without `FETCH FIRST` still accept it.
#[derive(Debug, Clone)]
pub struct PhaseQuery {
    table: String,
    column: String,
    sql: String,
}

impl PhaseQuery {
    pub fn new(table: &str, column: &str) -> Result<Self, PhaseError> {
        for (what, ident) in [("table", table), ("column", column)] {
            if !is_identifier(ident) {
                return Err(PhaseError::InvalidSettings(format!(
                    "query {what} {ident:?} is not a plain SQL identifier"
                )));
            }
        }
        let sql = format!(
            "SELECT CAST({column} AS DOUBLE PRECISION) AS angle \
             FROM (SELECT {column} FROM {table} ORDER BY RANDOM()) AS shuffled \
             LIMIT 1"
        );
        Ok(Self {
            table: table.to_string(),
            column: column.to_string(),
            sql,
        })
    }

    pub fn from_settings(settings: &QuerySettings) -> Result<Self, PhaseError> {
        Self::new(&settings.table, &settings.column)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

// Identifiers are interpolated into SQL, so only bare names are allowed.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sample one reading. An empty table (or a NULL reading) is `Ok(None)`.
pub async fn fetch_random_phase(
    conn: &mut AnyConnection,
    query: &PhaseQuery,
) -> Result<Option<f64>, PhaseError> {
    let row: Option<(Option<f64>,)> = sqlx::query_as(query.sql())
        .fetch_optional(&mut *conn)
        .await
        .map_err(PhaseError::QueryExecutionFailed)?;
    Ok(row.and_then(|(angle,)| angle))
}
