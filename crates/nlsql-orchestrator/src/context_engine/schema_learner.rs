//! Schema introspection and compression into the descriptor text
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::deadline::Deadline;
use crate::error::QueryResult;
use crate::workers::{QueryExecutor, Row};

/// Tables x columns x primary-key membership, ordered by table then column position.
pub const INTROSPECTION_QUERY: &str = "\
SELECT
    t.TABLE_NAME, c.COLUMN_NAME, c.DATA_TYPE,
    c.CHARACTER_MAXIMUM_LENGTH,
    CASE WHEN k.CONSTRAINT_TYPE = 'PRIMARY KEY' THEN 'YES' ELSE 'NO' END as IS_PRIMARY_KEY
FROM INFORMATION_SCHEMA.TABLES t
JOIN INFORMATION_SCHEMA.COLUMNS c ON t.TABLE_NAME = c.TABLE_NAME
LEFT JOIN (
    SELECT kcu.TABLE_NAME, kcu.COLUMN_NAME, tc.CONSTRAINT_TYPE
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
    JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
) k ON c.TABLE_NAME = k.TABLE_NAME AND c.COLUMN_NAME = k.COLUMN_NAME
WHERE t.TABLE_TYPE = 'BASE TABLE'
ORDER BY t.TABLE_NAME, c.ORDINAL_POSITION";

#[derive(Debug, Deserialize)]
struct IntrospectedColumn {
    #[serde(rename = "TABLE_NAME")]
    table: String,
    #[serde(rename = "COLUMN_NAME")]
    column: String,
    #[serde(rename = "DATA_TYPE")]
    data_type: String,
    #[serde(rename = "CHARACTER_MAXIMUM_LENGTH", default)]
    max_length: Option<Value>,
    #[serde(rename = "IS_PRIMARY_KEY", default)]
    is_primary_key: Option<String>,
}

impl IntrospectedColumn {
    fn render(&self) -> String {
        let length = match &self.max_length {
            Some(Value::Number(n)) if n.as_i64() != Some(0) => Some(n.to_string()),
            Some(Value::String(s)) if !s.is_empty() && s != "0" => Some(s.clone()),
            _ => None,
        };
        let type_info = match length {
            Some(len) => format!("{}({})", self.data_type, len),
            None => self.data_type.clone(),
        };
        let pk = if self.is_primary_key.as_deref() == Some("YES") { " [PK]" } else { "" };
        format!("{} ({}){}", self.column, type_info, pk)
    }
}

/// Fold introspection rows into one line per table, in first-seen order.
pub fn describe(rows: &[Row]) -> String {
    let mut tables: Vec<(String, Vec<String>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let column: IntrospectedColumn = match serde_json::from_value(Value::Object(row.clone())) {
            Ok(column) => column,
            Err(e) => {
                debug!("Skipping malformed introspection row: {}", e);
                continue;
            }
        };
        let slot = *index.entry(column.table.clone()).or_insert_with(|| {
            tables.push((column.table.clone(), Vec::new()));
            tables.len() - 1
        });
        tables[slot].1.push(column.render());
    }

    tables
        .iter()
        .map(|(table, columns)| format!("Table '{}': {}\n", table, columns.join(", ")))
        .collect()
}

/// Run the introspection query and describe the result. Failures are returned
/// for display; the caller keeps its cached descriptor.
pub async fn learn(executor: &dyn QueryExecutor, deadline: &Deadline) -> QueryResult<String> {
    match executor.execute(INTROSPECTION_QUERY, deadline).await {
        Ok(rows) => {
            let descriptor = describe(&rows);
            info!("Learned schema: {} columns, {} chars", rows.len(), descriptor.len());
            Ok(descriptor)
        }
        Err(e) => {
            warn!("Schema introspection failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_primary_key_marker() {
        let rows = vec![row(json!({
            "TABLE_NAME": "parts", "COLUMN_NAME": "barcode", "DATA_TYPE": "varchar", "IS_PRIMARY_KEY": "YES"
        }))];
        assert!(describe(&rows).contains("Table 'parts': barcode (varchar) [PK]"));
    }

    #[test]
    fn test_columns_fold_per_table_with_lengths() {
        let rows = vec![
            row(json!({"TABLE_NAME": "outm_2505", "COLUMN_NAME": "junno", "DATA_TYPE": "varchar",
                       "CHARACTER_MAXIMUM_LENGTH": 20, "IS_PRIMARY_KEY": "YES"})),
            row(json!({"TABLE_NAME": "outm_2505", "COLUMN_NAME": "tmamoney1", "DATA_TYPE": "money",
                       "CHARACTER_MAXIMUM_LENGTH": null, "IS_PRIMARY_KEY": "NO"})),
            row(json!({"TABLE_NAME": "parts", "COLUMN_NAME": "descr", "DATA_TYPE": "nvarchar",
                       "CHARACTER_MAXIMUM_LENGTH": 100, "IS_PRIMARY_KEY": "NO"})),
            row(json!({"COLUMN_NAME": "orphan"})),
        ];
        assert_eq!(
            describe(&rows),
            "Table 'outm_2505': junno (varchar(20)) [PK], tmamoney1 (money)\n\
             Table 'parts': descr (nvarchar(100))\n"
        );
    }

    #[test]
    fn test_no_rows_is_empty_descriptor() {
        assert_eq!(describe(&[]), "");
    }

    struct FixedExecutor(QueryResult<Vec<Row>>);

    #[async_trait]
    impl QueryExecutor for FixedExecutor {
        async fn execute(&self, query: &str, _deadline: &Deadline) -> QueryResult<Vec<Row>> {
            assert!(query.contains("INFORMATION_SCHEMA.COLUMNS"));
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_learn_surfaces_failures() {
        let executor = FixedExecutor(Err(QueryError::Timeout(15000)));
        let err = learn(&executor, &Deadline::after(Duration::from_secs(1))).await.unwrap_err();
        assert_eq!(err, QueryError::Timeout(15000));
    }
}
