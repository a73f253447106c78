//! Filtered SELECT statements with bound parameters.
//!
//! List operations compose their optional filters here instead of
//! concatenating SQL by hand. Column and table names are `&'static str`
//! supplied by the repositories; only values are caller-controlled and those
//! are always bound.

use crate::core::Value;

/// Builder for a single-table SELECT with AND-ed predicates.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: &'static str,
    columns: &'static [&'static str],
    predicates: Vec<String>,
    params: Vec<Value>,
    order_by: Vec<&'static str>,
    limit: Option<usize>,
}

impl SelectBuilder {
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            predicates: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self.predicates
            .push(format!("{} = ?{}", column, self.params.len()));
        self
    }

    /// Add `column = value` only when a value is present.
    pub fn eq_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    /// Newest first; repeated calls add tie-breakers.
    pub fn order_by_desc(mut self, column: &'static str) -> Self {
        self.order_by.push(column);
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn build(self) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);

        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|column| format!("{} DESC", column))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        let mut params = self.params;
        if let Some(limit) = self.limit {
            params.push(Value::from(limit));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[&str] = &["id", "level", "message"];

    #[test]
    fn test_bare_select() {
        let (sql, params) = SelectBuilder::new("operational_events", COLUMNS).build();
        assert_eq!(sql, "SELECT id, level, message FROM operational_events");
        assert!(params.is_empty());
    }

    #[test]
    fn test_optional_filters_are_skipped() {
        let (sql, params) = SelectBuilder::new("operational_events", COLUMNS)
            .eq_opt("scope_id", Option::<String>::None)
            .eq_opt("level", Some("warn"))
            .order_by_desc("timestamp")
            .order_by_desc("id")
            .limit(Some(25))
            .build();

        assert_eq!(
            sql,
            "SELECT id, level, message FROM operational_events WHERE level = ?1 \
             ORDER BY timestamp DESC, id DESC LIMIT ?2"
        );
        assert_eq!(params, vec![Value::from("warn"), Value::Integer(25)]);
    }

    #[test]
    fn test_equality_predicates_number_in_order() {
        let (sql, params) = SelectBuilder::new("audit_events", COLUMNS)
            .eq("entity_type", "task")
            .eq_opt("actor_id", Some("IMP-BENCH-014"))
            .eq("action", "update")
            .build();

        assert_eq!(
            sql,
            "SELECT id, level, message FROM audit_events \
             WHERE entity_type = ?1 AND actor_id = ?2 AND action = ?3"
        );
        assert_eq!(
            params,
            vec![
                Value::from("task"),
                Value::from("IMP-BENCH-014"),
                Value::from("update")
            ]
        );
    }
}
