//! Database schema types.
//!
//! Represents the structure of a database including tables, columns,
//! foreign keys, and indexes.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Default number of example rows fetched per table during introspection.
pub const DEFAULT_EXAMPLE_ROW_COUNT: usize = 3;

/// Represents the complete schema of a database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// All tables in the schema.
    pub tables: Vec<Table>,

    /// Foreign key relationships between tables.
    pub foreign_keys: Vec<ForeignKey>,
}

impl Schema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Formats the schema for inclusion in an LLM system prompt.
    ///
    /// Produces a human-readable representation that helps the LLM
    /// understand the database structure.
    pub fn format_for_llm(&self) -> String {
        let tables_text = self
            .tables
            .iter()
            .map(|table| self.format_table_for_llm(table))
            .collect::<Vec<_>>()
            .join("");

        let foreign_keys_text = if self.foreign_keys.is_empty() {
            String::new()
        } else {
            let fk_lines = self
                .foreign_keys
                .iter()
                .map(|fk| {
                    format!(
                        "  - {}.{} -> {}.{}\n",
                        fk.from_table,
                        fk.from_columns.join(", "),
                        fk.to_table,
                        fk.to_columns.join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join("");
            format!("Foreign Keys:\n{}", fk_lines)
        };

        format!("Database Schema:\n\n{}{}", tables_text, foreign_keys_text)
    }

    fn format_table_for_llm(&self, table: &Table) -> String {
        let column_lines = table
            .columns
            .iter()
            .map(|column| self.format_column_for_llm(table, column))
            .collect::<Vec<_>>()
            .join("");

        let examples_text = if table.row_examples.is_empty() {
            String::new()
        } else {
            let rows = table
                .row_examples
                .iter()
                .map(|row| {
                    let kv = row
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("  - {kv}\n")
                })
                .collect::<Vec<_>>()
                .join("");
            format!("  Examples:\n{rows}")
        };

        format!(
            "Table: {}\n{}{}\n",
            table.name, column_lines, examples_text
        )
    }

    fn format_column_for_llm(&self, table: &Table, column: &Column) -> String {
        let annotations = [
            table.primary_key.contains(&column.name).then_some("PK"),
            (!column.is_nullable).then_some("NOT NULL"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
        let base_annotation = annotations.join(", ");

        let fk_lines = self
            .foreign_keys
            .iter()
            .filter(|fk| fk.from_table == table.name && fk.from_columns.contains(&column.name))
            .map(|fk| {
                let fk_ref = format!(
                    "FK -> {}.{}",
                    fk.to_table,
                    fk.to_columns.first().map(String::as_str).unwrap_or("")
                );
                let annotation = if base_annotation.is_empty() {
                    fk_ref
                } else {
                    format!("{}, {}", base_annotation, fk_ref)
                };
                Self::format_column_line(column, Some(annotation.as_str()))
            })
            .collect::<Vec<_>>();

        let base_line = if base_annotation.is_empty() {
            Self::format_column_line(column, None)
        } else {
            Self::format_column_line(column, Some(base_annotation.as_str()))
        };

        fk_lines
            .into_iter()
            .chain(std::iter::once(base_line))
            .collect::<Vec<_>>()
            .join("")
    }

    fn format_column_line(column: &Column, annotation: Option<&str>) -> String {
        let annotation = annotation.filter(|value| !value.is_empty());
        match (annotation, &column.default) {
            (Some(annotation), Some(default)) => format!(
                "  - {}: {} ({}, DEFAULT {})\n",
                column.name, column.data_type, annotation, default
            ),
            (Some(annotation), None) => {
                format!(
                    "  - {}: {} ({})\n",
                    column.name, column.data_type, annotation
                )
            }
            (None, Some(default)) => format!(
                "  - {}: {} (DEFAULT {})\n",
                column.name, column.data_type, default
            ),
            (None, None) => format!("  - {}: {}\n", column.name, column.data_type),
        }
    }

    /// Computes a hash of the schema content for cache invalidation.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        // Hash table count and names
        self.tables.len().hash(&mut hasher);
        for table in &self.tables {
            table.name.hash(&mut hasher);
            table.columns.len().hash(&mut hasher);
            for col in &table.columns {
                col.name.hash(&mut hasher);
                col.data_type.hash(&mut hasher);
                col.is_nullable.hash(&mut hasher);
                col.default.hash(&mut hasher);
            }
            table.primary_key.hash(&mut hasher);
        }
        // Hash foreign keys
        self.foreign_keys.len().hash(&mut hasher);
        for fk in &self.foreign_keys {
            fk.from_table.hash(&mut hasher);
            fk.from_columns.hash(&mut hasher);
            fk.to_table.hash(&mut hasher);
            fk.to_columns.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Represents a database table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Columns in the table.
    pub columns: Vec<Column>,

    /// Column names that form the primary key.
    pub primary_key: Vec<String>,

    /// Indexes on the table.
    pub indexes: Vec<Index>,

    /// Up to `DEFAULT_EXAMPLE_ROW_COUNT` sample rows, each a map of column
    /// name to its display value. Gives the LLM concrete data shape without
    /// shipping a full result set in the prompt.
    #[serde(default)]
    pub row_examples: Vec<BTreeMap<String, String>>,
}

impl Table {
    /// Creates a new table with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            row_examples: Vec::new(),
        }
    }

    /// Attaches sample rows, capped at `DEFAULT_EXAMPLE_ROW_COUNT`.
    pub fn with_row_examples(mut self, rows: Vec<BTreeMap<String, String>>) -> Self {
        rows.into_iter()
            .take(DEFAULT_EXAMPLE_ROW_COUNT)
            .for_each(|r| self.row_examples.push(r));
        self
    }
}

/// Represents a column in a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "integer", "varchar(255)").
    pub data_type: String,

    /// Whether the column allows NULL values.
    pub is_nullable: bool,

    /// Default value expression, if any.
    pub default: Option<String>,
}

impl Column {
    /// Creates a new column with the given name and data type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default: None,
        }
    }

    /// Sets whether the column is nullable.
    pub fn nullable(self, nullable: bool) -> Self {
        Self {
            is_nullable: nullable,
            ..self
        }
    }

    /// Sets the default value.
    pub fn with_default(self, default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            ..self
        }
    }
}

/// Represents a foreign key relationship between tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Source table name.
    pub from_table: String,

    /// Source column names.
    pub from_columns: Vec<String>,

    /// Target table name.
    pub to_table: String,

    /// Target column names.
    pub to_columns: Vec<String>,
}

impl ForeignKey {
    /// Creates a new foreign key relationship.
    pub fn new(
        from_table: impl Into<String>,
        from_columns: Vec<String>,
        to_table: impl Into<String>,
        to_columns: Vec<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_columns,
            to_table: to_table.into(),
            to_columns,
        }
    }
}

/// Represents an index on a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Column names included in the index.
    pub columns: Vec<String>,

    /// Whether this is a unique index.
    pub is_unique: bool,
}

impl Index {
    /// Creates a new index with the given name and columns.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            is_unique: false,
        }
    }

    /// Sets whether the index is unique.
    pub fn unique(self, unique: bool) -> Self {
        Self {
            is_unique: unique,
            ..self
        }
    }
}

/// A single element-level change detected by [`Schema::diff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaChange {
    TableAdded { table: String },
    TableRemoved { table: String },
    ColumnAdded { table: String, column: String },
    ColumnRemoved { table: String, column: String },
    ColumnChanged { table: String, column: String },
    IndexAdded { table: String, index: String },
    IndexRemoved { table: String, index: String },
    ForeignKeyAdded { from_table: String, to_table: String },
    ForeignKeyRemoved { from_table: String, to_table: String },
}

/// The structured difference between two schema snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub changes: Vec<SchemaChange>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

fn fk_key(fk: &ForeignKey) -> (String, String) {
    (fk.from_table.clone(), fk.to_table.clone())
}

impl Schema {
    /// Computes the set-difference between two schema snapshots, categorizing
    /// each change as added, removed, or changed at the table / column /
    /// index / foreign-key level. `diff(s, s)` is always empty.
    pub fn diff(prev: &Schema, next: &Schema) -> SchemaDiff {
        let mut changes = Vec::new();

        let prev_tables: BTreeMap<&str, &Table> =
            prev.tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let next_tables: BTreeMap<&str, &Table> =
            next.tables.iter().map(|t| (t.name.as_str(), t)).collect();

        for (name, _) in prev_tables.iter() {
            if !next_tables.contains_key(name) {
                changes.push(SchemaChange::TableRemoved {
                    table: name.to_string(),
                });
            }
        }
        for (name, next_table) in next_tables.iter() {
            match prev_tables.get(name) {
                None => changes.push(SchemaChange::TableAdded {
                    table: name.to_string(),
                }),
                Some(prev_table) => {
                    changes.extend(Self::diff_table(prev_table, next_table));
                }
            }
        }

        let prev_fks: std::collections::HashSet<(String, String)> =
            prev.foreign_keys.iter().map(fk_key).collect();
        let next_fks: std::collections::HashSet<(String, String)> =
            next.foreign_keys.iter().map(fk_key).collect();

        for fk in &prev.foreign_keys {
            if !next_fks.contains(&fk_key(fk)) {
                changes.push(SchemaChange::ForeignKeyRemoved {
                    from_table: fk.from_table.clone(),
                    to_table: fk.to_table.clone(),
                });
            }
        }
        for fk in &next.foreign_keys {
            if !prev_fks.contains(&fk_key(fk)) {
                changes.push(SchemaChange::ForeignKeyAdded {
                    from_table: fk.from_table.clone(),
                    to_table: fk.to_table.clone(),
                });
            }
        }

        SchemaDiff { changes }
    }

    fn diff_table(prev: &Table, next: &Table) -> Vec<SchemaChange> {
        let mut changes = Vec::new();

        let prev_cols: BTreeMap<&str, &Column> =
            prev.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let next_cols: BTreeMap<&str, &Column> =
            next.columns.iter().map(|c| (c.name.as_str(), c)).collect();

        for (name, _) in prev_cols.iter() {
            if !next_cols.contains_key(name) {
                changes.push(SchemaChange::ColumnRemoved {
                    table: next.name.clone(),
                    column: name.to_string(),
                });
            }
        }
        for (name, next_col) in next_cols.iter() {
            match prev_cols.get(name) {
                None => changes.push(SchemaChange::ColumnAdded {
                    table: next.name.clone(),
                    column: name.to_string(),
                }),
                Some(prev_col) => {
                    if prev_col.data_type != next_col.data_type
                        || prev_col.is_nullable != next_col.is_nullable
                        || prev_col.default != next_col.default
                    {
                        changes.push(SchemaChange::ColumnChanged {
                            table: next.name.clone(),
                            column: name.to_string(),
                        });
                    }
                }
            }
        }

        let prev_idx: BTreeMap<&str, &Index> =
            prev.indexes.iter().map(|i| (i.name.as_str(), i)).collect();
        let next_idx: BTreeMap<&str, &Index> =
            next.indexes.iter().map(|i| (i.name.as_str(), i)).collect();

        for (name, _) in prev_idx.iter() {
            if !next_idx.contains_key(name) {
                changes.push(SchemaChange::IndexRemoved {
                    table: next.name.clone(),
                    index: name.to_string(),
                });
            }
        }
        for (name, _) in next_idx.iter() {
            if !prev_idx.contains_key(name) {
                changes.push(SchemaChange::IndexAdded {
                    table: next.name.clone(),
                    index: name.to_string(),
                });
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema {
            tables: vec![
                Table {
                    name: "users".to_string(),
                    columns: vec![
                        Column::new("id", "integer").nullable(false),
                        Column::new("email", "varchar(255)").nullable(false),
                        Column::new("name", "varchar(100)"),
                        Column::new("created_at", "timestamp")
                            .nullable(false)
                            .with_default("now()"),
                    ],
                    primary_key: vec!["id".to_string()],
                    indexes: vec![],
                    row_examples: vec![],
                },
                Table {
                    name: "orders".to_string(),
                    columns: vec![
                        Column::new("id", "integer").nullable(false),
                        Column::new("user_id", "integer").nullable(false),
                        Column::new("total", "numeric(10,2)").nullable(false),
                        Column::new("status", "varchar(20)")
                            .nullable(false)
                            .with_default("'pending'"),
                        Column::new("created_at", "timestamp")
                            .nullable(false)
                            .with_default("now()"),
                    ],
                    primary_key: vec!["id".to_string()],
                    indexes: vec![],
                    row_examples: vec![],
                },
            ],
            foreign_keys: vec![ForeignKey::new(
                "orders",
                vec!["user_id".to_string()],
                "users",
                vec!["id".to_string()],
            )],
        }
    }

    #[test]
    fn test_schema_format_for_llm() {
        let schema = sample_schema();
        let formatted = schema.format_for_llm();

        assert!(formatted.contains("Table: users"));
        assert!(formatted.contains("Table: orders"));
        assert!(formatted.contains("id: integer (PK, NOT NULL)"));
        assert!(formatted.contains("email: varchar(255) (NOT NULL)"));
        assert!(formatted.contains("created_at: timestamp (NOT NULL, DEFAULT now())"));
        assert!(formatted.contains("Foreign Keys:"));
        assert!(formatted.contains("orders.user_id -> users.id"));
    }

    #[test]
    fn test_column_builder() {
        let col = Column::new("email", "varchar(255)")
            .nullable(false)
            .with_default("''");

        assert_eq!(col.name, "email");
        assert_eq!(col.data_type, "varchar(255)");
        assert!(!col.is_nullable);
        assert_eq!(col.default, Some("''".to_string()));
    }

    #[test]
    fn test_table_new() {
        let table = Table::new("users");
        assert_eq!(table.name, "users");
        assert!(table.columns.is_empty());
        assert!(table.primary_key.is_empty());
    }

    #[test]
    fn test_foreign_key_new() {
        let fk = ForeignKey::new(
            "orders",
            vec!["user_id".to_string()],
            "users",
            vec!["id".to_string()],
        );

        assert_eq!(fk.from_table, "orders");
        assert_eq!(fk.from_columns, vec!["user_id"]);
        assert_eq!(fk.to_table, "users");
        assert_eq!(fk.to_columns, vec!["id"]);
    }

    #[test]
    fn test_index_builder() {
        let idx = Index::new("idx_users_email", vec!["email".to_string()]).unique(true);

        assert_eq!(idx.name, "idx_users_email");
        assert_eq!(idx.columns, vec!["email"]);
        assert!(idx.is_unique);
    }

    #[test]
    fn test_empty_schema() {
        let schema = Schema::new();
        let formatted = schema.format_for_llm();

        assert!(formatted.contains("Database Schema:"));
        assert!(!formatted.contains("Foreign Keys:"));
    }

    #[test]
    fn test_row_examples_rendered() {
        let mut schema = sample_schema();
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), "1".to_string());
        row.insert("email".to_string(), "a@example.com".to_string());
        schema.tables[0].row_examples.push(row);

        let formatted = schema.format_for_llm();
        assert!(formatted.contains("Examples:"));
        assert!(formatted.contains("id=1"));
        assert!(formatted.contains("email=a@example.com"));
    }

    #[test]
    fn test_with_row_examples_caps_at_default() {
        let rows: Vec<BTreeMap<String, String>> = (0..5)
            .map(|i| {
                let mut m = BTreeMap::new();
                m.insert("id".to_string(), i.to_string());
                m
            })
            .collect();
        let table = Table::new("t").with_row_examples(rows);
        assert_eq!(table.row_examples.len(), DEFAULT_EXAMPLE_ROW_COUNT);
    }

    #[test]
    fn test_diff_identical_schemas_is_empty() {
        let schema = sample_schema();
        let diff = Schema::diff(&schema, &schema);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_detects_table_added_and_removed() {
        let prev = sample_schema();
        let mut next = prev.clone();
        next.tables.pop();
        next.tables.push(Table::new("products"));

        let diff = Schema::diff(&prev, &next);
        assert!(diff
            .changes
            .contains(&SchemaChange::TableRemoved { table: "orders".to_string() }));
        assert!(diff
            .changes
            .contains(&SchemaChange::TableAdded { table: "products".to_string() }));
    }

    #[test]
    fn test_diff_detects_column_changes() {
        let prev = sample_schema();
        let mut next = prev.clone();
        next.tables[0].columns.push(Column::new("phone", "varchar(20)"));
        next.tables[0].columns.retain(|c| c.name != "name");

        let diff = Schema::diff(&prev, &next);
        assert!(diff.changes.contains(&SchemaChange::ColumnAdded {
            table: "users".to_string(),
            column: "phone".to_string()
        }));
        assert!(diff.changes.contains(&SchemaChange::ColumnRemoved {
            table: "users".to_string(),
            column: "name".to_string()
        }));
    }

    #[test]
    fn test_diff_detects_column_type_change() {
        let prev = sample_schema();
        let mut next = prev.clone();
        next.tables[0]
            .columns
            .iter_mut()
            .find(|c| c.name == "email")
            .unwrap()
            .data_type = "text".to_string();

        let diff = Schema::diff(&prev, &next);
        assert!(diff.changes.contains(&SchemaChange::ColumnChanged {
            table: "users".to_string(),
            column: "email".to_string()
        }));
    }

    #[test]
    fn test_diff_detects_foreign_key_changes() {
        let prev = sample_schema();
        let mut next = prev.clone();
        next.foreign_keys.clear();

        let diff = Schema::diff(&prev, &next);
        assert!(diff.changes.contains(&SchemaChange::ForeignKeyRemoved {
            from_table: "orders".to_string(),
            to_table: "users".to_string()
        }));
    }
}
