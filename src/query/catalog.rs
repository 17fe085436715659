//! Schema catalog: the read-only description of tables, fields, and foreign keys
//! supplied by the surrounding metadata service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical data type of a catalog field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Free-form text; compared lexicographically.
    String,
    /// Numeric; compared numerically and eligible for `sum`/`avg`.
    Number,
    /// Calendar date.
    Date,
    /// Boolean flag.
    Boolean,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::Boolean => "boolean",
        })
    }
}

/// Target of a foreign-key declaration.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyRef {
    /// Referenced table identifier.
    pub table_id: String,
    /// Referenced field name on that table.
    pub field_name: String,
}

/// Description of a single field.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Physical field name used in row sets and query text.
    pub name: String,
    /// Human-readable label; defaults to the field name.
    #[serde(default)]
    pub display_name: String,
    /// Logical data type.
    pub data_type: DataType,
    /// Whether the field may hold nulls.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Primary-key marker.
    #[serde(default)]
    pub is_primary_key: bool,
    /// Foreign-key target, when the field is a foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKeyRef>,
}

fn default_nullable() -> bool {
    true
}

impl FieldDescriptor {
    /// Creates a nullable, non-key field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            data_type,
            nullable: true,
            is_primary_key: false,
            references: None,
        }
    }

    /// Marks the field as the primary key (implies non-null).
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// Declares a foreign key to `table_id.field_name`.
    pub fn references(mut self, table_id: impl Into<String>, field_name: impl Into<String>) -> Self {
        self.references = Some(ForeignKeyRef {
            table_id: table_id.into(),
            field_name: field_name.into(),
        });
        self
    }

    /// Marks the field as non-nullable.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Overrides the display name.
    pub fn display(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Returns `true` when the field declares a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }
}

/// Description of a table and its fields.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    /// Stable table identifier, also used as the table name in query text.
    pub id: String,
    /// Human-readable label.
    #[serde(default)]
    pub display_name: String,
    /// Fields in catalog order.
    pub fields: Vec<FieldDescriptor>,
}

impl TableDescriptor {
    /// Creates an empty table descriptor.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Read-only access to table metadata for validation and join inference.
pub trait SchemaCatalog {
    /// Resolves a table identifier.
    fn table(&self, table_id: &str) -> Option<&TableDescriptor>;

    /// Resolves a field of a table.
    fn field(&self, table_id: &str, field_name: &str) -> Option<&FieldDescriptor> {
        self.table(table_id)?.field(field_name)
    }
}

/// Catalog held entirely in memory, typically deserialized from the metadata
/// service's JSON document.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    tables: Vec<TableDescriptor>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table, replacing any previous table with the same id.
    pub fn with_table(mut self, table: TableDescriptor) -> Self {
        self.tables.retain(|existing| existing.id != table.id);
        self.tables.push(table);
        self
    }

    /// Tables in registration order.
    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    /// Parses the `{"tables": [...]}` JSON document.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl SchemaCatalog for InMemoryCatalog {
    fn table(&self, table_id: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|table| table.id == table_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_fields_through_trait() {
        let catalog = InMemoryCatalog::new().with_table(
            TableDescriptor::new("orders")
                .with_field(FieldDescriptor::new("order_id", DataType::Number).primary_key())
                .with_field(
                    FieldDescriptor::new("customer_id", DataType::String)
                        .references("customers", "customer_id"),
                ),
        );
        let field = catalog.field("orders", "customer_id").expect("field exists");
        assert!(field.is_foreign_key());
        assert!(catalog.field("orders", "missing").is_none());
        assert!(catalog.table("customers").is_none());
        assert!(!catalog.field("orders", "order_id").expect("pk").nullable);
    }

    #[test]
    fn parses_json_document() {
        let json = r#"{
            "tables": [{
                "id": "customers",
                "fields": [
                    {"name": "customer_id", "dataType": "string", "isPrimaryKey": true},
                    {"name": "name", "dataType": "string", "nullable": false}
                ]
            }]
        }"#;
        let catalog = InMemoryCatalog::from_json(json).expect("valid catalog");
        let table = catalog.table("customers").expect("table");
        assert_eq!(table.fields.len(), 2);
        assert!(table.fields[0].is_primary_key);
        assert!(table.fields[0].nullable);
        assert!(!table.fields[1].nullable);
    }

    #[test]
    fn re_registering_replaces_table() {
        let catalog = InMemoryCatalog::new()
            .with_table(TableDescriptor::new("t"))
            .with_table(TableDescriptor::new("t").with_field(FieldDescriptor::new("a", DataType::Number)));
        assert_eq!(catalog.tables().len(), 1);
        assert!(catalog.field("t", "a").is_some());
    }
}
