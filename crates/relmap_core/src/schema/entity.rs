//! Entity-to-table mappings.

use super::relation::RelationSchema;
use relmap_store::{Row, Value};

/// Mapping of one role to a table.
///
/// Columns are declared as (field, column) pairs in declaration order.
/// An embedded role has no key of its own; its columns live in the table of
/// the role that embeds it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    /// Role name.
    pub role: String,
    /// Table name.
    pub table: String,
    /// Primary key fields.
    pub primary_key: Vec<String>,
    /// (field, column) pairs.
    pub columns: Vec<(String, String)>,
    /// Whether the store generates the (single-column) primary key.
    pub generated_key: bool,
    /// Whether the role is a slice of another role's row.
    pub embedded: bool,
    /// Relations in declaration order.
    pub relations: Vec<RelationSchema>,
}

impl EntitySchema {
    /// Declares a role stored in `table`.
    pub fn new(role: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            table: table.into(),
            primary_key: Vec::new(),
            columns: Vec::new(),
            generated_key: false,
            embedded: false,
            relations: Vec::new(),
        }
    }

    /// Declares fields whose column has the same name.
    #[must_use]
    pub fn fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for field in fields {
            let field = field.into();
            self.columns.push((field.clone(), field));
        }
        self
    }

    /// Declares a field stored under a different column name.
    #[must_use]
    pub fn column(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push((field.into(), column.into()));
        self
    }

    /// Sets the primary key fields.
    #[must_use]
    pub fn primary_key<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the primary key as store-generated.
    #[must_use]
    pub fn generated_key(mut self) -> Self {
        self.generated_key = true;
        self
    }

    /// Marks the role as embedded.
    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Adds a relation.
    #[must_use]
    pub fn relation(mut self, relation: RelationSchema) -> Self {
        self.relations.push(relation);
        self
    }

    /// Returns true if `field` is declared.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.columns.iter().any(|(f, _)| f == field)
    }

    /// Column of `field`.
    #[must_use]
    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, c)| c.as_str())
    }

    /// Declared field names.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(f, _)| f.as_str())
    }

    /// Relation by name.
    #[must_use]
    pub fn relation_named(&self, name: &str) -> Option<&RelationSchema> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Returns true if `field` is the generated key.
    #[must_use]
    pub fn is_generated(&self, field: &str) -> bool {
        self.generated_key && self.primary_key.len() == 1 && self.primary_key[0] == field
    }

    /// Maps field values to column values. Returns the first undeclared
    /// field as the error.
    pub fn to_columns(&self, fields: &Row) -> Result<Row, String> {
        fields
            .iter()
            .map(|(field, value)| {
                self.column_for(field)
                    .map(|column| (column.to_string(), value.clone()))
                    .ok_or_else(|| field.clone())
            })
            .collect()
    }

    /// Maps column values to field values, ignoring undeclared columns.
    #[must_use]
    pub fn from_columns(&self, row: &Row) -> Row {
        self.columns
            .iter()
            .filter_map(|(field, column)| row.get(column).map(|v| (field.clone(), v.clone())))
            .collect()
    }

    /// Values of `fields` in `data`, or `None` if any is missing or null.
    #[must_use]
    pub fn key_of(data: &Row, fields: &[String]) -> Option<Vec<Value>> {
        fields
            .iter()
            .map(|f| data.get(f).filter(|v| !v.is_null()).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_store::row;

    fn user() -> EntitySchema {
        EntitySchema::new("user", "users")
            .fields(["id", "name"])
            .column("email", "email_address")
            .primary_key(["id"])
            .generated_key()
    }

    #[test]
    fn column_mapping() {
        let schema = user();
        assert_eq!(schema.column_for("email"), Some("email_address"));
        assert_eq!(schema.column_for("missing"), None);
        assert!(schema.is_generated("id"));
        assert!(!schema.is_generated("name"));

        let columns = schema
            .to_columns(&row! { "name" => "ann", "email" => "a@x" })
            .unwrap();
        assert_eq!(columns, row! { "name" => "ann", "email_address" => "a@x" });
        assert_eq!(schema.to_columns(&row! { "age" => 3 }), Err("age".to_string()));
    }

    #[test]
    fn from_columns_ignores_unknown() {
        let fields = user().from_columns(&row! { "id" => 1, "email_address" => "a@x", "extra" => 0 });
        assert_eq!(fields, row! { "id" => 1, "email" => "a@x" });
    }

    #[test]
    fn key_of_requires_all_values() {
        let key = ["a".to_string(), "b".to_string()];
        assert_eq!(
            EntitySchema::key_of(&row! { "a" => 1, "b" => 2 }, &key),
            Some(vec![Value::Integer(1), Value::Integer(2)])
        );
        assert_eq!(EntitySchema::key_of(&row! { "a" => 1, "b" => Value::Null }, &key), None);
        assert_eq!(EntitySchema::key_of(&row! { "a" => 1 }, &key), None);
    }
}
