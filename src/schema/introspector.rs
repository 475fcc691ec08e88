// Schema introspection
//
// Answers "does table T have column C" from the declarative definitions
// alone. Steps and the commit phase use this to check their data needs
// before the permanent store exists.

use super::definition::SchemaDefinition;

pub struct SchemaIntrospector {
    definition: SchemaDefinition,
}

impl SchemaIntrospector {
    pub fn new(definition: SchemaDefinition) -> Self {
        SchemaIntrospector { definition }
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.definition.table(name).is_some()
    }

    /// Column names for `table` in declaration order; empty when the table
    /// is undeclared.
    pub fn columns(&self, table: &str) -> Vec<&str> {
        self.definition
            .table(table)
            .map(|t| t.columns.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// The subset of `required` not declared on `table`, in the order given.
    /// An undeclared table is missing every required column.
    pub fn missing_columns(&self, table: &str, required: &[&str]) -> Vec<String> {
        let declared = self.columns(table);
        required
            .iter()
            .filter(|r| !declared.contains(*r))
            .map(|r| r.to_string())
            .collect()
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }
}
