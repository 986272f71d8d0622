//! Entity type mapping.

use serde_json::Value;

use super::association::{ManyToOne, OneToMany};
use crate::storage::{ColumnDef, ForeignKey, TableSchema};

/// Scalar field of an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field (and column) name
    pub name: String,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// Value assigned to new instances
    pub default: Value,
}

impl FieldDef {
    /// Creates a nullable field defaulting to NULL.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            default: Value::Null,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }
}

/// Mapping of one entity type onto a table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    /// Entity type name
    pub name: String,
    /// Backing table name
    pub table: String,
    /// Scalar fields
    pub fields: Vec<FieldDef>,
    /// Whether row versions are checked on update and delete
    pub versioned: bool,
    /// To-one associations (owning side)
    pub many_to_one: Vec<ManyToOne>,
    /// To-many associations (inverse side)
    pub one_to_many: Vec<OneToMany>,
}

impl EntityType {
    /// Creates an entity type stored in a table of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            fields: Vec::new(),
            versioned: false,
            many_to_one: Vec::new(),
            one_to_many: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Enables optimistic version checks for this type.
    pub fn with_version(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn with_many_to_one(mut self, association: ManyToOne) -> Self {
        self.many_to_one.push(association);
        self
    }

    pub fn with_one_to_many(mut self, association: OneToMany) -> Self {
        self.one_to_many.push(association);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn reference(&self, name: &str) -> Option<&ManyToOne> {
        self.many_to_one.iter().find(|a| a.name == name)
    }

    pub fn collection(&self, name: &str) -> Option<&OneToMany> {
        self.one_to_many.iter().find(|a| a.name == name)
    }

    /// Returns the names of every field and association, in declaration order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.many_to_one.iter().map(|a| a.name.as_str()))
            .chain(self.one_to_many.iter().map(|a| a.name.as_str()))
    }

    /// Derives the table layout: one column per field and per foreign key.
    pub fn table_schema(&self, target_table: impl Fn(&str) -> Option<String>) -> TableSchema {
        let mut columns: Vec<ColumnDef> = self
            .fields
            .iter()
            .map(|f| ColumnDef {
                name: f.name.clone(),
                nullable: f.nullable,
            })
            .collect();
        let mut foreign_keys = Vec::with_capacity(self.many_to_one.len());

        for association in &self.many_to_one {
            columns.push(ColumnDef {
                name: association.column.clone(),
                nullable: association.nullable,
            });
            if let Some(references) = target_table(&association.target) {
                foreign_keys.push(ForeignKey {
                    column: association.column.clone(),
                    references,
                });
            }
        }

        TableSchema {
            name: self.table.clone(),
            columns,
            foreign_keys,
        }
    }
}
