//! Record schemas.
//!
//! A [`Schema`] is the structural description of a stored record type: the
//! base record fields every type carries, followed by the type's own fields,
//! plus its uniqueness, index and compound-index declarations. Backends derive
//! tables, indexes and row codecs from it.
//!
//! ```rust,ignore
//! let schema = Schema::builder()
//!     .text("key")
//!     .json("value")
//!     .nested("address", |b| b.text("city").text("zip"))
//!     .unique("key")
//!     .compound_index(&["address.city", "address.zip"])
//!     .build();
//! ```

mod columns;

pub use columns::{nest_columns, project, project_instance, Column, ColumnType, SEPARATOR};

/// Declared type of a record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// 64-bit integer. Integer-backed enums use this too.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text. String-backed enums use this too.
    Text,
    /// Boolean.
    Boolean,
    /// 128-bit identifier.
    Uuid,
    /// Opaque structured value (lists, maps, dynamic data), stored encoded.
    Json,
    /// Sub-record whose fields are flattened into the parent.
    Nested(Vec<Field>),
}

impl FieldType {
    /// Returns the column type for scalar fields, `None` for nested ones.
    pub fn column_type(&self) -> Option<ColumnType> {
        Some(match self {
            Self::Integer => ColumnType::Integer,
            Self::Float => ColumnType::Float,
            Self::Text => ColumnType::Text,
            Self::Boolean => ColumnType::Boolean,
            Self::Uuid => ColumnType::Uuid,
            Self::Json => ColumnType::Json,
            Self::Nested(_) => return None,
        })
    }
}

/// A named, typed record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Declared type.
    pub ty: FieldType,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Fields shared by every stored record, in storage order.
pub fn base_fields() -> Vec<Field> {
    let meta = || {
        FieldType::Nested(vec![
            Field::new("timestamp", FieldType::Integer),
            Field::new("user_id", FieldType::Uuid),
        ])
    };
    let permission = || {
        FieldType::Nested(vec![
            Field::new("read", FieldType::Boolean),
            Field::new("write", FieldType::Boolean),
        ])
    };

    vec![
        Field::new("id", FieldType::Uuid),
        Field::new("owner", FieldType::Uuid),
        Field::new("parent", FieldType::Uuid),
        Field::new("seq", FieldType::Integer),
        Field::new("enabled", FieldType::Boolean),
        Field::new("note", FieldType::Text),
        Field::new("created", meta()),
        Field::new("updated", meta()),
        Field::new("accessed", meta()),
        Field::new(
            "permissions",
            FieldType::Nested(vec![
                Field::new("group", permission()),
                Field::new("all", permission()),
                Field::new("other", permission()),
            ]),
        ),
    ]
}

/// Structural description of a stored record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    unique: Vec<String>,
    index: Vec<String>,
    compound_index: Vec<Vec<String>>,
    events: bool,
}

impl Schema {
    /// Starts a schema; base record fields are always included.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// All fields: base record fields followed by the type's own.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Dotted paths declared unique.
    pub fn unique(&self) -> &[String] {
        &self.unique
    }

    /// Dotted paths declared as plain indexes.
    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Compound index groups.
    pub fn compound_index(&self) -> &[Vec<String>] {
        &self.compound_index
    }

    /// Whether writes of this type publish events.
    pub fn events(&self) -> bool {
        self.events
    }

    /// Returns true if `path` is unique.
    pub fn is_unique(&self, path: &str) -> bool {
        self.unique.iter().any(|u| u == path)
    }

    /// Resolves a dotted path to its declared type.
    ///
    /// Paths that continue below a JSON field resolve to [`FieldType::Json`]
    /// since their shape is not declared.
    pub fn field_type(&self, path: &str) -> Option<&FieldType> {
        let mut fields = self.fields.as_slice();
        let mut parts = path.split('.').peekable();

        while let Some(part) = parts.next() {
            let field = fields.iter().find(|f| f.name == part)?;
            match &field.ty {
                FieldType::Nested(children) if parts.peek().is_some() => {
                    fields = children.as_slice();
                }
                ty @ FieldType::Json => return Some(ty),
                ty if parts.peek().is_none() => return Some(ty),
                _ => return None,
            }
        }
        None
    }

    /// Returns true if `path` addresses a declared field.
    pub fn has_path(&self, path: &str) -> bool {
        self.field_type(path).is_some()
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    fields: Vec<Field>,
    unique: Vec<String>,
    index: Vec<String>,
    compound_index: Vec<Vec<String>>,
    events: bool,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            unique: Vec::new(),
            index: Vec::new(),
            compound_index: Vec::new(),
            events: true,
        }
    }
}

impl SchemaBuilder {
    /// Adds a field of any type.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(Field::new(name, ty));
        self
    }

    /// Adds an integer field.
    #[must_use]
    pub fn integer(self, name: impl Into<String>) -> Self {
        self.field(name, FieldType::Integer)
    }

    /// Adds a float field.
    #[must_use]
    pub fn float(self, name: impl Into<String>) -> Self {
        self.field(name, FieldType::Float)
    }

    /// Adds a text field.
    #[must_use]
    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(name, FieldType::Text)
    }

    /// Adds a boolean field.
    #[must_use]
    pub fn boolean(self, name: impl Into<String>) -> Self {
        self.field(name, FieldType::Boolean)
    }

    /// Adds an identifier field.
    #[must_use]
    pub fn uuid(self, name: impl Into<String>) -> Self {
        self.field(name, FieldType::Uuid)
    }

    /// Adds an opaque structured field (list, map, dynamic value).
    #[must_use]
    pub fn json(self, name: impl Into<String>) -> Self {
        self.field(name, FieldType::Json)
    }

    /// Adds a string-backed enum field.
    #[must_use]
    pub fn text_enum(self, name: impl Into<String>) -> Self {
        self.text(name)
    }

    /// Adds an integer-backed enum field.
    #[must_use]
    pub fn integer_enum(self, name: impl Into<String>) -> Self {
        self.integer(name)
    }

    /// Adds a nested sub-record.
    #[must_use]
    pub fn nested(
        self,
        name: impl Into<String>,
        build: impl FnOnce(SchemaBuilder) -> SchemaBuilder,
    ) -> Self {
        let inner = build(SchemaBuilder::default());
        self.field(name, FieldType::Nested(inner.fields))
    }

    /// Declares a unique dotted path.
    #[must_use]
    pub fn unique(mut self, path: impl Into<String>) -> Self {
        self.unique.push(path.into());
        self
    }

    /// Declares a plain index.
    #[must_use]
    pub fn index(mut self, path: impl Into<String>) -> Self {
        self.index.push(path.into());
        self
    }

    /// Declares a compound (ascending) index.
    #[must_use]
    pub fn compound_index(mut self, paths: &[&str]) -> Self {
        self.compound_index
            .push(paths.iter().map(|p| (*p).to_string()).collect());
        self
    }

    /// Disables event publication for this type.
    #[must_use]
    pub fn without_events(mut self) -> Self {
        self.events = false;
        self
    }

    /// Builds the schema, prepending the base record fields.
    pub fn build(self) -> Schema {
        let mut fields = base_fields();
        fields.extend(
            self.fields
                .into_iter()
                .filter(|f| !fields_contains(&base_fields(), &f.name)),
        );
        Schema {
            fields,
            unique: self.unique,
            index: self.index,
            compound_index: self.compound_index,
            events: self.events,
        }
    }
}

fn fields_contains(fields: &[Field], name: &str) -> bool {
    fields.iter().any(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Schema {
        Schema::builder()
            .text("name")
            .nested("address", |b| b.text("city").integer("zip"))
            .json("tags")
            .unique("name")
            .build()
    }

    #[test]
    fn base_fields_come_first() {
        let schema = person();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names[0], "id");
        assert_eq!(names[3], "seq");
        assert_eq!(&names[names.len() - 3..], &["name", "address", "tags"]);
    }

    #[test]
    fn resolves_paths() {
        let schema = person();
        assert_eq!(schema.field_type("name"), Some(&FieldType::Text));
        assert_eq!(schema.field_type("address.zip"), Some(&FieldType::Integer));
        assert_eq!(schema.field_type("created.timestamp"), Some(&FieldType::Integer));
        assert_eq!(schema.field_type("tags.anything"), Some(&FieldType::Json));
        assert!(schema.has_path("address"));
        assert!(!schema.has_path("address.street"));
        assert!(!schema.has_path("name.first"));
        assert!(!schema.has_path(""));
        assert!(!schema.has_path("missing"));
    }

    #[test]
    fn redeclared_base_field_is_ignored() {
        let schema = Schema::builder().integer("id").text("title").build();
        assert_eq!(schema.field_type("id"), Some(&FieldType::Uuid));
        assert_eq!(
            schema.fields().iter().filter(|f| f.name == "id").count(),
            1
        );
    }

    #[test]
    fn declarations() {
        let schema = Schema::builder()
            .text("a")
            .text("b")
            .unique("a")
            .index("b")
            .compound_index(&["a", "b"])
            .without_events()
            .build();
        assert!(schema.is_unique("a"));
        assert!(!schema.is_unique("b"));
        assert_eq!(schema.index(), &["b".to_string()]);
        assert_eq!(schema.compound_index().len(), 1);
        assert!(!schema.events());
    }
}
