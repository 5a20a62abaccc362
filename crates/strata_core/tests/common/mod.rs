//! Shared fixtures: a typed `users` entity, map-backed `images` and
//! `comments` entities, and the schema they live in.

#![allow(dead_code)]

use strata_core::backend::migrations::{Migration, Migrator};
use strata_core::{
    Collectioned, Dispatcher, Entity, FieldMap, FieldValue, Relation, SqliteBackend, StoreError,
    Structured,
};

/// Typed entity with a declared field layout.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct User {
    id: u64,
    pub name: String,
    pub age: i64,
}

impl User {
    pub fn new(name: impl Into<String>, age: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            age,
        }
    }
}

impl Collectioned for User {
    fn collection_name(&self) -> &'static str {
        "users"
    }
}

impl Entity for User {
    fn id(&self) -> u64 {
        self.id
    }

    fn fill(&mut self, id: u64, fields: Option<FieldMap>) {
        self.id = id;
        if let Some(fields) = fields {
            if let Some(name) = fields.get("name").and_then(FieldValue::as_text) {
                self.name = name.to_string();
            }
            if let Some(age) = fields.get("age").and_then(FieldValue::as_i64) {
                self.age = age;
            }
        }
    }

    fn clone_empty(&self) -> Box<dyn Entity> {
        Box::new(User::default())
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::from(self.name.clone())),
            "age" => Some(FieldValue::Integer(self.age)),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: FieldValue) {
        match name {
            "name" => {
                if let Some(text) = value.as_text() {
                    self.name = text.to_string();
                }
            }
            "age" => {
                if let Some(age) = value.as_i64() {
                    self.age = age;
                }
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldValue::from(self.name.clone()));
        fields.insert("age".to_string(), FieldValue::Integer(self.age));
        fields
    }

    fn as_structured(&self) -> Option<&dyn Structured> {
        Some(self)
    }
}

impl Structured for User {
    fn field_layout(&self) -> FieldMap {
        let mut layout = FieldMap::new();
        layout.insert("name".to_string(), FieldValue::Text(String::new()));
        layout.insert("age".to_string(), FieldValue::Integer(0));
        layout
    }
}

macro_rules! record_entity {
    ($ty:ident, $collection:literal) => {
        #[derive(Debug, Default)]
        pub struct $ty(pub strata_core::Record);

        impl Collectioned for $ty {
            fn collection_name(&self) -> &'static str {
                $collection
            }
        }

        impl Entity for $ty {
            fn id(&self) -> u64 {
                self.0.id()
            }
            fn fill(&mut self, id: u64, fields: Option<FieldMap>) {
                self.0.fill(id, fields);
            }
            fn clone_empty(&self) -> Box<dyn Entity> {
                Box::new($ty::default())
            }
            fn field(&self, name: &str) -> Option<FieldValue> {
                self.0.field(name)
            }
            fn set_field(&mut self, name: &str, value: FieldValue) {
                self.0.set_field(name, value);
            }
            fn snapshot(&self) -> FieldMap {
                self.0.snapshot()
            }
        }
    };
}

record_entity!(Image, "images");
record_entity!(Comment, "comments");

pub fn image(filename: &str, users_id: u64) -> Image {
    let mut image = Image::default();
    image.set_field("filename", FieldValue::from(filename));
    image.set_field("users_id", FieldValue::from(users_id));
    image
}

pub fn comment(body: &str, images_id: u64) -> Comment {
    let mut comment = Comment::default();
    comment.set_field("body", FieldValue::from(body));
    comment.set_field("images_id", FieldValue::from(images_id));
    comment
}

pub fn migrator() -> Migrator {
    Migrator::with_migrations(vec![
        Migration::up(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL DEFAULT '',
                age INTEGER NOT NULL DEFAULT 0
            )",
        ),
        Migration::up(
            "CREATE TABLE images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT,
                users_id INTEGER
            )",
        ),
        Migration::up(
            "CREATE TABLE comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body TEXT,
                images_id INTEGER
            )",
        ),
    ])
}

pub fn backend() -> SqliteBackend {
    let backend = SqliteBackend::open_in_memory().expect("in-memory database should open");
    apply_schema(&backend);
    backend
}

pub fn apply_schema(backend: &SqliteBackend) {
    backend
        .with_connection(|conn| migrator().apply(conn).map_err(StoreError::backend))
        .expect("schema migrations should apply");
}

/// Dispatcher over a fresh in-memory database with the
/// users -> images -> comments relations registered.
pub fn dispatcher() -> Dispatcher<SqliteBackend> {
    let mut dispatcher = Dispatcher::new(backend());
    dispatcher.register_relation(Relation::has_many(
        Box::new(User::default()),
        Box::new(Image::default()),
    ));
    dispatcher.register_relation(Relation::has_many(
        Box::new(Image::default()),
        Box::new(Comment::default()),
    ));
    dispatcher
}
