// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Document, Error, Value};

/// Creation options of a collection
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CollectionOptions {
    /// Whether the collection is capped (evicts oldest documents first)
    pub capped: bool,

    /// Capped size limit in payload bytes
    pub size: Option<u64>,

    /// Capped document count limit
    pub max: Option<u64>,
}

fn non_negative(field: &str, value: &Value) -> crate::Result<u64> {
    match value {
        Value::Int(n) => u64::try_from(*n)
            .map_err(|_| Error::InvalidOptions(format!("{field} must not be negative"))),
        other => Err(Error::InvalidOptions(format!(
            "{field} must be an integer, got {other:?}"
        ))),
    }
}

impl CollectionOptions {
    /// Options of a capped collection.
    #[must_use]
    pub fn capped(size: u64, max: Option<u64>) -> Self {
        Self {
            capped: true,
            size: Some(size),
            max,
        }
    }

    /// Parses options from their document form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] on unknown fields, wrongly typed
    /// values, or a capped collection without a size.
    pub fn parse(doc: &Document) -> crate::Result<Self> {
        let mut options = Self::default();

        for (field, value) in doc.iter() {
            match field {
                "capped" => match value {
                    Value::Bool(b) => options.capped = *b,
                    other => {
                        return Err(Error::InvalidOptions(format!(
                            "capped must be a boolean, got {other:?}"
                        )))
                    }
                },
                "size" => options.size = Some(non_negative(field, value)?),
                "max" => options.max = Some(non_negative(field, value)?),
                other => {
                    return Err(Error::InvalidOptions(format!("unknown option {other:?}")));
                }
            }
        }

        if options.capped && options.size.is_none() {
            return Err(Error::InvalidOptions("capped collection needs a size".into()));
        }

        Ok(options)
    }

    /// Converts the options into their document form.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();

        if self.capped {
            doc.set("capped", true);
        }

        if let Some(size) = self.size {
            doc.set("size", i64::try_from(size).unwrap_or(i64::MAX));
        }

        if let Some(max) = self.max {
            doc.set("max", i64::try_from(max).unwrap_or(i64::MAX));
        }

        doc
    }
}

/// Definition of a single-field index
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexSpec {
    /// Index name, unique within its collection
    pub name: String,

    /// Indexed field
    pub key: String,

    /// Whether duplicate keys are rejected
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique index definition.
    pub fn new<N: Into<String>, K: Into<String>>(name: N, key: K) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            unique: false,
        }
    }

    /// Marks the index as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Converts the definition into its catalog document for namespace `ns`.
    #[must_use]
    pub fn to_document(&self, ns: &str) -> Document {
        Document::new()
            .with("name", self.name.as_str())
            .with("ns", ns)
            .with("key", self.key.as_str())
            .with("unique", self.unique)
    }

    /// Parses a catalog document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexBuild`] if a field is missing or wrongly typed.
    pub fn parse(doc: &Document) -> crate::Result<Self> {
        let string = |field: &str| match doc.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            other => Err(Error::IndexBuild(format!(
                "index field {field:?} must be a string, got {other:?}"
            ))),
        };

        let unique = match doc.get("unique") {
            Some(Value::Bool(b)) => *b,
            None => false,
            Some(other) => {
                return Err(Error::IndexBuild(format!(
                    "index field \"unique\" must be a boolean, got {other:?}"
                )))
            }
        };

        Ok(Self {
            name: string("name")?,
            key: string("key")?,
            unique,
        })
    }
}
