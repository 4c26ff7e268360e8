// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Error;

const MAX_DATABASE_NAME_LEN: usize = 64;

const INVALID_DATABASE_CHARS: &[char] = &[
    '/', '\\', '.', '"', '$', '*', '<', '>', ':', '|', '?', ' ', '\0',
];

/// Validated database name
///
/// Every file name and namespace name of a database is derived from it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Validates a database name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if the name is empty, too long
    /// or contains a character that cannot appear in a file name.
    pub fn new<S: Into<String>>(name: S) -> crate::Result<Self> {
        let name = name.into();

        if name.is_empty()
            || name.len() >= MAX_DATABASE_NAME_LEN
            || name.contains(INVALID_DATABASE_CHARS)
        {
            return Err(Error::InvalidName(name));
        }

        Ok(Self(name))
    }

    /// Extracts the database part of `db.collection` (or takes a plain database name).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if the database part is invalid.
    pub fn from_namespace(ns: &str) -> crate::Result<Self> {
        let db = ns.split_once('.').map_or(ns, |(db, _)| db);
        Self::new(db)
    }

    /// Returns the name as string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the full namespace name of a collection in this database.
    #[must_use]
    pub fn namespace(&self, collection: &str) -> String {
        format!("{}.{collection}", self.0)
    }
}

impl std::fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DatabaseName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A `db.collection` namespace name
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NamespaceString<'a> {
    db: &'a str,
    coll: &'a str,
}

impl<'a> NamespaceString<'a> {
    /// Splits a namespace at its first dot.
    ///
    /// A name without a dot is a database name with an empty collection part.
    #[must_use]
    pub fn new(ns: &'a str) -> Self {
        match ns.split_once('.') {
            Some((db, coll)) => Self { db, coll },
            None => Self { db: ns, coll: "" },
        }
    }

    /// Database part.
    #[must_use]
    pub fn db(&self) -> &'a str {
        self.db
    }

    /// Collection part.
    #[must_use]
    pub fn coll(&self) -> &'a str {
        self.coll
    }

    /// Internal namespaces live in the `system.` collection prefix.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }

    /// The namespace holding index definitions.
    #[must_use]
    pub fn is_system_dot_indexes(&self) -> bool {
        self.coll == "system.indexes"
    }

    /// Whether this names a regular collection rather than, e.g.,
    /// an index namespace (`coll.$index`).
    #[must_use]
    pub fn is_normal(&self) -> bool {
        !self.coll.contains('$') || self.coll == "oplog.$main"
    }
}

impl std::fmt::Display for NamespaceString<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}
