// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::RecordLocation;
use crate::{coding::Encode, Document, Error, IndexSpec, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Encoded index key of `doc` under `spec`; a missing field indexes as null
pub(crate) fn key_of(spec: &IndexSpec, doc: &Document) -> crate::Result<Vec<u8>> {
    let value = doc.get(&spec.key).unwrap_or(&Value::Null);
    Ok(value.encode_into_vec()?)
}

/// In-memory single-field index
pub struct Index {
    spec: IndexSpec,
    entries: BTreeMap<Vec<u8>, BTreeSet<RecordLocation>>,
}

impl Index {
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Fails if inserting `doc` would violate uniqueness.
    pub fn check(&self, doc: &Document) -> crate::Result<()> {
        if !self.spec.unique {
            return Ok(());
        }

        let key = key_of(&self.spec, doc)?;

        if self.entries.get(&key).is_some_and(|locs| !locs.is_empty()) {
            return Err(Error::DuplicateKey(self.spec.name.clone()));
        }

        Ok(())
    }

    pub fn insert(&mut self, doc: &Document, location: RecordLocation) -> crate::Result<()> {
        self.check(doc)?;

        let key = key_of(&self.spec, doc)?;
        self.entries.entry(key).or_default().insert(location);

        Ok(())
    }

    pub fn remove(&mut self, doc: &Document, location: RecordLocation) -> crate::Result<()> {
        let key = key_of(&self.spec, doc)?;

        if let Some(locs) = self.entries.get_mut(&key) {
            locs.remove(&location);

            if locs.is_empty() {
                self.entries.remove(&key);
            }
        }

        Ok(())
    }

    /// Locations of all records whose indexed field equals `value`.
    pub fn lookup(&self, value: &Value) -> crate::Result<Vec<RecordLocation>> {
        let key = value.encode_into_vec()?;

        Ok(self
            .entries
            .get(&key)
            .map(|locs| locs.iter().copied().collect())
            .unwrap_or_default())
    }
}

fn validate(specs: &[IndexSpec]) -> crate::Result<()> {
    let mut seen = crate::HashSet::default();

    for spec in specs {
        if spec.name.is_empty() || spec.name.contains(['.', '$']) {
            return Err(Error::IndexBuild(format!(
                "invalid index name {:?}",
                spec.name
            )));
        }

        if spec.key.is_empty() {
            return Err(Error::IndexBuild(format!(
                "index {:?} has an empty key",
                spec.name
            )));
        }

        if !seen.insert(spec.name.as_str()) {
            return Err(Error::IndexBuild(format!(
                "index {:?} is defined twice",
                spec.name
            )));
        }
    }

    Ok(())
}

/// Collects index keys during a bulk load and builds the indexes at commit
///
/// Keys are only sorted and checked for uniqueness in [`BulkIndexBuilder::finish`].
pub struct BulkIndexBuilder {
    ns: String,
    specs: Vec<IndexSpec>,
    keys: Vec<Vec<(Vec<u8>, RecordLocation)>>,
}

impl BulkIndexBuilder {
    /// Starts a build of `specs` on collection `ns`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexBuild`] if an index name is empty, contains
    /// `.` or `$`, appears twice, or an index has no key.
    pub fn new(ns: &str, specs: Vec<IndexSpec>) -> crate::Result<Self> {
        validate(&specs)?;

        log::trace!("starting bulk build of {} index(es) on {ns}", specs.len());

        Ok(Self {
            ns: ns.into(),
            keys: specs.iter().map(|_| Vec::new()).collect(),
            specs,
        })
    }

    /// Collection being built.
    #[must_use]
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// Index definitions being built.
    #[must_use]
    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    pub(crate) fn add(&mut self, doc: &Document, location: RecordLocation) -> crate::Result<()> {
        for (spec, keys) in self.specs.iter().zip(&mut self.keys) {
            keys.push((key_of(spec, doc)?, location));
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, location: RecordLocation) {
        for keys in &mut self.keys {
            keys.retain(|(_, loc)| *loc != location);
        }
    }

    pub(crate) fn finish(self) -> crate::Result<Vec<Index>> {
        let mut indexes = Vec::with_capacity(self.specs.len());

        for (spec, mut keys) in self.specs.into_iter().zip(self.keys) {
            keys.sort();

            let has_duplicate = keys
                .windows(2)
                .any(|pair| matches!(pair, [a, b] if a.0 == b.0));

            if spec.unique && has_duplicate {
                return Err(Error::DuplicateKey(spec.name));
            }

            let mut index = Index::new(spec);
            for (key, location) in keys {
                index.entries.entry(key).or_default().insert(location);
            }

            indexes.push(index);
        }

        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn index_unique_rejects_duplicate() -> crate::Result<()> {
        let mut index = Index::new(IndexSpec::new("by_sku", "sku").unique());
        index.insert(&Document::new().with("sku", "a"), RecordLocation::new(0, 8))?;

        assert!(matches!(
            index.insert(&Document::new().with("sku", "a"), RecordLocation::new(0, 40)),
            Err(Error::DuplicateKey(name)) if name == "by_sku"
        ));

        index.remove(&Document::new().with("sku", "a"), RecordLocation::new(0, 8))?;
        index.insert(&Document::new().with("sku", "a"), RecordLocation::new(0, 40))?;

        Ok(())
    }

    #[test]
    fn index_missing_field_is_null() -> crate::Result<()> {
        let mut index = Index::new(IndexSpec::new("by_sku", "sku"));
        index.insert(&Document::new(), RecordLocation::new(0, 8))?;

        assert_eq!(
            vec![RecordLocation::new(0, 8)],
            index.lookup(&Value::Null)?
        );

        Ok(())
    }

    #[test]
    fn bulk_builder_validates_specs() {
        for specs in [
            vec![IndexSpec::new("", "a")],
            vec![IndexSpec::new("a.b", "a")],
            vec![IndexSpec::new("a$", "a")],
            vec![IndexSpec::new("x", "")],
            vec![IndexSpec::new("x", "a"), IndexSpec::new("x", "b")],
        ] {
            assert!(matches!(
                BulkIndexBuilder::new("shop.items", specs),
                Err(Error::IndexBuild(_))
            ));
        }
    }

    #[test]
    fn bulk_builder_unique_checked_at_finish() -> crate::Result<()> {
        let mut builder =
            BulkIndexBuilder::new("shop.items", vec![IndexSpec::new("by_sku", "sku").unique()])?;

        builder.add(&Document::new().with("sku", 1), RecordLocation::new(0, 8))?;
        builder.add(&Document::new().with("sku", 1), RecordLocation::new(0, 30))?;

        assert!(matches!(builder.finish(), Err(Error::DuplicateKey(_))));

        Ok(())
    }

    #[test]
    fn bulk_builder_remove_before_finish() -> crate::Result<()> {
        let mut builder =
            BulkIndexBuilder::new("shop.items", vec![IndexSpec::new("by_sku", "sku").unique()])?;

        builder.add(&Document::new().with("sku", 1), RecordLocation::new(0, 8))?;
        builder.add(&Document::new().with("sku", 1), RecordLocation::new(0, 30))?;
        builder.remove(RecordLocation::new(0, 8));

        let indexes = builder.finish()?;
        assert_eq!(
            vec![RecordLocation::new(0, 30)],
            indexes[0].lookup(&Value::Int(1))?
        );

        Ok(())
    }
}
