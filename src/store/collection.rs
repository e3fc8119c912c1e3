use super::ScanStage;
use crate::core::document::{Document, ID_FIELD, id_key};
use crate::core::index::{IndexDirection, tokenize};
use crate::core::{DbError, Filter, IndexKey, IndexSpec, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub(crate) const ID_INDEX: &str = "_id_";

#[derive(Debug, Clone)]
pub(crate) struct StoredDocument {
    pub doc: Document,
    pub version: u64,
    pub seq: u64,
}

#[derive(Debug, Clone)]
enum IndexEntries {
    Ordered(BTreeMap<IndexKey, BTreeSet<String>>),
    Text(BTreeMap<String, BTreeSet<String>>),
}

#[derive(Debug, Clone)]
pub(crate) struct Index {
    spec: IndexSpec,
    name: String,
    entries: IndexEntries,
    /// Set once any indexed field held an array; such indexes cannot answer equality lookups.
    multikey: bool,
}

impl Index {
    fn new(spec: IndexSpec) -> Self {
        let entries = if spec.is_text() {
            IndexEntries::Text(BTreeMap::new())
        } else {
            IndexEntries::Ordered(BTreeMap::new())
        };
        Self {
            name: spec.name(),
            spec,
            entries,
            multikey: false,
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    fn insert(&mut self, id: &str, doc: &Document) {
        match &mut self.entries {
            IndexEntries::Ordered(map) => {
                let key = self.spec.key_for(doc);
                if key.0.iter().any(Value::is_array) {
                    self.multikey = true;
                }
                map.entry(key).or_default().insert(id.to_string());
            }
            IndexEntries::Text(map) => {
                for term in self.spec.terms_for(doc) {
                    map.entry(term).or_default().insert(id.to_string());
                }
            }
        }
    }

    fn remove(&mut self, id: &str, doc: &Document) {
        match &mut self.entries {
            IndexEntries::Ordered(map) => {
                let key = self.spec.key_for(doc);
                if let Some(ids) = map.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        map.remove(&key);
                    }
                }
            }
            IndexEntries::Text(map) => {
                for term in self.spec.terms_for(doc) {
                    if let Some(ids) = map.get_mut(&term) {
                        ids.remove(id);
                        if ids.is_empty() {
                            map.remove(&term);
                        }
                    }
                }
            }
        }
    }

    /// Ids under every key starting with `prefix`, plus the number of keys visited.
    fn lookup_prefix(&self, prefix: &[Value]) -> (BTreeSet<String>, usize) {
        let IndexEntries::Ordered(map) = &self.entries else {
            return (BTreeSet::new(), 0);
        };
        let mut ids = BTreeSet::new();
        let mut keys = 0;
        for (key, bucket) in map.range(IndexKey(prefix.to_vec())..) {
            if !key.starts_with(prefix) {
                break;
            }
            keys += bucket.len();
            ids.extend(bucket.iter().cloned());
        }
        (ids, keys)
    }

    fn lookup_terms(&self, terms: &BTreeSet<String>) -> (BTreeSet<String>, usize) {
        let IndexEntries::Text(map) = &self.entries else {
            return (BTreeSet::new(), 0);
        };
        let mut ids = BTreeSet::new();
        let mut keys = 0;
        for term in terms {
            if let Some(bucket) = map.get(term) {
                keys += bucket.len();
                ids.extend(bucket.iter().cloned());
            }
        }
        (ids, keys)
    }

    /// Whether `doc` contains any of `terms` in a text-indexed field.
    pub fn text_matches(&self, doc: &Document, terms: &BTreeSet<String>) -> bool {
        !self.spec.terms_for(doc).is_disjoint(terms)
    }
}

/// Access path for one query against committed data.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub stage: ScanStage,
    pub index_name: Option<String>,
    /// `None` means a full collection scan.
    pub candidates: Option<BTreeSet<String>>,
    pub keys_examined: usize,
}

impl Plan {
    pub fn collection_scan() -> Self {
        Self {
            stage: ScanStage::CollScan,
            index_name: None,
            candidates: None,
            keys_examined: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Collection {
    name: String,
    documents: HashMap<String, StoredDocument>,
    /// Insertion order: seq -> id key
    natural: BTreeMap<u64, String>,
    indexes: Vec<Index>,
    next_seq: u64,
    next_version: u64,
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: HashMap::new(),
            natural: BTreeMap::new(),
            indexes: Vec::new(),
            next_seq: 0,
            next_version: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.documents.get(id)
    }

    pub fn version_of(&self, id: &str) -> Option<u64> {
        self.documents.get(id).map(|d| d.version)
    }

    /// Ids in insertion order.
    pub fn scan_ids(&self) -> impl Iterator<Item = &String> {
        self.natural.values()
    }

    pub fn text_index(&self) -> Option<&Index> {
        self.indexes.iter().find(|idx| idx.spec.is_text())
    }

    /// Index definitions, starting with the implicit `_id_` index.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        std::iter::once(IndexSpec::ascending(ID_FIELD).named(ID_INDEX).unique())
            .chain(self.indexes.iter().map(|idx| {
                let mut spec = idx.spec.clone();
                spec.name = Some(idx.name.clone());
                spec
            }))
            .collect()
    }

    /// Create an index. Returns the index name and whether it was newly built.
    pub fn create_index(&mut self, spec: IndexSpec) -> Result<(String, bool)> {
        spec.validate()?;
        let name = spec.name();

        if spec.keys.len() == 1
            && spec.keys[0].field == ID_FIELD
            && spec.keys[0].direction != IndexDirection::Text
        {
            return Ok((ID_INDEX.to_string(), false));
        }

        for existing in &self.indexes {
            if existing.name == name {
                if existing.spec.same_definition(&spec) {
                    return Ok((name, false));
                }
                return Err(DbError::IndexConflict(format!(
                    "an index named '{}' already exists on '{}' with a different key pattern",
                    name, self.name
                )));
            }
            if existing.spec.same_definition(&spec) {
                return Err(DbError::IndexConflict(format!(
                    "index already exists on '{}' with a different name: {}",
                    self.name, existing.name
                )));
            }
            if existing.spec.is_text() && spec.is_text() {
                return Err(DbError::IndexConflict(format!(
                    "'{}' already has text index '{}'",
                    self.name, existing.name
                )));
            }
        }

        let mut index = Index::new(spec);
        for (id, stored) in &self.documents {
            if index.spec.unique
                && let IndexEntries::Ordered(map) = &index.entries
            {
                let key = index.spec.key_for(&stored.doc);
                if map.contains_key(&key) {
                    return Err(duplicate_key(&self.name, &index.name, &key));
                }
            }
            index.insert(id, &stored.doc);
        }

        self.indexes.push(index);
        Ok((name, true))
    }

    /// Fail if `doc` would collide on a unique secondary index with a committed
    /// document other than `id`. Ids for which `skip` returns true are ignored.
    pub fn unique_conflicts(&self, doc: &Document, id: &str, skip: impl Fn(&str) -> bool) -> Result<()> {
        for index in self.indexes.iter().filter(|idx| idx.spec.unique) {
            let IndexEntries::Ordered(map) = &index.entries else {
                continue;
            };
            let key = index.spec.key_for(doc);
            if let Some(ids) = map.get(&key)
                && ids.iter().any(|other| other != id && !skip(other.as_str()))
            {
                return Err(duplicate_key(&self.name, &index.name, &key));
            }
        }
        Ok(())
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter().filter(|idx| idx.spec.unique)
    }

    /// Choose an access path for `filter`.
    pub fn plan(&self, filter: &Filter) -> Result<Plan> {
        if let Some(search) = filter.text_search()? {
            let index = self.text_index().ok_or_else(|| {
                DbError::IndexNotFound(format!("text index required for $text query on '{}'", self.name))
            })?;
            let (ids, keys) = index.lookup_terms(&tokenize(search));
            return Ok(Plan {
                stage: ScanStage::Text,
                index_name: Some(index.name.clone()),
                candidates: Some(ids),
                keys_examined: keys,
            });
        }

        if let Some(id) = filter.id_equality() {
            let key = id_key(id);
            let found = self.documents.contains_key(&key);
            return Ok(Plan {
                stage: ScanStage::IdLookup,
                index_name: Some(ID_INDEX.to_string()),
                candidates: Some(if found { BTreeSet::from([key]) } else { BTreeSet::new() }),
                keys_examined: usize::from(found),
            });
        }

        let equalities: HashMap<&str, &Value> = filter
            .equality_fields()
            .into_iter()
            .filter(|(_, value)| !value.is_array())
            .collect();

        let best = self
            .indexes
            .iter()
            .filter(|idx| !idx.spec.is_text() && !idx.multikey)
            .map(|idx| {
                let prefix: Vec<Value> = idx
                    .spec
                    .fields()
                    .map_while(|field| equalities.get(field).map(|v| (*v).clone()))
                    .collect();
                (idx, prefix)
            })
            .filter(|(_, prefix)| !prefix.is_empty())
            .fold(None::<(&Index, Vec<Value>)>, |best, candidate| match best {
                Some(current) if current.1.len() >= candidate.1.len() => Some(current),
                _ => Some(candidate),
            });

        Ok(match best {
            Some((index, prefix)) => {
                let (ids, keys) = index.lookup_prefix(&prefix);
                Plan {
                    stage: ScanStage::IxScan,
                    index_name: Some(index.name.clone()),
                    candidates: Some(ids),
                    keys_examined: keys,
                }
            }
            None => Plan::collection_scan(),
        })
    }

    /// Install a committed write: `Some` inserts or replaces, `None` deletes.
    pub fn apply(&mut self, id: &str, document: Option<Document>) {
        if let Some(previous) = self.documents.remove(id) {
            for index in &mut self.indexes {
                index.remove(id, &previous.doc);
            }
            match &document {
                Some(doc) => {
                    for index in &mut self.indexes {
                        index.insert(id, doc);
                    }
                    let version = self.bump_version();
                    self.documents.insert(
                        id.to_string(),
                        StoredDocument {
                            doc: doc.clone(),
                            version,
                            seq: previous.seq,
                        },
                    );
                }
                None => {
                    self.natural.remove(&previous.seq);
                }
            }
            return;
        }

        if let Some(doc) = document {
            for index in &mut self.indexes {
                index.insert(id, &doc);
            }
            let seq = self.next_seq;
            self.next_seq += 1;
            let version = self.bump_version();
            self.natural.insert(seq, id.to_string());
            self.documents
                .insert(id.to_string(), StoredDocument { doc, version, seq });
        }
    }

    fn bump_version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }
}

pub(crate) fn duplicate_key(collection: &str, index: &str, key: &IndexKey) -> DbError {
    DbError::DuplicateKey {
        collection: collection.to_string(),
        index: index.to_string(),
        key: Value::Array(key.0.clone()).to_string(),
    }
}

pub(crate) fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DbError::InvalidCollection("collection name cannot be empty".into()));
    }
    if name.len() > 120 {
        return Err(DbError::InvalidCollection(format!("'{}' is too long", name)));
    }
    if name.contains('$') || name.contains('\0') {
        return Err(DbError::InvalidCollection(format!(
            "'{}' contains a reserved character",
            name
        )));
    }
    if name.starts_with("system.") {
        return Err(DbError::InvalidCollection(format!(
            "'{}' is in the reserved system namespace",
            name
        )));
    }
    Ok(())
}
