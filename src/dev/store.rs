use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};

pub const DEFAULT_BATCH_SIZE: usize = 10;

pub const BAD_VALUE_CODE: i32 = 2;
pub const FAILED_TO_PARSE_CODE: i32 = 9;
pub const NAMESPACE_NOT_FOUND_CODE: i32 = 26;
pub const IMMUTABLE_FIELD_CODE: i32 = 66;
pub const INDEX_OPTIONS_CONFLICT_CODE: i32 = 85;
pub const INDEX_KEY_SPECS_CONFLICT_CODE: i32 = 86;
pub const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub code: i32,
    pub message: String,
}

impl StoreError {
    pub fn new(code: i32, message: impl Into<String>) -> StoreError {
        StoreError {
            code,
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an update, in the shape `getLastError` reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub n: i64,
    pub updated_existing: bool,
    pub upserted: Option<Bson>,
}

struct StoredCollection {
    documents: Vec<Document>,
    indexes: Vec<Document>,
}

impl StoredCollection {
    fn new(namespace: &str) -> StoredCollection {
        StoredCollection {
            documents: vec![],
            indexes: vec![doc! {
                "v": 2,
                "key": { "_id": 1 },
                "name": "_id_",
                "ns": namespace,
            }],
        }
    }
}

struct OpenCursor {
    remaining: VecDeque<Document>,
}

/// Collections and open cursors shared by every connection of a mock server.
#[derive(Default)]
pub struct Store {
    collections: HashMap<String, StoredCollection>,
    cursors: HashMap<i64, OpenCursor>,
    next_cursor_id: i64,
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// Orders numbers before strings before everything else.
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    fn rank(value: &Bson) -> u8 {
        match value {
            Bson::Null => 0,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
            Bson::String(_) => 2,
            _ => 3,
        }
    }
    match (a, b) {
        (Bson::String(a), Bson::String(b)) => a.cmp(b),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(document) => {
            !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
        }
        _ => false,
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> StoreResult<bool> {
    let operators = match condition {
        Bson::Document(operators) if is_operator_document(condition) => operators,
        _ => {
            return Ok(match value {
                Some(value) => values_equal(value, condition),
                None => *condition == Bson::Null,
            })
        }
    };
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => value.map_or(false, |value| values_equal(value, operand)),
            "$ne" => !value.map_or(false, |value| values_equal(value, operand)),
            "$gt" => value.map_or(false, |value| {
                compare_values(value, operand) == Ordering::Greater
            }),
            "$gte" => value.map_or(false, |value| {
                compare_values(value, operand) != Ordering::Less
            }),
            "$lt" => value.map_or(false, |value| {
                compare_values(value, operand) == Ordering::Less
            }),
            "$lte" => value.map_or(false, |value| {
                compare_values(value, operand) != Ordering::Greater
            }),
            "$in" => match operand {
                Bson::Array(candidates) => value.map_or(false, |value| {
                    candidates
                        .iter()
                        .any(|candidate| values_equal(value, candidate))
                }),
                _ => return Err(StoreError::new(BAD_VALUE_CODE, "$in needs an array")),
            },
            "$exists" => value.is_some() == (*operand != Bson::Boolean(false)),
            other => {
                return Err(StoreError::new(
                    BAD_VALUE_CODE,
                    format!("unknown operator: {}", other),
                ))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        if key.starts_with('$') {
            return Err(StoreError::new(
                BAD_VALUE_CODE,
                format!("unknown top level operator: {}", key),
            ));
        }
        if !field_matches(document.get(key), condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_modifier_update(update: &Document) -> bool {
    !update.is_empty() && update.keys().all(|key| key.starts_with('$'))
}

fn apply_modifiers(document: &mut Document, update: &Document) -> StoreResult<()> {
    for (modifier, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            _ => {
                return Err(StoreError::new(
                    FAILED_TO_PARSE_CODE,
                    format!("modifier {} needs a document", modifier),
                ))
            }
        };
        for (field, value) in fields {
            if field == "_id" && modifier != "$set" {
                return Err(StoreError::new(
                    IMMUTABLE_FIELD_CODE,
                    "the _id field cannot be modified",
                ));
            }
            match modifier.as_str() {
                "$set" => {
                    if field == "_id" && document.get(field).map_or(false, |id| id != value) {
                        return Err(StoreError::new(
                            IMMUTABLE_FIELD_CODE,
                            "the _id field cannot be modified",
                        ));
                    }
                    document.insert(field.clone(), value.clone());
                }
                "$unset" => {
                    document.remove(field);
                }
                "$inc" => {
                    let sum = match (document.get(field), value) {
                        (None, value) => value.clone(),
                        (Some(Bson::Int32(a)), Bson::Int32(b)) => Bson::Int32(a + b),
                        (Some(current), value) => match (as_f64(current), as_f64(value)) {
                            (Some(a), Some(b)) => match (current, value) {
                                (Bson::Double(_), _) | (_, Bson::Double(_)) => Bson::Double(a + b),
                                _ => Bson::Int64(a as i64 + b as i64),
                            },
                            _ => {
                                return Err(StoreError::new(
                                    BAD_VALUE_CODE,
                                    format!("cannot $inc non-numeric field {}", field),
                                ))
                            }
                        },
                    };
                    document.insert(field.clone(), sum);
                }
                other => {
                    return Err(StoreError::new(
                        FAILED_TO_PARSE_CODE,
                        format!("Unknown modifier: {}", other),
                    ))
                }
            }
        }
    }
    Ok(())
}

/// Applies a modifier update in place, or replaces every field but `_id`.
pub fn apply_update(document: &mut Document, update: &Document) -> StoreResult<()> {
    if update.keys().any(|key| key.starts_with('$')) {
        if !is_modifier_update(update) {
            return Err(StoreError::new(
                FAILED_TO_PARSE_CODE,
                "update mixes modifiers and plain fields",
            ));
        }
        return apply_modifiers(document, update);
    }
    let id = document.get("_id").cloned();
    if let (Some(id), Some(new_id)) = (&id, update.get("_id")) {
        if !values_equal(id, new_id) {
            return Err(StoreError::new(
                IMMUTABLE_FIELD_CODE,
                "the _id field cannot be modified",
            ));
        }
    }
    let mut replacement = Document::new();
    if let Some(id) = id {
        replacement.insert("_id", id);
    }
    for (key, value) in update {
        if key != "_id" {
            replacement.insert(key.clone(), value.clone());
        }
    }
    *document = replacement;
    Ok(())
}

/// The document an upsert inserts: plain equality fields of the filter,
/// then the update applied on top, with an `_id` generated when missing.
pub fn upsert_document(filter: &Document, update: &Document) -> StoreResult<Document> {
    let mut document = Document::new();
    if is_modifier_update(update) {
        for (key, value) in filter {
            if !key.starts_with('$') && !is_operator_document(value) {
                document.insert(key.clone(), value.clone());
            }
        }
        apply_modifiers(&mut document, update)?;
    } else {
        for (key, value) in update {
            document.insert(key.clone(), value.clone());
        }
        if !document.contains_key("_id") {
            if let Some(id) = filter.get("_id").filter(|id| !is_operator_document(id)) {
                document.insert("_id", id.clone());
            }
        }
    }
    Ok(with_id_first(document))
}

fn with_id_first(document: Document) -> Document {
    let mut ordered = Document::new();
    match document.get("_id") {
        Some(id) => ordered.insert("_id", id.clone()),
        None => ordered.insert("_id", ObjectId::new()),
    };
    for (key, value) in document {
        if key != "_id" {
            ordered.insert(key, value);
        }
    }
    ordered
}

pub fn sort_documents(documents: &mut Vec<Document>, sort: &Document) {
    documents.sort_by(|a, b| {
        for (key, direction) in sort {
            let ordering = compare_values(
                a.get(key).unwrap_or(&Bson::Null),
                b.get(key).unwrap_or(&Bson::Null),
            );
            let ordering = match as_f64(direction) {
                Some(direction) if direction < 0.0 => ordering.reverse(),
                _ => ordering,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Inclusion projections keep `_id` (unless excluded) and every field set
/// to a truthy value; projections with only falsy values drop those fields.
pub fn project(document: &Document, projection: &Document) -> Document {
    let included = |value: &Bson| match value {
        Bson::Boolean(value) => *value,
        value => as_f64(value).map_or(true, |value| value != 0.0),
    };
    let inclusive = projection.values().any(|value| included(value));
    let mut projected = Document::new();
    for (key, value) in document {
        let keep = match projection.get(key) {
            Some(flag) => included(flag),
            None => key == "_id" || !inclusive,
        };
        if keep {
            projected.insert(key.clone(), value.clone());
        }
    }
    projected
}

impl Store {
    pub fn new() -> Store {
        Store {
            collections: HashMap::new(),
            cursors: HashMap::new(),
            next_cursor_id: 1000,
        }
    }

    fn collection_or_create(&mut self, namespace: &str) -> &mut StoredCollection {
        self.collections
            .entry(namespace.to_string())
            .or_insert_with(|| StoredCollection::new(namespace))
    }

    pub fn exists(&self, namespace: &str) -> bool {
        self.collections.contains_key(namespace)
    }

    pub fn insert(&mut self, namespace: &str, documents: Vec<Document>) -> StoreResult<i64> {
        let collection = self.collection_or_create(namespace);
        let mut inserted = 0;
        for document in documents {
            let document = with_id_first(document);
            if let Some(id) = document.get("_id") {
                let duplicate = collection
                    .documents
                    .iter()
                    .any(|stored| stored.get("_id").map_or(false, |other| values_equal(id, other)));
                if duplicate {
                    return Err(StoreError::new(
                        DUPLICATE_KEY_CODE,
                        format!(
                            "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                            namespace, id
                        ),
                    ));
                }
            }
            collection.documents.push(document);
            inserted += 1;
        }
        Ok(inserted)
    }

    pub fn find(
        &self,
        namespace: &str,
        filter: &Document,
        sort: Option<&Document>,
    ) -> StoreResult<Vec<Document>> {
        let collection = match self.collections.get(namespace) {
            Some(collection) => collection,
            None => return Ok(vec![]),
        };
        let mut found = vec![];
        for document in &collection.documents {
            if matches(document, filter)? {
                found.push(document.clone());
            }
        }
        if let Some(sort) = sort {
            sort_documents(&mut found, sort);
        }
        Ok(found)
    }

    pub fn count(&self, namespace: &str, filter: &Document) -> StoreResult<i64> {
        Ok(self.find(namespace, filter, None)?.len() as i64)
    }

    pub fn update(
        &mut self,
        namespace: &str,
        selector: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> StoreResult<UpdateOutcome> {
        let mut n = 0;
        if let Some(collection) = self.collections.get_mut(namespace) {
            for document in collection.documents.iter_mut() {
                if !matches(document, selector)? {
                    continue;
                }
                let mut updated = document.clone();
                apply_update(&mut updated, update)?;
                *document = updated;
                n += 1;
                if !multi {
                    break;
                }
            }
        }
        if n > 0 {
            return Ok(UpdateOutcome {
                n,
                updated_existing: true,
                upserted: None,
            });
        }
        if !upsert {
            return Ok(UpdateOutcome {
                n: 0,
                updated_existing: false,
                upserted: None,
            });
        }
        let document = upsert_document(selector, update)?;
        let id = document.get("_id").cloned();
        self.insert(namespace, vec![document])?;
        Ok(UpdateOutcome {
            n: 1,
            updated_existing: false,
            upserted: id,
        })
    }

    pub fn delete(&mut self, namespace: &str, selector: &Document, single: bool) -> StoreResult<i64> {
        let collection = match self.collections.get_mut(namespace) {
            Some(collection) => collection,
            None => return Ok(0),
        };
        let mut doomed = vec![];
        for (position, document) in collection.documents.iter().enumerate() {
            if matches(document, selector)? {
                doomed.push(position);
                if single {
                    break;
                }
            }
        }
        for position in doomed.iter().rev() {
            collection.documents.remove(*position);
        }
        Ok(doomed.len() as i64)
    }

    /// Removes the collection; false when it did not exist.
    pub fn drop_collection(&mut self, namespace: &str) -> bool {
        self.collections.remove(namespace).is_some()
    }

    /// Adds an index description. Returns whether a new index was created;
    /// an identical index under the same name is accepted silently.
    pub fn create_index(&mut self, namespace: &str, index: Document) -> StoreResult<bool> {
        let name = index.get_str("name").map_err(|_| {
            StoreError::new(FAILED_TO_PARSE_CODE, "index specification needs a name")
        })?;
        let key = index.get_document("key").map_err(|_| {
            StoreError::new(FAILED_TO_PARSE_CODE, "index specification needs a key")
        })?;
        let collection = self.collection_or_create(namespace);
        if let Some(existing) = collection
            .indexes
            .iter()
            .find(|existing| existing.get_str("name").ok() == Some(name))
        {
            if existing.get_document("key").ok() != Some(key) {
                return Err(StoreError::new(
                    INDEX_KEY_SPECS_CONFLICT_CODE,
                    format!("Index with name: {} already exists with a different key", name),
                ));
            }
            let options_differ = index
                .iter()
                .filter(|(option, _)| *option != "key" && *option != "name")
                .any(|(option, value)| existing.get(option) != Some(value));
            if options_differ {
                return Err(StoreError::new(
                    INDEX_OPTIONS_CONFLICT_CODE,
                    format!("Index with name: {} already exists with different options", name),
                ));
            }
            return Ok(false);
        }
        let mut stored = doc! { "v": 2 };
        for (option, value) in index {
            stored.insert(option, value);
        }
        stored.insert("ns", namespace);
        collection.indexes.push(stored);
        Ok(true)
    }

    pub fn indexes(&self, namespace: &str) -> Option<Vec<Document>> {
        self.collections
            .get(namespace)
            .map(|collection| collection.indexes.clone())
    }

    /// Splits `documents` into the first batch and, when more remain, a new
    /// server cursor. A negative `number_to_return` asks for a single batch.
    pub fn open_cursor(&mut self, documents: Vec<Document>, number_to_return: i32) -> (i64, Vec<Document>) {
        let single_batch = number_to_return < 0;
        let mut remaining: VecDeque<Document> = documents.into();
        let batch = take_batch(&mut remaining, number_to_return);
        if single_batch || remaining.is_empty() {
            return (0, batch);
        }
        self.next_cursor_id += 1;
        let cursor_id = self.next_cursor_id;
        self.cursors.insert(cursor_id, OpenCursor { remaining });
        (cursor_id, batch)
    }

    /// Next batch of an open cursor; `None` when the id is unknown.
    pub fn get_more(&mut self, cursor_id: i64, number_to_return: i32) -> Option<(i64, Vec<Document>)> {
        let cursor = self.cursors.get_mut(&cursor_id)?;
        let batch = take_batch(&mut cursor.remaining, number_to_return);
        if cursor.remaining.is_empty() {
            self.cursors.remove(&cursor_id);
            return Some((0, batch));
        }
        Some((cursor_id, batch))
    }

    pub fn kill_cursors(&mut self, cursor_ids: &[i64]) {
        for cursor_id in cursor_ids {
            self.cursors.remove(cursor_id);
        }
    }

    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }
}

fn take_batch(remaining: &mut VecDeque<Document>, number_to_return: i32) -> Vec<Document> {
    let size = match number_to_return.unsigned_abs() as usize {
        0 => DEFAULT_BATCH_SIZE,
        size => size,
    };
    let size = size.min(remaining.len());
    remaining.drain(..size).collect()
}

#[cfg(test)]
mod store_tests {
    use bson::doc;

    use super::*;

    #[test]
    fn test_matches_operators() {
        let document = doc! { "_id": 3, "name": "c" };
        assert!(matches(&document, &doc! {}).unwrap());
        assert!(matches(&document, &doc! { "_id": 3i64 }).unwrap());
        assert!(matches(&document, &doc! { "_id": { "$gte": 3, "$lt": 4 } }).unwrap());
        assert!(!matches(&document, &doc! { "_id": { "$in": [1, 2] } }).unwrap());
        assert!(matches(&document, &doc! { "missing": null }).unwrap());
        assert_eq!(
            matches(&document, &doc! { "_id": { "$near": 1 } }).unwrap_err().code,
            BAD_VALUE_CODE
        );
    }

    #[test]
    fn test_set_keeps_other_fields() {
        let mut document = doc! { "_id": 1, "name": "a", "age": 3 };
        apply_update(&mut document, &doc! { "$set": { "name": "b" } }).unwrap();
        assert_eq!(document, doc! { "_id": 1, "name": "b", "age": 3 });
    }

    #[test]
    fn test_replace_drops_missing_fields() {
        let mut document = doc! { "_id": 1, "name": "a", "age": 3 };
        apply_update(&mut document, &doc! { "name": "b" }).unwrap();
        assert_eq!(document, doc! { "_id": 1, "name": "b" });
    }

    #[test]
    fn test_upsert_document_combines_filter_and_update() {
        let document = upsert_document(&doc! { "_id": 7 }, &doc! { "$set": { "name": "x" } }).unwrap();
        assert_eq!(document, doc! { "_id": 7, "name": "x" });
    }

    #[test]
    fn test_projection_modes() {
        let document = doc! { "_id": 1, "name": "a", "age": 3 };
        assert_eq!(project(&document, &doc! { "_id": 1 }), doc! { "_id": 1 });
        assert_eq!(project(&document, &doc! { "name": 1 }), doc! { "_id": 1, "name": "a" });
        assert_eq!(
            project(&document, &doc! { "name": true, "_id": 0 }),
            doc! { "name": "a" }
        );
        assert_eq!(project(&document, &doc! { "age": 0 }), doc! { "_id": 1, "name": "a" });
    }

    #[test]
    fn test_cursor_batches() {
        let mut store = Store::new();
        let documents: Vec<Document> = (0..25).map(|i| doc! { "_id": i }).collect();
        let (cursor_id, batch) = store.open_cursor(documents, 0);
        assert_ne!(cursor_id, 0);
        assert_eq!(batch.len(), DEFAULT_BATCH_SIZE);
        let (same_id, batch) = store.get_more(cursor_id, 0).unwrap();
        assert_eq!((same_id, batch.len()), (cursor_id, 10));
        let (finished, batch) = store.get_more(cursor_id, 0).unwrap();
        assert_eq!((finished, batch.len()), (0, 5));
        assert!(store.get_more(cursor_id, 0).is_none());
    }

    #[test]
    fn test_index_conflicts() {
        let mut store = Store::new();
        let index = doc! { "key": { "name": 1 }, "name": "name_" };
        assert!(store.create_index("db.c", index.clone()).unwrap());
        assert!(!store.create_index("db.c", index).unwrap());
        let conflict = store
            .create_index("db.c", doc! { "key": { "name": -1 }, "name": "name_" })
            .unwrap_err();
        assert_eq!(conflict.code, INDEX_KEY_SPECS_CONFLICT_CODE);
        assert_eq!(store.indexes("db.c").unwrap().len(), 2);
    }
}
