use bson::{doc, Bson, Document};
use libmongowire::wire::MongoOp;

use crate::store::{
    project, sort_documents, Store, StoreError, StoreResult, FAILED_TO_PARSE_CODE,
    NAMESPACE_NOT_FOUND_CODE,
};

const COMMAND_NOT_FOUND_CODE: i32 = 59;
const MAX_WIRE_VERSION: i32 = 2;

/// Per-connection state: the outcome of the last write, served by `getLastError`.
pub struct Session {
    pub last_error: Document,
}

impl Default for Session {
    fn default() -> Session {
        Session {
            last_error: doc! { "err": Bson::Null, "n": 0 },
        }
    }
}

impl Session {
    /// Forgets the last write outcome; every request other than
    /// `getLastError` does this.
    pub fn reset(&mut self) {
        self.last_error = doc! { "err": Bson::Null, "n": 0 };
    }
}

/// Whether `op` is a `getLastError` command.
pub fn asks_for_last_error(op: &MongoOp) -> bool {
    match op {
        MongoOp::Query(query) => {
            query.full_collection_name.ends_with(".$cmd")
                && query
                    .query
                    .keys()
                    .next()
                    .map_or(false, |name| name.eq_ignore_ascii_case("getlasterror"))
        }
        _ => false,
    }
}

fn failure(error: StoreError) -> Document {
    doc! { "ok": 0.0, "errmsg": error.message, "code": error.code }
}

/// The collection a command targets: the value of its first key.
fn collection_argument(command: &Document) -> StoreResult<String> {
    match command.iter().next() {
        Some((_, Bson::String(collection))) => Ok(collection.clone()),
        Some((name, _)) => Err(StoreError::new(
            FAILED_TO_PARSE_CODE,
            format!("{} needs a collection name", name),
        )),
        None => Err(StoreError::new(FAILED_TO_PARSE_CODE, "empty command")),
    }
}

fn optional_document<'a>(command: &'a Document, key: &str) -> Option<&'a Document> {
    command.get_document(key).ok()
}

fn flag(command: &Document, key: &str) -> bool {
    match command.get(key) {
        Some(Bson::Boolean(value)) => *value,
        Some(Bson::Int32(value)) => *value != 0,
        Some(Bson::Int64(value)) => *value != 0,
        Some(Bson::Double(value)) => *value != 0.0,
        _ => false,
    }
}

fn is_master() -> Document {
    doc! {
        "ismaster": true,
        "maxBsonObjectSize": 16 * 1024 * 1024,
        "maxMessageSizeBytes": 48_000_000,
        "maxWriteBatchSize": 1000,
        "minWireVersion": 0,
        "maxWireVersion": MAX_WIRE_VERSION,
        "ok": 1.0,
    }
}

fn count(store: &Store, database: &str, command: &Document) -> StoreResult<Document> {
    let namespace = format!("{}.{}", database, collection_argument(command)?);
    let filter = optional_document(command, "query").cloned().unwrap_or_default();
    let n = store.count(&namespace, &filter)?;
    Ok(doc! { "n": n, "ok": 1.0 })
}

fn drop_collection(store: &mut Store, database: &str, command: &Document) -> StoreResult<Document> {
    let namespace = format!("{}.{}", database, collection_argument(command)?);
    if !store.drop_collection(&namespace) {
        return Err(StoreError::new(NAMESPACE_NOT_FOUND_CODE, "ns not found"));
    }
    Ok(doc! { "ns": namespace, "ok": 1.0 })
}

fn find_and_modify(store: &mut Store, database: &str, command: &Document) -> StoreResult<Document> {
    let namespace = format!("{}.{}", database, collection_argument(command)?);
    let query = optional_document(command, "query").cloned().unwrap_or_default();
    let sort = optional_document(command, "sort");
    let fields = optional_document(command, "fields");
    let remove = flag(command, "remove");
    let return_new = flag(command, "new");
    let upsert = flag(command, "upsert");
    let update = optional_document(command, "update");
    if remove == update.is_some() {
        return Err(StoreError::new(
            FAILED_TO_PARSE_CODE,
            "need exactly one of remove or update",
        ));
    }

    let original = store.find(&namespace, &query, sort)?.into_iter().next();
    let value = match (original, update) {
        (Some(original), None) => {
            let id = original.get("_id").cloned().unwrap_or(Bson::Null);
            store.delete(&namespace, &doc! { "_id": id }, true)?;
            Some(original)
        }
        (None, None) => None,
        (Some(original), Some(update)) => {
            let id = original.get("_id").cloned().unwrap_or(Bson::Null);
            let selector = doc! { "_id": id };
            store.update(&namespace, &selector, update, false, false)?;
            if return_new {
                store.find(&namespace, &selector, None)?.into_iter().next()
            } else {
                Some(original)
            }
        }
        (None, Some(update)) if upsert => {
            let outcome = store.update(&namespace, &query, update, true, false)?;
            match (return_new, outcome.upserted) {
                (true, Some(id)) => store.find(&namespace, &doc! { "_id": id }, None)?.into_iter().next(),
                _ => None,
            }
        }
        (None, Some(_)) => None,
    };
    let value = match (value, fields) {
        (Some(document), Some(fields)) => Bson::Document(project(&document, fields)),
        (Some(document), None) => Bson::Document(document),
        (None, _) => Bson::Null,
    };
    Ok(doc! { "value": value, "ok": 1.0 })
}

fn create_indexes(store: &mut Store, database: &str, command: &Document) -> StoreResult<Document> {
    let namespace = format!("{}.{}", database, collection_argument(command)?);
    let indexes = command
        .get_array("indexes")
        .map_err(|_| StoreError::new(FAILED_TO_PARSE_CODE, "createIndexes needs an indexes array"))?;
    let before = store.indexes(&namespace).map_or(0, |indexes| indexes.len()) as i32;
    for index in indexes {
        match index {
            Bson::Document(index) => {
                store.create_index(&namespace, index.clone())?;
            }
            _ => {
                return Err(StoreError::new(
                    FAILED_TO_PARSE_CODE,
                    "index specification must be a document",
                ))
            }
        }
    }
    let after = store.indexes(&namespace).map_or(0, |indexes| indexes.len()) as i32;
    Ok(doc! {
        "numIndexesBefore": before,
        "numIndexesAfter": after,
        "ok": 1.0,
    })
}

fn list_indexes(store: &mut Store, database: &str, command: &Document) -> StoreResult<Document> {
    let namespace = format!("{}.{}", database, collection_argument(command)?);
    let indexes = store
        .indexes(&namespace)
        .ok_or_else(|| StoreError::new(NAMESPACE_NOT_FOUND_CODE, "ns not found"))?;
    let batch_size = command
        .get_document("cursor")
        .ok()
        .and_then(|cursor| cursor.get_i32("batchSize").ok())
        .unwrap_or(0);
    let (cursor_id, first_batch) = store.open_cursor(indexes, batch_size);
    Ok(doc! {
        "cursor": {
            "id": cursor_id,
            "ns": namespace,
            "firstBatch": first_batch,
        },
        "ok": 1.0,
    })
}

/// Runs a command sent as a query against `<database>.$cmd`. Command names
/// match case-insensitively; failures come back as `ok: 0` documents.
pub fn run_command(
    store: &mut Store,
    session: &mut Session,
    database: &str,
    command: &Document,
) -> Document {
    let name = match command.keys().next() {
        Some(name) => name.to_lowercase(),
        None => return failure(StoreError::new(FAILED_TO_PARSE_CODE, "empty command")),
    };
    let result = match name.as_str() {
        "ismaster" => Ok(is_master()),
        "ping" => Ok(doc! { "ok": 1.0 }),
        "getlasterror" => {
            let mut reply = session.last_error.clone();
            reply.insert("ok", 1.0);
            Ok(reply)
        }
        "count" => count(store, database, command),
        "drop" => drop_collection(store, database, command),
        "findandmodify" => find_and_modify(store, database, command),
        "createindexes" => create_indexes(store, database, command),
        "listindexes" => list_indexes(store, database, command),
        other => Err(StoreError::new(
            COMMAND_NOT_FOUND_CODE,
            format!("no such command: '{}'", other),
        )),
    };
    result.unwrap_or_else(failure)
}

/// Splits a `{$query, $orderby}` wrapper into filter and sort.
pub fn unwrap_query(query: &Document) -> (Document, Option<Document>) {
    match query.get_document("$query") {
        Ok(filter) => (filter.clone(), query.get_document("$orderby").ok().cloned()),
        Err(_) => (query.clone(), None),
    }
}

/// Filters, sorts and projects `namespace` for an OP_QUERY.
pub fn run_query(
    store: &Store,
    namespace: &str,
    query: &Document,
    projection: Option<&Document>,
    skip: i32,
) -> StoreResult<Vec<Document>> {
    let (filter, sort) = unwrap_query(query);
    let mut documents = store.find(namespace, &filter, None)?;
    if let Some(sort) = &sort {
        sort_documents(&mut documents, sort);
    }
    let documents = documents
        .into_iter()
        .skip(skip.max(0) as usize)
        .map(|document| match projection {
            Some(projection) if !projection.is_empty() => project(&document, projection),
            _ => document,
        })
        .collect();
    Ok(documents)
}
