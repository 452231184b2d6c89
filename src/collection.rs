use bson::oid::ObjectId;
use bson::{doc, Document};
use log::debug;
use serde::Deserialize;

use crate::client::Client;
use crate::command::{check_reply_flags, is_namespace_not_found};
use crate::cursor::Cursor;
use crate::errors::{DriverError, DriverResult};
use crate::find_and_modify::FindAndModify;
use crate::utils::bson_as_i64;
use crate::wire::{MongoOp, Namespace, OpDelete, OpInsert, OpQuery, OpUpdate};
use crate::write_concern::{WriteResult, INDEX_CONFLICT_CODES};

const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert the document when nothing matches.
    pub upsert: bool,
    /// Apply to every matching document instead of the first.
    pub multi: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: i32,
    /// 0 uses the client's batch size.
    pub batch_size: i32,
    /// 0 means no limit.
    pub limit: i32,
}

#[derive(Debug, Deserialize)]
struct CommandCursor {
    cursor: CursorDescriptor,
}

#[derive(Debug, Deserialize)]
struct CursorDescriptor {
    id: i64,
    #[serde(rename = "firstBatch")]
    first_batch: Vec<Document>,
}

/// Prepends a fresh ObjectId unless the document carries its own `_id`.
pub fn ensure_id(document: Document) -> Document {
    if document.contains_key(ID_FIELD) {
        return document;
    }
    let mut with_id = Document::new();
    with_id.insert(ID_FIELD, ObjectId::new());
    for (key, value) in document {
        with_id.insert(key, value);
    }
    with_id
}

/// Handle on `<database>.<collection>`. Holds no state besides its name;
/// every call checks a connection out of the client.
#[derive(Clone)]
pub struct Collection {
    client: Client,
    namespace: Namespace,
}

impl Collection {
    pub(crate) fn new(client: Client, database: &str, name: &str) -> Collection {
        Collection {
            client,
            namespace: Namespace::new(database, name),
        }
    }

    pub fn database_name(&self) -> &str {
        &self.namespace.database
    }

    pub fn name(&self) -> &str {
        &self.namespace.collection
    }

    pub fn full_name(&self) -> String {
        self.namespace.full_name()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn write(&self, op: MongoOp) -> DriverResult<WriteResult> {
        let connection = self.client.checkout()?;
        let acknowledge_on = if self.client.write_concern().is_acknowledged() {
            Some(self.namespace.database.as_str())
        } else {
            None
        };
        connection.write(&op, acknowledge_on)
    }

    pub(crate) fn command(&self, command: Document) -> DriverResult<Document> {
        let connection = self.client.checkout()?;
        connection.command(&self.namespace.database, command)
    }

    pub fn insert(&self, document: Document) -> DriverResult<WriteResult> {
        self.insert_many(vec![document])
    }

    pub fn insert_many(&self, documents: Vec<Document>) -> DriverResult<WriteResult> {
        if documents.is_empty() {
            return Err(DriverError::Configuration(
                "insert needs at least one document".to_string(),
            ));
        }
        let documents: Vec<Document> = documents.into_iter().map(ensure_id).collect();
        debug!("inserting {} documents into {}", documents.len(), self.namespace);
        self.write(MongoOp::Insert(OpInsert {
            flags: 0,
            full_collection_name: self.namespace.full_name(),
            documents,
        }))
    }

    /// Removes every document matching `filter`.
    pub fn remove(&self, filter: Document) -> DriverResult<WriteResult> {
        self.write(MongoOp::Delete(OpDelete {
            full_collection_name: self.namespace.full_name(),
            flags: 0,
            selector: filter,
        }))
    }

    /// Applies `update` to the first matching document, or to all of them with
    /// `multi`. An update made only of `$` operators modifies fields in place;
    /// any other document replaces the match. Mixed documents go to the
    /// server untouched.
    pub fn update(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> DriverResult<WriteResult> {
        let options = options.into().unwrap_or_default();
        let mut op = OpUpdate {
            full_collection_name: self.namespace.full_name(),
            flags: 0,
            selector: filter,
            update,
        };
        op.set_upsert(options.upsert);
        op.set_multi_update(options.multi);
        self.write(MongoOp::Update(op))
    }

    pub fn upsert(&self, filter: Document, update: Document) -> DriverResult<WriteResult> {
        self.update(
            filter,
            update,
            UpdateOptions {
                upsert: true,
                multi: false,
            },
        )
    }

    pub fn count(&self, filter: impl Into<Option<Document>>) -> DriverResult<u64> {
        let reply = self.command(doc! {
            "count": self.name(),
            "query": filter.into().unwrap_or_default(),
        })?;
        let n = reply.get("n").and_then(bson_as_i64).ok_or_else(|| {
            DriverError::FrameCorruption("count reply carries no numeric n".to_string())
        })?;
        Ok(n.max(0) as u64)
    }

    /// Drops the collection; a collection that does not exist is not an error.
    pub fn drop(&self) -> DriverResult<()> {
        match self.command(doc! { "drop": self.name() }) {
            Ok(_) => Ok(()),
            Err(ref error) if is_namespace_not_found(error) => {
                debug!("drop of missing collection {}", self.namespace);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Creates index `name` over `keys`. Re-creating the same index is a no-op;
    /// re-using the name for different keys or options fails with `IndexConflict`.
    pub fn create_index(&self, name: &str, keys: Document, options: Document) -> DriverResult<()> {
        if name.is_empty() || keys.is_empty() {
            return Err(DriverError::Configuration(
                "an index needs a name and at least one key".to_string(),
            ));
        }
        let mut index = doc! { "key": keys, "name": name };
        for (option, value) in options {
            if option != "key" && option != "name" {
                index.insert(option, value);
            }
        }
        let command = doc! {
            "createIndexes": self.name(),
            "indexes": [index],
        };
        match self.command(command) {
            Ok(_) => Ok(()),
            Err(DriverError::Command { code, message }) if INDEX_CONFLICT_CODES.contains(&code) => {
                Err(DriverError::IndexConflict { code, message })
            }
            Err(error) => Err(error),
        }
    }

    /// Index descriptions as stored by the server.
    pub fn list_indexes(&self) -> DriverResult<Vec<Document>> {
        let connection = self.client.checkout()?;
        let reply =
            match connection.command(&self.namespace.database, doc! { "listIndexes": self.name() }) {
                Ok(reply) => reply,
                Err(ref error) if is_namespace_not_found(error) => return Ok(vec![]),
                Err(error) => return Err(error),
            };
        let descriptor: CommandCursor = bson::from_document(reply)?;
        let cursor = Cursor::new(
            connection,
            self.namespace.clone(),
            descriptor.cursor.id,
            descriptor.cursor.first_batch,
            self.client.batch_size(),
            0,
        );
        cursor.collect_documents()
    }

    /// Queries documents matching `filter` (everything when absent), returning
    /// the fields selected by `projection`.
    pub fn cursor(
        &self,
        filter: impl Into<Option<Document>>,
        projection: impl Into<Option<Document>>,
    ) -> DriverResult<Cursor> {
        self.find(
            filter.into().unwrap_or_default(),
            FindOptions {
                projection: projection.into(),
                ..Default::default()
            },
        )
    }

    pub fn find(&self, filter: Document, options: FindOptions) -> DriverResult<Cursor> {
        let batch_size = if options.batch_size > 0 {
            options.batch_size
        } else {
            self.client.batch_size()
        };
        let number_to_return = match (options.limit, batch_size) {
            (0, batch_size) => batch_size,
            (limit, 0) => limit,
            (limit, batch_size) => limit.min(batch_size),
        };
        let query = match options.sort {
            Some(sort) => doc! { "$query": filter, "$orderby": sort },
            None => filter,
        };
        let connection = self.client.checkout()?;
        let reply = connection.query(OpQuery {
            flags: 0,
            full_collection_name: self.namespace.full_name(),
            number_to_skip: options.skip,
            number_to_return,
            query,
            return_fields_selector: options.projection,
        })?;
        check_reply_flags(&reply, 0)?;
        Ok(Cursor::new(
            connection,
            self.namespace.clone(),
            reply.cursor_id,
            reply.documents,
            batch_size,
            options.limit,
        ))
    }

    pub fn find_one(&self, filter: Document) -> DriverResult<Option<Document>> {
        let connection = self.client.checkout()?;
        let mut reply = connection.query(OpQuery {
            flags: 0,
            full_collection_name: self.namespace.full_name(),
            number_to_skip: 0,
            number_to_return: -1,
            query: filter,
            return_fields_selector: None,
        })?;
        check_reply_flags(&reply, 0)?;
        if reply.documents.is_empty() {
            return Ok(None);
        }
        Ok(Some(reply.documents.swap_remove(0)))
    }

    pub fn find_and_modify(&self) -> FindAndModify {
        FindAndModify::new(self.clone())
    }
}

#[cfg(test)]
mod collection_tests {
    use bson::doc;

    use super::*;

    #[test]
    fn test_ensure_id_keeps_existing_id() {
        let document = doc! { "_id": 5, "name": "x" };
        assert_eq!(ensure_id(document.clone()), document);
    }

    #[test]
    fn test_ensure_id_prepends_object_id() {
        let document = ensure_id(doc! { "name": "x", "value": 1 });
        let keys: Vec<&String> = document.keys().collect();
        assert_eq!(keys, vec!["_id", "name", "value"]);
        assert!(document.get_object_id("_id").is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ensure_id(doc! {});
        let b = ensure_id(doc! {});
        assert_ne!(a.get_object_id("_id").ok(), b.get_object_id("_id").ok());
    }

    #[test]
    fn test_collection_identity() {
        let collection = Client::new().get_collection("test", "client");
        assert_eq!(collection.database_name(), "test");
        assert_eq!(collection.name(), "client");
        assert_eq!(collection.namespace(), &Namespace::new("test", "client"));
    }

    #[test]
    fn test_operations_on_unopened_client_fail_closed() {
        let collection = Client::new().get_collection("test", "client");
        match collection.count(None) {
            Err(DriverError::ConnectionClosed) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }
}
