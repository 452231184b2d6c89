use bson::{doc, Bson, Document};
use log::debug;
use serde::Deserialize;

use crate::collection::Collection;
use crate::errors::{DriverError, DriverResult};

#[derive(Debug, Deserialize)]
struct FindAndModifyReply {
    #[serde(default)]
    value: Option<Document>,
}

/// Collects the state of a single `findAndModify` command.
///
/// Setters chain on `&mut self`; [`FindAndModify::execute`] consumes the
/// accumulated state and may run only once.
///
/// ```no_run
/// # use bson::doc;
/// # use libmongowire::client::Client;
/// # let collection = Client::new().get_collection("test", "client");
/// let updated = collection
///     .find_and_modify()
///     .query(doc! { "_id": 20 })
///     .update(doc! { "_id": 20, "name": "X" })
///     .get_new()
///     .execute();
/// ```
pub struct FindAndModify {
    collection: Collection,
    query: Option<Document>,
    update: Option<Document>,
    sort: Option<Document>,
    fields: Option<Document>,
    upsert: bool,
    remove: bool,
    return_new: bool,
    executed: bool,
}

impl FindAndModify {
    pub(crate) fn new(collection: Collection) -> FindAndModify {
        FindAndModify {
            collection,
            query: None,
            update: None,
            sort: None,
            fields: None,
            upsert: false,
            remove: false,
            return_new: false,
            executed: false,
        }
    }

    pub fn query(&mut self, query: Document) -> &mut FindAndModify {
        self.query = Some(query);
        self
    }

    pub fn update(&mut self, update: Document) -> &mut FindAndModify {
        self.update = Some(update);
        self
    }

    /// Picks the first match in this order when several documents match.
    pub fn sort(&mut self, sort: Document) -> &mut FindAndModify {
        self.sort = Some(sort);
        self
    }

    /// Projection applied to the returned document.
    pub fn fields(&mut self, fields: Document) -> &mut FindAndModify {
        self.fields = Some(fields);
        self
    }

    pub fn upsert(&mut self) -> &mut FindAndModify {
        self.upsert = true;
        self
    }

    pub fn remove(&mut self) -> &mut FindAndModify {
        self.remove = true;
        self
    }

    /// Returns the modified document instead of the original.
    pub fn get_new(&mut self) -> &mut FindAndModify {
        self.return_new = true;
        self
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    fn build_command(&self) -> DriverResult<Document> {
        if self.executed {
            return Err(DriverError::Configuration(
                "findAndModify already executed".to_string(),
            ));
        }
        let query = match &self.query {
            Some(query) => query.clone(),
            None => {
                return Err(DriverError::Configuration(
                    "findAndModify needs a query".to_string(),
                ))
            }
        };
        let mut command = doc! {
            "findandmodify": self.collection.name(),
            "query": query,
        };
        if let Some(sort) = &self.sort {
            command.insert("sort", sort.clone());
        }
        match (&self.update, self.remove) {
            (Some(_), true) => {
                return Err(DriverError::Configuration(
                    "findAndModify cannot both update and remove".to_string(),
                ))
            }
            (None, false) => {
                return Err(DriverError::Configuration(
                    "findAndModify needs an update or remove".to_string(),
                ))
            }
            (None, true) if self.upsert => {
                return Err(DriverError::Configuration(
                    "findAndModify cannot upsert when removing".to_string(),
                ))
            }
            (None, true) => {
                command.insert("remove", true);
            }
            (Some(update), false) => {
                command.insert("update", update.clone());
                command.insert("new", self.return_new);
                command.insert("upsert", self.upsert);
            }
        }
        if let Some(fields) = &self.fields {
            command.insert("fields", fields.clone());
        }
        Ok(command)
    }

    /// Runs the command. Returns the original document, the modified one when
    /// [`get_new`](FindAndModify::get_new) was set, or `None` when nothing matched.
    pub fn execute(&mut self) -> DriverResult<Option<Document>> {
        let command = self.build_command()?;
        self.executed = true;
        debug!("findAndModify on {}", self.collection.namespace());
        let reply = match self.collection.command(command) {
            Ok(reply) => reply,
            Err(DriverError::Command { code, message }) => {
                return Err(DriverError::Write { code, message })
            }
            Err(error) => return Err(error),
        };
        if let Some(Bson::Null) = reply.get("value") {
            return Ok(None);
        }
        let reply: FindAndModifyReply = bson::from_document(reply)?;
        Ok(reply.value)
    }
}
