//! A blocking client for document databases speaking the legacy binary wire
//! protocol.
//!
//! ```no_run
//! use libmongowire::bson::doc;
//! use libmongowire::client::Client;
//!
//! # fn main() -> libmongowire::errors::DriverResult<()> {
//! let client = Client::new();
//! client.set_hosts("127.0.0.1:27017")?;
//! client.await_open()?;
//! let collection = client.get_collection("test", "client");
//! collection.insert(doc! { "_id": 1, "name": "a" })?;
//! for document in collection.cursor(None, None)? {
//!     println!("{}", document?);
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collection;
pub mod command;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod errors;
pub mod find_and_modify;
pub mod utils;
pub mod wire;
pub mod write_concern;

pub use bson;

pub use crate::client::Client;
pub use crate::collection::{Collection, FindOptions, UpdateOptions};
pub use crate::config::{ClientConfiguration, ServerAddress};
pub use crate::cursor::{Cursor, CursorState};
pub use crate::errors::{DriverError, DriverResult};
pub use crate::find_and_modify::FindAndModify;
pub use crate::write_concern::{WriteConcern, WriteResult};
