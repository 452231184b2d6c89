use std::fmt;

const COMMAND_COLLECTION: &str = "$cmd";

/// A `database.collection` pair addressing a wire-level target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: &str, collection: &str) -> Namespace {
        Namespace {
            database: database.to_string(),
            collection: collection.to_string(),
        }
    }

    /// The virtual namespace commands are sent to as queries.
    pub fn command(database: &str) -> Namespace {
        Namespace::new(database, COMMAND_COLLECTION)
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    pub fn is_command(&self) -> bool {
        self.collection == COMMAND_COLLECTION
    }

    /// Splits a namestring at its first dot.
    pub fn parse(full_name: &str) -> Option<Namespace> {
        let mut parts = full_name.splitn(2, '.');
        let database = parts.next()?;
        let collection = parts.next()?;
        if database.is_empty() || collection.is_empty() {
            return None;
        }
        Some(Namespace::new(database, collection))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[cfg(test)]
mod namespace_tests {
    use super::*;

    #[test]
    fn test_full_name() {
        assert_eq!(Namespace::new("test", "client").full_name(), "test.client");
        assert_eq!(Namespace::command("admin").full_name(), "admin.$cmd");
        assert!(Namespace::command("admin").is_command());
    }

    #[test]
    fn test_parse_keeps_dots_in_collection() {
        let namespace = Namespace::parse("test.system.indexes").unwrap();
        assert_eq!(namespace.database, "test");
        assert_eq!(namespace.collection, "system.indexes");
        assert_eq!(Namespace::parse("nodot"), None);
        assert_eq!(Namespace::parse(".x"), None);
    }
}
