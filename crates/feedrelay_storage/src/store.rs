//! Well-known identifiers of a feed's files.

use std::fmt;

/// The files a feed keeps, each stored under its own identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    /// Hash tree nodes.
    Tree,
    /// Entry payloads.
    Data,
    /// Which entries are present locally.
    Bitfield,
    /// Operation log.
    Oplog,
}

impl Store {
    /// All stores.
    pub const ALL: [Store; 4] = [Store::Tree, Store::Data, Store::Bitfield, Store::Oplog];

    /// The identifier this store is kept under.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Store::Tree => "tree",
            Store::Data => "data",
            Store::Bitfield => "bitfield",
            Store::Oplog => "oplog",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl AsRef<str> for Store {
    fn as_ref(&self) -> &str {
        self.name()
    }
}
