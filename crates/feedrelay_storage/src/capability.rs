//! The capability matrix.
//!
//! Backend kinds differ in what they can really do. Rather than scattering
//! "resolve immediately" branches through the code, each kind declares one
//! row of the table below, and the dispatcher reads that row to decide
//! whether an operation touches the backend at all.
//!
//! | Kind | write | read | delete | truncate | len | is_empty | sync_all |
//! |---|---|---|---|---|---|---|---|
//! | [`BackendKind::Memory`] | impl | impl | stub | impl | impl | impl | stub |
//! | [`BackendKind::Device`] | impl | impl | stub | impl | stub | stub | stub |
//! | [`BackendKind::Keyed`] | impl | impl | stub | stub | stub | stub | stub |
//!
//! A stubbed operation succeeds immediately, changes nothing and returns the
//! empty shape of its result: `()` for commands, `None` ("unknown", never
//! zero) for `len` and `is_empty`.

use std::fmt;

/// A concrete storage technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Growable in-memory buffer.
    Memory,
    /// Encrypted-at-rest device file.
    Device,
    /// Key-indexed database emulation.
    Keyed,
}

impl BackendKind {
    /// All kinds, in table order.
    pub const ALL: [BackendKind; 3] = [BackendKind::Memory, BackendKind::Device, BackendKind::Keyed];

    /// Returns this kind's row of the capability matrix.
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            BackendKind::Memory => MEMORY,
            BackendKind::Device => DEVICE,
            BackendKind::Keyed => KEYED,
        }
    }

    /// Returns the lowercase name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Device => "device",
            BackendKind::Keyed => "keyed",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One of the seven operations of the uniform contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Byte-range write.
    Write,
    /// Byte-range read.
    Read,
    /// Byte-range delete.
    Delete,
    /// Resize.
    Truncate,
    /// Size query.
    Len,
    /// Emptiness query.
    IsEmpty,
    /// Flush.
    SyncAll,
}

impl Operation {
    /// All operations, in table order.
    pub const ALL: [Operation; 7] = [
        Operation::Write,
        Operation::Read,
        Operation::Delete,
        Operation::Truncate,
        Operation::Len,
        Operation::IsEmpty,
        Operation::SyncAll,
    ];

    /// Returns the operation name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Delete => "delete",
            Operation::Truncate => "truncate",
            Operation::Len => "len",
            Operation::IsEmpty => "is_empty",
            Operation::SyncAll => "sync_all",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a backend kind really performs an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// Performs real I/O and can fail.
    Implemented,
    /// Always succeeds immediately and changes nothing.
    Stubbed,
}

/// One row of the capability matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `write`.
    pub write: Support,
    /// `read`.
    pub read: Support,
    /// `delete`.
    pub delete: Support,
    /// `truncate`.
    pub truncate: Support,
    /// `len`.
    pub len: Support,
    /// `is_empty`.
    pub is_empty: Support,
    /// `sync_all`.
    pub sync_all: Support,
}

use Support::{Implemented, Stubbed};

const MEMORY: Capabilities = Capabilities {
    write: Implemented,
    read: Implemented,
    delete: Stubbed,
    truncate: Implemented,
    len: Implemented,
    is_empty: Implemented,
    sync_all: Stubbed,
};

const DEVICE: Capabilities = Capabilities {
    write: Implemented,
    read: Implemented,
    delete: Stubbed,
    truncate: Implemented,
    len: Stubbed,
    is_empty: Stubbed,
    sync_all: Stubbed,
};

const KEYED: Capabilities = Capabilities {
    write: Implemented,
    read: Implemented,
    delete: Stubbed,
    truncate: Stubbed,
    len: Stubbed,
    is_empty: Stubbed,
    sync_all: Stubbed,
};

impl Capabilities {
    /// Returns the support level for `op`.
    #[must_use]
    pub const fn support(&self, op: Operation) -> Support {
        match op {
            Operation::Write => self.write,
            Operation::Read => self.read,
            Operation::Delete => self.delete,
            Operation::Truncate => self.truncate,
            Operation::Len => self.len,
            Operation::IsEmpty => self.is_empty,
            Operation::SyncAll => self.sync_all,
        }
    }

    /// Returns true if `op` performs real work for this kind.
    #[must_use]
    pub const fn is_implemented(&self, op: Operation) -> bool {
        matches!(self.support(op), Support::Implemented)
    }
}
