//! In-memory adapters for every engine port.
//!
//! Used by the end-to-end tests and single-process setups. Locks recover from
//! poisoning: a panicking test thread must not wedge the whole store.

mod directory;
mod dispatch;
mod ledger;
mod stores;

pub use directory::InMemoryDirectory;
pub use dispatch::{
    ChatterPost, JsonDocumentRenderer, MemoryChatter, PrintJob, RecordingMailDispatcher,
    RecordingPrintDispatcher, SentMail,
};
pub use ledger::{FixedRates, InMemoryLedger};
pub use stores::{InMemoryLevelStore, InMemoryStateStore};
