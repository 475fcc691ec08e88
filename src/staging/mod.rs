// Session-backed staging area

mod file_store;
mod session;
mod staged;

pub use file_store::FileSessionStore;
pub use session::{MemorySessionStore, SessionStore};
pub use staged::{StagedDataStore, StagedSnapshot, STAGED_PREFIX};

pub(crate) use staged::lookup_path;
