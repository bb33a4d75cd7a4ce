pub mod error;
pub mod layout;
pub mod logs;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use layout::{DATA_DIR_ENV, DataDir, default_base_dir};
pub use logs::{FileLogs, LogSource, parse_jsonl};
pub use store::{
    KEY_CURSORS, KEY_LAST_DIGEST, KEY_LEARNINGS, KEY_STATE, StateStore, StateStoreExt, Store,
};
