//! Store services shared by the sync workers and the front ends.

mod database;
mod local_store;
mod sync_meta;
mod sync_queue;

pub use database::SharedDatabase;
pub use local_store::LocalStore;
pub use sync_meta::SyncMeta;
pub use sync_queue::SyncQueue;
