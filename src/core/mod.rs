pub mod cache;
pub mod comparator;
pub mod engine;
pub mod ensurer;
pub mod error;
pub mod events;
pub mod file_state;
pub mod paths;
pub mod scanner;
pub mod transfer;
pub mod watcher;

pub use cache::RemoteDirectoryCache;
pub use comparator::needs_upload;
pub use engine::{SyncEngine, SyncSummary};
pub use ensurer::DirectoryEnsurer;
pub use error::SyncError;
pub use events::{EventSink, SyncEvent};
pub use file_state::{DescriptorError, LocalFileDescriptor};
pub use paths::PathError;
pub use scanner::{FileScanner, ScanConfig};
pub use transfer::{PoolResult, TransferWorkerPool};
pub use watcher::{ChangeSet, ChangeTracker};
