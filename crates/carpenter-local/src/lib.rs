//! Local backends for the Carpenter build worker.
//!
//! Everything here runs against the local filesystem:
//! - Blob fetcher reading tarballs from a directory
//! - Build executor running a shell command per build kind
//! - Asset publisher copying artifacts into a directory tree
//! - Head store backed by a JSON file
//! - Job source reading JSON lines
//! - Status channel appending events to a JSON-lines log

pub mod executor;
pub mod fetcher;
pub mod heads;
pub mod publisher;
pub mod source;
pub mod status;

pub use executor::CommandExecutor;
pub use fetcher::DirBlobFetcher;
pub use heads::FileHeadStore;
pub use publisher::DirPublisher;
pub use source::{json_lines, open_source};
pub use status::{ChannelSink, ChannelStatus, EventLog, StatusRecord};

