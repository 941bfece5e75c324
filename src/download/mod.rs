pub mod adaptive;
pub mod completion_log;
pub mod errors;
pub mod history;
pub mod item;
pub mod pipeline;
pub mod queue;
pub mod transfer;

pub use adaptive::{AdaptiveController, AdaptiveSettings, Profile};
pub use errors::{EngineError, PersistenceError, TransferError, ValidationError};
pub use item::{DownloadItem, ItemOutcome};
pub use queue::{QueueConfig, QueueReport, QueueStats, TaskQueue};
pub use transfer::{HttpTransfer, TransferService};
