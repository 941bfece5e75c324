pub mod machine;
pub mod source;
pub mod state;

pub use machine::{NextAction, PageExtraction, PaginationMachine, TickOutcome, step};
pub use source::{Navigator, PageCollector, PageDirectory, SourceError};
pub use state::{DateWindow, PaginationState, Phase};
