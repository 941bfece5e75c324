pub mod counter;
pub mod naming;
pub mod path;

pub use counter::SessionCounter;
pub use path::{SessionPath, build_path};
