pub mod local;
pub mod resolver;
pub mod service;

pub use local::LocalMirrorService;
pub use resolver::FolderResolver;
pub use service::RemoteFolderService;
