//! CLI commands implementation

pub mod index;
pub mod init;
pub mod jobs;
pub mod pages;
pub mod status;

pub use index::*;
pub use init::*;
pub use jobs::*;
pub use pages::*;
pub use status::*;
