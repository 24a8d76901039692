//! Command implementations

mod cache;
mod init;
mod inspect;
mod run;

pub use cache::CacheCommand;
pub use init::InitCommand;
pub use inspect::InspectCommand;
pub use run::RunCommand;
