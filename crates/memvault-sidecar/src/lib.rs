pub mod config;
pub mod error;
pub mod launcher;
pub mod probe;
pub mod supervisor;

pub use config::*;
pub use error::SidecarError;
pub use launcher::*;
pub use probe::*;
pub use supervisor::*;
