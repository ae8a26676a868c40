pub mod budget;
pub mod dedup;
pub mod record;

pub use budget::*;
pub use dedup::*;
pub use record::*;
