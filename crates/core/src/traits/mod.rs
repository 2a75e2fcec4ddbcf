pub mod event_source;
pub mod repository;

pub use event_source::*;
pub use repository::*;
