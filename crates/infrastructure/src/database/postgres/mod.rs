pub mod projection;
pub mod registry;

pub use projection::PostgresProjectionStore;
pub use registry::PostgresRegistryStore;
