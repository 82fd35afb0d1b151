pub mod error;
pub mod functions;
pub mod registry;
pub mod traits;

// Re-export common types
pub use error::{FunctionError, FunctionResult};
pub use registry::{FunctionCatalog, FunctionCatalogBuilder};
pub use traits::Function;
