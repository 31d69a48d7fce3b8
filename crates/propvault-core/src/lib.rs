pub mod type_id;
pub mod value;
pub mod binary;
pub mod convert;
pub mod error;

// Re-export commonly used types
pub use type_id::{TypeDescriptor, TypeId, TypeKind, TypeRegistry, ValueType};
pub use value::{ObjectValue, Structured, Value, ValueArray};
pub use binary::{shutdown_cleanup, BinaryHandle, CleanupReport};
pub use convert::{ConversionRegistry, Converter};
pub use error::CoreError;
