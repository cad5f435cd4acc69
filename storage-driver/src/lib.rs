//! The driver interface between the registry and its durable byte store.

mod driver;
mod error;
mod range;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::StorageError;
pub use error::StorageErrorBuilder;
pub use error::StorageErrorKind;
pub use range::ByteRange;
