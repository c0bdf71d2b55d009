pub mod backend;
pub mod block_meta;
pub mod buffered;
pub mod error;
pub mod object_store;

pub use backend::{Backend, ObjectStoreBackend};
pub use block_meta::{object_path, BlockMeta, Encoding, META_NAME};
pub use buffered::BufferedReaderAt;
pub use error::{Result, StorageError};
pub use crate::object_store::{create_backend, create_object_store};
