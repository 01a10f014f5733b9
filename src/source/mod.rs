pub mod lines;
pub mod store;
pub mod timestamp;

pub use lines::{DecodedObject, GzipOrPlain, LineSource};
pub use store::{ObjectFetcher, ObjectLister, ObjectStoreSource};
pub use timestamp::TimestampResolver;
