//! Entry store on top of the kdbx container

pub mod hash;
pub mod query;
pub mod transaction;
pub mod tree;

pub use hash::{JsonMode, ValueHasher};
pub use query::{Entity, QueryMode, QueryOptions, QueryResults, ValueMode};
pub use transaction::{collect, Transaction};
