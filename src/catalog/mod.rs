pub mod builder;
pub mod resolve;
pub mod schema;
pub mod types;

pub use builder::discover;
pub use resolve::resolve_catalog;
pub use types::{
    Catalog, ColumnMetadata, ColumnSchema, Inclusion, JsonType, StreamEntry, StreamMetadata,
    TableSchema,
};
