pub mod document;
pub mod error;
pub mod filter;
pub mod index;
pub mod query;
pub mod update;
pub mod value;

pub use document::{Document, ID_FIELD, document};
pub use error::{DbError, Result};
pub use filter::Filter;
pub use index::{IndexDirection, IndexField, IndexSpec};
pub use query::{FindOptions, SortKey, SortOrder};
pub use update::Update;
pub use value::{IndexKey, TypeClass, compare_values, date_value, values_equal};
