//! Space-level structures: the old-space memory region and the object start
//! table that makes it randomly parseable.

pub mod space;
pub mod start_array;

pub use self::space::MutableSpace;
pub use self::start_array::ObjectStartArray;
