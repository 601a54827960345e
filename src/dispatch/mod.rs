//! Address-space dispatch: pattern matching and handler registry

pub mod pattern;
pub mod space;

pub use pattern::Pattern;
pub use space::{AddressSpace, HandlerFn};
