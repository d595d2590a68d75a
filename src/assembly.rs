//! Numbering and assembly of element degrees of freedom.
pub mod global;
pub mod local;
pub mod map;
