//! Built-in file-mutating tools: read/write/append/delete/move/list,
//! all rooted under a configured workspace directory with strict path
//! containment checks.

pub mod file_ops;
