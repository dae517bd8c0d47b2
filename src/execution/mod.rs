// Execution runtime.
//
// A Program is a DAG of iterators, operators, collections, file accesses,
// lockers, threads and variables, each addressed by a dense integer id
// assigned at registration. Iterators pull tuples; operators attached to
// an iterator run against each produced tuple and steer delivery through
// their returned status. Execution is cooperative and single-threaded per
// worker, with optional producer threads per input.

pub mod collection;
pub mod file_access;
pub mod iterator;
pub mod operator;
pub mod program;
pub mod status;
pub mod thread;
pub mod timestamp;

pub use program::Program;
pub use status::Status;

/// Dense ids handed out by a Program's registries.
pub type IteratorId = usize;
pub type CollectionId = usize;
pub type ActionId = usize;
pub type FileAccessId = usize;
pub type LockerId = usize;
pub type LocatorId = usize;
pub type ThreadId = usize;
pub type VariableId = usize;
