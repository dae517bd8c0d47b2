// Operators: actions attached to iterators or run at start-up.
//
// An operator sees each tuple its host produces and answers with a
// status: Success/Continue pass the tuple on, False suppresses it, Break
// suppresses it and ends the host's iteration.

pub mod collection_check;
pub mod is_substring_of;
pub mod iterate;
pub mod limit;
pub mod output;
pub mod rowid_check;

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::program::Program;
use crate::execution::status::Status;

pub trait Operator: Send {
    fn initialize(&mut self, _program: &Program) -> Result<()> {
        Ok(())
    }

    /// React to one tuple (empty at start-up invocations).
    fn execute(&mut self, program: &Program, tuple: &Tuple) -> Result<Status>;

    fn finish(&mut self, _program: &Program) -> Result<()> {
        Ok(())
    }

    fn terminate(&mut self, _program: &Program) {}
}
