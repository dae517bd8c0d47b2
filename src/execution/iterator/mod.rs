// Iterators: pull-based tuple producers.
//
// The base state machine lives here. `next` produces into the data
// buffer, then runs the attached operators; their status steers delivery:
// False suppresses the tuple, Break suppresses it and ends the iteration.
// `has_data` is true exactly while a produced tuple is current, and
// `has_next` flips to false exactly once at end of data.

pub mod cascade_input;
pub mod empty_null;
pub mod file_input;
pub mod filter;
pub mod input;
pub mod merge_sort;
pub mod tuples;
pub mod union_distinct;

use crate::common::Tuple;
use crate::error::Result;
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::{ActionId, IteratorId};

/// State shared by every iterator.
#[derive(Debug, Clone)]
pub struct IterBase {
    pub initialized: bool,
    pub has_next: bool,
    pub has_data: bool,
    pub data: Tuple,
    pub actions: Vec<ActionId>,
    pub startup_actions: Vec<ActionId>,
}

impl Default for IterBase {
    fn default() -> Self {
        Self::new()
    }
}

impl IterBase {
    pub fn new() -> Self {
        Self {
            initialized: false,
            has_next: true,
            has_data: false,
            data: Tuple::new(),
            actions: Vec::new(),
            startup_actions: Vec::new(),
        }
    }

    /// Back to the start-of-iteration state, keeping registered actions.
    pub fn reset_state(&mut self) {
        self.has_next = true;
        self.has_data = false;
        self.data.clear();
    }
}

pub trait IteratorNode: Send {
    fn base(&self) -> &IterBase;
    fn base_mut(&mut self) -> &mut IterBase;

    /// One-time resource binding. Idempotent; safe to call twice.
    fn initialize(&mut self, _program: &Program) -> Result<()> {
        self.base_mut().initialized = true;
        Ok(())
    }

    /// Pre-loop hook. `Break` skips the main loop entirely.
    fn start_up(&mut self, program: &Program) -> Result<Status> {
        let actions = self.base().startup_actions.clone();
        for id in actions {
            let slot = program.action(id)?;
            let status = slot.lock().execute(program, &Tuple::new())?;
            if status == Status::Break || status == Status::False {
                return Ok(status);
            }
        }
        Ok(Status::Success)
    }

    /// Produce the next tuple into the data buffer; false at end.
    fn produce(&mut self, program: &Program) -> Result<bool>;

    /// Produce one delivered tuple, running attached operators. Returns
    /// false exactly once at end of data.
    fn next(&mut self, program: &Program) -> Result<bool> {
        loop {
            if !self.base().has_next {
                self.base_mut().has_data = false;
                return Ok(false);
            }
            program.check_canceled()?;

            if !self.produce(program)? {
                let base = self.base_mut();
                base.has_next = false;
                base.has_data = false;
                return Ok(false);
            }
            self.base_mut().has_data = true;

            let actions = self.base().actions.clone();
            let mut verdict = Status::Success;
            for id in actions {
                let slot = program.action(id)?;
                let tuple = self.base().data.clone();
                let status = slot.lock().execute(program, &tuple)?;
                if status == Status::False || status == Status::Break {
                    verdict = status;
                    break;
                }
            }

            match verdict {
                Status::Success | Status::Continue => return Ok(true),
                Status::False => continue,
                Status::Break => {
                    self.set_was_last(program);
                    self.base_mut().has_data = false;
                    return Ok(false);
                }
            }
        }
    }

    /// Re-yield from the beginning. Idempotent.
    fn reset(&mut self, program: &Program) -> Result<()>;

    /// Run the finish hooks of the attached operators (sort flush,
    /// collection close). Overriding iterators call this too.
    fn finish_actions(&mut self, program: &Program) -> Result<()> {
        let actions = self.base().actions.clone();
        for id in actions {
            let slot = program.action(id)?;
            slot.lock().finish(program)?;
        }
        Ok(())
    }

    /// End-of-iteration hook (sort flush, collection close).
    fn finish(&mut self, program: &Program) -> Result<()> {
        self.finish_actions(program)
    }

    /// Release resources; afterwards the iterator is as if freshly
    /// constructed.
    fn terminate(&mut self, _program: &Program) {
        let actions = std::mem::take(&mut self.base_mut().actions);
        let startup = std::mem::take(&mut self.base_mut().startup_actions);
        *self.base_mut() = IterBase::new();
        // Actions belong to the graph shape, not the run.
        self.base_mut().actions = actions;
        self.base_mut().startup_actions = startup;
        self.base_mut().initialized = false;
    }

    /// Ceiling hit: the next `next` returns false.
    fn set_was_last(&mut self, _program: &Program) {
        self.base_mut().has_next = false;
    }

    fn current(&self) -> &Tuple {
        &self.base().data
    }

    fn add_action(&mut self, action: ActionId) {
        self.base_mut().actions.push(action);
    }

    fn add_startup_action(&mut self, action: ActionId) {
        self.base_mut().startup_actions.push(action);
    }

    /// Copy an operand's current tuple into the own result buffer.
    fn set_result_from(&mut self, program: &Program, operand: IteratorId) -> Result<()> {
        let tuple = program.current_tuple(operand)?;
        self.base_mut().data = tuple;
        Ok(())
    }
}
