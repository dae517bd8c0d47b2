// FileInput: scans a logical file through its FileAccess. The access is
// opened at start-up (after any bitset filters were injected) and closed
// by finish; the access is never shared with another iterator.

use crate::common::Tuple;
use crate::driver::FileDriver;
use crate::error::Result;
use crate::execution::iterator::{IterBase, IteratorNode};
use crate::execution::program::Program;
use crate::execution::status::Status;
use crate::execution::FileAccessId;

pub struct FileInput {
    base: IterBase,
    access: FileAccessId,
}

impl FileInput {
    pub fn new(access: FileAccessId) -> Self {
        Self {
            base: IterBase::new(),
            access,
        }
    }
}

impl IteratorNode for FileInput {
    fn base(&self) -> &IterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IterBase {
        &mut self.base
    }

    fn start_up(&mut self, program: &Program) -> Result<Status> {
        let actions = self.base().startup_actions.clone();
        for id in actions {
            let slot = program.action(id)?;
            let status = slot.lock().execute(program, &Tuple::new())?;
            if status == Status::Break || status == Status::False {
                return Ok(status);
            }
        }
        program.file_access(self.access)?.lock().open(program)?;
        Ok(Status::Success)
    }

    fn produce(&mut self, program: &Program) -> Result<bool> {
        let slot = program.file_access(self.access)?;
        let mut access = slot.lock();
        if !access.is_open() {
            access.open(program)?;
        }
        access.get_data(program, &mut self.base.data)
    }

    fn reset(&mut self, program: &Program) -> Result<()> {
        let slot = program.file_access(self.access)?;
        let access = slot.lock();
        access.driver().reset()?;
        self.base.reset_state();
        Ok(())
    }

    fn finish(&mut self, program: &Program) -> Result<()> {
        program.file_access(self.access)?.lock().close(program);
        self.finish_actions(program)
    }

    fn terminate(&mut self, program: &Program) {
        if let Ok(slot) = program.file_access(self.access) {
            slot.lock().close(program);
        }
        let actions = std::mem::take(&mut self.base.actions);
        let startup = std::mem::take(&mut self.base.startup_actions);
        self.base = IterBase::new();
        self.base.actions = actions;
        self.base.startup_actions = startup;
        self.base.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DataType, FileIdentity, Tuple, Value};
    use crate::driver::btree::BtreeFile;
    use crate::driver::FileDriver;
    use crate::execution::file_access::FileAccess;
    use crate::lockmap::PageLockRegistry;
    use crate::param::file_id::FileId;
    use crate::param::open_option::{OpenMode, OpenOption};
    use crate::transaction::{Category, IsolationLevel, TransactionManager};
    use std::sync::Arc;

    #[test]
    fn test_scans_a_file() -> Result<()> {
        let id = FileId::new();
        id.set_identity(FileIdentity::new(1, 1, 1));
        id.set_field_number(3);
        id.set_key_field_number(1);
        id.set_field_type(0, DataType::Unsigned);
        id.set_field_type(1, DataType::Integer);
        id.set_field_type(2, DataType::String);
        id.set_field_length(2, 32);
        let driver = Arc::new(BtreeFile::new(id, Arc::new(PageLockRegistry::new()))?);

        let mgr = TransactionManager::new();
        let trans = mgr.begin(1, Category::ReadWrite, IsolationLevel::ReadCommitted);
        driver.create(&trans)?;
        let opt = OpenOption::new();
        opt.set_open_mode(OpenMode::Update);
        driver.open(&trans, &opt)?;
        for i in 0..3 {
            let mut t = vec![
                Value::Null,
                Value::Integer(i),
                Value::String(format!("v{}", i)),
            ];
            driver.insert(&mut t)?;
        }
        driver.close();

        let program = Program::new();
        program.set_transaction(trans);
        let opt = OpenOption::new();
        driver.get_search_parameter(None, &opt)?;
        let access = program.register_file_access(FileAccess::new(driver, opt));
        let scan = program.register_iterator(Box::new(FileInput::new(access)));

        program.initialize_iterator(scan)?;
        program.start_up_iterator(scan)?;
        let mut rows: Vec<Tuple> = Vec::new();
        while let Some(t) = program.next_tuple(scan)? {
            rows.push(t);
        }
        program.finish_iterator(scan)?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][1], Value::Integer(0));
        Ok(())
    }
}
