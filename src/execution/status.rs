/// Outcome of a start-up hook or an attached operator.
///
/// For start-up: `Break` skips the main loop entirely and jumps to finish.
/// For per-tuple operators: `Success`/`Continue` pass the tuple on, `False`
/// suppresses it, and `Break` suppresses it, fires the ceiling and ends the
/// iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    False,
    Continue,
    Break,
}

impl Status {
    pub fn is_succeeded(self) -> bool {
        matches!(self, Status::Success | Status::Continue)
    }
}
