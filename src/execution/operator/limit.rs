// Limit: enforces (offset, count) over the host's tuple stream. Partial
// mode runs the same single counter but keeps the key of the row that
// reached the count: rows tied on that key still go out, and so does the
// first row whose key differs; the ceiling fires on whatever follows it.

use crate::common::{Tuple, Value};
use crate::error::Result;
use crate::execution::operator::Operator;
use crate::execution::program::Program;
use crate::execution::status::Status;

pub struct Limit {
    offset: usize,
    count: usize,
    partial: bool,
    key_positions: Vec<usize>,
    seen: usize,
    /// Key of the row on which the count was reached (partial mode).
    boundary_key: Option<Tuple>,
    stop_armed: bool,
}

impl Limit {
    pub fn new(offset: usize, count: usize) -> Self {
        Self {
            offset,
            count,
            partial: false,
            key_positions: Vec::new(),
            seen: 0,
            boundary_key: None,
            stop_armed: false,
        }
    }

    /// Partial limit keyed by the given tuple positions. The count is
    /// global, not per group; the key only extends the cut through ties.
    pub fn partial(offset: usize, count: usize, key_positions: Vec<usize>) -> Self {
        Self {
            offset,
            count,
            partial: true,
            key_positions,
            seen: 0,
            boundary_key: None,
            stop_armed: false,
        }
    }

    fn key_of(&self, tuple: &Tuple) -> Tuple {
        self.key_positions
            .iter()
            .map(|&p| tuple.get(p).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

impl Operator for Limit {
    fn execute(&mut self, _program: &Program, tuple: &Tuple) -> Result<Status> {
        self.seen += 1;

        if !self.partial {
            if self.seen <= self.offset {
                return Ok(Status::False);
            }
            if self.seen > self.offset + self.count {
                return Ok(Status::Break);
            }
            return Ok(Status::Success);
        }

        if self.count == 0 {
            return Ok(Status::Break);
        }
        if self.seen <= self.offset {
            return Ok(Status::False);
        }
        if self.stop_armed {
            return Ok(Status::Break);
        }

        if let Some(boundary) = &self.boundary_key {
            if self.key_of(tuple) != *boundary {
                // The first differing-key row still goes out; the
                // ceiling fires on the row after it.
                self.stop_armed = true;
            }
            return Ok(Status::Success);
        }

        // Counting phase; remember the key of the row that reaches the
        // count.
        if self.seen >= self.offset + self.count {
            self.boundary_key = Some(self.key_of(tuple));
        }
        Ok(Status::Success)
    }

    fn finish(&mut self, _program: &Program) -> Result<()> {
        self.seen = 0;
        self.boundary_key = None;
        self.stop_armed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::iterator::tuples::Tuples;
    use crate::execution::iterator::IteratorNode;

    fn run_with_limit(rows: Vec<Tuple>, limit: Limit) -> Result<Vec<Tuple>> {
        let program = Program::new();
        let mut source = Tuples::new(rows);
        let action = program.register_action(Box::new(limit));
        source.add_action(action);
        let id = program.register_iterator(Box::new(source));
        program.initialize_iterator(id)?;
        let mut out = Vec::new();
        while let Some(t) = program.next_tuple(id)? {
            out.push(t);
        }
        Ok(out)
    }

    fn g(k: i32, v: i32) -> Tuple {
        vec![Value::Integer(k), Value::Integer(v)]
    }

    #[test]
    fn test_offset_and_count() -> Result<()> {
        let rows: Vec<Tuple> = (0..10).map(|i| vec![Value::Integer(i)]).collect();
        let got = run_with_limit(rows, Limit::new(2, 3))?;
        assert_eq!(
            got,
            vec![
                vec![Value::Integer(2)],
                vec![Value::Integer(3)],
                vec![Value::Integer(4)]
            ]
        );
        Ok(())
    }

    #[test]
    fn test_partial_extends_through_tied_keys() -> Result<()> {
        let rows = vec![g(1, 0), g(1, 1), g(1, 2), g(2, 0), g(2, 1)];
        let got = run_with_limit(rows, Limit::partial(0, 2, vec![0]))?;
        // The count lands on g(1, 1); rows tied on key 1 keep flowing,
        // and the first key-2 row is delivered as the stopping row.
        assert_eq!(got, vec![g(1, 0), g(1, 1), g(1, 2), g(2, 0)]);
        Ok(())
    }

    #[test]
    fn test_partial_stops_after_the_boundary_row() -> Result<()> {
        let rows = vec![g(1, 0), g(2, 0), g(2, 1), g(3, 0)];
        let got = run_with_limit(rows, Limit::partial(0, 1, vec![0]))?;
        // Count reached on g(1, 0); g(2, 0) is the differing row that
        // still goes out, g(2, 1) never surfaces.
        assert_eq!(got, vec![g(1, 0), g(2, 0)]);
        Ok(())
    }

    #[test]
    fn test_partial_count_zero_emits_nothing() -> Result<()> {
        let rows = vec![g(1, 0), g(1, 1), g(2, 0)];
        let got = run_with_limit(rows, Limit::partial(0, 0, vec![0]))?;
        assert!(got.is_empty());
        Ok(())
    }
}
