use crate::common::types::Rid;
use crate::execution::operators::{synthetic_rid, Executor};
use crate::execution::tuple::{DataValue, Tuple};
use crate::execution::error::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// Join predicate over a left and a right tuple.
pub type JoinPredicate = Box<dyn Fn(&Tuple, &Tuple) -> bool + Send + Sync>;

/// Nested-loop join; the right side is materialized at init.
///
/// Inner joins emit only matching pairs; left joins emit unmatched left
/// tuples padded with NULL on the right.
pub struct NestedLoopJoinExecutor {
    left: Box<Executor>,
    right: Box<Executor>,
    join_type: JoinType,
    predicate: JoinPredicate,
    /// Width of the right side, for NULL padding in left joins.
    right_width: usize,
    right_tuples: Vec<Tuple>,
    left_current: Option<Tuple>,
    right_index: usize,
    matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<Executor>,
        right: Box<Executor>,
        join_type: JoinType,
        predicate: JoinPredicate,
        right_width: usize,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            predicate,
            right_width,
            right_tuples: Vec::new(),
            left_current: None,
            right_index: 0,
            matched: false,
        }
    }

    pub fn init(&mut self) -> ExecutionResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.right_tuples.clear();
        self.left_current = None;
        self.right_index = 0;
        self.matched = false;

        while let Some((tuple, _rid)) = self.right.next()? {
            self.right_tuples.push(tuple);
        }
        Ok(())
    }

    pub fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        loop {
            if self.left_current.is_none() {
                match self.left.next()? {
                    Some((tuple, _rid)) => {
                        self.left_current = Some(tuple);
                        self.right_index = 0;
                        self.matched = false;
                    }
                    None => return Ok(None),
                }
            }

            let left_tuple = match &self.left_current {
                Some(tuple) => tuple.clone(),
                None => return Ok(None),
            };

            while self.right_index < self.right_tuples.len() {
                let right_tuple = &self.right_tuples[self.right_index];
                self.right_index += 1;
                if (self.predicate)(&left_tuple, right_tuple) {
                    self.matched = true;
                    let mut values = left_tuple.values.clone();
                    values.extend(right_tuple.values.iter().cloned());
                    return Ok(Some((Tuple::new(values), synthetic_rid())));
                }
            }

            // Right side exhausted for this left tuple
            let unmatched = !self.matched;
            self.left_current = None;

            if self.join_type == JoinType::Left && unmatched {
                let mut values = left_tuple.values;
                values.extend(std::iter::repeat(DataValue::Null).take(self.right_width));
                return Ok(Some((Tuple::new(values), synthetic_rid())));
            }
        }
    }
}
