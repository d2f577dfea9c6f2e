use std::cmp::Ordering;

use crate::common::types::Rid;
use crate::execution::operators::{synthetic_rid, Executor};
use crate::execution::tuple::Tuple;
use crate::execution::error::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// Materializing sort: drains its child at init and replays the buffered
/// tuples in order of the (column, direction) sort keys.
pub struct SortExecutor {
    child: Box<Executor>,
    order_by: Vec<(usize, OrderDirection)>,
    tuples: Vec<Tuple>,
    cursor: usize,
}

impl SortExecutor {
    pub fn new(child: Box<Executor>, order_by: Vec<(usize, OrderDirection)>) -> Self {
        Self {
            child,
            order_by,
            tuples: Vec::new(),
            cursor: 0,
        }
    }

    pub fn init(&mut self) -> ExecutionResult<()> {
        self.child.init()?;
        self.tuples.clear();
        self.cursor = 0;

        while let Some((tuple, _rid)) = self.child.next()? {
            self.tuples.push(tuple);
        }

        let order_by = self.order_by.clone();
        self.tuples.sort_by(|a, b| {
            for &(column, direction) in &order_by {
                let ordering = match (a.value(column), b.value(column)) {
                    (Some(left), Some(right)) => left.partial_cmp(right).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = match direction {
                    OrderDirection::Ascending => ordering,
                    OrderDirection::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(())
    }

    pub fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        if self.cursor >= self.tuples.len() {
            return Ok(None);
        }
        let tuple = self.tuples[self.cursor].clone();
        self.cursor += 1;
        Ok(Some((tuple, synthetic_rid())))
    }
}
