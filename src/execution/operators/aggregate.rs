use std::collections::HashMap;

use crate::common::types::Rid;
use crate::execution::operators::{synthetic_rid, Executor};
use crate::execution::tuple::{DataValue, Tuple};
use crate::execution::error::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate to compute: the function and the input column it reads.
/// `CountStar` ignores its column.
#[derive(Debug, Clone, Copy)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    pub column: usize,
}

/// Hash aggregation over group-by columns.
///
/// With no group-by columns and no input rows, one tuple is emitted: zero
/// for count(*) and NULL for everything else. With group-by columns an
/// empty input yields no output.
pub struct AggregateExecutor {
    child: Box<Executor>,
    group_by: Vec<usize>,
    aggregates: Vec<AggregateExpr>,
    output: Vec<Tuple>,
    cursor: usize,
}

struct Accumulator {
    function: AggregateFunction,
    count: i64,
    value: DataValue,
}

impl Accumulator {
    fn new(function: AggregateFunction) -> Self {
        Self {
            function,
            count: 0,
            value: DataValue::Null,
        }
    }

    fn feed(&mut self, input: &DataValue) {
        match self.function {
            AggregateFunction::CountStar => {
                self.count += 1;
            }
            AggregateFunction::Count => {
                if !input.is_null() {
                    self.count += 1;
                }
            }
            AggregateFunction::Sum => {
                if input.is_null() {
                    return;
                }
                self.value = match (&self.value, input) {
                    (DataValue::Null, v) => v.clone(),
                    (DataValue::Integer(a), DataValue::Integer(b)) => DataValue::Integer(a + b),
                    (DataValue::Integer(a), DataValue::Float(b)) => DataValue::Float(*a as f64 + b),
                    (DataValue::Float(a), DataValue::Integer(b)) => DataValue::Float(a + *b as f64),
                    (DataValue::Float(a), DataValue::Float(b)) => DataValue::Float(a + b),
                    (current, _) => current.clone(),
                };
            }
            AggregateFunction::Min => {
                if input.is_null() {
                    return;
                }
                let replace = match &self.value {
                    DataValue::Null => true,
                    current => input.partial_cmp(current) == Some(std::cmp::Ordering::Less),
                };
                if replace {
                    self.value = input.clone();
                }
            }
            AggregateFunction::Max => {
                if input.is_null() {
                    return;
                }
                let replace = match &self.value {
                    DataValue::Null => true,
                    current => input.partial_cmp(current) == Some(std::cmp::Ordering::Greater),
                };
                if replace {
                    self.value = input.clone();
                }
            }
        }
    }

    fn finish(&self) -> DataValue {
        match self.function {
            AggregateFunction::CountStar | AggregateFunction::Count => DataValue::Integer(self.count),
            _ => self.value.clone(),
        }
    }
}

impl AggregateExecutor {
    pub fn new(child: Box<Executor>, group_by: Vec<usize>, aggregates: Vec<AggregateExpr>) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            output: Vec::new(),
            cursor: 0,
        }
    }

    pub fn init(&mut self) -> ExecutionResult<()> {
        self.child.init()?;
        self.output.clear();
        self.cursor = 0;

        let mut groups: HashMap<Vec<DataValue>, Vec<Accumulator>> = HashMap::new();
        let mut group_order: Vec<Vec<DataValue>> = Vec::new();

        while let Some((tuple, _rid)) = self.child.next()? {
            let key: Vec<DataValue> = self
                .group_by
                .iter()
                .map(|&column| tuple.value(column).cloned().unwrap_or(DataValue::Null))
                .collect();

            let accumulators = groups.entry(key.clone()).or_insert_with(|| {
                group_order.push(key);
                self.aggregates
                    .iter()
                    .map(|agg| Accumulator::new(agg.function))
                    .collect()
            });

            for (accumulator, agg) in accumulators.iter_mut().zip(self.aggregates.iter()) {
                let input = tuple.value(agg.column).cloned().unwrap_or(DataValue::Null);
                accumulator.feed(&input);
            }
        }

        if groups.is_empty() && self.group_by.is_empty() {
            // No rows and no grouping: count(*) is zero, everything else NULL
            let values = self
                .aggregates
                .iter()
                .map(|agg| match agg.function {
                    AggregateFunction::CountStar | AggregateFunction::Count => DataValue::Integer(0),
                    _ => DataValue::Null,
                })
                .collect();
            self.output.push(Tuple::new(values));
            return Ok(());
        }

        for key in group_order {
            let accumulators = &groups[&key];
            let mut values = key.clone();
            values.extend(accumulators.iter().map(|a| a.finish()));
            self.output.push(Tuple::new(values));
        }

        Ok(())
    }

    pub fn next(&mut self) -> ExecutionResult<Option<(Tuple, Rid)>> {
        if self.cursor >= self.output.len() {
            return Ok(None);
        }
        let tuple = self.output[self.cursor].clone();
        self.cursor += 1;
        Ok(Some((tuple, synthetic_rid())))
    }
}
