/// Group aggregation
///
/// Groups that hold rows aggregate straight from the table. Every group
/// above them combines its children's cells: sums add up, averages are
/// weighted by each child's row count. Raw rows are never rescanned for
/// higher levels.

use crate::error::{GridError, Result};
use crate::table::{Schema, Table};
use crate::value::ColumnValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Sum,
    Avg,
}

/// One aggregated column: `{"column": "Price", "type": "avg"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    #[serde(rename = "type")]
    pub kind: AggregateKind,
}

impl Aggregation {
    pub fn sum(column: impl Into<String>) -> Self {
        Aggregation {
            column: column.into(),
            kind: AggregateKind::Sum,
        }
    }

    pub fn avg(column: impl Into<String>) -> Self {
        Aggregation {
            column: column.into(),
            kind: AggregateKind::Avg,
        }
    }
}

/// Aggregated value of one column for one group, with the number of
/// non-null rows behind it
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregateCell {
    pub value: Option<f64>,
    pub weight: usize,
}

impl AggregateCell {
    pub fn to_value(self) -> ColumnValue {
        self.value.map_or(ColumnValue::Null, ColumnValue::Float64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedAggregation {
    column: usize,
    kind: AggregateKind,
}

#[derive(Debug, Clone, Default)]
pub struct GroupAggregator {
    specs: Vec<Aggregation>,
    resolved: Vec<ResolvedAggregation>,
}

impl GroupAggregator {
    /// Resolve aggregations against the schema; only numeric columns aggregate.
    pub fn new(schema: &Schema, aggregations: &[Aggregation]) -> Result<Self> {
        let resolved = aggregations
            .iter()
            .map(|agg| {
                let column = schema.column_index(&agg.column)?;
                let column_type = schema.columns()[column].column_type;
                if !column_type.is_numeric() {
                    return Err(GridError::TypeMismatch {
                        column: agg.column.clone(),
                        expected: "numeric".to_string(),
                        actual: column_type.to_string(),
                    });
                }
                Ok(ResolvedAggregation {
                    column,
                    kind: agg.kind,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GroupAggregator {
            specs: aggregations.to_vec(),
            resolved,
        })
    }

    pub fn specs(&self) -> &[Aggregation] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Table column index of each aggregation, in cell order
    pub fn columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.resolved.iter().map(|r| r.column)
    }

    /// Cell position of a column name, if it is aggregated
    pub fn cell_index(&self, column: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.column == column)
    }

    /// Aggregate directly over table rows
    pub fn from_rows(&self, table: &Table, positions: &[usize]) -> Vec<AggregateCell> {
        self.resolved
            .iter()
            .map(|agg| {
                let (sum, n) = positions
                    .iter()
                    .filter_map(|&p| table.value(p, agg.column).as_f64())
                    .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
                let value = match (agg.kind, n) {
                    (_, 0) => None,
                    (AggregateKind::Sum, _) => Some(sum),
                    (AggregateKind::Avg, _) => Some(sum / n as f64),
                };
                AggregateCell { value, weight: n }
            })
            .collect()
    }

    /// Combine already computed child cells
    pub fn combine(&self, children: &[&[AggregateCell]]) -> Vec<AggregateCell> {
        self.resolved
            .iter()
            .enumerate()
            .map(|(i, agg)| {
                let parts = children.iter().filter_map(|cells| cells.get(i)).filter(|c| c.weight > 0);
                let mut weight = 0;
                let mut acc = 0.0;
                for cell in parts {
                    let v = cell.value.unwrap_or(0.0);
                    acc += match agg.kind {
                        AggregateKind::Sum => v,
                        AggregateKind::Avg => v * cell.weight as f64,
                    };
                    weight += cell.weight;
                }
                let value = match (agg.kind, weight) {
                    (_, 0) => None,
                    (AggregateKind::Sum, _) => Some(acc),
                    (AggregateKind::Avg, w) => Some(acc / w as f64),
                };
                AggregateCell { value, weight }
            })
            .collect()
    }
}
