/// LiveGrid - Incremental windowed views over a live table
///
/// A `Table` holds rows and publishes every mutation. Each client gets a
/// `View` over it: a sorted, filtered, optionally grouped and aggregated
/// projection of which only a window `[from, to)` is ever materialised.
/// Table changes are folded into each view incrementally and queued as
/// minimal updates for delivery.

pub mod error;
pub mod value;
pub mod config;
pub mod table;
pub mod changeset;
pub mod protocol;
pub mod sort;
pub mod filter;
pub mod filter_parse;
pub mod rowset;
pub mod group_aggregate;
pub mod group_tree;
pub mod group_iter;
pub mod group_rowset;
pub mod update_queue;
pub mod view;

pub use error::{GridError, Result};
pub use value::{ColumnType, ColumnValue, Row, RowKey};
pub use config::GridConfig;
pub use table::{ColumnDef, Schema, Table};
pub use changeset::{CellChange, SubscriptionId, TableChange, TableListener};
pub use protocol::{DataResponse, Range, RowInfo, RowMeta};
pub use sort::{SortColumn, SortDirection, SortIndex, SortTransition};
pub use filter::{ActiveFilter, Filter, FilterCompiler, FilterSet, PredicateCompiler};
pub use filter_parse::{parse_filter, FilterParser, TextFilterParser};
pub use rowset::{RowPatch, RowSet, Selection};
pub use group_aggregate::{AggregateKind, Aggregation, GroupAggregator};
pub use group_tree::{GroupNode, GroupTree, NodeId};
pub use group_iter::{GroupIterator, Visible};
pub use group_rowset::GroupRowSet;
pub use update_queue::{Batch, RowUpdate, UpdateQueue};
pub use view::{Representation, View, ViewSpec};

/// Reference instrument dataset shared by the crate's tests
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const SECTORS: [&str; 12] = [
        "Basic Industries",
        "Capital Goods",
        "Consumer Durables",
        "Consumer Non-Durables",
        "Consumer Services",
        "Energy",
        "Finance",
        "Health Care",
        "Miscellaneous",
        "Public Utilities",
        "Technology",
        "Transportation",
    ];

    pub const INSTRUMENT_COUNT: usize = 1247;

    pub const PRICE: usize = 2;
    pub const SECTOR: usize = 5;

    pub fn instrument_schema() -> Schema {
        Schema::new(vec![
            ("Symbol".to_string(), ColumnType::String, false),
            ("Name".to_string(), ColumnType::String, false),
            ("Price".to_string(), ColumnType::Float64, false),
            ("MarketCap".to_string(), ColumnType::Float64, true),
            ("IPO".to_string(), ColumnType::String, false),
            ("Sector".to_string(), ColumnType::String, false),
            ("Industry".to_string(), ColumnType::String, false),
        ])
    }

    /// 1247 rows: Basic Industries has 27 industries of 3 rows, every other
    /// sector 2 industries of 53 rows
    pub fn instrument_rows() -> Vec<Row> {
        let mut rows = Vec::with_capacity(INSTRUMENT_COUNT);
        for sector in SECTORS {
            let (industries, per_industry) = if sector == "Basic Industries" { (27, 3) } else { (2, 53) };
            for industry in 0..industries {
                for _ in 0..per_industry {
                    let n = rows.len();
                    let price = 5.0 + ((n * 37) % 400) as f64 + (n % 4) as f64 * 0.25;
                    let market_cap = if n % 11 == 0 {
                        ColumnValue::Null
                    } else {
                        ColumnValue::Float64(price * 1.0e6)
                    };
                    let ipo = if n % 5 == 0 { "n/a".to_string() } else { (1980 + n % 40).to_string() };
                    rows.push(vec![
                        format!("S{:04}", n).into(),
                        format!("{} Holdings {}", sector, n).into(),
                        price.into(),
                        market_cap,
                        ipo.into(),
                        sector.into(),
                        format!("{} {:02}", sector, industry + 1).into(),
                    ]);
                }
            }
        }
        rows
    }

    pub fn table_of(rows: Vec<Row>) -> Table {
        let mut table = Table::new("instruments".to_string(), instrument_schema());
        for row in rows {
            table.insert(row).unwrap();
        }
        table
    }

    pub fn instruments() -> Table {
        table_of(instrument_rows())
    }

    pub fn instrument(symbol: &str, sector: &str, price: f64) -> Row {
        vec![
            symbol.into(),
            format!("{} Inc", symbol).into(),
            price.into(),
            ColumnValue::Null,
            "n/a".into(),
            sector.into(),
            format!("{} 01", sector).into(),
        ]
    }
}
