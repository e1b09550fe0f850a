//! Plain snapshot types exchanged with the grid component.
//!
//! These are the serializable, non-replicated shapes: the grid hands us a
//! `Vec<Sheet>` on every change, and projection rebuilds the same shape from
//! the replicated document. Volatile sub-collections (cells, calc chain,
//! validations, hyperlinks, block functions, live queries) are keyed by
//! `"{row}_{column}"` inside the document; the flat forms here are what the
//! grid renders.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Default extents for a freshly created sheet.
pub const DEFAULT_ROWS: i64 = 84;
pub const DEFAULT_COLUMNS: i64 = 60;

/// Composite key for cell-granular collections.
pub fn cell_key(row: i64, col: i64) -> String {
    format!("{}_{}", row, col)
}

/// Parse a `"{row}_{column}"` key back into coordinates.
pub fn parse_cell_key(key: &str) -> Option<(i64, i64)> {
    let (r, c) = key.split_once('_')?;
    Some((r.parse().ok()?, c.parse().ok()?))
}

/// Opaque cell payload: display text, raw value, type tag, optional formula
/// source and comment descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellPayload {
    /// Display text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
    /// Raw value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<Value>,
    /// Formatting/type tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<Value>,
    /// Formula source text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f: Option<String>,
    /// Comment descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ps: Option<Value>,
}

impl CellPayload {
    /// Payload carrying the same string as display and raw value.
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        Self {
            m: Some(s.clone()),
            v: Some(Value::String(s)),
            ..Default::default()
        }
    }
}

/// One present cell. A record whose payload is absent is equivalent to an
/// empty cell; projection never emits placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub r: i64,
    pub c: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<CellPayload>,
}

impl CellRecord {
    pub fn new(r: i64, c: i64, v: CellPayload) -> Self {
        Self { r, c, v: Some(v) }
    }

    pub fn key(&self) -> String {
        cell_key(self.r, self.c)
    }
}

/// Formula dependency-evaluation-order entry for one cell. Exists only while
/// the source cell contains a formula.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalcChainEntry {
    pub r: i64,
    pub c: i64,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl CalcChainEntry {
    pub fn key(&self) -> String {
        cell_key(self.r, self.c)
    }
}

/// Block-function registration: the cell's formula name plus the rows and
/// columns it transitively references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockFunction {
    pub func: String,
    pub rows: Vec<i64>,
    pub cols: Vec<i64>,
}

/// A registered live query: a cell formula whose result is periodically
/// re-fetched from an external data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveQueryRegistration {
    /// External function name, e.g. `COINGECKO`
    pub func: String,
    /// Formula text as recorded at registration time
    pub formula: String,
    /// Arguments recorded for re-execution
    pub args: Vec<Value>,
    /// Target cell
    pub r: i64,
    pub c: i64,
    /// Result cached from the last successful evaluation
    pub cached: Value,
}

impl LiveQueryRegistration {
    pub fn key(&self) -> String {
        cell_key(self.r, self.c)
    }
}

/// One worksheet as the grid sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sheet {
    pub id: String,
    pub name: String,
    /// Position index, contiguous per document
    pub order: i64,
    /// 1 on exactly one sheet per document
    pub status: i64,
    /// Row extent
    pub row: i64,
    /// Column extent
    pub column: i64,
    /// Freeze panes, merges, sizing, grid-line visibility
    pub config: serde_json::Map<String, Value>,
    #[serde(rename = "celldata")]
    pub cells: Vec<CellRecord>,
    #[serde(rename = "calcChain")]
    pub calc_chain: Vec<CalcChainEntry>,
    #[serde(rename = "dataVerification")]
    pub validations: HashMap<String, Value>,
    #[serde(rename = "hyperlink")]
    pub hyperlinks: HashMap<String, Value>,
    #[serde(rename = "dataBlockFuncs")]
    pub block_functions: HashMap<String, BlockFunction>,
    #[serde(rename = "liveQueries")]
    pub live_queries: HashMap<String, LiveQueryRegistration>,
    #[serde(rename = "conditionFormats")]
    pub condition_formats: Vec<Value>,
}

impl Default for Sheet {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            order: 0,
            status: 0,
            row: DEFAULT_ROWS,
            column: DEFAULT_COLUMNS,
            config: serde_json::Map::new(),
            cells: Vec::new(),
            calc_chain: Vec::new(),
            validations: HashMap::new(),
            hyperlinks: HashMap::new(),
            block_functions: HashMap::new(),
            live_queries: HashMap::new(),
            condition_formats: Vec::new(),
        }
    }
}

impl Sheet {
    /// Create a blank sheet with a generated id.
    pub fn new(name: impl Into<String>, order: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            order,
            status: if order == 0 { 1 } else { 0 },
            ..Default::default()
        }
    }

    /// Look up a present cell by coordinates.
    pub fn cell(&self, r: i64, c: i64) -> Option<&CellRecord> {
        self.cells.iter().find(|cell| cell.r == r && cell.c == c)
    }

    /// Current formula text of a cell, if any.
    pub fn formula_at(&self, r: i64, c: i64) -> Option<&str> {
        self.cell(r, c)?.v.as_ref()?.f.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.status == 1
    }
}
