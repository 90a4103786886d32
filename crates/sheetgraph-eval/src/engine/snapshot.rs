//! Self-describing snapshot of a compiled graph.
//!
//! The format stores cells (address, formula, value), range addresses,
//! edges as address pairs, the compile-time captured values, and a
//! content digest for freshness checks. Plans are derived data:
//! loading recompiles every formula, so a round-trip preserves
//! evaluation results without serializing ASTs.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use sheetgraph_parse::parser::{ASTNodeType, parse_formula};
use sheetgraph_common::{Addr, CellAddr, CellValue, MAX_COL, MAX_ROW, Notation};

use super::CompilerError;
use super::graph::{DependencyGraph, Node, Plan};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct CellEntry {
    pub addr: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<CellValue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub digest: u64,
    pub notation: String,
    pub default_sheet: String,
    pub bounds: Vec<(String, u32, u32)>,
    pub cells: Vec<CellEntry>,
    pub ranges: Vec<String>,
    pub edges: Vec<(String, String)>,
    pub captured: Vec<(String, CellValue)>,
}

fn notation_tag(n: Notation) -> &'static str {
    match n {
        Notation::A1 => "A1",
        Notation::R1C1 => "R1C1",
    }
}

fn notation_from_tag(tag: &str) -> Result<Notation, CompilerError> {
    match tag {
        "A1" => Ok(Notation::A1),
        "R1C1" => Ok(Notation::R1C1),
        other => Err(CompilerError::Snapshot(format!(
            "unknown notation '{other}'"
        ))),
    }
}

impl Snapshot {
    pub fn from_graph(
        graph: &DependencyGraph,
        notation: Notation,
        default_sheet: &str,
        digest: u64,
        captured: &[(Addr, CellValue)],
    ) -> Snapshot {
        let mut cells = Vec::new();
        let mut ranges = Vec::new();
        for id in graph.ids() {
            match graph.node(id) {
                Node::Cell(cell) => cells.push(CellEntry {
                    addr: cell.addr.to_string(),
                    formula: cell.formula.clone(),
                    value: cell.value.clone(),
                }),
                Node::Range(range) => ranges.push(range.addr.to_string()),
            }
        }

        let mut edges = Vec::new();
        for from in graph.ids() {
            for &to in graph.out_edges(from) {
                edges.push((
                    graph.node(from).addr().to_string(),
                    graph.node(to).addr().to_string(),
                ));
            }
        }

        Snapshot {
            version: SNAPSHOT_VERSION,
            digest,
            notation: notation_tag(notation).to_string(),
            default_sheet: default_sheet.to_string(),
            bounds: graph
                .bounds
                .iter()
                .map(|(sheet, (r, c))| (sheet.clone(), *r, *c))
                .collect(),
            cells,
            ranges,
            edges,
            captured: captured
                .iter()
                .map(|(addr, v)| (addr.to_string(), v.clone()))
                .collect(),
        }
    }

    /// Rebuild the graph: nodes first, then recompiled plans, then
    /// edges. LINEST annotations are re-derived from the snapshot's own
    /// formula table.
    pub fn restore(
        self,
    ) -> Result<(DependencyGraph, Notation, String, u64, Vec<(Addr, CellValue)>), CompilerError>
    {
        if self.version != SNAPSHOT_VERSION {
            return Err(CompilerError::Snapshot(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let notation = notation_from_tag(&self.notation)?;
        let default_sheet = self.default_sheet;

        let parse_addr = |text: &str| -> Result<Addr, CompilerError> {
            Addr::parse(text, &default_sheet).map_err(|e| CompilerError::Address {
                addr: text.to_string(),
                message: e.message.unwrap_or_default(),
            })
        };

        let mut graph = DependencyGraph::new();
        for (sheet, r, c) in &self.bounds {
            graph.bounds.insert(sheet.clone(), (*r, *c));
        }

        // formula table for LINEST run re-annotation
        let mut formulas: FxHashMap<CellAddr, String> = FxHashMap::default();
        for entry in &self.cells {
            if let (Addr::Cell(addr), Some(f)) = (parse_addr(&entry.addr)?, &entry.formula) {
                formulas.insert(addr, f.clone());
            }
        }

        let mut parse_cache: FxHashMap<String, Arc<sheetgraph_parse::parser::ASTNode>> =
            FxHashMap::default();

        for entry in self.cells {
            let Addr::Cell(addr) = parse_addr(&entry.addr)? else {
                return Err(CompilerError::Snapshot(format!(
                    "cell entry with range address '{}'",
                    entry.addr
                )));
            };
            let id = graph.add_cell(addr.clone(), entry.value, entry.formula.clone());
            if let Some(formula) = &entry.formula {
                let cached = parse_cache.get(formula).cloned();
                let ast = match cached {
                    Some(ast) => Ok(ast),
                    None => parse_formula(formula, notation).map(Arc::new).inspect(|ast| {
                        parse_cache.insert(formula.clone(), ast.clone());
                    }),
                };
                match ast {
                    Ok(ast) => {
                        let linest_run = linest_run_from_table(&formulas, &addr, formula, &ast);
                        if let Node::Cell(cell) = graph.node_mut(id) {
                            cell.plan = Some(Plan { ast, linest_run });
                        }
                    }
                    Err(e) => {
                        if let Node::Cell(cell) = graph.node_mut(id) {
                            cell.poison = Some(e.to_string());
                            cell.value = None;
                        }
                    }
                }
            }
        }

        for text in self.ranges {
            match parse_addr(&text)? {
                Addr::Range(range) => {
                    graph.add_range(range);
                }
                Addr::Cell(_) => {
                    return Err(CompilerError::Snapshot(format!(
                        "range entry with cell address '{text}'"
                    )));
                }
            }
        }

        for (from, to) in self.edges {
            let from_id = graph
                .id_of(&parse_addr(&from)?)
                .ok_or_else(|| CompilerError::Snapshot(format!("dangling edge from '{from}'")))?;
            let to_id = graph
                .id_of(&parse_addr(&to)?)
                .ok_or_else(|| CompilerError::Snapshot(format!("dangling edge to '{to}'")))?;
            graph.add_edge(from_id, to_id);
        }

        let mut captured = Vec::with_capacity(self.captured.len());
        for (addr, value) in self.captured {
            captured.push((parse_addr(&addr)?, value));
        }

        Ok((graph, notation, default_sheet, self.digest, captured))
    }
}

/// The same adjacent-identical-formula scan as compile time, driven by
/// the snapshot's formula table instead of the accessor.
fn linest_run_from_table(
    formulas: &FxHashMap<CellAddr, String>,
    addr: &CellAddr,
    formula: &str,
    ast: &sheetgraph_parse::parser::ASTNode,
) -> Option<(usize, usize)> {
    let is_root_linest = matches!(
        &ast.node_type,
        ASTNodeType::Function { name, .. }
            if name.eq_ignore_ascii_case("LINEST") || name.eq_ignore_ascii_case("LINESTMARIO")
    );
    if !is_root_linest {
        return None;
    }

    let same = |col: u32, row: u32| -> bool {
        col >= 1
            && row >= 1
            && col <= MAX_COL
            && row <= MAX_ROW
            && formulas
                .get(&CellAddr::new(addr.sheet.clone(), col, row))
                .is_some_and(|f| f == formula)
    };

    let mut left = addr.col;
    while left > 1 && same(left - 1, addr.row) {
        left -= 1;
    }
    let mut right = addr.col;
    while same(right + 1, addr.row) {
        right += 1;
    }
    let mut degree = (right - left) as usize;
    let mut coef = (addr.col - left + 1) as usize;

    if degree == 0 {
        let mut top = addr.row;
        while top > 1 && same(addr.col, top - 1) {
            top -= 1;
        }
        let mut bottom = addr.row;
        while same(addr.col, bottom + 1) {
            bottom += 1;
        }
        degree = (bottom - top) as usize;
        coef = (addr.row - top + 1) as usize;
    }

    Some((degree.max(1), coef))
}
