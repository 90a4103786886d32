//! The public compiler and compiled-spreadsheet surface.
//!
//! `SheetCompiler` pulls a workbook through a [`WorkbookAccessor`] and
//! produces a [`CompiledSheet`]: a self-contained graph that evaluates,
//! invalidates, trims, snapshots and validates without the host.

use std::path::Path;

use tracing::{debug, info};

use sheetgraph_common::{Addr, CellValue, Notation};

use crate::engine::compile::GraphBuilder;
use crate::engine::{
    CompilerError, CycleMode, DependencyGraph, Node, NodeId, Snapshot, evaluate,
};
use crate::traits::WorkbookAccessor;

pub struct SheetCompiler<'a> {
    accessor: &'a mut dyn WorkbookAccessor,
    notation: Notation,
    cycle_mode: CycleMode,
}

impl<'a> SheetCompiler<'a> {
    pub fn new(accessor: &'a mut dyn WorkbookAccessor) -> Self {
        SheetCompiler {
            accessor,
            notation: Notation::A1,
            cycle_mode: CycleMode::Fatal,
        }
    }

    /// Select the reference grammar for the whole workbook; formulas in
    /// the other notation are rejected.
    pub fn with_notation(mut self, notation: Notation) -> Self {
        self.notation = notation;
        self
    }

    /// Tolerate dependency cycles by bounded fixed-point iteration.
    pub fn with_cycle_mode(mut self, mode: CycleMode) -> Self {
        self.cycle_mode = mode;
        self
    }

    /// Build the dependency graph reachable from the seed addresses.
    pub fn compile(self, seeds: &[&str]) -> Result<CompiledSheet, CompilerError> {
        let output = GraphBuilder::new(self.accessor, self.notation).build(seeds)?;

        if self.cycle_mode == CycleMode::Fatal {
            if let Some(addr) = output.graph.find_cycle() {
                return Err(CompilerError::Cycle(addr.to_string()));
            }
        }

        info!(
            nodes = output.graph.len(),
            edges = output.graph.edge_count(),
            "compiled spreadsheet"
        );

        Ok(CompiledSheet {
            graph: output.graph,
            notation: self.notation,
            cycle_mode: self.cycle_mode,
            captured: output.captured,
            digest: output.digest,
            default_sheet: output.default_sheet,
        })
    }
}

/// A compiled spreadsheet: evaluate lazily with memoization, push new
/// input values, and the graph recomputes only what those inputs
/// affect.
pub struct CompiledSheet {
    graph: DependencyGraph,
    notation: Notation,
    cycle_mode: CycleMode,
    captured: Vec<(Addr, CellValue)>,
    digest: u64,
    default_sheet: String,
}

/// One `validate` discrepancy.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub addr: Addr,
    pub expected: CellValue,
    pub got: CellValue,
}

impl CompiledSheet {
    /* ─────────────────── address plumbing ─────────────────── */

    pub fn parse_addr(&self, text: &str) -> Result<Addr, CompilerError> {
        Addr::parse(text, &self.default_sheet).map_err(|e| CompilerError::Address {
            addr: text.to_string(),
            message: e.message.unwrap_or_default(),
        })
    }

    fn id_of(&self, text: &str) -> Result<NodeId, CompilerError> {
        let addr = self.parse_addr(text)?;
        self.graph
            .id_of(&addr)
            .ok_or_else(|| CompilerError::UnknownAddress(text.to_string()))
    }

    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }

    pub fn default_sheet(&self) -> &str {
        &self.default_sheet
    }

    /* ─────────────────── evaluation ───────────────────────── */

    pub fn evaluate(&mut self, addr: &str) -> Result<CellValue, CompilerError> {
        let id = self.id_of(addr)?;
        evaluate(&mut self.graph, id, self.cycle_mode)
    }

    pub fn evaluate_many(&mut self, addrs: &[&str]) -> Result<Vec<CellValue>, CompilerError> {
        addrs.iter().map(|a| self.evaluate(a)).collect()
    }

    /// Re-evaluate every node in the graph.
    pub fn recalculate(&mut self) -> Result<(), CompilerError> {
        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in ids {
            evaluate(&mut self.graph, id, self.cycle_mode)?;
        }
        Ok(())
    }

    /* ─────────────────── mutation ─────────────────────────── */

    /// Store a new input value and mark every dependent dirty. The
    /// next `evaluate` recomputes only the affected cells.
    pub fn set_value(&mut self, addr: &str, value: CellValue) -> Result<(), CompilerError> {
        let id = self.id_of(addr)?;
        match self.graph.node(id) {
            Node::Cell(cell) => {
                if cell.value.as_ref() == Some(&value) {
                    return Ok(());
                }
            }
            Node::Range(_) => {
                return Err(CompilerError::Address {
                    addr: addr.to_string(),
                    message: "set_value targets a single cell".to_string(),
                });
            }
        }
        debug!(addr, %value, "set_value");
        self.graph.invalidate(id);
        self.graph.set_cached(id, value);
        Ok(())
    }

    /// Mark a node and its dependents dirty without changing inputs.
    pub fn reset(&mut self, addr: &str) -> Result<(), CompilerError> {
        let id = self.id_of(addr)?;
        self.graph.invalidate(id);
        Ok(())
    }

    /* ─────────────────── trimming ─────────────────────────── */

    /// Reduce the graph to the nodes needed to recompute `outputs`
    /// from `inputs`.
    pub fn trim(&mut self, inputs: &[&str], outputs: &[&str]) -> Result<(), CompilerError> {
        // populate every kept value first so frontier nodes freeze with
        // concrete data
        for output in outputs {
            self.evaluate(output)?;
        }
        let input_ids: Vec<NodeId> = inputs
            .iter()
            .map(|a| self.id_of(a))
            .collect::<Result<_, _>>()?;
        let output_ids: Vec<NodeId> = outputs
            .iter()
            .map(|a| self.id_of(a))
            .collect::<Result<_, _>>()?;

        let before = self.graph.len();
        self.graph.trim(&input_ids, &output_ids);
        self.captured.retain(|(addr, _)| self.graph.id_of(addr).is_some());
        info!(before, after = self.graph.len(), "trimmed graph");
        Ok(())
    }

    /* ─────────────────── inspection ───────────────────────── */

    /// Human-readable indented dependency dump.
    pub fn value_tree(&mut self, addr: &str) -> Result<String, CompilerError> {
        self.evaluate(addr)?;
        let id = self.id_of(addr)?;
        Ok(self.graph.value_tree(id))
    }

    /// Recompute every captured formula cell from scratch and report
    /// the ones that disagree with their compile-time values.
    pub fn validate(&mut self, outputs: &[&str]) -> Result<Vec<Mismatch>, CompilerError> {
        let targets: Vec<(Addr, CellValue)> = if outputs.is_empty() {
            self.captured.clone()
        } else {
            let mut out = Vec::new();
            for text in outputs {
                let addr = self.parse_addr(text)?;
                if let Some(entry) = self.captured.iter().find(|(a, _)| *a == addr) {
                    out.push(entry.clone());
                }
            }
            out
        };

        // drop caches on every formula node so evaluation is fresh
        let formula_ids: Vec<NodeId> = self
            .graph
            .ids()
            .filter(|&id| match self.graph.node(id) {
                Node::Cell(c) => c.formula.is_some(),
                Node::Range(_) => true,
            })
            .collect();
        for id in formula_ids {
            self.graph.invalidate(id);
        }

        let mut mismatches = Vec::new();
        for (addr, expected) in targets {
            let id = self
                .graph
                .id_of(&addr)
                .ok_or_else(|| CompilerError::UnknownAddress(addr.to_string()))?;
            let got = evaluate(&mut self.graph, id, self.cycle_mode)?;
            if !values_agree(&expected, &got) {
                mismatches.push(Mismatch {
                    addr,
                    expected,
                    got,
                });
            }
        }
        Ok(mismatches)
    }

    /* ─────────────────── snapshots ────────────────────────── */

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot::from_graph(
            &self.graph,
            self.notation,
            &self.default_sheet,
            self.digest,
            &self.captured,
        )
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<CompiledSheet, CompilerError> {
        let (graph, notation, default_sheet, digest, captured) = snapshot.restore()?;
        Ok(CompiledSheet {
            graph,
            notation,
            cycle_mode: CycleMode::Fatal,
            captured,
            digest,
            default_sheet,
        })
    }

    pub fn with_cycle_mode(mut self, mode: CycleMode) -> Self {
        self.cycle_mode = mode;
        self
    }

    pub fn serialize<P: AsRef<Path>>(&self, path: P) -> Result<(), CompilerError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &self.to_snapshot())?;
        Ok(())
    }

    pub fn deserialize<P: AsRef<Path>>(path: P) -> Result<CompiledSheet, CompilerError> {
        let file = std::fs::File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(file)?;
        Self::from_snapshot(snapshot)
    }
}

/// Numeric comparison with a small tolerance; everything else is exact.
fn values_agree(a: &CellValue, b: &CellValue) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) if !a.is_blank() && !b.is_blank() => (x - y).abs() < 1e-9,
        _ => a == b,
    }
}
