//! Memoized evaluation over the dependency graph.
//!
//! Evaluation is iterative (an explicit frame stack instead of native
//! recursion), so dependency chains tens of thousands of cells deep
//! cannot overflow the call stack. A node is computed only once all of
//! its precedents carry cached values.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use sheetgraph_common::{Addr, CellAddr, CellError, CellValue, MAX_COL, MAX_ROW, RangeAddr};

use super::CompilerError;
use super::graph::{DependencyGraph, Node, NodeId, Plan};
use crate::function::Function;
use crate::interpreter::Interpreter;
use crate::traits::{EvalContext, FunctionProvider, Matrix};

/// What to do when the graph is not a DAG.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleMode {
    /// Reject cycles outright (the default).
    Fatal,
    /// Fix a topological order with back-edges broken and sweep until
    /// the largest change drops below `tolerance` or the cap is hit.
    Iterate {
        max_iterations: usize,
        tolerance: f64,
    },
}

impl Default for CycleMode {
    fn default() -> Self {
        CycleMode::Fatal
    }
}

/* ─────────────────────────── GraphContext ─────────────────────────── */

/// The evaluation context a plan runs in: reads go straight to the
/// graph's cached values.
pub struct GraphContext<'g> {
    graph: &'g DependencyGraph,
    current: CellAddr,
    linest_run: Option<(usize, usize)>,
}

impl<'g> GraphContext<'g> {
    pub fn new(graph: &'g DependencyGraph, current: CellAddr, linest_run: Option<(usize, usize)>) -> Self {
        Self {
            graph,
            current,
            linest_run,
        }
    }
}

impl FunctionProvider for GraphContext<'_> {
    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>> {
        crate::registry::get(name)
    }
}

impl EvalContext for GraphContext<'_> {
    fn resolve_cell(&self, addr: &CellAddr) -> CellValue {
        match self.graph.id_of(&Addr::Cell(addr.clone())) {
            Some(id) => match self.graph.node(id) {
                Node::Cell(c) => c.value.clone().unwrap_or_else(|| {
                    CellValue::Error(
                        CellError::reference()
                            .with_message(format!("{addr} is not a compiled dependency")),
                    )
                }),
                Node::Range(_) => CellValue::Error(CellError::reference()),
            },
            None => CellValue::Error(
                CellError::reference().with_message(format!("{addr} is not in the graph")),
            ),
        }
    }

    fn resolve_range(&self, addr: &RangeAddr) -> Result<Matrix, CellError> {
        if let Some(id) = self.graph.id_of(&Addr::Range(addr.clone())) {
            if let Node::Range(r) = self.graph.node(id) {
                if let Some(CellValue::Array(rows)) = &r.value {
                    return Ok(rows.clone());
                }
            }
        }
        // not a materialised range (or still dirty): assemble from the
        // live cell nodes
        let mut data = Vec::with_capacity(addr.rows() as usize);
        for r in addr.start_row..=addr.end_row {
            let mut row = Vec::with_capacity(addr.cols() as usize);
            for c in addr.start_col..=addr.end_col {
                row.push(self.resolve_cell(&CellAddr::new(addr.sheet.clone(), c, r)));
            }
            data.push(row);
        }
        Ok(data)
    }

    fn current_cell(&self) -> &CellAddr {
        &self.current
    }

    fn sheet_bounds(&self, sheet: &str) -> (u32, u32) {
        self.graph
            .bounds
            .get(sheet)
            .copied()
            .unwrap_or((MAX_ROW, MAX_COL))
    }

    fn linest_run(&self) -> Option<(usize, usize)> {
        self.linest_run
    }
}

/* ─────────────────────────── evaluation ───────────────────────────── */

/// Evaluate one node, memoized, resolving uncached precedents first.
pub fn evaluate(
    graph: &mut DependencyGraph,
    target: NodeId,
    mode: CycleMode,
) -> Result<CellValue, CompilerError> {
    if graph.is_cached(target) {
        return Ok(graph.node(target).value().cloned().expect("cached"));
    }

    let mut frames: Vec<(NodeId, bool)> = vec![(target, false)];
    let mut on_path: FxHashSet<NodeId> = FxHashSet::default();

    while let Some((id, expanded)) = frames.pop() {
        if expanded {
            on_path.remove(&id);
            compute_node(graph, id)?;
            continue;
        }
        if graph.is_cached(id) {
            continue;
        }
        if !on_path.insert(id) {
            return cycle_fallback(graph, target, id, mode);
        }
        frames.push((id, true));
        let deps: Vec<NodeId> = graph.in_edges(id).to_vec();
        for dep in deps {
            if graph.is_cached(dep) {
                continue;
            }
            if on_path.contains(&dep) {
                return cycle_fallback(graph, target, dep, mode);
            }
            frames.push((dep, false));
        }
    }

    Ok(graph
        .node(target)
        .value()
        .cloned()
        .expect("evaluation filled the cache"))
}

fn cycle_fallback(
    graph: &mut DependencyGraph,
    target: NodeId,
    witness: NodeId,
    mode: CycleMode,
) -> Result<CellValue, CompilerError> {
    match mode {
        CycleMode::Fatal => Err(CompilerError::Cycle(graph.node(witness).addr().to_string())),
        CycleMode::Iterate {
            max_iterations,
            tolerance,
        } => evaluate_iterative(graph, target, max_iterations, tolerance),
    }
}

/// Compute a node whose precedents are all cached.
fn compute_node(graph: &mut DependencyGraph, id: NodeId) -> Result<(), CompilerError> {
    let value = match graph.node(id) {
        Node::Cell(cell) => {
            if let Some(message) = &cell.poison {
                return Err(CompilerError::Poisoned {
                    addr: cell.addr.to_string(),
                    message: message.clone(),
                });
            }
            match (&cell.plan, &cell.value) {
                (_, Some(v)) => v.clone(),
                (None, None) => CellValue::Empty,
                (Some(plan), None) => {
                    let plan = plan.clone();
                    let addr = cell.addr.clone();
                    run_plan(graph, &addr, &plan)
                }
            }
        }
        Node::Range(range) => {
            if let Some(v) = &range.value {
                v.clone()
            } else {
                let addrs = range.cells.clone();
                let mut rows = Vec::with_capacity(addrs.len());
                for row in &addrs {
                    let mut out = Vec::with_capacity(row.len());
                    for member in row {
                        let v = match graph.id_of(&Addr::Cell(member.clone())) {
                            Some(member_id) => graph
                                .node(member_id)
                                .value()
                                .cloned()
                                .unwrap_or(CellValue::Empty),
                            None => CellValue::Empty,
                        };
                        out.push(v);
                    }
                    rows.push(out);
                }
                CellValue::Array(rows)
            }
        }
    };

    trace!(node = %graph.node(id).addr(), value = %value, "computed");
    graph.set_cached(id, value);
    Ok(())
}

fn run_plan(graph: &DependencyGraph, addr: &CellAddr, plan: &Plan) -> CellValue {
    let ctx = GraphContext::new(graph, addr.clone(), plan.linest_run);
    let interp = Interpreter::new(&ctx);
    match interp.evaluate_ast(&plan.ast) {
        Ok(v) => v,
        Err(e) => CellValue::Error(e),
    }
}

/* ───────────────────────── iterative cycles ───────────────────────── */

/// Bounded fixed-point sweeps for graphs with cycles: compute a
/// topological order ignoring back-edges, seed dirty cycle members with
/// empty values, then recompute the whole order until quiescent.
fn evaluate_iterative(
    graph: &mut DependencyGraph,
    target: NodeId,
    max_iterations: usize,
    tolerance: f64,
) -> Result<CellValue, CompilerError> {
    // post-order DFS from the target over precedents, skipping
    // back-edges via the on-path set
    let mut order: Vec<NodeId> = Vec::new();
    let mut seen: FxHashSet<NodeId> = FxHashSet::default();
    let mut on_path: FxHashSet<NodeId> = FxHashSet::default();
    let mut frames: Vec<(NodeId, bool)> = vec![(target, false)];
    while let Some((id, expanded)) = frames.pop() {
        if expanded {
            on_path.remove(&id);
            order.push(id);
            continue;
        }
        if !seen.insert(id) {
            continue;
        }
        on_path.insert(id);
        frames.push((id, true));
        for &dep in graph.in_edges(id) {
            if !seen.contains(&dep) && !on_path.contains(&dep) {
                frames.push((dep, false));
            }
        }
    }

    // seed dirty formula nodes so the first sweep has inputs to read
    for &id in &order {
        if !graph.is_cached(id) {
            graph.set_cached(id, CellValue::Empty);
        }
    }

    debug!(nodes = order.len(), max_iterations, tolerance, "iterative evaluation");
    for iteration in 0..max_iterations.max(1) {
        let mut max_delta = 0.0f64;
        for &id in &order {
            let old = graph.node(id).value().cloned();
            recompute_in_place(graph, id)?;
            let new = graph.node(id).value().cloned();
            max_delta = max_delta.max(delta(&old, &new));
        }
        trace!(iteration, max_delta, "sweep complete");
        if max_delta < tolerance {
            break;
        }
    }

    Ok(graph
        .node(target)
        .value()
        .cloned()
        .unwrap_or(CellValue::Empty))
}

/// Recompute a node from the current caches, replacing its value.
fn recompute_in_place(graph: &mut DependencyGraph, id: NodeId) -> Result<(), CompilerError> {
    let value = match graph.node(id) {
        Node::Cell(cell) => {
            if let Some(message) = &cell.poison {
                return Err(CompilerError::Poisoned {
                    addr: cell.addr.to_string(),
                    message: message.clone(),
                });
            }
            match &cell.plan {
                None => return Ok(()), // inputs keep their stored value
                Some(plan) => {
                    let plan = plan.clone();
                    let addr = cell.addr.clone();
                    run_plan(graph, &addr, &plan)
                }
            }
        }
        Node::Range(range) => {
            let addrs = range.cells.clone();
            let mut rows = Vec::with_capacity(addrs.len());
            for row in &addrs {
                let mut out = Vec::with_capacity(row.len());
                for member in row {
                    let v = match graph.id_of(&Addr::Cell(member.clone())) {
                        Some(member_id) => graph
                            .node(member_id)
                            .value()
                            .cloned()
                            .unwrap_or(CellValue::Empty),
                        None => CellValue::Empty,
                    };
                    out.push(v);
                }
                rows.push(out);
            }
            CellValue::Array(rows)
        }
    };
    graph.set_cached(id, value);
    Ok(())
}

/// Numeric change between two cached values; non-numeric changes count
/// as an unbounded delta so they keep iteration alive.
fn delta(old: &Option<CellValue>, new: &Option<CellValue>) -> f64 {
    match (old, new) {
        (Some(a), Some(b)) if a == b => 0.0,
        (Some(a), Some(b)) => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => (x - y).abs(),
            _ => f64::INFINITY,
        },
        _ => f64::INFINITY,
    }
}
