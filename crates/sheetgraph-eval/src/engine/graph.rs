//! The dependency graph: cell and range nodes keyed by absolute
//! address, with edges pointing from a precedent to its dependents.
//!
//! The cellmap exclusively owns every node; range nodes hold only the
//! addresses of their members and look live nodes up through the map.
//! A `None` value means dirty: evaluation fills it, invalidation
//! clears it.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use sheetgraph_parse::parser::ASTNode;
use sheetgraph_common::{Addr, CellAddr, CellValue, RangeAddr};

pub type NodeId = usize;

/// A compiled evaluation plan: the interpretable AST plus the
/// (degree, coefficient-index) annotation for array-run LINEST cells.
#[derive(Debug, Clone)]
pub struct Plan {
    pub ast: Arc<ASTNode>,
    pub linest_run: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct CellNode {
    pub addr: CellAddr,
    pub value: Option<CellValue>,
    pub formula: Option<String>,
    pub plan: Option<Plan>,
    /// Parse diagnostic recorded when the formula failed to compile;
    /// evaluating such a cell surfaces this as a fatal error.
    pub poison: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RangeNode {
    pub addr: RangeAddr,
    /// Member cell addresses, row-major.
    pub cells: Vec<Vec<CellAddr>>,
    pub value: Option<CellValue>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Cell(CellNode),
    Range(RangeNode),
}

impl Node {
    pub fn addr(&self) -> Addr {
        match self {
            Node::Cell(c) => Addr::Cell(c.addr.clone()),
            Node::Range(r) => Addr::Range(r.addr.clone()),
        }
    }

    pub fn value(&self) -> Option<&CellValue> {
        match self {
            Node::Cell(c) => c.value.as_ref(),
            Node::Range(r) => r.value.as_ref(),
        }
    }

    fn clear_value(&mut self) {
        match self {
            Node::Cell(c) => c.value = None,
            Node::Range(r) => r.value = None,
        }
    }
}

#[derive(Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    cellmap: FxHashMap<Addr, NodeId>,
    /// Edge from A to B: B depends on A.
    out_edges: Vec<Vec<NodeId>>,
    in_edges: Vec<Vec<NodeId>>,
    /// Used (max_row, max_col) per sheet, captured at compile time so
    /// open-ended ranges resolve identically forever after.
    pub bounds: FxHashMap<String, (u32, u32)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.out_edges.iter().map(|e| e.len()).sum()
    }

    pub fn id_of(&self, addr: &Addr) -> Option<NodeId> {
        self.cellmap.get(addr).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        0..self.nodes.len()
    }

    pub fn in_edges(&self, id: NodeId) -> &[NodeId] {
        &self.in_edges[id]
    }

    pub fn out_edges(&self, id: NodeId) -> &[NodeId] {
        &self.out_edges[id]
    }

    pub fn is_cached(&self, id: NodeId) -> bool {
        self.nodes[id].value().is_some()
    }

    /* ───────────────────────── construction ───────────────────────── */

    fn push_node(&mut self, addr: Addr, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        self.cellmap.insert(addr, id);
        id
    }

    /// Insert a cell node; revisiting an existing address is a no-op.
    pub fn add_cell(
        &mut self,
        addr: CellAddr,
        value: Option<CellValue>,
        formula: Option<String>,
    ) -> NodeId {
        let key = Addr::Cell(addr.clone());
        if let Some(id) = self.cellmap.get(&key) {
            return *id;
        }
        self.push_node(
            key,
            Node::Cell(CellNode {
                addr,
                value,
                formula,
                plan: None,
                poison: None,
            }),
        )
    }

    /// Insert a range node; returns `(id, true)` when newly created.
    pub fn add_range(&mut self, addr: RangeAddr) -> (NodeId, bool) {
        let key = Addr::Range(addr.clone());
        if let Some(id) = self.cellmap.get(&key) {
            return (*id, false);
        }
        let cells = addr.cells();
        let id = self.push_node(
            key,
            Node::Range(RangeNode {
                addr,
                cells,
                value: None,
            }),
        );
        (id, true)
    }

    /// Link `from` as a precedent of `to`; duplicate edges collapse.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from == to || self.out_edges[from].contains(&to) {
            return;
        }
        self.out_edges[from].push(to);
        self.in_edges[to].push(from);
    }

    /* ───────────────────────── value cache ────────────────────────── */

    pub fn set_cached(&mut self, id: NodeId, value: CellValue) {
        match &mut self.nodes[id] {
            Node::Cell(c) => c.value = Some(value),
            Node::Range(r) => r.value = Some(value),
        }
    }

    /// Mark a node and every transitive dependent dirty. Input cells
    /// keep their stored value (they have nothing to recompute from);
    /// formula cells and ranges lose their cache. Idempotent and
    /// cycle-safe.
    pub fn invalidate(&mut self, start: NodeId) {
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            trace!(node = %self.nodes[id].addr(), "invalidate");
            match &mut self.nodes[id] {
                Node::Cell(c) if c.formula.is_none() => {}
                node => node.clear_value(),
            }
            stack.extend(self.out_edges[id].iter().copied());
        }
    }

    /* ───────────────────────── inspection ─────────────────────────── */

    /// Human-readable indented dump of a node and its precedents.
    pub fn value_tree(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack: Vec<(NodeId, usize)> = vec![(id, 0)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id];
            let value = node
                .value()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "<dirty>".to_string());
            out.push_str(&" ".repeat(depth));
            out.push_str(&format!("{} = {value}\n", node.addr()));
            if visited.insert(id) {
                for &dep in self.in_edges[id].iter().rev() {
                    stack.push((dep, depth + 1));
                }
            }
        }
        out
    }

    /// All nodes reachable from `starts` along the given adjacency.
    fn reachable(&self, starts: &[NodeId], forward: bool) -> FxHashSet<NodeId> {
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack: Vec<NodeId> = starts.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let next = if forward {
                &self.out_edges[id]
            } else {
                &self.in_edges[id]
            };
            stack.extend(next.iter().copied());
        }
        seen
    }

    /// The first cycle participant found, if any.
    pub fn find_cycle(&self) -> Option<Addr> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }
        let mut color = vec![Color::White; self.nodes.len()];
        for root in 0..self.nodes.len() {
            if color[root] != Color::White {
                continue;
            }
            let mut stack: Vec<(NodeId, bool)> = vec![(root, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    color[id] = Color::Black;
                    continue;
                }
                if color[id] == Color::Black {
                    continue;
                }
                color[id] = Color::Grey;
                stack.push((id, true));
                for &next in &self.out_edges[id] {
                    match color[next] {
                        Color::Grey => return Some(self.nodes[next].addr()),
                        Color::White => stack.push((next, false)),
                        Color::Black => {}
                    }
                }
            }
        }
        None
    }

    /* ───────────────────────── trimming ───────────────────────────── */

    /// Reduce the graph to nodes on some input→output path. Direct
    /// precedents of kept nodes that fall outside the path set are
    /// frozen to value-only nodes so kept plans still evaluate; all
    /// other nodes are removed.
    pub fn trim(&mut self, inputs: &[NodeId], outputs: &[NodeId]) {
        let forward = self.reachable(inputs, true);
        let backward = self.reachable(outputs, false);
        let keep: FxHashSet<NodeId> = forward.intersection(&backward).copied().collect();

        let mut frozen: FxHashSet<NodeId> = FxHashSet::default();
        for &id in &keep {
            for &dep in &self.in_edges[id] {
                if !keep.contains(&dep) {
                    frozen.insert(dep);
                }
            }
        }

        let mut remap: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut nodes = Vec::with_capacity(keep.len() + frozen.len());
        for old_id in 0..self.nodes.len() {
            let kept = keep.contains(&old_id);
            let freeze = frozen.contains(&old_id);
            if !kept && !freeze {
                continue;
            }
            let mut node = self.nodes[old_id].clone();
            if freeze && !kept {
                if let Node::Cell(c) = &mut node {
                    c.formula = None;
                    c.plan = None;
                    c.poison = None;
                }
            }
            remap.insert(old_id, nodes.len());
            nodes.push(node);
        }

        let count = nodes.len();
        let mut out_edges: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        let mut in_edges: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        for (&old_from, &new_from) in &remap {
            for &old_to in &self.out_edges[old_from] {
                if let Some(&new_to) = remap.get(&old_to) {
                    out_edges[new_from].push(new_to);
                    in_edges[new_to].push(new_from);
                }
            }
        }

        let cellmap = nodes
            .iter()
            .enumerate()
            .map(|(id, node)| (node.addr(), id))
            .collect();

        self.nodes = nodes;
        self.out_edges = out_edges;
        self.in_edges = in_edges;
        self.cellmap = cellmap;
    }
}
