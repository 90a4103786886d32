//! Graph construction: from seed addresses, transitively discover every
//! cell and range the reachable formulas touch.
//!
//! The worklist algorithm: pop a formula-bearing cell, compile its
//! formula (caching the parse), materialise every referenced address,
//! link an edge from each to the cell, and schedule newly discovered
//! formula cells. The cellmap is the uniqueness oracle, so revisiting
//! an address is a no-op.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use sheetgraph_parse::parser::{ASTNode, ASTNodeType, parse_formula};
use sheetgraph_common::{Addr, CellAddr, CellValue, Notation, ParsedRef, RangeAddr};

use super::CompilerError;
use super::graph::{DependencyGraph, Node, NodeId, Plan};
use crate::traits::WorkbookAccessor;

pub(crate) struct BuildOutput {
    pub graph: DependencyGraph,
    pub captured: Vec<(Addr, CellValue)>,
    pub digest: u64,
    pub default_sheet: String,
}

pub(crate) struct GraphBuilder<'a> {
    accessor: &'a mut dyn WorkbookAccessor,
    notation: Notation,
    graph: DependencyGraph,
    worklist: VecDeque<NodeId>,
    parse_cache: FxHashMap<String, Arc<ASTNode>>,
    names: FxHashMap<String, ParsedRef>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(accessor: &'a mut dyn WorkbookAccessor, notation: Notation) -> Self {
        GraphBuilder {
            accessor,
            notation,
            graph: DependencyGraph::new(),
            worklist: VecDeque::new(),
            parse_cache: FxHashMap::default(),
            names: FxHashMap::default(),
        }
    }

    pub fn build(mut self, seeds: &[&str]) -> Result<BuildOutput, CompilerError> {
        self.accessor
            .open()
            .map_err(|e| CompilerError::Accessor(e.to_string()))?;
        let default_sheet = self.accessor.active_sheet();
        self.load_defined_names();

        for seed in seeds {
            let addr =
                Addr::parse(seed, &default_sheet).map_err(|e| CompilerError::Address {
                    addr: seed.to_string(),
                    message: e.message.unwrap_or_default(),
                })?;
            self.materialize(&addr);
        }

        while let Some(id) = self.worklist.pop_front() {
            self.process_cell(id);
        }

        debug!(
            nodes = self.graph.len(),
            edges = self.graph.edge_count(),
            "graph construction done"
        );

        let captured = self.capture();
        let digest = self.digest();
        Ok(BuildOutput {
            graph: self.graph,
            captured,
            digest,
            default_sheet,
        })
    }

    /// The accessor hands back `(name, formula)` pairs with the names
    /// already reduced to range formulas; keep them as parsed
    /// references for substitution.
    fn load_defined_names(&mut self) {
        for (name, formula) in self.accessor.defined_names() {
            let text = formula.trim_start_matches('=');
            match ParsedRef::parse(text, self.notation) {
                Ok(reference) if !matches!(reference, ParsedRef::Name(_)) => {
                    self.names.insert(name.to_uppercase(), reference);
                }
                _ => warn!(name = %name, formula = %formula, "unusable defined name"),
            }
        }
    }

    fn bounds_for(&mut self, sheet: &str) -> (u32, u32) {
        if let Some(b) = self.graph.bounds.get(sheet) {
            return *b;
        }
        self.accessor.set_sheet(sheet);
        let b = (
            self.accessor.max_row().max(1),
            self.accessor.max_column().max(1),
        );
        self.graph.bounds.insert(sheet.to_string(), b);
        b
    }

    /* ───────────────────── node materialisation ───────────────────── */

    /// Insert the node(s) for an address, pulling content through the
    /// accessor; already-known addresses come straight from the map.
    fn materialize(&mut self, addr: &Addr) -> NodeId {
        if let Some(id) = self.graph.id_of(addr) {
            return id;
        }
        match addr {
            Addr::Cell(cell) => {
                let formula = self.accessor.get_formula(cell);
                let value = self.accessor.get_value(cell);
                self.insert_cell(cell.clone(), formula, value)
            }
            Addr::Range(range) => self.materialize_range(range),
        }
    }

    fn insert_cell(
        &mut self,
        addr: CellAddr,
        formula: Option<String>,
        value: CellValue,
    ) -> NodeId {
        // a formula cell whose host never calculated it starts dirty
        let cached = if formula.is_some() && value.is_blank() {
            None
        } else {
            Some(value)
        };
        let id = self.graph.add_cell(addr, cached, formula.clone());
        if formula.is_some() {
            self.worklist.push_back(id);
        }
        id
    }

    /// Materialise a range node and every member cell; members link
    /// into the range so "range contains cell" holds as edges.
    fn materialize_range(&mut self, range: &RangeAddr) -> NodeId {
        let data = self.accessor.get_range(range);
        let (range_id, _) = self.graph.add_range(range.clone());

        for (r_off, row) in data.into_iter().enumerate() {
            for (c_off, (formula, value)) in row.into_iter().enumerate() {
                let member = CellAddr::new(
                    range.sheet.clone(),
                    range.start_col + c_off as u32,
                    range.start_row + r_off as u32,
                );
                let member_id = match self.graph.id_of(&Addr::Cell(member.clone())) {
                    Some(id) => id,
                    None => self.insert_cell(member, formula, value),
                };
                self.graph.add_edge(member_id, range_id);
            }
        }
        range_id
    }

    /* ───────────────────── formula processing ─────────────────────── */

    fn process_cell(&mut self, id: NodeId) {
        let (addr, formula) = match self.graph.node(id) {
            Node::Cell(cell) => match (&cell.formula, &cell.plan) {
                (Some(f), None) if cell.poison.is_none() => (cell.addr.clone(), f.clone()),
                _ => return,
            },
            Node::Range(_) => return,
        };

        let ast = match self.parse(&formula) {
            Ok(ast) => ast,
            Err(message) => {
                warn!(addr = %addr, formula = %formula, message = %message, "formula failed to parse");
                if let Node::Cell(cell) = self.graph.node_mut(id) {
                    cell.poison = Some(format!("{formula}: {message}"));
                    cell.value = None;
                }
                return;
            }
        };

        let linest_run = self.linest_annotation(&addr, &formula, &ast);
        if let Node::Cell(cell) = self.graph.node_mut(id) {
            cell.plan = Some(Plan {
                ast: ast.clone(),
                linest_run,
            });
        }

        for reference in collect_references(&ast) {
            let sheet = match &reference {
                ParsedRef::Cell(c) => c.sheet.clone(),
                ParsedRef::Range(r) => r.sheet.clone(),
                ParsedRef::Name(_) => continue,
            }
            .unwrap_or_else(|| addr.sheet.clone());
            let (max_row, max_col) = self.bounds_for(&sheet);
            match reference.resolve(&addr, max_row, max_col) {
                Ok(dep_addr) => {
                    let dep_id = self.materialize(&dep_addr);
                    self.graph.add_edge(dep_id, id);
                }
                Err(e) => {
                    // the plan will surface the same error as a value
                    debug!(addr = %addr, reference = %reference, error = %e, "unresolvable reference");
                }
            }
        }
    }

    /// Parse with substitution of defined names, caching by formula
    /// text.
    fn parse(&mut self, formula: &str) -> Result<Arc<ASTNode>, String> {
        if let Some(ast) = self.parse_cache.get(formula) {
            return Ok(ast.clone());
        }
        let mut ast = parse_formula(formula, self.notation).map_err(|e| e.to_string())?;
        if !self.names.is_empty() && has_name_refs(&ast) {
            ast = substitute_names(&ast, &self.names);
        }
        let ast = Arc::new(ast);
        self.parse_cache.insert(formula.to_string(), ast.clone());
        Ok(ast)
    }

    /* ───────────────────── LINEST run detection ───────────────────── */

    /// A LINEST entered as a multi-cell array formula occupies a run of
    /// adjacent cells carrying the identical formula. Find the run in
    /// the cell's row (then column), and pin (degree, coefficient
    /// index) on the plan so evaluation needs no further context.
    fn linest_annotation(
        &mut self,
        addr: &CellAddr,
        formula: &str,
        ast: &ASTNode,
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
            if col < 1 || row < 1 {
                return false;
            }
            self.accessor
                .get_formula(&CellAddr::new(addr.sheet.clone(), col, row))
                .is_some_and(|f| f == formula)
        };

        // horizontal run first
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

    /* ───────────────────── capture & digest ───────────────────────── */

    /// Compile-time values of every formula cell, for `validate`.
    fn capture(&self) -> Vec<(Addr, CellValue)> {
        let mut out = Vec::new();
        for id in self.graph.ids() {
            if let Node::Cell(cell) = self.graph.node(id) {
                if cell.formula.is_some() {
                    if let Some(v) = &cell.value {
                        out.push((Addr::Cell(cell.addr.clone()), v.clone()));
                    }
                }
            }
        }
        out
    }

    /// Content hash over the compiled cells, used as the freshness
    /// digest in snapshots.
    fn digest(&self) -> u64 {
        let mut entries: Vec<String> = self
            .graph
            .ids()
            .filter_map(|id| match self.graph.node(id) {
                Node::Cell(cell) => Some(format!(
                    "{}\u{1}{}\u{1}{}",
                    cell.addr,
                    cell.formula.as_deref().unwrap_or(""),
                    cell.value
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                )),
                Node::Range(_) => None,
            })
            .collect();
        entries.sort();
        let mut hasher = DefaultHasher::new();
        entries.hash(&mut hasher);
        hasher.finish()
    }
}

/* ─────────────────── reference collection helpers ─────────────────── */

/// References needed by a plan: every reference node, plus the static
/// targets of literal `INDIRECT` and `OFFSET` calls, which evaluation
/// resolves dynamically but the graph must still contain.
fn collect_references(ast: &ASTNode) -> Vec<ParsedRef> {
    let mut out: Vec<ParsedRef> = ast.references().into_iter().cloned().collect();

    ast.visit(&mut |node| {
        if let ASTNodeType::Function { name, args } = &node.node_type {
            if name.eq_ignore_ascii_case("INDIRECT") {
                if let Some(ASTNodeType::Literal(CellValue::Text(text))) =
                    args.first().map(|a| &a.node_type)
                {
                    if let Ok(r) = ParsedRef::parse(text, Notation::A1) {
                        if !matches!(r, ParsedRef::Name(_)) {
                            out.push(r);
                        }
                    }
                }
            }
            if name.eq_ignore_ascii_case("OFFSET") {
                if let Some(target) = static_offset_target(args) {
                    out.push(target);
                }
            }
        }
    });

    out
}

/// OFFSET with a direct reference base and all-literal displacements
/// has a compile-time-known target rectangle.
fn static_offset_target(args: &[ASTNode]) -> Option<ParsedRef> {
    use sheetgraph_common::{Coord, ParsedRangeRef};

    let reference = match args.first().map(|a| &a.node_type) {
        Some(ASTNodeType::Reference { reference, .. }) => reference,
        _ => return None,
    };
    let literal = |idx: usize| -> Option<i64> {
        match args.get(idx).map(|a| &a.node_type) {
            Some(ASTNodeType::Literal(CellValue::Number(n))) => Some(*n as i64),
            Some(ASTNodeType::Literal(CellValue::Int(i))) => Some(*i),
            None => None,
            _ => Some(i64::MIN), // non-literal: bail out below
        }
    };
    let rows = literal(1)?;
    let cols = literal(2)?;
    let height = literal(3).unwrap_or(0);
    let width = literal(4).unwrap_or(0);
    if [rows, cols, height, width].contains(&i64::MIN) {
        return None;
    }

    let (sheet, start_col, start_row, end_col, end_row) = match reference {
        ParsedRef::Cell(c) => {
            let (Coord::Abs { index: col, .. }, Coord::Abs { index: row, .. }) = (c.col, c.row)
            else {
                return None;
            };
            (c.sheet.clone(), col, row, col, row)
        }
        ParsedRef::Range(r) => {
            let abs = |c: &Option<Coord>| -> Option<u32> {
                match c {
                    Some(Coord::Abs { index, .. }) => Some(*index),
                    _ => None,
                }
            };
            (
                r.sheet.clone(),
                abs(&r.start_col)?,
                abs(&r.start_row)?,
                abs(&r.end_col)?,
                abs(&r.end_row)?,
            )
        }
        ParsedRef::Name(_) => return None,
    };

    let base_height = (end_row - start_row + 1) as i64;
    let base_width = (end_col - start_col + 1) as i64;
    let height = if height > 0 { height } else { base_height };
    let width = if width > 0 { width } else { base_width };

    let new_row = start_row as i64 + rows;
    let new_col = start_col as i64 + cols;
    if new_row < 1 || new_col < 1 || height < 1 || width < 1 {
        return None;
    }
    let abs = |index: u32| Coord::Abs {
        index,
        anchored: false,
    };
    Some(ParsedRef::Range(ParsedRangeRef {
        sheet,
        start_col: Some(abs(new_col as u32)),
        start_row: Some(abs(new_row as u32)),
        end_col: Some(abs((new_col + width - 1) as u32)),
        end_row: Some(abs((new_row + height - 1) as u32)),
    }))
}

fn has_name_refs(ast: &ASTNode) -> bool {
    ast.references()
        .iter()
        .any(|r| matches!(r, ParsedRef::Name(_)))
}

/// Clone the AST with defined-name references replaced by their
/// targets; unknown names stay and evaluate to `#NAME?`.
fn substitute_names(node: &ASTNode, names: &FxHashMap<String, ParsedRef>) -> ASTNode {
    let node_type = match &node.node_type {
        ASTNodeType::Reference {
            original,
            reference: ParsedRef::Name(name),
        } => match names.get(&name.to_uppercase()) {
            Some(target) => ASTNodeType::Reference {
                original: original.clone(),
                reference: target.clone(),
            },
            None => node.node_type.clone(),
        },
        ASTNodeType::UnaryOp { op, expr } => ASTNodeType::UnaryOp {
            op: op.clone(),
            expr: Box::new(substitute_names(expr, names)),
        },
        ASTNodeType::BinaryOp { op, left, right } => ASTNodeType::BinaryOp {
            op: op.clone(),
            left: Box::new(substitute_names(left, names)),
            right: Box::new(substitute_names(right, names)),
        },
        ASTNodeType::Function { name, args } => ASTNodeType::Function {
            name: name.clone(),
            args: args.iter().map(|a| substitute_names(a, names)).collect(),
        },
        ASTNodeType::Array(rows) => ASTNodeType::Array(
            rows.iter()
                .map(|row| row.iter().map(|a| substitute_names(a, names)).collect())
                .collect(),
        ),
        other => other.clone(),
    };
    ASTNode::new(node_type)
}
