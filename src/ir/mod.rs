//! Arena-owned control-flow tree.
//!
//! A [`Program`] owns every statement node in one flat arena and refers to
//! them by [`NodeId`]. Each node records its parent, so passes reach
//! ancestors directly instead of re-deriving visitor context. Rewrites go
//! through the arena: new nodes are appended and parent slots re-pointed,
//! existing nodes are never removed or reordered.
//!
//! # Surface format
//!
//! ```text
//! // Comments start with two slashes
//! control ingress {
//!     action fwd(port) @name("ingress.fwd") { egress = port; }
//!     action drop() { mark_to_drop(); }
//!     table route @name("ingress.route") {
//!         fwd;
//!         drop @name("ingress.drop_it");
//!     }
//!     apply {
//!         if (valid) { route.apply(); } else { drop(); }
//!     }
//! }
//! ```

use crate::core::counter_bank::CounterId;
use crate::core::error::{CompileError, CompileResult};
use std::fmt;

pub mod parser;
pub mod paths;
pub mod printer;

pub use paths::{enumerate, verify_bijection, PathTrace};
pub use printer::Printer;

/// Index of a node in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structured form of a `@name("scope.local")` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Alias {
    pub scope: Vec<String>,
    pub local: String,
}

impl Alias {
    pub fn parse(text: &str) -> Self {
        let mut parts: Vec<String> = text.split('.').map(str::to_string).collect();
        let local = parts.pop().unwrap_or_default();
        Self { scope: parts, local }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

}

/// Strip a generated prefix (`prefix_name` -> `name`).
pub fn normalize_alias(name: &str) -> Option<&str> {
    name.find('_')
        .map(|idx| &name[idx + 1..])
        .filter(|rest| !rest.is_empty())
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.scope {
            write!(f, "{}.", part)?;
        }
        write!(f, "{}", self.local)
    }
}

/// Target of a synthetic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// The path accumulator.
    Path,
    /// A physical counter of the target bank.
    Physical(CounterId),
}

/// One arm of a switch; `body` is absent for fallthrough labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    pub label: String,
    pub body: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Non-branching statement.
    Leaf { text: String },
    Block { stmts: Vec<NodeId> },
    If {
        cond: String,
        taken: NodeId,
        not_taken: Option<NodeId>,
    },
    Switch {
        selector: String,
        cases: Vec<SwitchCase>,
    },
    /// Invocation of a subroutine of the unit.
    Call { target: String, args: String },
    /// Invocation of a dispatch table of the unit.
    Apply { table: String },
    /// Synthetic `counter += amount`.
    Accumulate { counter: Counter, amount: u64 },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Leaf { .. } => "leaf",
            NodeKind::Block { .. } => "block",
            NodeKind::If { .. } => "if",
            NodeKind::Switch { .. } => "switch",
            NodeKind::Call { .. } => "call",
            NodeKind::Apply { .. } => "apply",
            NodeKind::Accumulate { .. } => "accumulate",
        }
    }

    /// Conditionals and switches choose between paths.
    pub fn is_branch_point(&self) -> bool {
        matches!(self, NodeKind::If { .. } | NodeKind::Switch { .. })
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Block { stmts } => stmts.clone(),
            NodeKind::If { taken, not_taken, .. } => {
                let mut children = vec![*taken];
                children.extend(not_taken.iter().copied());
                children
            }
            NodeKind::Switch { cases, .. } => cases.iter().filter_map(|c| c.body).collect(),
            _ => Vec::new(),
        }
    }

    fn replace_child(&mut self, old: NodeId, new: NodeId) -> bool {
        let slot = match self {
            NodeKind::Block { stmts } => stmts.iter_mut().find(|s| **s == old),
            NodeKind::If { taken, not_taken, .. } => {
                if *taken == old {
                    Some(taken)
                } else {
                    not_taken.as_mut().filter(|n| **n == old)
                }
            }
            NodeKind::Switch { cases, .. } => cases
                .iter_mut()
                .filter_map(|c| c.body.as_mut())
                .find(|b| **b == old),
            _ => None,
        };
        match slot {
            Some(slot) => {
                *slot = new;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    num_paths: Option<u64>,
}

impl Node {
    pub fn num_paths(&self) -> Option<u64> {
        self.num_paths
    }
}

/// Named reusable body (an action).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subroutine {
    pub name: String,
    /// Parameter list text, without parentheses.
    pub params: String,
    pub alias: Option<Alias>,
    pub body: NodeId,
}

/// Entry of a dispatch table's action list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub name: String,
    pub alias: Option<Alias>,
}

/// Match-action dispatch: applying it runs exactly one of its actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTable {
    pub name: String,
    pub alias: Option<Alias>,
    pub actions: Vec<ActionRef>,
}

impl DispatchTable {
    /// Key under which the allocation table knows this dispatch.
    pub fn key(&self) -> String {
        match &self.alias {
            Some(alias) => alias.to_string(),
            None => self.name.clone(),
        }
    }
}

/// One compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    pub subroutines: Vec<Subroutine>,
    pub tables: Vec<DispatchTable>,
    pub body: NodeId,
    /// Set once the register lowering backend ran on this unit.
    pub lowered: bool,
}

impl Unit {
    pub fn subroutine(&self, name: &str) -> Option<&Subroutine> {
        self.subroutines.iter().find(|s| s.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&DispatchTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    nodes: Vec<Node>,
    pub units: Vec<Unit>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> CompileResult<Self> {
        parser::parse_program(text)
    }

    /// Render with default options.
    pub fn print(&self) -> String {
        Printer::default().print(self)
    }

    /// Append a node and link its children to it.
    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for child in kind.children() {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes.push(Node {
            kind,
            parent: None,
            num_paths: None,
        });
        id
    }

    /// Append a node created by a rewrite, already carrying its path count.
    fn add_counted(&mut self, kind: NodeKind, num_paths: Option<u64>) -> NodeId {
        let id = self.add(kind);
        self.nodes[id.index()].num_paths = num_paths;
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    /// Replace a childless node's kind, as done when call-like statements are resolved.
    pub(crate) fn set_leaf_kind(&mut self, id: NodeId, kind: NodeKind) {
        debug_assert!(kind.children().is_empty());
        self.nodes[id.index()].kind = kind;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn num_paths(&self, id: NodeId) -> Option<u64> {
        self.nodes[id.index()].num_paths
    }

    /// Path count of a node that must already be counted.
    pub fn expect_num_paths(&self, id: NodeId) -> CompileResult<u64> {
        self.num_paths(id)
            .ok_or(CompileError::Uncounted { node: id.raw() })
    }

    /// Write the path count of a node. Counts are write-once.
    pub fn set_num_paths(&mut self, id: NodeId, num_paths: u64) -> CompileResult<()> {
        let node = &mut self.nodes[id.index()];
        if node.num_paths.is_some() {
            return Err(CompileError::NumPathsRewritten { node: id.raw() });
        }
        node.num_paths = Some(num_paths);
        Ok(())
    }

    pub fn unit(&self, index: usize) -> CompileResult<&Unit> {
        self.units.get(index).ok_or(CompileError::UnknownUnit { index })
    }

    pub fn unit_mut(&mut self, index: usize) -> CompileResult<&mut Unit> {
        self.units.get_mut(index).ok_or(CompileError::UnknownUnit { index })
    }

    /// Nodes of the subtree rooted at `root`, parents before children.
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            let children = self.kind(id).children();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Mixed-radix place value of `id` inside its enclosing body.
    ///
    /// Walks parent links to the root. At every Block ancestor the path counts
    /// of the members sequenced after the current one are multiplied in;
    /// earlier members contribute nothing.
    pub fn place_value(&self, id: NodeId) -> CompileResult<u64> {
        let mut place = 1u64;
        let mut child = id;
        while let Some(parent) = self.parent(child) {
            if let NodeKind::Block { stmts } = self.kind(parent) {
                let pos = stmts.iter().position(|s| *s == child).ok_or_else(|| {
                    CompileError::structural(
                        format!("block {}", parent),
                        format!("parent link of {} is stale", child),
                    )
                })?;
                for later in &stmts[pos + 1..] {
                    let paths = self.expect_num_paths(*later)?;
                    place = place
                        .checked_mul(paths)
                        .ok_or_else(|| CompileError::overflow(format!("place value of {}", id)))?;
                }
            }
            child = parent;
        }
        Ok(place)
    }

    /// Insert a synthetic statement so it runs first whenever `target` runs.
    ///
    /// A Block target receives the statement as its first member. Any other
    /// target is wrapped in a fresh Block `[statement, target]` that takes its
    /// place in the parent. Existing nodes keep their relative order.
    pub fn prepend(&mut self, target: NodeId, kind: NodeKind) -> CompileResult<NodeId> {
        let stmt = self.add_counted(kind, Some(1));

        if let NodeKind::Block { stmts } = &mut self.nodes[target.index()].kind {
            stmts.insert(0, stmt);
            self.nodes[stmt.index()].parent = Some(target);
            return Ok(stmt);
        }

        let parent = self.parent(target).ok_or_else(|| {
            CompileError::structural(
                format!("{} {}", self.kind(target).name(), target),
                "body root is not a block",
            )
        })?;
        let target_paths = self.num_paths(target);
        let wrapper = self.add_counted(
            NodeKind::Block {
                stmts: vec![stmt, target],
            },
            target_paths,
        );
        self.nodes[wrapper.index()].parent = Some(parent);
        if !self.nodes[parent.index()].kind.replace_child(target, wrapper) {
            return Err(CompileError::structural(
                format!("{} {}", self.kind(parent).name(), parent),
                format!("does not own {}", target),
            ));
        }
        Ok(stmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(program: &mut Program, text: &str) -> NodeId {
        program.add(NodeKind::Leaf { text: text.to_string() })
    }

    #[test]
    fn test_add_links_parents() {
        let mut program = Program::new();
        let a = leaf(&mut program, "a");
        let b = leaf(&mut program, "b");
        let block = program.add(NodeKind::Block { stmts: vec![a, b] });

        assert_eq!(program.parent(a), Some(block));
        assert_eq!(program.parent(b), Some(block));
        assert_eq!(program.parent(block), None);
        assert_eq!(program.subtree(block), vec![block, a, b]);
    }

    #[test]
    fn test_num_paths_write_once() {
        let mut program = Program::new();
        let a = leaf(&mut program, "a");
        program.set_num_paths(a, 1).unwrap();
        assert!(matches!(
            program.set_num_paths(a, 1),
            Err(CompileError::NumPathsRewritten { .. })
        ));
    }

    #[test]
    fn test_place_value_uses_later_siblings_only() {
        let mut program = Program::new();
        let first = leaf(&mut program, "first");
        let mid = leaf(&mut program, "mid");
        let last = leaf(&mut program, "last");
        let inner = program.add(NodeKind::Block { stmts: vec![first, mid, last] });
        let tail = leaf(&mut program, "tail");
        let outer = program.add(NodeKind::Block { stmts: vec![inner, tail] });

        program.set_num_paths(first, 5).unwrap();
        program.set_num_paths(mid, 2).unwrap();
        program.set_num_paths(last, 3).unwrap();
        program.set_num_paths(inner, 30).unwrap();
        program.set_num_paths(tail, 7).unwrap();
        program.set_num_paths(outer, 210).unwrap();

        assert_eq!(program.place_value(first).unwrap(), 2 * 3 * 7);
        assert_eq!(program.place_value(mid).unwrap(), 3 * 7);
        assert_eq!(program.place_value(last).unwrap(), 7);
        assert_eq!(program.place_value(tail).unwrap(), 1);
    }

    #[test]
    fn test_place_value_requires_counted_siblings() {
        let mut program = Program::new();
        let a = leaf(&mut program, "a");
        let b = leaf(&mut program, "b");
        program.add(NodeKind::Block { stmts: vec![a, b] });

        assert!(matches!(program.place_value(a), Err(CompileError::Uncounted { .. })));
    }

    #[test]
    fn test_prepend_into_block() {
        let mut program = Program::new();
        let a = leaf(&mut program, "a");
        let block = program.add(NodeKind::Block { stmts: vec![a] });

        let acc = program
            .prepend(block, NodeKind::Accumulate { counter: Counter::Path, amount: 3 })
            .unwrap();
        assert_eq!(program.kind(block), &NodeKind::Block { stmts: vec![acc, a] });
        assert_eq!(program.parent(acc), Some(block));
        assert_eq!(program.num_paths(acc), Some(1));
    }

    #[test]
    fn test_prepend_wraps_branch_statement() {
        let mut program = Program::new();
        let taken = leaf(&mut program, "x = 1");
        let cond = program.add(NodeKind::If {
            cond: "c".to_string(),
            taken,
            not_taken: None,
        });
        program.set_num_paths(taken, 1).unwrap();

        let acc = program
            .prepend(taken, NodeKind::Accumulate { counter: Counter::Path, amount: 1 })
            .unwrap();
        let wrapper = program.parent(acc).unwrap();

        assert_eq!(program.kind(wrapper), &NodeKind::Block { stmts: vec![acc, taken] });
        assert_eq!(program.parent(taken), Some(wrapper));
        assert_eq!(program.parent(wrapper), Some(cond));
        assert_eq!(program.num_paths(wrapper), Some(1));
        match program.kind(cond) {
            NodeKind::If { taken: new_taken, .. } => assert_eq!(*new_taken, wrapper),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_prepend_on_detached_statement_fails() {
        let mut program = Program::new();
        let a = leaf(&mut program, "a");
        let err = program
            .prepend(a, NodeKind::Accumulate { counter: Counter::Path, amount: 1 })
            .unwrap_err();
        assert!(matches!(err, CompileError::Structural { .. }));
    }

    #[test]
    fn test_alias_parts() {
        let alias = Alias::parse("ingress.route_fwd");
        assert_eq!(alias.scope, vec!["ingress".to_string()]);
        assert_eq!(alias.local(), "route_fwd");
        assert_eq!(normalize_alias(alias.local()), Some("fwd"));
        assert_eq!(alias.to_string(), "ingress.route_fwd");

        assert_eq!(normalize_alias(Alias::parse("plain").local()), None);
        assert_eq!(normalize_alias("trailing_"), None);
    }
}
