// Graph: the node table behind define-by-run recording
//
// Nodes are created in application order and addressed by NodeId, the index
// of their slot in the table. Ownership runs one way only:
//
//   Graph ──owns──▶ NodeRecord ──strong──▶ input Variables
//                       │
//                       └──weak──▶ output Variables
//
//   Variable ──weak──▶ Graph        (plus its creator's NodeId)
//
// so no Rc cycle can form between Variables and the Functions that produced
// them. Dropping the Graph frees every record; dropping a Variable never
// keeps the table alive.
//
// SLOT LIFECYCLE:
//
//   Live(record) : created by apply(), forward has run
//   Released     : backward consumed the node (or clear() was called);
//                   its Function and cached scratch state are gone
//   Vacant       : no output Variable of the node is alive any more
//
// A backward traversal that reaches a Released slot fails with
// GraphIntegrity instead of silently skipping it.
//
// COLLECTION: a record whose outputs have all been dropped can never be
// reached by a traversal, so it is freed (dropping its Function, its input
// handles and its cached forward inputs) and the slot is reused. Freeing a
// record can orphan its producers in turn, so collection runs to a fixpoint.
// It is triggered from apply() once the occupied slots double, which keeps
// a loop of forward passes on one graph bounded without a clear().

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::array::Array;
use crate::backprop;
use crate::check::{InTypes, TypeInfo};
use crate::config::GraphConfig;
use crate::dispatch::Dispatch;
use crate::error::{Error, Result};
use crate::function::Function;
use crate::variable::{Variable, VariableId, VariableInner};

/// Slot index of a node in its graph. A slot is reused only after every
/// output Variable of its previous node has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Read-only summary of a live node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub label: &'static str,
    pub rank: usize,
    pub inputs: Vec<VariableId>,
    pub outputs: usize,
}

pub(crate) struct NodeRecord {
    pub(crate) label: &'static str,
    pub(crate) function: Box<dyn Function>,
    pub(crate) dispatch: Dispatch,
    pub(crate) inputs: Vec<Variable>,
    /// Input values as seen by forward; backward gets these, not the
    /// Variables' current data.
    pub(crate) input_arrays: Vec<Array>,
    pub(crate) outputs: Vec<Weak<RefCell<VariableInner>>>,
    pub(crate) output_types: Vec<TypeInfo>,
    pub(crate) rank: usize,
}

impl NodeRecord {
    fn unreachable(&self) -> bool {
        all_dropped(&self.outputs)
    }
}

fn all_dropped(outputs: &[Weak<RefCell<VariableInner>>]) -> bool {
    outputs.iter().all(|w| w.strong_count() == 0)
}

pub(crate) enum NodeSlot {
    Live(NodeRecord),
    Released {
        label: &'static str,
        outputs: Vec<Weak<RefCell<VariableInner>>>,
    },
    Vacant,
}

const MIN_COLLECT_THRESHOLD: usize = 64;

pub(crate) struct GraphInner {
    pub(crate) nodes: Vec<NodeSlot>,
    pub(crate) config: GraphConfig,
    vacant: Vec<usize>,
    created: usize,
    collect_threshold: usize,
}

impl GraphInner {
    pub(crate) fn live(&self, id: NodeId) -> Result<&NodeRecord> {
        match self.nodes.get(id.0) {
            Some(NodeSlot::Live(record)) => Ok(record),
            Some(NodeSlot::Released { label, .. }) => Err(Error::integrity(format!(
                "node {} ({}) was already consumed by a previous backward",
                id.0, label
            ))),
            Some(NodeSlot::Vacant) | None => {
                Err(Error::integrity(format!("node {} does not exist", id.0)))
            }
        }
    }

    /// Move a record out of its slot, leaving it Released.
    pub(crate) fn release(&mut self, id: NodeId) -> Result<NodeRecord> {
        let record = self.live(id)?;
        let released = NodeSlot::Released {
            label: record.label,
            outputs: record.outputs.clone(),
        };
        match std::mem::replace(&mut self.nodes[id.0], released) {
            NodeSlot::Live(record) => Ok(record),
            _ => Err(Error::integrity(format!("node {} was released twice", id.0))),
        }
    }

    fn occupied(&self) -> usize {
        self.nodes.len() - self.vacant.len()
    }

    /// Vacate every slot no live Variable can reach.
    fn collect(&mut self) {
        loop {
            let mut changed = false;
            for (i, slot) in self.nodes.iter_mut().enumerate() {
                let dead = match slot {
                    NodeSlot::Live(record) => record.unreachable(),
                    NodeSlot::Released { outputs, .. } => all_dropped(outputs),
                    NodeSlot::Vacant => false,
                };
                if !dead {
                    continue;
                }
                // Dropping a record releases its input handles, which may
                // orphan their producers.
                if let NodeSlot::Live(record) = std::mem::replace(slot, NodeSlot::Vacant) {
                    drop(record);
                    changed = true;
                }
                self.vacant.push(i);
            }
            if !changed {
                break;
            }
        }
        self.collect_threshold = (2 * self.occupied()).max(MIN_COLLECT_THRESHOLD);
        tracing::trace!(vacant = self.vacant.len(), "collected unreachable nodes");
    }

    fn next_slot(&mut self) -> usize {
        self.created += 1;
        match self.vacant.pop() {
            Some(i) => i,
            None => {
                self.nodes.push(NodeSlot::Vacant);
                self.nodes.len() - 1
            }
        }
    }
}

/// A define-by-run computation graph.
///
/// `Graph` is a cheap handle; clones refer to the same node table. It is
/// deliberately `!Send`: one graph is driven by one thread, and independent
/// graphs share no mutable state.
#[derive(Clone)]
pub struct Graph {
    pub(crate) inner: Rc<RefCell<GraphInner>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let g = self.inner.borrow();
        let live = g.nodes.iter().filter(|s| matches!(s, NodeSlot::Live(_))).count();
        write!(f, "Graph(nodes={}, live={})", g.created, live)
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Graph {
            inner: Rc::new(RefCell::new(GraphInner {
                nodes: Vec::new(),
                config,
                vacant: Vec::new(),
                created: 0,
                collect_threshold: MIN_COLLECT_THRESHOLD,
            })),
        }
    }

    pub fn config(&self) -> GraphConfig {
        self.inner.borrow().config.clone()
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<GraphInner>>) -> Self {
        Graph { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<GraphInner>> {
        Rc::downgrade(&self.inner)
    }

    /// Whether two handles refer to the same node table.
    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // Leaves

    /// Wrap externally supplied data as a leaf Variable of this graph.
    pub fn variable(&self, data: Array) -> Variable {
        Variable::new_in(self.downgrade(), Some(data), None, 0)
    }

    /// A leaf whose value is bound later with [`Variable::set_data`].
    pub fn uninit_variable(&self) -> Variable {
        Variable::new_in(self.downgrade(), None, None, 0)
    }

    // Recording

    /// Apply `function` to `inputs`, recording a new node.
    ///
    /// On any error (foreign input, uninitialised input, contract violation,
    /// backend mismatch, kernel failure) the graph is left untouched and no
    /// output Variable exists.
    pub fn apply(&self, function: Box<dyn Function>, inputs: &[&Variable]) -> Result<Vec<Variable>> {
        self.record(function, inputs, None)
    }

    /// [`Graph::apply`] for functions with exactly one output.
    pub fn apply_one(&self, function: Box<dyn Function>, inputs: &[&Variable]) -> Result<Variable> {
        let mut outputs = self.record(function, inputs, Some(1))?;
        Ok(outputs.remove(0))
    }

    fn record(
        &self,
        mut function: Box<dyn Function>,
        inputs: &[&Variable],
        arity: Option<usize>,
    ) -> Result<Vec<Variable>> {
        let label = function.label();
        let _span = tracing::debug_span!("apply", function = label).entered();

        let mut arrays = Vec::with_capacity(inputs.len());
        for (i, v) in inputs.iter().enumerate() {
            if !v.belongs_to(self) {
                return Err(Error::integrity(format!(
                    "{}: input {} belongs to a different graph",
                    label, i
                )));
            }
            let data = v.data().ok_or_else(|| Error::ContractViolation {
                function: label.to_string(),
                expectation: format!("in_types[{}] is initialized", i),
                actual: "uninitialized".to_string(),
                expected: "a value".to_string(),
            })?;
            arrays.push(data);
        }

        let (type_check, fallback) = {
            let g = self.inner.borrow();
            (g.config.type_check, g.config.default_device)
        };
        if type_check {
            function.check_type_forward(&InTypes::new(label, &arrays))?;
        }

        let dispatch = Dispatch::resolve(label, &arrays, fallback)?;
        let outputs = function.forward(&dispatch, &arrays)?;
        dispatch.synchronize()?;
        dispatch.check_placement(&outputs)?;
        if let Some(expected) = arity {
            if outputs.len() != expected {
                return Err(Error::msg(format!(
                    "{} produced {} outputs, expected {}",
                    label,
                    outputs.len(),
                    expected
                )));
            }
        }

        let rank = inputs.iter().map(|v| v.rank()).max().unwrap_or(0) + 1;
        let output_types: Vec<TypeInfo> = outputs.iter().map(TypeInfo::of).collect();

        let mut g = self.inner.borrow_mut();
        if g.occupied() >= g.collect_threshold {
            g.collect();
        }
        let id = NodeId(g.next_slot());
        let out_vars: Vec<Variable> = outputs
            .into_iter()
            .enumerate()
            .map(|(slot, data)| Variable::new_in(self.downgrade(), Some(data), Some((id, slot)), rank))
            .collect();

        g.nodes[id.0] = NodeSlot::Live(NodeRecord {
            label,
            function,
            dispatch,
            inputs: inputs.iter().map(|v| (*v).clone()).collect(),
            input_arrays: arrays,
            outputs: out_vars.iter().map(Variable::downgrade).collect(),
            output_types,
            rank,
        });
        tracing::debug!(node = id.0, rank, outputs = out_vars.len(), "recorded");
        Ok(out_vars)
    }

    // Differentiation

    /// Back-propagate from `output`, seeding with `seed` (ones by default).
    pub fn backward(&self, output: &Variable, seed: Option<Array>) -> Result<()> {
        backprop::backward(self, output, seed)
    }

    // Introspection

    /// Number of live (not yet consumed) nodes that some Variable can
    /// still reach. Unreachable records are collected first.
    pub fn len(&self) -> usize {
        let mut g = self.inner.borrow_mut();
        g.collect();
        g.nodes
            .iter()
            .filter(|s| matches!(s, NodeSlot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nodes ever recorded.
    pub fn node_count(&self) -> usize {
        self.inner.borrow().created
    }

    /// Number of slots in the node table, live or not.
    pub fn slot_count(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    pub fn node_info(&self, id: NodeId) -> Option<NodeInfo> {
        let g = self.inner.borrow();
        match g.nodes.get(id.0)? {
            NodeSlot::Live(record) => Some(NodeInfo {
                id,
                label: record.label,
                rank: record.rank,
                inputs: record.inputs.iter().map(Variable::id).collect(),
                outputs: record.outputs.len(),
            }),
            NodeSlot::Released { .. } | NodeSlot::Vacant => None,
        }
    }

    /// Release every node, dropping Functions and their cached state.
    /// Existing Variables keep their values and gradients.
    pub fn clear(&self) {
        let mut g = self.inner.borrow_mut();
        for slot in g.nodes.iter_mut() {
            if let NodeSlot::Live(record) = slot {
                *slot = NodeSlot::Released {
                    label: record.label,
                    outputs: record.outputs.clone(),
                };
            }
        }
        g.collect();
    }
}
