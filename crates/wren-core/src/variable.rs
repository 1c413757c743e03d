use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::array::Array;
use crate::error::{Error, Result};
use crate::graph::{Graph, GraphInner, NodeId};
use crate::shape::Shape;

/// Unique identifier for a Variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) u64);

impl Default for VariableId {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableId {
    /// Generate a new unique id (global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        VariableId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct VariableInner {
    pub(crate) id: VariableId,
    pub(crate) data: Option<Array>,
    pub(crate) grad: Option<Array>,
    /// Creator node and the output slot this Variable occupies. None for leaves.
    pub(crate) creator: Option<(NodeId, usize)>,
    pub(crate) rank: usize,
    pub(crate) graph: Weak<RefCell<GraphInner>>,
    pub(crate) name: Option<String>,
}

/// A node of the computation graph: a value, an optional accumulated
/// gradient, and a back-reference to the node that produced it.
///
/// Cloning a Variable clones the handle, not the value. The gradient is
/// absent until a backward traversal reaches the Variable; absence means
/// "no path from the seed", which is different from a zero gradient.
#[derive(Clone)]
pub struct Variable {
    pub(crate) inner: Rc<RefCell<VariableInner>>,
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v = self.inner.borrow();
        let shape = v.data.as_ref().map(|d| d.shape().to_string());
        write!(
            f,
            "Variable(id={:?}, shape={}, creator={:?}, grad={})",
            v.id,
            shape.as_deref().unwrap_or("uninitialized"),
            v.creator.map(|(id, _)| id),
            v.grad.is_some(),
        )
    }
}

impl Variable {
    pub(crate) fn new_in(
        graph: Weak<RefCell<GraphInner>>,
        data: Option<Array>,
        creator: Option<(NodeId, usize)>,
        rank: usize,
    ) -> Self {
        Variable {
            inner: Rc::new(RefCell::new(VariableInner {
                id: VariableId::new(),
                data,
                grad: None,
                creator,
                rank,
                graph,
                name: None,
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<VariableInner>> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn belongs_to(&self, graph: &Graph) -> bool {
        self.inner.borrow().graph.ptr_eq(&graph.downgrade())
    }

    pub(crate) fn creator_slot(&self) -> Option<(NodeId, usize)> {
        self.inner.borrow().creator
    }

    // Identity and structure

    pub fn id(&self) -> VariableId {
        self.inner.borrow().id
    }

    /// The node that produced this Variable, or None for a leaf.
    pub fn creator(&self) -> Option<NodeId> {
        self.creator_slot().map(|(id, _)| id)
    }

    pub fn is_leaf(&self) -> bool {
        self.creator_slot().is_none()
    }

    /// Topological rank: 0 for leaves, 1 + the largest input rank otherwise.
    pub fn rank(&self) -> usize {
        self.inner.borrow().rank
    }

    /// The graph this Variable was recorded in, if it is still alive.
    pub fn graph(&self) -> Option<Graph> {
        self.inner.borrow().graph.upgrade().map(Graph::from_inner)
    }

    pub fn name(&self) -> Option<String> {
        self.inner.borrow().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.borrow_mut().name = Some(name.into());
    }

    /// Whether two handles refer to the same Variable.
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // Value

    pub fn data(&self) -> Option<Array> {
        self.inner.borrow().data.clone()
    }

    /// The value, or an error if the Variable was never bound.
    pub fn array(&self) -> Result<Array> {
        self.data()
            .ok_or_else(|| Error::msg(format!("{:?} has no value", self.id())))
    }

    pub fn shape(&self) -> Option<Shape> {
        self.inner.borrow().data.as_ref().map(|d| d.shape().clone())
    }

    /// Replace the value. Used to reset or seed leaves between steps.
    ///
    /// A gradient that no longer matches the new shape or dtype is dropped.
    /// Nodes already recorded keep the value they saw in forward.
    pub fn set_data(&self, data: Array) {
        let mut v = self.inner.borrow_mut();
        let stale = v
            .grad
            .as_ref()
            .is_some_and(|g| g.shape() != data.shape() || g.dtype() != data.dtype());
        if stale {
            tracing::debug!(variable = ?v.id, shape = %data.shape(), "set_data dropped a stale gradient");
            v.grad = None;
        }
        v.data = Some(data);
    }

    // Gradient

    pub fn grad(&self) -> Option<Array> {
        self.inner.borrow().grad.clone()
    }

    /// Overwrite the gradient. It must match the value's shape and dtype.
    pub fn set_grad(&self, grad: Option<Array>) -> Result<()> {
        if let Some(g) = &grad {
            self.check_grad(g)?;
        }
        self.inner.borrow_mut().grad = grad;
        Ok(())
    }

    /// Drop the accumulated gradient (back to "absent").
    pub fn cleargrad(&self) {
        self.inner.borrow_mut().grad = None;
    }

    /// Sum `grad` into the accumulated gradient.
    pub(crate) fn accumulate_grad(&self, grad: &Array) -> Result<()> {
        let mut v = self.inner.borrow_mut();
        let next = match v.grad.take() {
            Some(existing) => existing.add(grad)?,
            None => grad.clone(),
        };
        v.grad = Some(next);
        Ok(())
    }

    pub(crate) fn check_grad(&self, grad: &Array) -> Result<()> {
        let v = self.inner.borrow();
        if let Some(data) = &v.data {
            if data.shape() != grad.shape() {
                return Err(Error::ShapeMismatch {
                    expected: data.shape().clone(),
                    got: grad.shape().clone(),
                });
            }
            if data.dtype() != grad.dtype() {
                return Err(Error::DTypeMismatch {
                    expected: data.dtype(),
                    got: grad.dtype(),
                });
            }
        }
        Ok(())
    }

    /// Back-propagate from this Variable with a ones seed.
    ///
    /// A leaf has nothing to propagate and the call is a no-op.
    pub fn backward(&self) -> Result<()> {
        match self.graph() {
            Some(graph) => graph.backward(self, None),
            None if self.is_leaf() => Ok(()),
            None => Err(Error::integrity(
                "the graph that recorded this Variable has been dropped",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Device};

    #[test]
    fn leaf_starts_without_grad() {
        let g = Graph::new();
        let x = g.variable(Array::ones(3, DType::F32, Device::Host).unwrap());
        assert!(x.is_leaf());
        assert_eq!(x.rank(), 0);
        assert!(x.grad().is_none());
        assert!(x.graph().unwrap().ptr_eq(&g));
    }

    #[test]
    fn set_grad_checks_shape() {
        let g = Graph::new();
        let x = g.variable(Array::ones(3, DType::F32, Device::Host).unwrap());
        let bad = Array::ones(4, DType::F32, Device::Host).unwrap();
        assert!(x.set_grad(Some(bad)).is_err());
        let good = Array::ones(3, DType::F32, Device::Host).unwrap();
        x.set_grad(Some(good)).unwrap();
        assert!(x.grad().is_some());
        x.cleargrad();
        assert!(x.grad().is_none());
    }

    #[test]
    fn uninit_variable_binds_later() {
        let g = Graph::new();
        let x = g.uninit_variable();
        assert!(x.data().is_none());
        assert!(x.array().is_err());
        x.set_data(Array::zeros((2, 2), DType::F64, Device::Host).unwrap());
        assert_eq!(x.shape().unwrap().dims(), &[2, 2]);
    }

    #[test]
    fn set_data_drops_gradient_of_another_shape() {
        let g = Graph::new();
        let x = g.variable(Array::ones(2, DType::F64, Device::Host).unwrap());
        x.set_grad(Some(Array::ones(2, DType::F64, Device::Host).unwrap()))
            .unwrap();

        // Same shape and dtype: the gradient survives.
        x.set_data(Array::zeros(2, DType::F64, Device::Host).unwrap());
        assert!(x.grad().is_some());

        x.set_data(Array::ones(3, DType::F64, Device::Host).unwrap());
        assert_eq!(x.shape().unwrap().dims(), &[3]);
        assert!(x.grad().is_none());

        x.set_grad(Some(Array::ones(3, DType::F64, Device::Host).unwrap()))
            .unwrap();
        x.set_data(Array::ones(3, DType::F32, Device::Host).unwrap());
        assert!(x.grad().is_none());
    }

    #[test]
    fn ids_are_unique() {
        let g = Graph::new();
        let a = g.uninit_variable();
        let b = g.uninit_variable();
        assert_ne!(a.id(), b.id());
        assert!(a.clone().ptr_eq(&a));
    }
}
