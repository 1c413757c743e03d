// Backpropagation: reverse-mode traversal of the node table
//
// HOW IT WORKS:
//
//   1. Collect every node reachable backward from the seeded output and, for
//      each one, count the consumer edges inside that reachable set that
//      read one of its outputs.
//
//   2. Keep a max-heap of ready nodes ordered by (rank, id). A node is ready
//      when its edge count reaches zero, i.e. every downstream consumer has
//      already delivered its share of gradient.
//
//   3. Pop a node, gather the gradients of its outputs, run its backward
//      once, and sum each returned input gradient into the traversal map
//      (and into the input Variable's `grad`). Then release the node and
//      decrement the counts of the input producers.
//
// ACCUMULATION: a Variable consumed by several nodes receives the SUM of
// their contributions (multivariate chain rule), so x * x yields 2x.
//
// MULTI-OUTPUT NODES: outputs that got no gradient are passed to backward
// as zeros. If none of a node's outputs got a gradient, its backward is not
// called and the node stays live; its inputs keep an absent gradient.

use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::array::Array;
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::variable::Variable;

/// Running sums of output gradients, keyed by (node, output slot).
#[derive(Default)]
struct GradTable {
    grads: HashMap<(NodeId, usize), Array>,
}

impl GradTable {
    fn accumulate(&mut self, key: (NodeId, usize), grad: Array) -> Result<()> {
        let next = match self.grads.remove(&key) {
            Some(existing) => existing.add(&grad)?,
            None => grad,
        };
        self.grads.insert(key, next);
        Ok(())
    }

    fn take(&mut self, key: (NodeId, usize)) -> Option<Array> {
        self.grads.remove(&key)
    }
}

pub(crate) fn backward(graph: &Graph, output: &Variable, seed: Option<Array>) -> Result<()> {
    if !output.belongs_to(graph) {
        return Err(Error::integrity(
            "backward: output Variable belongs to a different graph",
        ));
    }
    let Some((start, start_slot)) = output.creator_slot() else {
        tracing::debug!(variable = ?output.id(), "backward on a leaf: nothing to propagate");
        return Ok(());
    };

    let value = output.array()?;
    let seed = match seed {
        Some(seed) => {
            check_seed(&value, &seed)?;
            seed
        }
        None => Array::ones_like(&value)?,
    };

    let retain_grad = graph.config().retain_grad;
    let pending = count_dependencies(graph, start)?;
    let _span = tracing::debug_span!("backward", start = start.0, nodes = pending.len() + 1).entered();

    output.set_grad(Some(seed.clone()))?;
    let mut table = GradTable::default();
    table.accumulate((start, start_slot), seed)?;

    let mut pending = pending;
    let mut ready = BinaryHeap::new();
    ready.push((output.rank(), start));

    while let Some((rank, id)) = ready.pop() {
        let (n_outputs, inputs) = {
            let g = graph.inner.borrow();
            let record = g.live(id)?;
            (record.output_types.len(), record.inputs.clone())
        };

        let received: Vec<Option<Array>> = (0..n_outputs).map(|k| table.take((id, k))).collect();
        if received.iter().any(Option::is_some) {
            run_node(graph, id, rank, received, &inputs, &mut table, retain_grad)?;
        } else {
            tracing::trace!(node = id.0, "no gradient reached node, skipping");
        }

        for input in &inputs {
            if let Some((producer, _)) = input.creator_slot() {
                if let Some(count) = pending.get_mut(&producer) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push((input.rank(), producer));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Invoke one node's backward and route its input gradients.
fn run_node(
    graph: &Graph,
    id: NodeId,
    rank: usize,
    received: Vec<Option<Array>>,
    inputs: &[Variable],
    table: &mut GradTable,
    retain_grad: bool,
) -> Result<()> {
    let mut record = graph.inner.borrow_mut().release(id)?;
    let _span = tracing::debug_span!("backward_node", function = record.label, node = id.0, rank)
        .entered();

    let grad_outputs = received
        .into_iter()
        .zip(&record.output_types)
        .map(|(g, t)| match g {
            Some(g) => Ok(g),
            None => Array::zeros(t.shape.clone(), t.dtype, t.device),
        })
        .collect::<Result<Vec<_>>>()?;
    let input_grads = record
        .function
        .backward(&record.dispatch, &record.input_arrays, &grad_outputs)?;
    record.dispatch.synchronize()?;

    if input_grads.len() != inputs.len() {
        return Err(Error::integrity(format!(
            "{} returned {} input gradients for {} inputs",
            record.label,
            input_grads.len(),
            inputs.len()
        )));
    }

    for (i, (input, grad)) in inputs.iter().zip(input_grads).enumerate() {
        let Some(grad) = grad else { continue };
        check_input_grad(record.label, i, &record.input_arrays[i], &grad)?;
        record.dispatch.check_placement([&grad])?;
        match input.creator_slot() {
            Some(key) => {
                if retain_grad {
                    input.accumulate_grad(&grad)?;
                }
                table.accumulate(key, grad)?;
            }
            None => input.accumulate_grad(&grad)?,
        }
    }
    // Dropping `record` frees the Function together with its cached state.
    Ok(())
}

/// Count, for every reachable producer, the consumer edges that read it.
fn count_dependencies(graph: &Graph, start: NodeId) -> Result<HashMap<NodeId, usize>> {
    let g = graph.inner.borrow();
    let mut pending: HashMap<NodeId, usize> = HashMap::new();
    let mut visited = HashSet::from([start]);
    let mut stack = vec![start];

    while let Some(id) = stack.pop() {
        for input in &g.live(id)?.inputs {
            if let Some((producer, _)) = input.creator_slot() {
                *pending.entry(producer).or_insert(0) += 1;
                if visited.insert(producer) {
                    stack.push(producer);
                }
            }
        }
    }
    Ok(pending)
}

fn check_seed(value: &Array, seed: &Array) -> Result<()> {
    if seed.shape() != value.shape() || seed.dtype() != value.dtype() {
        return Err(Error::ContractViolation {
            function: "backward".to_string(),
            expectation: "seed matches output".to_string(),
            actual: format!("{} {}", seed.shape(), seed.dtype()),
            expected: format!("{} {}", value.shape(), value.dtype()),
        });
    }
    if seed.device() != value.device() {
        return Err(Error::BackendMismatch {
            function: "backward".to_string(),
            expected: value.device(),
            got: seed.device(),
        });
    }
    Ok(())
}

fn check_input_grad(label: &str, index: usize, input: &Array, grad: &Array) -> Result<()> {
    if grad.shape() != input.shape() || grad.dtype() != input.dtype() {
        return Err(Error::ContractViolation {
            function: label.to_string(),
            expectation: format!("grad_inputs[{}] matches in_types[{}]", index, index),
            actual: format!("{} {}", grad.shape(), grad.dtype()),
            expected: format!("{} {}", input.shape(), input.dtype()),
        });
    }
    Ok(())
}
