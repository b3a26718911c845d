//! Topological iterators.
//!
//! [`TopoIter`] yields every node of a [`HierView`] once, in an order where
//! each node comes after everything it depends on: its drivers for a
//! forward walk, its sinks for a backward walk. Exempt nodes (pipelined
//! cells and graph boundaries) are yielded but never act as dependencies,
//! which is what cuts the loops through registers.
//!
//! The walk is a post-order depth-first search on an explicit stack of
//! enter/exit frames, seeded lazily from [`HierView::fast`], so deep
//! netlists never touch the call stack and iteration can stop early.

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::error::OrderViolation;
use crate::graph::Graph;
use crate::id::HierNode;
use crate::traverse::{HierView, Neighbours};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Enter(HierNode),
    Exit(HierNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// Lazy topological walk over a view.
pub struct TopoIter<'a> {
    view: HierView<'a>,
    direction: Direction,
    seeds: Box<dyn Iterator<Item = HierNode> + 'a>,
    stack: Vec<Frame>,
    marks: HashMap<HierNode, Mark>,
}

impl<'a> TopoIter<'a> {
    fn new(view: HierView<'a>, direction: Direction) -> Self {
        let seeds = Box::new(view.fast());
        TopoIter {
            view,
            direction,
            seeds,
            stack: Vec::new(),
            marks: HashMap::new(),
        }
    }

    fn dependencies(&self, node: HierNode) -> Neighbours {
        match self.direction {
            Direction::Forward => self.view.drivers(node),
            Direction::Backward => self.view.sinks(node),
        }
    }

    fn enter(&mut self, node: HierNode) {
        self.marks.insert(node, Mark::OnPath);
        self.stack.push(Frame::Exit(node));
        if self.view.is_exempt(node) {
            return;
        }
        for dep in self.dependencies(node) {
            if self.view.is_exempt(dep) {
                continue;
            }
            match self.marks.get(&dep) {
                Some(Mark::Done) => {}
                Some(Mark::OnPath) => self.report_loop(node, dep),
                None => self.stack.push(Frame::Enter(dep)),
            }
        }
    }

    fn report_loop(&self, node: HierNode, dep: HierNode) {
        warn!(
            node = %self.view.debug_name(node),
            dependency = %self.view.debug_name(dep),
            "combinational loop, dependency skipped"
        );
    }
}

impl Iterator for TopoIter<'_> {
    type Item = HierNode;

    fn next(&mut self) -> Option<HierNode> {
        loop {
            let frame = match self.stack.pop() {
                Some(frame) => frame,
                None => Frame::Enter(self.seeds.next()?),
            };
            match frame {
                Frame::Enter(node) => match self.marks.get(&node) {
                    None => self.enter(node),
                    Some(Mark::Done) => {}
                    // Queued before a path looping back to it was entered.
                    Some(Mark::OnPath) => {
                        warn!(node = %self.view.debug_name(node), "combinational loop, dependency skipped");
                    }
                },
                Frame::Exit(node) => {
                    self.marks.insert(node, Mark::Done);
                    trace!(node = %node, "topo emit");
                    return Some(node);
                }
            }
        }
    }
}

impl<'a> HierView<'a> {
    /// Every node after all of its drivers.
    pub fn forward(&self) -> TopoIter<'a> {
        TopoIter::new(self.clone(), Direction::Forward)
    }

    /// Every node after all of its sinks.
    pub fn backward(&self) -> TopoIter<'a> {
        TopoIter::new(self.clone(), Direction::Backward)
    }
}

impl Graph {
    /// Forward order of this graph alone; instances are opaque.
    pub fn forward(&self) -> TopoIter<'_> {
        HierView::flat(self).forward()
    }

    /// Backward order of this graph alone; instances are opaque.
    pub fn backward(&self) -> TopoIter<'_> {
        HierView::flat(self).backward()
    }
}

fn positions(order: &[HierNode]) -> HashMap<HierNode, usize> {
    order.iter().enumerate().map(|(i, node)| (*node, i)).collect()
}

/// Checks that every non-exempt node of `order` comes after its drivers.
/// Drivers missing from `order` are not checked.
pub fn validate_forward(view: &HierView<'_>, order: &[HierNode]) -> Result<(), OrderViolation> {
    let pos = positions(order);
    for (i, &sink) in order.iter().enumerate() {
        if view.is_exempt(sink) {
            continue;
        }
        for driver in view.drivers(sink) {
            if view.is_exempt(driver) {
                continue;
            }
            if pos.get(&driver).is_some_and(|&j| j > i) {
                return Err(OrderViolation { driver, sink });
            }
        }
    }
    Ok(())
}

/// Checks that every non-exempt node of `order` comes after its sinks.
pub fn validate_backward(view: &HierView<'_>, order: &[HierNode]) -> Result<(), OrderViolation> {
    let pos = positions(order);
    for (i, &driver) in order.iter().enumerate() {
        if view.is_exempt(driver) {
            continue;
        }
        for sink in view.sinks(driver) {
            if view.is_exempt(sink) {
                continue;
            }
            if pos.get(&sink).is_some_and(|&j| j > i) {
                return Err(OrderViolation { driver, sink });
            }
        }
    }
    Ok(())
}
