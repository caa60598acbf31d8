//! Generic A* search over any graph
//!
//! The node arena persists across solves and is bounded: states touched by
//! earlier searches keep their slots until `reset`, so a long-running
//! pather can run out of room. The caller decides how to recover.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::hash::Hash;

use ahash::AHashMap;
use ordered_float::OrderedFloat;

/// A neighbor reachable from a state, with the cost of the edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateCost<S> {
    pub state: S,
    pub cost: f32,
}

/// A graph the pather can search
pub trait Graph {
    type State: Copy + Eq + Hash;

    /// Admissible estimate of the cost from `from` to `to`
    fn least_cost_estimate(&mut self, from: Self::State, to: Self::State) -> f32;

    /// Append every neighbor of `state` to `adjacent`
    fn adjacent_cost(&mut self, state: Self::State, adjacent: &mut Vec<StateCost<Self::State>>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolveResult<S> {
    Solved { path: Vec<S>, cost: f32 },
    NoSolution,
    StartEndSame,
    OutOfMemory,
}

impl<S> SolveResult<S> {
    pub fn is_solved(&self) -> bool {
        matches!(self, SolveResult::Solved { .. })
    }
}

#[derive(Debug, Clone)]
struct Node<S> {
    state: S,
    parent: Option<usize>,
    cost_from_start: f32,
    frame: u32,
    closed: bool,
}

/// Entry in the open set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenEntry {
    total: OrderedFloat<f32>,
    node: usize,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .total
            .cmp(&self.total)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct Pather<S> {
    capacity: usize,
    index: AHashMap<S, usize>,
    nodes: Vec<Node<S>>,
    frame: u32,
    open: BinaryHeap<OpenEntry>,
    adjacent: Vec<StateCost<S>>,
}

impl<S: Copy + Eq + Hash> Pather<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            index: AHashMap::new(),
            nodes: Vec::new(),
            frame: 0,
            open: BinaryHeap::new(),
            adjacent: Vec::new(),
        }
    }

    /// Release every node in the arena
    pub fn reset(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.open.clear();
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Slot for a state in the current frame, allocating if needed
    fn node_for(&mut self, state: S) -> Option<usize> {
        if let Some(&i) = self.index.get(&state) {
            let node = &mut self.nodes[i];
            if node.frame != self.frame {
                node.parent = None;
                node.cost_from_start = f32::INFINITY;
                node.frame = self.frame;
                node.closed = false;
            }
            return Some(i);
        }
        if self.nodes.len() >= self.capacity {
            return None;
        }
        let i = self.nodes.len();
        self.nodes.push(Node {
            state,
            parent: None,
            cost_from_start: f32::INFINITY,
            frame: self.frame,
            closed: false,
        });
        self.index.insert(state, i);
        Some(i)
    }

    fn reconstruct(&self, mut current: usize) -> Vec<S> {
        let mut path = vec![self.nodes[current].state];
        while let Some(parent) = self.nodes[current].parent {
            path.push(self.nodes[parent].state);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Find the cheapest path from `start` to `end`, inclusive of both
    pub fn solve<G: Graph<State = S>>(&mut self, graph: &mut G, start: S, end: S) -> SolveResult<S> {
        if start == end {
            return SolveResult::StartEndSame;
        }

        self.frame = self.frame.wrapping_add(1);
        self.open.clear();

        let Some(start_node) = self.node_for(start) else {
            return SolveResult::OutOfMemory;
        };
        self.nodes[start_node].cost_from_start = 0.0;
        self.open.push(OpenEntry {
            total: OrderedFloat(graph.least_cost_estimate(start, end)),
            node: start_node,
        });

        let mut adjacent = std::mem::take(&mut self.adjacent);
        let result = self.search(graph, end, &mut adjacent);
        self.adjacent = adjacent;
        result
    }

    fn search<G: Graph<State = S>>(
        &mut self,
        graph: &mut G,
        end: S,
        adjacent: &mut Vec<StateCost<S>>,
    ) -> SolveResult<S> {
        while let Some(entry) = self.open.pop() {
            let current = entry.node;
            if self.nodes[current].closed {
                continue;
            }
            self.nodes[current].closed = true;

            let state = self.nodes[current].state;
            let cost_so_far = self.nodes[current].cost_from_start;
            if state == end {
                return SolveResult::Solved {
                    path: self.reconstruct(current),
                    cost: cost_so_far,
                };
            }

            adjacent.clear();
            graph.adjacent_cost(state, adjacent);
            for edge in adjacent.iter() {
                let Some(next) = self.node_for(edge.state) else {
                    return SolveResult::OutOfMemory;
                };
                if self.nodes[next].closed {
                    continue;
                }
                let tentative = cost_so_far + edge.cost;
                if tentative < self.nodes[next].cost_from_start {
                    self.nodes[next].cost_from_start = tentative;
                    self.nodes[next].parent = Some(current);
                    self.open.push(OpenEntry {
                        total: OrderedFloat(tentative + graph.least_cost_estimate(edge.state, end)),
                        node: next,
                    });
                }
            }
        }

        SolveResult::NoSolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Integers on a line; each connects to its successor
    struct LineGraph {
        len: i32,
    }

    impl Graph for LineGraph {
        type State = i32;

        fn least_cost_estimate(&mut self, from: i32, to: i32) -> f32 {
            (to - from).abs() as f32
        }

        fn adjacent_cost(&mut self, state: i32, adjacent: &mut Vec<StateCost<i32>>) {
            for next in [state - 1, state + 1] {
                if (0..self.len).contains(&next) {
                    adjacent.push(StateCost {
                        state: next,
                        cost: 1.0,
                    });
                }
            }
        }
    }

    #[test]
    fn test_solve_line() {
        let mut pather = Pather::new(64);
        let result = pather.solve(&mut LineGraph { len: 10 }, 2, 6);
        assert_eq!(
            result,
            SolveResult::Solved {
                path: vec![2, 3, 4, 5, 6],
                cost: 4.0
            }
        );
    }

    #[test]
    fn test_start_end_same() {
        let mut pather = Pather::new(64);
        assert_eq!(
            pather.solve(&mut LineGraph { len: 10 }, 3, 3),
            SolveResult::StartEndSame
        );
    }

    #[test]
    fn test_unreachable() {
        let mut pather = Pather::new(64);
        assert_eq!(
            pather.solve(&mut LineGraph { len: 5 }, 0, 8),
            SolveResult::NoSolution
        );
    }

    #[test]
    fn test_arena_fills_across_solves() {
        let mut graph = LineGraph { len: 100 };
        let mut pather = Pather::new(12);
        assert!(pather.solve(&mut graph, 0, 5).is_solved());
        assert_eq!(pather.solve(&mut graph, 50, 58), SolveResult::OutOfMemory);

        pather.reset();
        assert!(pather.solve(&mut graph, 50, 58).is_solved());
    }
}
