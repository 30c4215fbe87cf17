use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};

/// Adjacency of a built graph: for every participating node, its input and
/// output neighbors in the order the edges were declared.
///
/// Built once from a user-supplied edge list; immutable thereafter. Nodes
/// that appear in no edge are not part of the graph.
#[derive(Debug, Clone)]
pub struct Topology {
    edges: Vec<(String, String)>,
    inputs: HashMap<String, Vec<String>>,
    outputs: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl Topology {
    /// Build the adjacency from an edge list.
    ///
    /// Every referenced name must exist in `known_names`. A repeated
    /// `(src, dst)` pair fails with `DuplicateEdge`; an unknown name with
    /// `UnknownNode`; a cycle with `CyclicGraph`.
    pub fn build(known_names: &HashSet<String>, edges: &[(String, String)]) -> Result<Self> {
        if edges.is_empty() {
            return Err(Error::InvalidGraph("graph has no edges".to_string()));
        }

        let mut seen = HashSet::new();
        let mut inputs: HashMap<String, Vec<String>> = HashMap::new();
        let mut outputs: HashMap<String, Vec<String>> = HashMap::new();

        for (src, dst) in edges {
            if !known_names.contains(src) {
                return Err(Error::UnknownNode(src.clone()));
            }
            if !known_names.contains(dst) {
                return Err(Error::UnknownNode(dst.clone()));
            }
            if !seen.insert((src.clone(), dst.clone())) {
                return Err(Error::DuplicateEdge(src.clone(), dst.clone()));
            }
            outputs.entry(src.clone()).or_default().push(dst.clone());
            inputs.entry(dst.clone()).or_default().push(src.clone());
        }

        let order = Self::topological_order(edges, &inputs)?;

        Ok(Self {
            edges: edges.to_vec(),
            inputs,
            outputs,
            order,
        })
    }

    /// Kahn's algorithm over the participating nodes. Fails with
    /// `CyclicGraph` when not every node can be ordered.
    fn topological_order(
        edges: &[(String, String)],
        inputs: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>> {
        let mut participants = Vec::new();
        let mut participant_set = HashSet::new();
        for (src, dst) in edges {
            for name in [src, dst] {
                if participant_set.insert(name.clone()) {
                    participants.push(name.clone());
                }
            }
        }

        let mut in_degree: HashMap<&str, usize> = participants
            .iter()
            .map(|name| {
                let degree = inputs.get(name.as_str()).map_or(0, |v| v.len());
                (name.as_str(), degree)
            })
            .collect();

        let mut queue: VecDeque<&str> = participants
            .iter()
            .filter(|name| in_degree[name.as_str()] == 0)
            .map(|name| name.as_str())
            .collect();

        let mut sorted = Vec::with_capacity(participants.len());
        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());
            for (src, dst) in edges {
                if src == name {
                    let degree = in_degree.entry(dst.as_str()).or_insert(0);
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dst.as_str());
                    }
                }
            }
        }

        if sorted.len() != participants.len() {
            return Err(Error::CyclicGraph);
        }
        Ok(sorted)
    }

    /// Input neighbors of `name` in edge-declaration order. `None` means
    /// the node is the graph input boundary (or not part of the graph).
    pub fn inputs_of(&self, name: &str) -> Option<&[String]> {
        self.inputs.get(name).map(|v| v.as_slice())
    }

    /// Output neighbors of `name` in edge-declaration order. `None` means
    /// the node is the graph output boundary (or not part of the graph).
    pub fn outputs_of(&self, name: &str) -> Option<&[String]> {
        self.outputs.get(name).map(|v| v.as_slice())
    }

    /// The declared edges, in input order.
    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    /// A topological order over the participating nodes.
    pub fn run_order(&self) -> &[String] {
        &self.order
    }

    /// Whether `name` participates in at least one edge.
    pub fn contains(&self, name: &str) -> bool {
        self.inputs.contains_key(name) || self.outputs.contains_key(name)
    }

    /// The unique node with no input neighbors.
    pub fn input_node(&self) -> Result<&str> {
        self.boundary(|name| !self.inputs.contains_key(name), |a, b| {
            Error::MultipleInputs(a, b)
        })
    }

    /// The unique node with no output neighbors.
    pub fn output_node(&self) -> Result<&str> {
        self.boundary(|name| !self.outputs.contains_key(name), |a, b| {
            Error::MultipleOutputs(a, b)
        })
    }

    fn boundary<P, E>(&self, predicate: P, err: E) -> Result<&str>
    where
        P: Fn(&str) -> bool,
        E: Fn(String, String) -> Error,
    {
        let mut found: Option<&str> = None;
        for name in &self.order {
            if predicate(name) {
                if let Some(first) = found {
                    return Err(err(first.to_string(), name.clone()));
                }
                found = Some(name);
            }
        }
        found.ok_or(Error::CyclicGraph)
    }
}
