//! Dependency graph between programs and the modules (copybooks) they include
//!
//! Built once per run from the loaded unit set:
//! - Forward index: unit → units it references (extraction order, no duplicates)
//! - Reverse index: unit → units referencing it, derived from the forward index
//! - Full edge log with line numbers, unresolved targets and derived metrics
//!
//! Both indexes keep insertion order so metrics, tie-breaks and the JSON form
//! are reproducible.

use crate::reference::{self, ReferenceKind};
use crate::source::{unit_stem, SourceUnit};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Insertion-ordered map of unit → ordered set of units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacency {
    keys: Vec<String>,
    sets: HashMap<String, Vec<String>>,
}

impl Adjacency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `to` to the set of `from`; returns false if it was already there
    pub fn insert(&mut self, from: &str, to: &str) -> bool {
        match self.sets.get_mut(from) {
            Some(set) => {
                if set.iter().any(|existing| existing == to) {
                    return false;
                }
                set.push(to.to_string());
            }
            None => {
                self.keys.push(from.to_string());
                self.sets.insert(from.to_string(), vec![to.to_string()]);
            }
        }
        true
    }

    /// Targets of `key` (empty if the key is absent)
    pub fn get(&self, key: &str) -> &[String] {
        self.sets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.sets.contains_key(key)
    }

    pub fn contains(&self, from: &str, to: &str) -> bool {
        self.get(from).iter().any(|t| t == to)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// `(key, targets)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.keys.iter().map(move |k| (k.as_str(), self.get(k)))
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sum of all set sizes
    pub fn edge_count(&self) -> usize {
        self.sets.values().map(Vec::len).sum()
    }

    /// Swap direction of every pair, walking keys and targets in order
    pub fn inverted(&self) -> Adjacency {
        let mut inverted = Adjacency::new();
        for (from, targets) in self.iter() {
            for to in targets {
                inverted.insert(to, from);
            }
        }
        inverted
    }
}

impl Serialize for Adjacency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.keys.len()))?;
        for (key, targets) in self.iter() {
            map.serialize_entry(key, targets)?;
        }
        map.end()
    }
}

/// One raw reference occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceEdge {
    pub source: String,
    pub target: String,
    pub kind: ReferenceKind,
    pub line: usize,
    pub context: String,
}

/// Metrics derived from the indexes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphMetrics {
    /// Top-level (non-module) units in the input
    pub program_count: usize,
    /// Distinct referenced units (keys of the reverse index)
    pub module_count: usize,
    /// Distinct edges over the whole forward index
    pub total_edges: usize,
    /// Raw occurrences, repeated references included
    pub raw_reference_count: usize,
    /// Distinct edges of top-level units / number of top-level units
    pub average_fan_out: f64,
    pub most_referenced_module: Option<String>,
    pub max_fan_in: usize,
    pub unresolved_count: usize,
    /// Each cycle starts at its lexicographically smallest unit
    pub cycles: Vec<Vec<String>>,
}

/// Bipartite program ↔ module graph plus the insight text added in stage 1
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    forward: Adjacency,
    reverse: Adjacency,
    edges: Vec<ReferenceEdge>,
    unresolved: Vec<String>,
    metrics: GraphMetrics,
    insight: String,
    #[serde(skip)]
    programs: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph from a unit set; never fails.
    pub fn build(units: &[SourceUnit]) -> Self {
        let index = UnitIndex::new(units);
        let mut forward = Adjacency::new();
        let mut edges = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();
        // Unresolved ids match case-insensitively; the first spelling wins
        let mut unresolved_spelling: HashMap<String, String> = HashMap::new();
        let mut raw_reference_count = 0;

        for unit in units {
            let scan = reference::scan(&unit.content);
            raw_reference_count += scan.occurrences.len();

            for occurrence in scan.occurrences {
                let (mut target, resolved) = index.resolve(&occurrence.name, occurrence.kind);
                if !resolved {
                    match unresolved_spelling.entry(target.to_lowercase()) {
                        Entry::Occupied(first) => target = first.get().clone(),
                        Entry::Vacant(slot) => {
                            slot.insert(target.clone());
                            unresolved.push(target.clone());
                        }
                    }
                }
                forward.insert(&unit.name, &target);
                edges.push(ReferenceEdge {
                    source: unit.name.clone(),
                    target,
                    kind: occurrence.kind,
                    line: occurrence.line,
                    context: occurrence.context,
                });
            }
        }

        let reverse = forward.inverted();
        let programs: Vec<String> = units
            .iter()
            .filter(|u| u.is_program())
            .map(|u| u.name.clone())
            .collect();

        let metrics = compute_metrics(&forward, &reverse, &programs, &unresolved, raw_reference_count);

        info!(
            "Dependency graph: {} programs, {} referenced units, {} edges, {} unresolved, {} cycles",
            metrics.program_count,
            metrics.module_count,
            metrics.total_edges,
            metrics.unresolved_count,
            metrics.cycles.len()
        );

        Self {
            forward,
            reverse,
            edges,
            unresolved,
            metrics,
            insight: String::new(),
            programs,
        }
    }

    pub fn forward(&self) -> &Adjacency {
        &self.forward
    }

    pub fn reverse(&self) -> &Adjacency {
        &self.reverse
    }

    pub fn edges(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    pub fn metrics(&self) -> &GraphMetrics {
        &self.metrics
    }

    /// Referenced ids that are not part of the input unit set
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    pub fn is_unresolved(&self, unit: &str) -> bool {
        self.unresolved.iter().any(|u| u == unit)
    }

    /// Top-level units, input order
    pub fn programs(&self) -> &[String] {
        &self.programs
    }

    pub fn references_of(&self, unit: &str) -> &[String] {
        self.forward.get(unit)
    }

    pub fn referenced_by(&self, unit: &str) -> &[String] {
        self.reverse.get(unit)
    }

    pub fn fan_out(&self, unit: &str) -> usize {
        self.forward.get(unit).len()
    }

    pub fn fan_in(&self, unit: &str) -> usize {
        self.reverse.get(unit).len()
    }

    pub fn insight(&self) -> &str {
        &self.insight
    }

    pub fn set_insight(&mut self, insight: impl Into<String>) {
        self.insight = insight.into();
    }

    /// Plain-text digest used as the dependency-insight prompt body
    pub fn summary(&self) -> String {
        let m = &self.metrics;
        let mut out = format!(
            "Programs: {}\nReferenced units: {}\nDistinct edges: {}\nAverage fan-out: {:.2}\n",
            m.program_count, m.module_count, m.total_edges, m.average_fan_out
        );

        if let Some(module) = &m.most_referenced_module {
            out.push_str(&format!(
                "Most referenced: {} (used by {} units)\n",
                module, m.max_fan_in
            ));
        }
        if !self.unresolved.is_empty() {
            out.push_str(&format!("Unresolved: {}\n", self.unresolved.join(", ")));
        }
        if !m.cycles.is_empty() {
            out.push_str("Cycles:\n");
            for cycle in &m.cycles {
                out.push_str(&format!("- {} -> {}\n", cycle.join(" -> "), cycle[0]));
            }
        }

        out.push_str("Dependencies:\n");
        for (unit, targets) in self.forward.iter() {
            out.push_str(&format!("- {} -> {}\n", unit, targets.join(", ")));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Lookup of input units by exact id, case-insensitive id and stem
struct UnitIndex<'a> {
    exact: HashSet<&'a str>,
    by_lower: HashMap<String, &'a str>,
    by_stem: HashMap<String, Vec<&'a SourceUnit>>,
}

impl<'a> UnitIndex<'a> {
    fn new(units: &'a [SourceUnit]) -> Self {
        let mut exact = HashSet::new();
        let mut by_lower = HashMap::new();
        let mut by_stem: HashMap<String, Vec<&'a SourceUnit>> = HashMap::new();

        for unit in units {
            exact.insert(unit.name.as_str());
            by_lower
                .entry(unit.name.to_lowercase())
                .or_insert(unit.name.as_str());
            by_stem
                .entry(unit.stem().to_lowercase())
                .or_default()
                .push(unit);
        }

        Self {
            exact,
            by_lower,
            by_stem,
        }
    }

    /// Map a canonical reference to an input unit id.
    ///
    /// Returns the name unchanged and `false` when nothing matches.
    fn resolve(&self, name: &str, kind: ReferenceKind) -> (String, bool) {
        if self.exact.contains(name) {
            return (name.to_string(), true);
        }
        if let Some(unit) = self.by_lower.get(&name.to_lowercase()) {
            return (unit.to_string(), true);
        }
        if let Some(candidates) = self.by_stem.get(&unit_stem(name).to_lowercase()) {
            let wants_module = kind != ReferenceKind::Call;
            let unit = candidates
                .iter()
                .find(|u| u.is_module == wants_module)
                .or_else(|| candidates.first());
            if let Some(unit) = unit {
                debug!("Resolved {} to {} by stem", name, unit.name);
                return (unit.name.clone(), true);
            }
        }
        (name.to_string(), false)
    }
}

fn compute_metrics(
    forward: &Adjacency,
    reverse: &Adjacency,
    programs: &[String],
    unresolved: &[String],
    raw_reference_count: usize,
) -> GraphMetrics {
    let program_edges: usize = programs.iter().map(|p| forward.get(p).len()).sum();
    let average_fan_out = if programs.is_empty() {
        0.0
    } else {
        program_edges as f64 / programs.len() as f64
    };

    // Strictly greater keeps the first key on ties
    let mut most_referenced: Option<(&str, usize)> = None;
    for (unit, referrers) in reverse.iter() {
        if most_referenced.map_or(true, |(_, best)| referrers.len() > best) {
            most_referenced = Some((unit, referrers.len()));
        }
    }

    GraphMetrics {
        program_count: programs.len(),
        module_count: reverse.len(),
        total_edges: forward.edge_count(),
        raw_reference_count,
        average_fan_out,
        most_referenced_module: most_referenced.map(|(unit, _)| unit.to_string()),
        max_fan_in: most_referenced.map_or(0, |(_, n)| n),
        unresolved_count: unresolved.len(),
        cycles: detect_cycles(forward),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Back-edge DFS over the whole forward index.
///
/// Every back edge closes the cycle formed by the stack slice above its
/// target. Cycles are rotated to start at their smallest id and reported once
/// however many roots reach them.
pub fn detect_cycles(forward: &Adjacency) -> Vec<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut cycles = Vec::new();

    for root in forward.keys() {
        if marks.contains_key(root) {
            continue;
        }

        marks.insert(root, Mark::OnStack);
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

        while let Some(&(node, next_idx)) = stack.last() {
            let targets = forward.get(node);
            if next_idx >= targets.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let next = targets[next_idx].as_str();
            match marks.get(next) {
                None => {
                    marks.insert(next, Mark::OnStack);
                    stack.push((next, 0));
                }
                Some(Mark::OnStack) => {
                    if let Some(pos) = stack.iter().position(|(n, _)| *n == next) {
                        let mut cycle: Vec<String> =
                            stack[pos..].iter().map(|(n, _)| n.to_string()).collect();
                        canonicalize_cycle(&mut cycle);
                        if seen.insert(cycle.clone()) {
                            cycles.push(cycle);
                        }
                    }
                }
                Some(Mark::Done) => {}
            }
        }
    }

    cycles
}

fn canonicalize_cycle(cycle: &mut [String]) {
    if let Some(min_idx) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min_idx);
    }
}
