//! Directed signal-flow graph of one net's wiring.
//!
//! Nodes are the net's design pins, component pins and wire paths, each with
//! its shapes materialized in the design frame. Edges are discovered by a
//! breadth-first walk from the driver and annotated with the via instances
//! that made the contact and the metal layer where it happened.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt::Write;

use indexmap::IndexMap;

use crate::cell::PinDirection;
use crate::design::Design;
use crate::geometry::{BBox, Transformable};
use crate::instance::{ComponentPin, Pin};
use crate::net::{contact, Contact, Net, TaggedShape, ViaKey};
use crate::spatial::{SpatialEntry, SpatialIndex};
use crate::stack::InverseMap;
use crate::tech::Technology;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Pin(String),
    ComponentPin(ComponentPin),
    Path { wire: usize, path: usize },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Layers drawn by the node, for diagnostics.
    pub layers: Vec<String>,
}

impl Node {
    pub fn is_path(&self) -> bool {
        matches!(self.kind, NodeKind::Path { .. })
    }

    /// Whether this is the path that placed the via instance `key`.
    pub fn holds_via(&self, key: &ViaKey) -> bool {
        matches!(self.kind, NodeKind::Path { wire, path } if wire == key.wire && path == key.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub vias: Vec<ViaKey>,
    /// Layer of the path-side shape at the contact.
    pub layer: Option<String>,
}

/// What to do with a candidate edge whose target already has a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Drop the candidate edge.
    Discard,
    /// Drop the current node's in-edge and drive the current node from the
    /// target instead.
    Reverse,
    /// The candidate edge replaces the target's in-edge.
    Replace,
}

/// Edge-precedence rule for a target that already has an in-edge.
///
/// `new` holds the candidate edge's vias, `sibling` those of the current
/// node's first in-edge and `existing` those of the target's first in-edge.
pub fn resolve_redundant(new: &[ViaKey], sibling: &[ViaKey], existing: &[ViaKey]) -> Resolution {
    let new_set: BTreeSet<_> = new.iter().collect();
    let sibling_set: BTreeSet<_> = sibling.iter().collect();
    let existing_set: BTreeSet<_> = existing.iter().collect();

    if !new.is_empty() && !sibling.is_empty() && new_set == sibling_set {
        Resolution::Discard
    } else if !new.is_empty()
        && new.len() == sibling.len() + existing.len()
        && sibling_set.is_subset(&new_set)
        && existing_set.is_subset(&new_set)
    {
        Resolution::Discard
    } else if !sibling.is_empty()
        && new.len() + existing.len() == sibling.len()
        && new_set.is_subset(&sibling_set)
        && existing_set.is_subset(&sibling_set)
    {
        Resolution::Reverse
    } else if !new_set.is_disjoint(&sibling_set) {
        Resolution::Discard
    } else {
        Resolution::Replace
    }
}

/// Extra inputs for building a graph.
#[derive(Default, Clone, Copy)]
pub struct GraphContext<'a> {
    /// 3D macro name to (tier, 2D macro) when rows are split; component pins
    /// of cells in the upper half of a split row are shifted by the macro
    /// origin.
    pub row_split_macros: Option<&'a InverseMap>,
    /// Pins not yet stored in the design, looked up before the design's own.
    pub extra_pins: Option<&'a IndexMap<String, Pin>>,
}

impl<'a> GraphContext<'a> {
    fn pin<'d>(&self, design: &'d Design, name: &str) -> Option<&'d Pin>
    where
        'a: 'd,
    {
        self.extra_pins
            .and_then(|pins| pins.get(name))
            .or_else(|| design.pins.get(name))
    }
}

#[derive(Debug, Clone)]
pub struct NetGraph {
    pub net: String,
    pub nodes: Vec<Node>,
    /// Edges by id `<from>_<to>`, in insertion order.
    pub edges: IndexMap<String, Edge>,
    pub root: Option<usize>,
}

impl NetGraph {
    fn empty(net: &str) -> Self {
        Self {
            net: net.to_string(),
            nodes: Vec::new(),
            edges: IndexMap::new(),
            root: None,
        }
    }

    pub fn add_node(&mut self, id: String, kind: NodeKind, layers: Vec<String>) -> usize {
        self.nodes.push(Node { id, kind, layers });
        self.nodes.len() - 1
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn add_edge(&mut self, from: usize, to: usize, vias: Vec<ViaKey>, layer: Option<String>) {
        let id = format!("{}_{}", self.nodes[from].id, self.nodes[to].id);
        self.edges.insert(id, Edge { from, to, vias, layer });
    }

    pub fn remove_edge(&mut self, id: &str) -> Option<Edge> {
        self.edges.shift_remove(id)
    }

    fn first_in_edge(&self, node: usize) -> Option<(&String, &Edge)> {
        self.edges.iter().find(|(_, e)| e.to == node)
    }

    pub fn predecessors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges.values().filter(move |e| e.to == node).map(|e| e.from)
    }

    /// Build the graph of `net`. Without a driver the graph has nodes but no
    /// edges and `root` stays `None`.
    pub fn build(net: &Net, design: &Design, tech: &Technology, ctx: GraphContext<'_>) -> Self {
        let mut graph = NetGraph::empty(&net.name);
        let mut shapes: Vec<Vec<TaggedShape>> = Vec::new();
        let mut layers: Vec<Option<String>> = Vec::new();
        let mut drivers = 0usize;

        for pin_name in &net.pins {
            let Some(pin) = ctx.pin(design, pin_name) else {
                log::warn!("net {} lists pin {} which is not in the design", net.name, pin_name);
                continue;
            };
            let s: Vec<TaggedShape> = pin
                .shapes_in_design()
                .into_iter()
                .map(TaggedShape::plain)
                .collect();
            let idx = graph.add_node(format!("PIN_{pin_name}"), NodeKind::Pin(pin_name.clone()), layer_names(&s));
            shapes.push(s);
            layers.push(None);
            if pin.direction == Some(PinDirection::Input) {
                graph.root = Some(idx);
                drivers += 1;
            }
        }

        for cp in &net.component_pins {
            let mut s = cp.shapes_in_design(design, tech);
            if let Some(map) = ctx.row_split_macros {
                shift_split_row_pin(cp, &mut s, design, tech, map);
            }
            let s: Vec<TaggedShape> = s.into_iter().map(TaggedShape::plain).collect();
            let id = format!("COMP_PIN_{}/{}", cp.component, cp.pin);
            let idx = graph.add_node(id, NodeKind::ComponentPin(cp.clone()), layer_names(&s));
            shapes.push(s);
            layers.push(None);
            if cp.macro_pin(design, tech).and_then(|p| p.direction) == Some(PinDirection::Output) {
                graph.root = Some(idx);
                drivers += 1;
            }
        }

        for (w, wire) in net.wires.iter().enumerate() {
            for (p, path) in wire.paths.iter().enumerate() {
                let s = path.tagged_shapes(w, p, design, tech);
                let id = format!("{}_W{}P{}", net.name, w, p);
                let node_layers = path.layer.iter().cloned().collect();
                graph.add_node(id, NodeKind::Path { wire: w, path: p }, node_layers);
                shapes.push(s);
                layers.push(path.layer.clone());
            }
        }

        if drivers > 1 {
            log::warn!("net {} has {} driver candidates, using the last one", net.name, drivers);
        }
        let Some(root) = graph.root else {
            log::error!("cannot identify the driver for net {}", net.name);
            return graph;
        };

        let builder = Builder {
            net,
            design,
            tech,
            shapes: &shapes,
            layers: &layers,
        };
        builder.walk(&mut graph, root);
        graph
    }

    /// Weakly connected components, each in node order, ordered by their
    /// first node.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let n = self.nodes.len();
        let mut adjacent = vec![Vec::new(); n];
        for e in self.edges.values() {
            adjacent[e.from].push(e.to);
            adjacent[e.to].push(e.from);
        }
        let mut seen = vec![false; n];
        let mut out = Vec::new();
        for start in 0..n {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut members = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(cur) = queue.pop_front() {
                for &next in &adjacent[cur] {
                    if !seen[next] {
                        seen[next] = true;
                        members.push(next);
                        queue.push_back(next);
                    }
                }
            }
            members.sort_unstable();
            out.push(members);
        }
        out
    }

    /// Graphviz rendering. Edges made through a via on one of
    /// `highlight_cut_layers` are drawn in red.
    pub fn to_dot(
        &self,
        net: &Net,
        design: &Design,
        tech: &Technology,
        highlight_cut_layers: &[String],
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", self.net);
        for node in &self.nodes {
            let mut label = format!("{}\\nLAYER: {}", node.id, node.layers.join(", "));
            if let NodeKind::Path { wire, path } = node.kind {
                if let Some(path) = net.wires.get(wire).and_then(|w| w.paths.get(path)) {
                    if !path.points.is_empty() {
                        let db: Vec<String> = path
                            .points
                            .iter()
                            .map(|p| format!("({}, {})", p.at.x, p.at.y))
                            .collect();
                        let real: Vec<String> = path
                            .points
                            .iter()
                            .map(|p| format!("({:.3}, {:.3})", p.at.x / design.dbu, p.at.y / design.dbu))
                            .collect();
                        let _ = write!(
                            label,
                            "\\nPTS(DEF): {}\\nPTS(REAL): {}",
                            db.join(" -> "),
                            real.join(" -> ")
                        );
                    }
                    if !path.vias.is_empty() {
                        let names: Vec<&str> = path.vias.iter().map(|v| v.via.as_str()).collect();
                        let _ = write!(label, "\\nVIAS: {}", names.join(", "));
                    }
                }
            }
            let _ = writeln!(out, "  \"{}\" [label=\"{}\"];", node.id, label);
        }
        for edge in self.edges.values() {
            let mut label = edge.layer.clone().unwrap_or_default();
            let mut highlight = false;
            if !edge.vias.is_empty() {
                let names: Vec<&str> = edge
                    .vias
                    .iter()
                    .filter_map(|k| via_name(net, k))
                    .collect();
                highlight = names.iter().any(|v| {
                    design
                        .via_cut_layer(v, tech)
                        .is_some_and(|c| highlight_cut_layers.iter().any(|h| h == c))
                });
                let _ = write!(label, "\\nBY VIA: {}", names.join(", "));
            }
            let style = if highlight { ", color=red, penwidth=3" } else { "" };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"{}];",
                self.nodes[edge.from].id, self.nodes[edge.to].id, label, style
            );
        }
        out.push_str("}\n");
        out
    }
}

/// Via name of a via instance key.
pub fn via_name<'n>(net: &'n Net, key: &ViaKey) -> Option<&'n str> {
    net.wires
        .get(key.wire)?
        .paths
        .get(key.path)?
        .vias
        .get(key.via)
        .map(|v| v.via.as_str())
}

fn layer_names(shapes: &[TaggedShape]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in shapes {
        if let Some(l) = &s.shape.layer {
            if !out.contains(l) {
                out.push(l.clone());
            }
        }
    }
    out
}

fn shift_split_row_pin(
    cp: &ComponentPin,
    shapes: &mut [crate::geometry::Shape],
    design: &Design,
    tech: &Technology,
    map: &InverseMap,
) {
    let Some(comp) = design.components.get(&cp.component) else {
        return;
    };
    let Some(macro_name) = comp.macro_name.as_deref() else {
        return;
    };
    let (Some(entry), Some(m)) = (map.get(macro_name), tech.macros.get(macro_name)) else {
        return;
    };
    if comp.is_shifted_by_row_splitting(entry.tier) {
        let dy = (m.origin.y * design.dbu).trunc();
        for s in shapes {
            s.translate(0.0, dy);
        }
    }
}

/// Per-build side tables used by the breadth-first walk.
struct Builder<'a> {
    net: &'a Net,
    design: &'a Design,
    tech: &'a Technology,
    shapes: &'a [Vec<TaggedShape>],
    layers: &'a [Option<String>],
}

impl Builder<'_> {
    fn walk(&self, graph: &mut NetGraph, root: usize) {
        let n = graph.nodes.len();
        let index = SpatialIndex::build(
            (0..n)
                .filter_map(|i| Some(SpatialEntry { node: i, bbox: self.bbox(i)? }))
                .collect(),
        );
        let mut visited = vec![false; n];
        let mut checked: HashSet<(usize, usize)> = HashSet::new();
        let mut queue = VecDeque::from([root]);

        while let Some(cur) = queue.pop_front() {
            visited[cur] = true;
            let near: HashSet<usize> = match self.bbox(cur) {
                Some(b) => index.candidates(&b).into_iter().collect(),
                None => HashSet::new(),
            };
            for targ in 0..n {
                if targ == cur || !checked.insert((cur.min(targ), cur.max(targ))) {
                    continue;
                }
                if !near.contains(&targ) {
                    continue;
                }
                let Some(found) = self.probe(graph, cur, targ) else {
                    continue;
                };
                self.link(graph, cur, targ, found);
                if !visited[targ] && !queue.contains(&targ) {
                    queue.push_back(targ);
                }
            }
        }
    }

    fn bbox(&self, node: usize) -> Option<BBox> {
        self.shapes[node]
            .iter()
            .filter_map(|s| s.shape.bbox())
            .reduce(|a, b| a.union(&b))
    }

    /// Contact between two nodes with vias outside the contacting layer
    /// span filtered out. Pins and component pins never touch each other
    /// directly.
    fn probe(&self, graph: &NetGraph, cur: usize, targ: usize) -> Option<Contact> {
        let (cur_path, targ_path) = (graph.nodes[cur].is_path(), graph.nodes[targ].is_path());
        let (mut found, span) = match (cur_path, targ_path) {
            (false, false) => return None,
            (true, true) => {
                let c = contact(&self.shapes[cur], &self.shapes[targ])?;
                let span = (self.layers[cur].clone(), self.layers[targ].clone());
                (c, span)
            }
            (true, false) => {
                let c = contact(&self.shapes[cur], &self.shapes[targ])?;
                let span = (self.layers[cur].clone(), c.layer.clone());
                (c, span)
            }
            (false, true) => {
                let c = contact(&self.shapes[targ], &self.shapes[cur])?;
                let span = (c.layer.clone(), self.layers[targ].clone());
                (c, span)
            }
        };
        let order = |l: Option<&str>| l.and_then(|l| self.tech.layers.index_of(l));
        match (order(span.0.as_deref()), order(span.1.as_deref())) {
            (Some(a), Some(b)) => {
                let (lo, hi) = (a.min(b), a.max(b));
                found.vias.retain(|key| {
                    let Some((bot, top)) = via_name(self.net, key)
                        .and_then(|v| self.design.via_routing_layers(v, self.tech))
                    else {
                        return false;
                    };
                    matches!(
                        (order(Some(bot)), order(Some(top))),
                        (Some(b), Some(t)) if t <= hi && b >= lo
                    )
                });
            }
            _ => found.vias.clear(),
        }
        Some(found)
    }

    fn link(&self, graph: &mut NetGraph, cur: usize, targ: usize, found: Contact) {
        if graph.predecessors(cur).any(|p| p == targ) {
            return;
        }
        let Some((existing_id, existing)) = graph.first_in_edge(targ) else {
            graph.add_edge(cur, targ, found.vias, found.layer);
            return;
        };
        let existing_id = existing_id.clone();
        let existing_vias = existing.vias.clone();
        let (sibling_id, sibling_vias) = match graph.first_in_edge(cur) {
            Some((id, e)) => (Some(id.clone()), e.vias.clone()),
            None => (None, Vec::new()),
        };
        match resolve_redundant(&found.vias, &sibling_vias, &existing_vias) {
            Resolution::Discard => {}
            Resolution::Reverse => {
                if let Some(id) = sibling_id {
                    graph.remove_edge(&id);
                }
                graph.add_edge(targ, cur, found.vias, found.layer);
            }
            Resolution::Replace => {
                graph.remove_edge(&existing_id);
                graph.add_edge(cur, targ, found.vias, found.layer);
            }
        }
    }
}
