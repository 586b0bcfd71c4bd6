//! Partitioning a flat design into sub-designs by pin and component
//! assignment, and building the hierarchical top that instantiates a set of
//! sub-designs as black boxes.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::cell::{PinDirection, SignalUse};
use crate::design::{Design, DesignSet};
use crate::error::{Result, StackError};
use crate::geometry::{BBox, Orientation, Point, Rect, Shape};
use crate::instance::{Component, ComponentPin, Pin};
use crate::net::Net;
use crate::tech::Technology;

pub const PART_OUT_PREFIX: &str = "FLOWGEN_PART_OUT_";
pub const PART_IN_PREFIX: &str = "FLOWGEN_PART_IN_";

/// Pin and component names of each partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partitioning {
    pub parts: Vec<IndexSet<String>>,
}

impl Partitioning {
    pub fn new(parts: Vec<IndexSet<String>>) -> Self {
        Self { parts }
    }

    /// Build from `(name, partition)` pairs; partitions that are skipped in
    /// the numbering stay empty.
    pub fn from_assignments<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut parts: Vec<IndexSet<String>> = Vec::new();
        for (name, part) in pairs {
            if parts.len() <= part {
                parts.resize_with(part + 1, IndexSet::new);
            }
            parts[part].insert(name.into());
        }
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

fn boundary_pin(name: String, direction: PinDirection, net: &str) -> Pin {
    let mut pin = Pin::new(&name, Some(direction));
    pin.net = Some(net.to_string());
    pin.net_name = Some(net.to_string());
    pin.location = Point::int(0.0, 0.0);
    pin.parent_net_name = Some(net.to_string());
    pin
}

/// Split `design` into one design per partition. Nets whose endpoints all
/// fall in one partition move there whole; the others get a subnet of the
/// same name in every partition they touch, joined through boundary ports
/// `FLOWGEN_PART_OUT_<net>` (driver side) and `FLOWGEN_PART_IN_<net>`.
/// Routing is not carried over. A top design named after `design`
/// instantiates the partitions.
pub fn partition_design(
    design: &Design,
    tech: &Technology,
    partitioning: &Partitioning,
    names: &[String],
) -> Result<DesignSet> {
    if partitioning.is_empty() {
        return Err(StackError::config("partitioning has no partitions"));
    }
    log::info!("start partitioning design {} into {} parts", design.name, partitioning.len());
    let count = partitioning.len();
    let names: Vec<String> = (0..count)
        .map(|i| names.get(i).cloned().unwrap_or_else(|| format!("part{i}")))
        .collect();
    log::info!("partitions: {}", names.join(", "));

    let mut pin_part: IndexMap<&str, usize> = IndexMap::new();
    let mut comp_part: IndexMap<&str, usize> = IndexMap::new();
    for (i, part) in partitioning.parts.iter().enumerate() {
        for name in part {
            if design.pins.contains_key(name) {
                pin_part.insert(name, i);
            } else if design.components.contains_key(name) {
                comp_part.insert(name, i);
            } else {
                log::warn!("{} in partition {} is neither a pin nor a component", name, names[i]);
            }
        }
    }

    let mut parts: Vec<Design> = names.iter().map(|n| design.copy_only_header(n)).collect();
    for (name, pin) in &design.pins {
        match pin_part.get(name.as_str()) {
            Some(&i) => {
                parts[i].pins.insert(name.clone(), pin.clone());
            }
            None => log::error!("pin {} is not assigned to any partition, excluded", name),
        }
    }
    for (name, comp) in &design.components {
        match comp_part.get(name.as_str()) {
            Some(&i) => {
                parts[i].components.insert(name.clone(), comp.clone());
            }
            None => log::error!("component {} is not assigned to any partition, excluded", name),
        }
    }

    log::info!("splitting nets crossing partitions");
    for (net_name, net) in &design.nets {
        let mut counts = vec![0usize; count];
        let total = net.pins.len() + net.component_pins.len();
        for p in &net.pins {
            if let Some(&i) = pin_part.get(p.as_str()) {
                counts[i] += 1;
            }
        }
        for cp in &net.component_pins {
            if let Some(&i) = comp_part.get(cp.component.as_str()) {
                counts[i] += 1;
            }
        }

        let mut whole = false;
        for (i, part) in parts.iter_mut().enumerate() {
            if counts[i] == total {
                let mut moved = net.clone();
                moved.wires.clear();
                part.nets.insert(net_name.clone(), moved);
                whole = true;
            }
        }
        if whole {
            continue;
        }

        let driver = net
            .pins
            .iter()
            .filter(|p| design.pins.get(*p).and_then(|p| p.direction) == Some(PinDirection::Input))
            .find_map(|p| pin_part.get(p.as_str()).copied())
            .or_else(|| {
                net.component_pins
                    .iter()
                    .filter(|cp| {
                        cp.macro_pin(design, tech).and_then(|p| p.direction) == Some(PinDirection::Output)
                    })
                    .find_map(|cp| comp_part.get(cp.component.as_str()).copied())
            });
        let driver = match driver.or_else(|| counts.iter().position(|c| *c > 0)) {
            Some(d) if driver.is_some() => d,
            Some(d) => {
                log::warn!("net {} has no driver, using partition {} as its source", net_name, names[d]);
                d
            }
            None => {
                log::error!("net {} has no assigned endpoints, ignored", net_name);
                continue;
            }
        };

        for (i, part) in parts.iter_mut().enumerate() {
            if i == driver || counts[i] > 0 {
                part.nets.insert(net_name.clone(), net.copy_only_header(net_name));
            }
        }
        for p in &net.pins {
            let Some(&i) = pin_part.get(p.as_str()) else { continue };
            if let Some(subnet) = parts[i].nets.get_mut(net_name) {
                subnet.add_pin(p);
            }
            if let Some(pin) = parts[i].pins.get_mut(p) {
                pin.net = Some(net_name.clone());
            }
        }
        for cp in &net.component_pins {
            let Some(&i) = comp_part.get(cp.component.as_str()) else { continue };
            if let Some(subnet) = parts[i].nets.get_mut(net_name) {
                subnet.add_component_pin(cp.clone());
            }
            if let Some(comp) = parts[i].components.get_mut(&cp.component) {
                comp.pin_nets.insert(cp.pin.clone(), net_name.clone());
            }
        }

        for (i, part) in parts.iter_mut().enumerate() {
            let port = if i == driver {
                boundary_pin(format!("{PART_OUT_PREFIX}{net_name}"), PinDirection::Output, net_name)
            } else if counts[i] > 0 {
                boundary_pin(format!("{PART_IN_PREFIX}{net_name}"), PinDirection::Input, net_name)
            } else {
                continue;
            };
            if let Some(subnet) = part.nets.get_mut(net_name) {
                subnet.add_pin(&port.name);
            }
            part.pins.insert(port.name.clone(), port);
        }
    }

    let mut out = DesignSet::new();
    for mut part in parts {
        part.relink_pins();
        out.insert(part);
    }
    let top = make_top_design(&mut out, Some(names.as_slice()), &design.name)?;
    out.insert(top);
    log::info!("end partitioning design {}", design.name);
    Ok(out)
}

/// Build a top design instantiating each of `names` (every design of `set`
/// when `None`) as component `U_<name>` of a generated black-box macro,
/// stored in `set.block_macros`.
///
/// Sub-design pins with a parent net connect through the top net of that
/// name; the others become top-level ports on a net named after the pin.
/// Supply ports get special nets.
pub fn make_top_design(set: &mut DesignSet, names: Option<&[String]>, top_name: &str) -> Result<Design> {
    let names: Vec<String> = match names {
        Some(names) => names.to_vec(),
        None => set.designs.keys().cloned().collect(),
    };
    let names: Vec<String> = names
        .into_iter()
        .filter(|n| {
            let exists = set.designs.contains_key(n);
            if !exists {
                log::error!("sub design {} does not exist, ignored", n);
            }
            exists
        })
        .collect();
    let first = names
        .first()
        .ok_or_else(|| StackError::config("no sub designs to instantiate"))?;
    let mut top = set.design(first)?.copy_only_header(top_name);

    let mut die: Option<BBox> = None;
    let mut blocks = Vec::with_capacity(names.len());
    for name in &names {
        let sub = set.design(name)?;
        if let Some(b) = sub.die_area.as_ref().and_then(|s| s.bbox()) {
            die = Some(die.map_or(b, |d| d.union(&b)));
        }
        let comp_name = format!("U_{name}");
        let mut comp = Component::new(&comp_name, name, 0.0, 0.0, Orientation::N);

        for (pin_name, pin) in &sub.pins {
            let supply = pin.is_supply();
            let net_name = match &pin.parent_net_name {
                Some(parent) => parent.clone(),
                None => {
                    let mut port = pin.clone();
                    port.shapes.clear();
                    port.status = None;
                    port.net = None;
                    port.net_name = Some(pin_name.clone());
                    port.parent_net_name = None;
                    top.pins.insert(pin_name.clone(), port);
                    pin_name.clone()
                }
            };
            if !top.nets.contains_key(&net_name) && !top.special_nets.contains_key(&net_name) {
                let mut net = Net::new(&net_name);
                if pin.parent_net_name.is_some() {
                    net.signal_use = Some(SignalUse::Signal);
                    top.nets.insert(net_name.clone(), net);
                } else {
                    net.signal_use = pin.signal_use;
                    if supply {
                        top.special_nets.insert(net_name.clone(), net);
                    } else {
                        top.nets.insert(net_name.clone(), net);
                    }
                }
            }
            let net = match top.special_nets.get_mut(&net_name) {
                Some(net) => net,
                None => match top.nets.get_mut(&net_name) {
                    Some(net) => net,
                    None => continue,
                },
            };
            net.add_component_pin(ComponentPin::new(&comp_name, pin_name));
            if pin.parent_net_name.is_none() {
                net.add_pin(pin_name);
            }
            comp.pin_nets.insert(pin_name.clone(), net_name);
        }
        blocks.push(sub.make_design_macro());
        top.components.insert(comp_name, comp);
    }
    for block in blocks {
        set.block_macros.insert(block.name.clone(), block);
    }

    if let Some(d) = die {
        let rect = Rect::int(d.min.x, d.min.y, d.max.x, d.max.y);
        for comp in top.components.values_mut() {
            comp.location = rect.ll;
        }
        top.die_area = Some(Shape::rect(None, rect));
    }
    top.relink_pins();
    Ok(top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{demo_design, demo_tech};

    fn split_inverters() -> Partitioning {
        Partitioning::from_assignments([("in", 0), ("u1", 0), ("u2", 1), ("out", 1)])
    }

    #[test]
    fn test_from_assignments_fills_gaps() {
        let p = Partitioning::from_assignments([("a", 2), ("b", 0)]);
        assert_eq!(p.len(), 3);
        assert!(p.parts[1].is_empty());
        assert!(p.parts[2].contains("a"));
    }

    #[test]
    fn test_crossing_net_gets_boundary_pins() {
        let _ = env_logger::builder().is_test(true).try_init();
        let set = partition_design(&demo_design(), &demo_tech(), &split_inverters(), &[]).unwrap();
        let p0 = set.design("part0").unwrap();
        let p1 = set.design("part1").unwrap();

        assert!(p0.nets["n_in"].pins.contains(&"in".to_string()));
        assert!(p1.nets.contains_key("n_out"));
        assert!(!p1.nets.contains_key("n_in"));

        // u1/Y drives n_mid, so part0 holds the driver side
        let out = format!("{PART_OUT_PREFIX}n_mid");
        let inp = format!("{PART_IN_PREFIX}n_mid");
        assert!(p0.nets["n_mid"].pins.contains(&out));
        assert!(p1.nets["n_mid"].pins.contains(&inp));
        assert_eq!(p0.pins[&out].direction, Some(PinDirection::Output));
        assert_eq!(p1.pins[&inp].parent_net_name.as_deref(), Some("n_mid"));
        assert_eq!(p1.components["u2"].pin_nets["A"], "n_mid");
        assert_eq!(p0.pins[&out].net.as_deref(), Some("n_mid"));
    }

    #[test]
    fn test_top_design_connects_partitions() {
        let set = partition_design(&demo_design(), &demo_tech(), &split_inverters(), &[]).unwrap();
        let top = set.design("top").unwrap();
        assert_eq!(top.components.len(), 2);
        let n_mid = &top.nets["n_mid"];
        assert_eq!(
            n_mid.component_pins,
            vec![
                ComponentPin::new("U_part0", &format!("{PART_OUT_PREFIX}n_mid")),
                ComponentPin::new("U_part1", &format!("{PART_IN_PREFIX}n_mid")),
            ]
        );
        assert!(n_mid.pins.is_empty());

        // ports without a parent net surface at the top
        assert!(top.pins.contains_key("in") && top.pins.contains_key("out"));
        assert_eq!(top.pins["in"].net.as_deref(), Some("in"));
        assert!(top.pins["in"].shapes.is_empty());
        assert_eq!(top.components["U_part0"].location, Point::int(0.0, 0.0));
        assert_eq!(top.die_rect(), Some(Rect::int(0.0, 0.0, 5000.0, 2800.0)));

        let tech = set.tech_with_blocks(&demo_tech());
        assert!(tech.macros["part1"].pins.contains_key("out"));
    }

    #[test]
    fn test_supply_ports_use_special_nets() {
        let mut d = demo_design();
        let mut vdd = Pin::new("VDD", Some(PinDirection::Inout));
        vdd.signal_use = Some(SignalUse::Power);
        d.pins.insert("VDD".into(), vdd);
        let mut set = DesignSet::new();
        set.insert(d);
        let top = make_top_design(&mut set, None, "wrapper").unwrap();
        assert!(top.special_nets.contains_key("VDD"));
        assert!(!top.nets.contains_key("VDD"));
        assert_eq!(top.components["U_top"].pin_nets["VDD"], "VDD");
    }

    #[test]
    fn test_empty_partitioning_is_rejected() {
        let r = partition_design(&demo_design(), &demo_tech(), &Partitioning::default(), &[]);
        assert!(matches!(r, Err(StackError::Configuration(_))));
    }
}
