//! Technology (library) container and the name-based retargeting helpers
//! used by every layer/via/macro rewrite.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cell::{Macro, Site};
use crate::error::{Result, StackError};
use crate::geometry::Shape;
use crate::layer::{Layer, LayerClass, LayerStack};
use crate::via::{MaxStackVia, Via, ViaRule};

/// Old name to new name.
pub type NameMap = IndexMap<String, String>;

// ── Retargeting ──────────────────────────────────────────────────────

/// Map `old` through `map` and keep the result only if `exists` accepts it.
/// A reference that fails to resolve is dropped and logged.
pub fn retarget(
    old: Option<&str>,
    map: &NameMap,
    exists: impl Fn(&str) -> bool,
    kind: &str,
    owner: &str,
) -> Option<String> {
    let old = old?;
    match map.get(old) {
        Some(new) if exists(new) => Some(new.clone()),
        Some(new) => {
            log::error!("{owner}: {kind} '{new}' (was '{old}') is not defined, dropping reference");
            None
        }
        None => {
            log::error!("{owner}: {kind} '{old}' has no mapping, dropping reference");
            None
        }
    }
}

pub fn retarget_layer(old: Option<&str>, map: &NameMap, tech: &Technology, owner: &str) -> Option<String> {
    retarget(old, map, |n| tech.layers.contains(n), "layer", owner)
}

pub fn retarget_shapes(shapes: &mut [Shape], map: &NameMap, tech: &Technology, owner: &str) {
    for shape in shapes {
        shape.layer = retarget_layer(shape.layer.as_deref(), map, tech, owner);
    }
}

fn rename_ref(reference: &mut Option<String>, old: &str, new: &str) {
    if reference.as_deref() == Some(old) {
        *reference = Some(new.to_string());
    }
}

fn rename_shapes<'a>(shapes: impl Iterator<Item = &'a mut Shape>, old: &str, new: &str) {
    for shape in shapes {
        rename_ref(&mut shape.layer, old, new);
    }
}

// ── Properties ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    Integer,
    Real,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Integer(i64),
    Real(f64),
    String(String),
}

/// A property definition, optionally carrying a value (design-level
/// properties such as the core box are stored this way).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    /// Object class the property applies to (LIBRARY, LAYER, DESIGN, ...).
    pub object: String,
    pub name: String,
    pub value_type: PropertyType,
    #[serde(default)]
    pub range: Option<[f64; 2]>,
    #[serde(default)]
    pub value: Option<PropertyValue>,
}

// ── Technology ───────────────────────────────────────────────────────

/// A technology with its cell library. All cross-references are names
/// resolved against this container.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Technology {
    pub version: Option<String>,
    pub bus_bit_chars: Option<String>,
    pub divider_char: Option<String>,
    /// Database units per micron.
    pub dbu: Option<f64>,
    #[serde(default)]
    pub manufacturing_grid: f64,
    #[serde(default)]
    pub clearance_measure: Option<String>,
    #[serde(default)]
    pub use_min_spacing: Option<bool>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub layers: LayerStack,
    #[serde(default)]
    pub vias: IndexMap<String, Via>,
    #[serde(default)]
    pub via_rules: IndexMap<String, ViaRule>,
    #[serde(default)]
    pub sites: IndexMap<String, Site>,
    #[serde(default)]
    pub macros: IndexMap<String, Macro>,
    #[serde(default)]
    pub max_stack_vias: Vec<MaxStackVia>,
}

impl Technology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the header fields only; no layers, vias, rules, sites or
    /// macros.
    pub fn copy_only_header(&self) -> Self {
        Self {
            version: self.version.clone(),
            bus_bit_chars: self.bus_bit_chars.clone(),
            divider_char: self.divider_char.clone(),
            dbu: self.dbu,
            manufacturing_grid: self.manufacturing_grid,
            clearance_measure: self.clearance_measure.clone(),
            use_min_spacing: self.use_min_spacing,
            properties: self.properties.clone(),
            ..Self::default()
        }
    }

    pub fn add_via(&mut self, via: Via) {
        self.vias.insert(via.name.clone(), via);
    }

    pub fn add_via_rule(&mut self, rule: ViaRule) {
        self.via_rules.insert(rule.name.clone(), rule);
    }

    pub fn add_site(&mut self, site: Site) {
        self.sites.insert(site.name.clone(), site);
    }

    pub fn add_macro(&mut self, m: Macro) {
        self.macros.insert(m.name.clone(), m);
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn resolve_via(&self, name: &str) -> Option<&Via> {
        self.vias.get(name)
    }

    /// Index of a routing layer within the routing class list.
    pub fn routing_index(&self, name: &str) -> Option<usize> {
        self.layers
            .is_class(name, LayerClass::Routing)
            .then(|| self.layers.class_index_of(name))
            .flatten()
    }

    pub fn is_cut_layer(&self, name: &str) -> bool {
        self.layers.is_class(name, LayerClass::Cut)
    }

    /// Remove a layer. Unless `keep_related`, vias, via rules and macros
    /// drawing on it are deleted too and max-stack-via limits that end on it
    /// step to the next routing layer two stack positions away.
    pub fn delete_layer(&mut self, name: &str, keep_related: bool) {
        let Some(idx) = self.layers.index_of(name) else {
            log::error!("layer {} does not exist", name);
            return;
        };
        if !keep_related {
            self.vias.retain(|via_name, via| {
                let related = via.references_layer(name);
                if related {
                    log::warn!("delete via {} which is related to layer {}", via_name, name);
                }
                !related
            });
            self.via_rules.retain(|rule_name, rule| {
                let related = rule.references_layer(name);
                if related {
                    log::warn!("delete via rule {} which is related to layer {}", rule_name, name);
                }
                !related
            });
            self.macros.retain(|macro_name, m| {
                let related = m.references_layer(name);
                if related {
                    log::warn!("delete macro {} which is related to layer {}", macro_name, name);
                }
                !related
            });
            let above = self.layers.order().get(idx + 2).cloned();
            let below = idx
                .checked_sub(2)
                .and_then(|i| self.layers.order().get(i))
                .cloned();
            for msv in &mut self.max_stack_vias {
                if msv.bottom_layer.as_deref() == Some(name) {
                    log::warn!(
                        "changing bottom routing layer for max stack via from {} to {}",
                        name,
                        above.as_deref().unwrap_or("<none>")
                    );
                    msv.bottom_layer = above.clone();
                }
                if msv.top_layer.as_deref() == Some(name) {
                    log::warn!(
                        "changing top routing layer for max stack via from {} to {}",
                        name,
                        below.as_deref().unwrap_or("<none>")
                    );
                    msv.top_layer = below.clone();
                }
            }
        }
        self.layers.remove(name);
    }

    /// Copy layer `reference` as `target`, placed after `after` or on top of
    /// the stack when `after` is `None`.
    pub fn duplicate_layer(&mut self, reference: &str, target: &str, after: Option<&str>) {
        let Some(layer) = self.layers.get(reference) else {
            log::error!("layer {} does not exist", reference);
            return;
        };
        if self.layers.contains(target) {
            log::error!("target layer name {} is already being used", target);
            return;
        }
        let mut copy = layer.clone();
        copy.name = target.to_string();
        match after {
            Some(after) => self.layers.insert_after(copy, after),
            None => self.layers.push(copy),
        }
    }

    /// Rename a layer and every reference to it.
    pub fn rename_layer(&mut self, old: &str, new: &str) -> Result<()> {
        self.layers.rename(old, new)?;
        for via in self.vias.values_mut() {
            rename_ref(&mut via.cut_layer, old, new);
            rename_ref(&mut via.bottom_layer, old, new);
            rename_ref(&mut via.top_layer, old, new);
            rename_shapes(
                via.cut_shapes
                    .iter_mut()
                    .chain(via.bottom_shapes.iter_mut())
                    .chain(via.top_shapes.iter_mut()),
                old,
                new,
            );
        }
        for rule in self.via_rules.values_mut() {
            for rule_layer in [&mut rule.cut, &mut rule.bottom, &mut rule.top]
                .into_iter()
                .flatten()
            {
                rename_ref(&mut rule_layer.layer, old, new);
                rename_shapes(rule_layer.shapes.iter_mut(), old, new);
            }
        }
        for m in self.macros.values_mut() {
            rename_shapes(
                m.pins
                    .values_mut()
                    .flat_map(|p| p.shapes.iter_mut())
                    .chain(m.obstructions.iter_mut()),
                old,
                new,
            );
        }
        for msv in &mut self.max_stack_vias {
            rename_ref(&mut msv.bottom_layer, old, new);
            rename_ref(&mut msv.top_layer, old, new);
        }
        Ok(())
    }

    pub fn scale_macros(&mut self, factor: f64, preserve_pins: bool) {
        let grid = self.manufacturing_grid;
        for m in self.macros.values_mut() {
            m.scale(factor, preserve_pins, grid);
        }
    }

    /// Merge another library into this one. Header fields already set here
    /// win; named entities from `other` are added or replace existing ones.
    pub fn merge_library(&mut self, other: Technology) {
        self.version = self.version.take().or(other.version);
        self.bus_bit_chars = self.bus_bit_chars.take().or(other.bus_bit_chars);
        self.divider_char = self.divider_char.take().or(other.divider_char);
        self.dbu = self.dbu.or(other.dbu);
        if self.manufacturing_grid == 0.0 {
            self.manufacturing_grid = other.manufacturing_grid;
        }
        self.clearance_measure = self.clearance_measure.take().or(other.clearance_measure);
        self.use_min_spacing = self.use_min_spacing.or(other.use_min_spacing);
        self.properties.extend(other.properties);
        for layer in other.layers.iter() {
            self.layers.push(layer.clone());
        }
        self.vias.extend(other.vias);
        self.via_rules.extend(other.via_rules);
        self.sites.extend(other.sites);
        self.macros.extend(other.macros);
        self.max_stack_vias.extend(other.max_stack_vias);
    }

    pub fn require_layer(&self, name: &str) -> Result<&Layer> {
        self.layers
            .get(name)
            .ok_or_else(|| StackError::config(format!("layer '{name}' is not defined")))
    }
}
