use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};

/// Technology layer classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerClass {
    Masterslice,
    Implant,
    Routing,
    Cut,
    Overlap,
}

impl LayerClass {
    pub const ALL: [LayerClass; 5] = [
        LayerClass::Masterslice,
        LayerClass::Implant,
        LayerClass::Routing,
        LayerClass::Cut,
        LayerClass::Overlap,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingDirection {
    Horizontal,
    Vertical,
    Diag45,
    Diag135,
}

/// One row of a parallel-run-length spacing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpacingTable {
    pub parallel_run_lengths: Vec<f64>,
    pub widths: Vec<f64>,
    pub spacings: Vec<Vec<f64>>,
}

/// A technology layer with its class-specific rules (microns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub class: LayerClass,
    #[serde(default)]
    pub direction: Option<RoutingDirection>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub min_width: Option<f64>,
    #[serde(default)]
    pub spacing: Option<f64>,
    #[serde(default)]
    pub spacing_tables: Vec<SpacingTable>,
    /// One value, or separate x and y values.
    #[serde(default)]
    pub pitch: Vec<f64>,
    #[serde(default)]
    pub offset: Vec<f64>,
    #[serde(default)]
    pub min_area: Option<f64>,
    #[serde(default)]
    pub thickness: Option<f64>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl Layer {
    pub fn new(name: &str, class: LayerClass) -> Self {
        Self {
            name: name.to_string(),
            class,
            direction: None,
            width: None,
            min_width: None,
            spacing: None,
            spacing_tables: Vec::new(),
            pitch: Vec::new(),
            offset: Vec::new(),
            min_area: None,
            thickness: None,
            properties: IndexMap::new(),
        }
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = Some(spacing);
        self
    }

    pub fn with_direction(mut self, direction: RoutingDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Drawn wire width, falling back to the minimum width.
    pub fn effective_width(&self) -> Option<f64> {
        self.width.or(self.min_width)
    }
}

/// The layer registry with its two ordered views: one global stack order and
/// one ordered list per layer class. Every mutation keeps both in step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStack {
    layers: IndexMap<String, Layer>,
    order: Vec<String>,
    classes: IndexMap<LayerClass, Vec<String>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self {
            layers: IndexMap::new(),
            order: Vec::new(),
            classes: LayerClass::ALL.iter().map(|c| (*c, Vec::new())).collect(),
        }
    }

    /// Append a layer on top of the stack. A layer with an existing name
    /// replaces the old definition in place.
    pub fn push(&mut self, layer: Layer) {
        if self.layers.contains_key(&layer.name) {
            self.layers.insert(layer.name.clone(), layer);
            return;
        }
        self.order.push(layer.name.clone());
        self.class_list_mut(layer.class).push(layer.name.clone());
        self.layers.insert(layer.name.clone(), layer);
    }

    /// Insert `layer` directly above `after` in the global order. In its class
    /// list it goes after the last same-class layer found below `after`.
    /// When `after` is unknown the layer is appended and a warning logged.
    pub fn insert_after(&mut self, layer: Layer, after: &str) {
        let Some(pos) = self.index_of(after) else {
            log::warn!("layer '{}' not found, appending '{}' on top", after, layer.name);
            self.push(layer);
            return;
        };
        let class_pos = self.order[..=pos]
            .iter()
            .rev()
            .find_map(|n| {
                self.layers
                    .get(n)
                    .filter(|l| l.class == layer.class)
                    .and_then(|_| self.class_index_of(n))
            })
            .map(|i| i + 1)
            .unwrap_or(0);
        self.order.insert(pos + 1, layer.name.clone());
        self.class_list_mut(layer.class)
            .insert(class_pos, layer.name.clone());
        self.layers.insert(layer.name.clone(), layer);
    }

    pub fn remove(&mut self, name: &str) -> Option<Layer> {
        let layer = self.layers.shift_remove(name)?;
        self.order.retain(|n| n != name);
        self.class_list_mut(layer.class).retain(|n| n != name);
        Some(layer)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if self.layers.contains_key(new) {
            return Err(StackError::config(format!("layer '{new}' already exists")));
        }
        let idx = self
            .layers
            .get_index_of(old)
            .ok_or_else(|| StackError::missing("layer", old))?;
        let (_, mut layer) = self
            .layers
            .shift_remove_index(idx)
            .ok_or_else(|| StackError::missing("layer", old))?;
        layer.name = new.to_string();
        let class = layer.class;
        self.layers.shift_insert(idx, new.to_string(), layer);
        let rename = |names: &mut Vec<String>| {
            names
                .iter_mut()
                .filter(|n| n.as_str() == old)
                .for_each(|n| *n = new.to_string());
        };
        rename(&mut self.order);
        rename(self.class_list_mut(class));
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.order.iter().filter_map(|n| self.layers.get(n))
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Position in the global stack.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    /// Position within the layer's own class list.
    pub fn class_index_of(&self, name: &str) -> Option<usize> {
        let class = self.layers.get(name)?.class;
        self.class(class).iter().position(|n| n == name)
    }

    pub fn class(&self, class: LayerClass) -> &[String] {
        self.classes.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn routing(&self) -> &[String] {
        self.class(LayerClass::Routing)
    }

    pub fn cut(&self) -> &[String] {
        self.class(LayerClass::Cut)
    }

    pub fn is_class(&self, name: &str, class: LayerClass) -> bool {
        self.layers.get(name).is_some_and(|l| l.class == class)
    }

    /// Both views hold the same names and every class list follows the
    /// global order.
    pub fn is_consistent(&self) -> bool {
        if self.order.len() != self.layers.len()
            || self.order.iter().any(|n| !self.layers.contains_key(n))
        {
            return false;
        }
        LayerClass::ALL.iter().all(|class| {
            let expected: Vec<&String> = self
                .order
                .iter()
                .filter(|n| self.layers[n.as_str()].class == *class)
                .collect();
            let actual: Vec<&String> = self.class(*class).iter().collect();
            expected == actual
        })
    }

    fn class_list_mut(&mut self, class: LayerClass) -> &mut Vec<String> {
        self.classes.entry(class).or_default()
    }
}

impl Default for LayerStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> LayerStack {
        let mut s = LayerStack::new();
        s.push(Layer::new("OD", LayerClass::Masterslice));
        s.push(Layer::new("M1", LayerClass::Routing));
        s.push(Layer::new("V1", LayerClass::Cut));
        s.push(Layer::new("M2", LayerClass::Routing));
        s
    }

    #[test]
    fn test_push_keeps_views() {
        let s = stack();
        assert_eq!(s.order(), ["OD", "M1", "V1", "M2"]);
        assert_eq!(s.routing(), ["M1", "M2"]);
        assert_eq!(s.class_index_of("M2"), Some(1));
        assert!(s.is_consistent());
    }

    #[test]
    fn test_insert_after() {
        let mut s = stack();
        s.insert_after(Layer::new("M1_copy", LayerClass::Routing), "V1");
        assert_eq!(s.order(), ["OD", "M1", "V1", "M1_copy", "M2"]);
        assert_eq!(s.routing(), ["M1", "M1_copy", "M2"]);
        assert!(s.is_consistent());

        s.insert_after(Layer::new("V0", LayerClass::Cut), "OD");
        assert_eq!(s.cut(), ["V0", "V1"]);
        assert!(s.is_consistent());

        s.insert_after(Layer::new("TOP", LayerClass::Overlap), "missing");
        assert_eq!(s.order().last().map(String::as_str), Some("TOP"));
    }

    #[test]
    fn test_remove_and_rename() {
        let mut s = stack();
        assert!(s.remove("V1").is_some());
        assert!(s.remove("V1").is_none());
        assert_eq!(s.cut().len(), 0);

        s.rename("M2", "MT").unwrap();
        assert_eq!(s.order(), ["OD", "M1", "MT"]);
        assert_eq!(s.routing(), ["M1", "MT"]);
        assert!(s.rename("M1", "MT").is_err());
        assert!(s.is_consistent());
    }
}
