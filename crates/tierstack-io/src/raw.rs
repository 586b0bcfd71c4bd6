//! Raw parse trees exchanged with a LEF/DEF parser.
//!
//! These mirror the statements of the source files: keywords stay strings,
//! DEF coordinates stay integers and connections stay `( comp pin )` pairs.
//! [`crate::import`] turns them into the model, [`crate::export`] goes back.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use tierstack_core::layer::SpacingTable;

/// `RECT` or `POLYGON` on an optional layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawShape {
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub rect: Option<[f64; 4]>,
    #[serde(default)]
    pub polygon: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProperty {
    pub object: String,
    pub name: String,
    /// `INTEGER`, `REAL` or `STRING`.
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub range: Option<[f64; 2]>,
    #[serde(default)]
    pub value: Option<String>,
}

// ── LEF ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLayer {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub min_width: Option<f64>,
    #[serde(default)]
    pub spacing: Option<f64>,
    #[serde(default)]
    pub spacing_tables: Vec<SpacingTable>,
    #[serde(default)]
    pub pitch: Vec<f64>,
    #[serde(default)]
    pub offset: Vec<f64>,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub thickness: Option<f64>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// One `LAYER` block of a via: the layer and its geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawViaLayer {
    pub layer: String,
    #[serde(default)]
    pub shapes: Vec<RawShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVia {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    /// Layer blocks in file order.
    #[serde(default)]
    pub layers: Vec<RawViaLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawViaRuleLayer {
    pub layer: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub enclosure: Vec<f64>,
    #[serde(default)]
    pub width: Vec<f64>,
    #[serde(default)]
    pub spacing: Vec<f64>,
    #[serde(default)]
    pub shapes: Vec<RawShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawViaRule {
    pub name: String,
    #[serde(default)]
    pub generate: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub layers: Vec<RawViaRuleLayer>,
    #[serde(default)]
    pub vias: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSite {
    pub name: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub symmetry: Vec<String>,
    pub size: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMacroPin {
    pub name: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, rename = "use")]
    pub signal_use: Option<String>,
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub ports: Vec<RawShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMacro {
    pub name: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub subclass: Option<String>,
    #[serde(default)]
    pub foreign: Option<String>,
    #[serde(default)]
    pub origin: [f64; 2],
    #[serde(default)]
    pub symmetry: Vec<String>,
    #[serde(default)]
    pub site: Option<String>,
    pub size: [f64; 2],
    #[serde(default)]
    pub pins: Vec<RawMacroPin>,
    #[serde(default)]
    pub obs: Vec<RawShape>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMaxViaStack {
    pub value: i64,
    #[serde(default)]
    pub range: Option<[String; 2]>,
}

/// One technology or cell library file, or several merged together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTechTree {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub bus_bit_chars: Option<String>,
    #[serde(default)]
    pub divider_char: Option<String>,
    #[serde(default)]
    pub units_database: Option<f64>,
    #[serde(default)]
    pub manufacturing_grid: Option<f64>,
    #[serde(default)]
    pub clearance_measure: Option<String>,
    /// `ON` or `OFF`.
    #[serde(default)]
    pub use_min_spacing: Option<String>,
    #[serde(default)]
    pub property_definitions: Vec<RawProperty>,
    #[serde(default)]
    pub layers: Vec<RawLayer>,
    #[serde(default)]
    pub vias: Vec<RawVia>,
    #[serde(default)]
    pub via_rules: Vec<RawViaRule>,
    #[serde(default)]
    pub sites: Vec<RawSite>,
    #[serde(default)]
    pub macros: Vec<RawMacro>,
    #[serde(default)]
    pub max_via_stack: Vec<RawMaxViaStack>,
}

fn merge_named<T>(into: &mut Vec<T>, from: Vec<T>, name: impl Fn(&T) -> &str, kind: &str) {
    for item in from {
        match into.iter().position(|i| name(i) == name(&item)) {
            Some(pos) => {
                log::warn!("{} {} is defined again, the later definition wins", kind, name(&item));
                into[pos] = item;
            }
            None => into.push(item),
        }
    }
}

impl RawTechTree {
    /// Combine a technology with a further library file. Header fields the
    /// library sets override; named definitions are appended, replacing ones
    /// with the same name.
    pub fn merge_library(&mut self, other: RawTechTree) {
        macro_rules! header {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        header!(
            version,
            bus_bit_chars,
            divider_char,
            units_database,
            manufacturing_grid,
            clearance_measure,
            use_min_spacing
        );
        merge_named(
            &mut self.property_definitions,
            other.property_definitions,
            |p| p.name.as_str(),
            "property",
        );
        merge_named(&mut self.layers, other.layers, |l| l.name.as_str(), "layer");
        merge_named(&mut self.vias, other.vias, |v| v.name.as_str(), "via");
        merge_named(&mut self.via_rules, other.via_rules, |r| r.name.as_str(), "via rule");
        merge_named(&mut self.sites, other.sites, |s| s.name.as_str(), "site");
        merge_named(&mut self.macros, other.macros, |m| m.name.as_str(), "macro");
        self.max_via_stack.extend(other.max_via_stack);
    }
}

// ── DEF ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub name: String,
    pub site: String,
    pub origin: [i64; 2],
    #[serde(default = "north")]
    pub orient: String,
    #[serde(default = "one")]
    pub num_x: i64,
    #[serde(default = "one")]
    pub num_y: i64,
    #[serde(default)]
    pub step: [f64; 2],
}

fn north() -> String {
    "N".to_string()
}

fn one() -> i64 {
    1
}

/// `TRACKS` (with layers) and `GCELLGRID` (without) statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGrid {
    /// `X` or `Y`.
    pub axis: String,
    pub start: i64,
    pub num: i64,
    pub step: i64,
    #[serde(default)]
    pub layers: Vec<String>,
}

/// A design via: either fixed geometry per layer or a generated via rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDesignVia {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<RawViaLayer>,
    #[serde(default)]
    pub via_rule: Option<RawViaRuleParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawViaRuleParams {
    pub rule: String,
    pub cut_size: [f64; 2],
    /// Bottom, cut and top layer.
    pub layers: [String; 3],
    pub cut_spacing: [f64; 2],
    pub enclosure: [f64; 4],
    #[serde(default)]
    pub rowcol: Option<[i64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComponent {
    pub name: String,
    #[serde(rename = "macro")]
    pub macro_name: String,
    #[serde(default)]
    pub eeq: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub location: Option<[i64; 2]>,
    #[serde(default)]
    pub orient: Option<String>,
    #[serde(default)]
    pub weight: Option<i64>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPin {
    pub name: String,
    #[serde(default)]
    pub net: Option<String>,
    #[serde(default)]
    pub special: bool,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, rename = "use")]
    pub signal_use: Option<String>,
    #[serde(default)]
    pub supply_sensitivity: Option<String>,
    #[serde(default)]
    pub ground_sensitivity: Option<String>,
    #[serde(default)]
    pub shapes: Vec<RawShape>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub location: Option<[i64; 2]>,
    #[serde(default)]
    pub orient: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBlockage {
    /// `PLACEMENT` or `LAYER`.
    pub kind: String,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub partial: Option<f64>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub shapes: Vec<RawShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPathPoint {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub ext: Option<i64>,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    /// `RECT ( dx1 dy1 dx2 dy2 )` patch following the point.
    #[serde(default)]
    pub rect: Option<[i64; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPathVia {
    pub via: String,
    pub at: [i64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPath {
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub points: Vec<RawPathPoint>,
    #[serde(default)]
    pub vias: Vec<RawPathVia>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWire {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub paths: Vec<RawPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNet {
    pub name: String,
    /// `( PIN name )` or `( comp pin )`.
    #[serde(default)]
    pub connections: Vec<[String; 2]>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "use")]
    pub signal_use: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub wires: Vec<RawWire>,
    #[serde(default)]
    pub voltage: Option<i64>,
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// One design file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDesignTree {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub divider_char: Option<String>,
    #[serde(default)]
    pub bus_bit_chars: Option<String>,
    pub design: String,
    #[serde(default)]
    pub technology: Option<String>,
    pub units: f64,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub property_definitions: Vec<RawProperty>,
    #[serde(default)]
    pub die_area: Vec<[i64; 2]>,
    #[serde(default)]
    pub rows: Vec<RawRow>,
    #[serde(default)]
    pub tracks: Vec<RawGrid>,
    #[serde(default)]
    pub gcell_grids: Vec<RawGrid>,
    #[serde(default)]
    pub vias: Vec<RawDesignVia>,
    #[serde(default)]
    pub components: Vec<RawComponent>,
    #[serde(default)]
    pub pins: Vec<RawPin>,
    #[serde(default)]
    pub blockages: Vec<RawBlockage>,
    #[serde(default)]
    pub special_nets: Vec<RawNet>,
    #[serde(default)]
    pub nets: Vec<RawNet>,
}
