use serde::{Deserialize, Serialize};

use crate::cell::Site;
use crate::geometry::{Orientation, Point, Rect, Shape};
use crate::tech::{retarget_layer, retarget_shapes, NameMap, Technology};

/// A placement row (database units).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub name: String,
    pub site: Option<String>,
    pub origin: Point,
    #[serde(default)]
    pub orientation: Orientation,
    pub num_x: i64,
    pub num_y: i64,
    pub step_x: f64,
    pub step_y: f64,
}

impl Row {
    /// Footprint of the row: its site repeats in x and one site height in y.
    pub fn rect(&self, site: &Site, dbu: f64) -> Rect {
        Rect::int(
            self.origin.x,
            self.origin.y,
            self.origin.x + self.num_x as f64 * self.step_x,
            self.origin.y + site.height * dbu,
        )
    }

    /// Stretch or shrink the row to the x extent of `boundary`, keeping it on
    /// the site grid. Returns `false` when the row no longer fits.
    pub fn fit_width(&mut self, boundary: &Rect, site: &Site, dbu: f64) -> bool {
        if self.num_y != 1 {
            log::error!(
                "fitting row {} is only supported when numY = 1, the row is unchanged",
                self.name
            );
            return true;
        }
        if self.origin.y < boundary.ll.y || boundary.ur.y < self.origin.y + site.height * dbu {
            return false;
        }
        let sw = site.width * dbu;
        if sw <= 0.0 {
            return false;
        }
        self.origin.x = ((boundary.ll.x / sw).trunc() * sw).trunc();
        let urx = ((boundary.ur.x / sw - 1.0).trunc() * sw).trunc();
        self.num_x = ((urx - self.origin.x) / sw).trunc() as i64;
        self.num_x >= 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub axis: Axis,
    pub start: i64,
    pub count: i64,
    pub step: i64,
    #[serde(default)]
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GCellGrid {
    pub axis: Axis,
    pub start: i64,
    pub count: i64,
    pub step: i64,
}

/// A generated via defined in the design from a technology via rule. It
/// carries parameters only, no drawn geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignViaRule {
    pub name: String,
    pub rule: Option<String>,
    pub cut_size: [f64; 2],
    pub cut_layer: Option<String>,
    pub bottom_layer: Option<String>,
    pub top_layer: Option<String>,
    pub cut_spacing: [f64; 2],
    pub bottom_enclosure: [f64; 2],
    pub top_enclosure: [f64; 2],
    #[serde(default)]
    pub rowcol: Option<[i64; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockageKind {
    Placement,
    Routing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blockage {
    pub kind: BlockageKind,
    #[serde(default)]
    pub layer: Option<String>,
    /// Maximum placement density inside a partial placement blockage.
    #[serde(default)]
    pub partial: Option<f64>,
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub component: Option<String>,
}

impl Blockage {
    pub fn routing(layer: &str, rect: Rect, component: Option<&str>) -> Self {
        Self {
            kind: BlockageKind::Routing,
            layer: Some(layer.to_string()),
            partial: None,
            shapes: vec![Shape::rect(Some(layer), rect)],
            component: component.map(str::to_string),
        }
    }

    pub fn change_layer(&mut self, map: &NameMap, tech: &Technology) {
        let owner = match &self.component {
            Some(c) => format!("blockage of {c}"),
            None => "blockage".to_string(),
        };
        self.layer = retarget_layer(self.layer.as_deref(), map, tech, &owner);
        retarget_shapes(&mut self.shapes, map, tech, &owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SiteClass;

    fn site() -> Site {
        Site {
            name: "core".into(),
            class: Some(SiteClass::Core),
            symmetry: Vec::new(),
            width: 0.2,
            height: 1.4,
        }
    }

    fn row(y: f64) -> Row {
        Row {
            name: "ROW_0".into(),
            site: Some("core".into()),
            origin: Point::int(400.0, y),
            orientation: Orientation::N,
            num_x: 50,
            num_y: 1,
            step_x: 200.0,
            step_y: 0.0,
        }
    }

    #[test]
    fn test_fit_width() {
        let die = Rect::int(0.0, 0.0, 5100.0, 2800.0);
        let mut r = row(1400.0);
        assert!(r.fit_width(&die, &site(), 1000.0));
        assert_eq!(r.origin.x, 0.0);
        // last full site ends one site short of the boundary
        assert_eq!(r.num_x, 24);

        let mut outside = row(2000.0);
        assert!(!outside.fit_width(&die, &site(), 1000.0));

        let tiny = Rect::int(0.0, 0.0, 300.0, 2800.0);
        assert!(!row(0.0).fit_width(&tiny, &site(), 1000.0));
    }

    #[test]
    fn test_fit_width_multi_row_unchanged() {
        let die = Rect::int(0.0, 0.0, 5100.0, 2800.0);
        let mut r = row(0.0);
        r.num_y = 2;
        assert!(r.fit_width(&die, &site(), 1000.0));
        assert_eq!(r.num_x, 50);
    }

    #[test]
    fn test_row_rect() {
        let r = row(0.0);
        assert_eq!(r.rect(&site(), 1000.0), Rect::int(400.0, 0.0, 10400.0, 1400.0));
    }
}
