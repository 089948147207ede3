//! DOM result types shared by the page operations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position and size of an element in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X coordinate (left edge).
    pub x: f64,

    /// Y coordinate (top edge).
    pub y: f64,

    /// Width.
    pub width: f64,

    /// Height.
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// A zero-area box is not capturable.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// An element record as produced by the in-page picker script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomElement {
    /// Lowercased tag name.
    pub tag_name: String,

    /// Element id, when present.
    #[serde(default)]
    pub id: Option<String>,

    /// Class list.
    #[serde(default)]
    pub class_names: Vec<String>,

    /// Best-effort CSS selector path to the element.
    pub selector: String,

    /// Trimmed text content, capped by the picker script.
    #[serde(default)]
    pub text: Option<String>,

    /// All attributes present on the element.
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Viewport-relative bounding box.
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}
