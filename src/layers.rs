// ============================================================================
// Layer data model: Layer, LayerStack, PixelCoord, LayerMap
// ============================================================================

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::color::{Color, blend};
use crate::palette::{OpacityTable, Palette};

/// Hard capacity of a [`LayerStack`]. `max_layers` is validated against it.
pub const MAX_STACK: usize = 4;

/// One brush pass: a palette color at an opacity level (both by index).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Layer {
    pub color: u8,
    pub opacity: u8,
}

impl Layer {
    pub const fn new(color: u8, opacity: u8) -> Self {
        Self { color, opacity }
    }
}

/// Ordered layers applied bottom-to-top over a background.
///
/// Stored inline so a stack is `Copy`; unused slots are kept at
/// `Layer::default()` so derived equality and hashing stay consistent.
/// Serialized as a plain list; decoding rejects lists longer than
/// [`MAX_STACK`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Layer>", into = "Vec<Layer>")]
pub struct LayerStack {
    layers: [Layer; MAX_STACK],
    len: u8,
}

impl LayerStack {
    pub const EMPTY: LayerStack = LayerStack { layers: [Layer::new(0, 0); MAX_STACK], len: 0 };

    /// Build from a slice. Panics when `layers` exceeds [`MAX_STACK`].
    pub fn from_layers(layers: &[Layer]) -> Self {
        assert!(layers.len() <= MAX_STACK, "layer stack holds at most {} layers", MAX_STACK);
        let mut stack = Self::EMPTY;
        for &l in layers {
            stack.push(l);
        }
        stack
    }

    /// Append a layer. Panics when the stack is full.
    pub fn push(&mut self, layer: Layer) {
        let i = self.len as usize;
        assert!(i < MAX_STACK, "layer stack is full");
        self.layers[i] = layer;
        self.len += 1;
    }

    pub fn as_slice(&self) -> &[Layer] {
        &self.layers[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.as_slice().iter()
    }

    /// Fold the stack onto `background` with [`blend`].
    pub fn apply(&self, background: Color, palette: &Palette, opacities: &OpacityTable) -> Color {
        self.iter().fold(background, |acc, l| {
            blend(acc, palette.get(l.color), opacities.get(l.opacity))
        })
    }
}

impl TryFrom<Vec<Layer>> for LayerStack {
    type Error = String;

    fn try_from(layers: Vec<Layer>) -> Result<Self, Self::Error> {
        if layers.len() > MAX_STACK {
            return Err(format!("{} layers in one stack (max {})", layers.len(), MAX_STACK));
        }
        Ok(Self::from_layers(&layers))
    }
}

impl From<LayerStack> for Vec<Layer> {
    fn from(stack: LayerStack) -> Self {
        stack.as_slice().to_vec()
    }
}

impl PartialOrd for LayerStack {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LayerStack {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|l| (l.color, l.opacity)))
            .finish()
    }
}

/// Pixel position. Orders row-major (y first) so map iteration walks scanlines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelCoord {
    pub x: u32,
    pub y: u32,
}

impl PixelCoord {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl PartialOrd for PixelCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PixelCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

/// Sparse pixel → stack assignment. Only pixels that need paint are present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMap {
    entries: BTreeMap<PixelCoord, LayerStack>,
}

impl LayerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pixel's stack; empty stacks are dropped.
    pub(crate) fn insert(&mut self, at: PixelCoord, stack: LayerStack) {
        if !stack.is_empty() {
            self.entries.insert(at, stack);
        }
    }

    /// Union with a map covering a disjoint set of pixels.
    pub(crate) fn merge(&mut self, other: LayerMap) {
        debug_assert!(
            other.entries.keys().all(|k| !self.entries.contains_key(k)),
            "merged layer maps must cover disjoint pixels"
        );
        self.entries.extend(other.entries);
    }

    pub fn get(&self, at: PixelCoord) -> Option<&LayerStack> {
        self.entries.get(&at)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PixelCoord, &LayerStack)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total brush passes across all pixels.
    pub fn layer_count(&self) -> usize {
        self.entries.values().map(LayerStack::len).sum()
    }
}

impl FromIterator<(PixelCoord, LayerStack)> for LayerMap {
    fn from_iter<I: IntoIterator<Item = (PixelCoord, LayerStack)>>(iter: I) -> Self {
        let mut map = LayerMap::new();
        for (at, stack) in iter {
            map.insert(at, stack);
        }
        map
    }
}
