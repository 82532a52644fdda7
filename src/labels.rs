//! Label classes and the active-label / active-instance selection.
//!
//! Labels are created by project configuration outside the core; the core only
//! flips `visible` and fills `instance_shades` the first time instance mode
//! needs them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Opaque RGB colour, serialized as `#rrggbb`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct LabelColor(pub [u8; 3]);

impl LabelColor {
    pub const WHITE: LabelColor = LabelColor([255, 255, 255]);

    pub fn from_hex(hex: &str) -> Result<Self, EngineError> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(EngineError::InvalidColor(hex.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| EngineError::InvalidColor(hex.to_string()))
        };
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }

    pub fn to_hex(self) -> String {
        let [r, g, b] = self.0;
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }

    /// Opaque RGBA pixel of this colour.
    pub fn rgba(self) -> image::Rgba<u8> {
        let [r, g, b] = self.0;
        image::Rgba([r, g, b, 255])
    }

    /// Squared RGB distance, used to classify pixels against a shade palette.
    pub fn distance_sq(self, rgb: [u8; 3]) -> u32 {
        self.0
            .iter()
            .zip(rgb.iter())
            .map(|(&a, &b)| {
                let d = a as i32 - b as i32;
                (d * d) as u32
            })
            .sum()
    }
}

impl fmt::Display for LabelColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for LabelColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LabelColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        LabelColor::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// `n` progressively darker shades of `base`; shade 0 is `base` itself.
pub fn generate_shades(base: LabelColor, n: usize) -> Vec<LabelColor> {
    let [r, g, b] = base.0;
    (0..n)
        .map(|i| {
            let k = 1.0 - i as f32 / n as f32;
            LabelColor([
                (r as f32 * k).floor() as u8,
                (g as f32 * k).floor() as u8,
                (b as f32 * k).floor() as u8,
            ])
        })
        .collect()
}

/// One paintable class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: LabelColor,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub instance_shades: Option<Vec<LabelColor>>,
}

fn default_visible() -> bool {
    true
}

impl Label {
    pub fn new(name: impl Into<String>, color: LabelColor) -> Self {
        Self {
            name: name.into(),
            color,
            visible: true,
            instance_shades: None,
        }
    }

    /// Populate the instance palette on first use. A non-empty palette is kept;
    /// an empty one is regenerated.
    pub fn ensure_shades(&mut self, count: usize) -> &[LabelColor] {
        if self.instance_shades.as_ref().is_none_or(Vec::is_empty) {
            self.instance_shades = Some(generate_shades(self.color, count.max(1)));
        }
        self.instance_shades.as_deref().unwrap_or_default()
    }
}

/// The instance currently painted in instance-segmentation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveInstance {
    pub instance: usize,
    pub shade: LabelColor,
}

/// Ordered label list plus the current selection.
#[derive(Clone, Debug, Default)]
pub struct LabelSet {
    labels: Vec<Label>,
    active: Option<usize>,
    active_instance: Option<ActiveInstance>,
    show_all: bool,
}

impl LabelSet {
    pub fn new(labels: Vec<Label>) -> Self {
        let mut set = Self {
            show_all: true,
            ..Self::default()
        };
        for label in labels {
            set.add(label);
        }
        set
    }

    /// Add a label unless one with the same name exists. The first label added
    /// becomes active.
    pub fn add(&mut self, label: Label) -> bool {
        if self.labels.iter().any(|l| l.name == label.name) {
            log::debug!("label {:?} already exists, ignoring", label.name);
            return false;
        }
        self.labels.push(label);
        if self.active.is_none() {
            self.active = Some(self.labels.len() - 1);
        }
        true
    }

    /// Remove by name. Clears the selection if the active label goes away.
    pub fn remove(&mut self, name: &str) -> Option<Label> {
        let index = self.index_of(name)?;
        let removed = self.labels.remove(index);
        self.active = match self.active {
            Some(a) if a == index => {
                self.active_instance = None;
                None
            }
            Some(a) if a > index => Some(a - 1),
            other => other,
        };
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Label> {
        self.labels.get_mut(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|l| l.name == name)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<&Label> {
        self.active.and_then(|i| self.labels.get(i))
    }

    /// Select a label by name; `None` deselects. Switching label drops the
    /// active instance since shades belong to one label.
    pub fn set_active(&mut self, name: Option<&str>) -> Option<usize> {
        let next = name.and_then(|n| self.index_of(n));
        if next != self.active {
            self.active_instance = None;
        }
        self.active = next;
        next
    }

    pub fn active_instance(&self) -> Option<ActiveInstance> {
        self.active_instance
    }

    /// Pick an instance of the active label explicitly.
    pub fn set_active_instance(&mut self, instance: usize, shade_count: usize) -> Option<ActiveInstance> {
        let index = self.active?;
        let shades = self.labels[index].ensure_shades(shade_count);
        let shade = *shades.get(instance)?;
        self.active_instance = Some(ActiveInstance { instance, shade });
        self.active_instance
    }

    /// Advance to the next instance shade, wrapping at the end of the palette.
    /// With no active instance the first shade is selected.
    pub fn increment_active_instance(&mut self, shade_count: usize) -> Option<ActiveInstance> {
        let index = self.active?;
        let shades = self.labels[index].ensure_shades(shade_count);
        let next = match self.active_instance {
            None => 0,
            Some(current) => (current.instance + 1) % shades.len(),
        };
        self.active_instance = Some(ActiveInstance {
            instance: next,
            shade: shades[next],
        });
        self.active_instance
    }

    /// Flip visibility of every label together.
    pub fn toggle_all_visibility(&mut self) -> bool {
        self.show_all = !self.show_all;
        for label in &mut self.labels {
            label.visible = self.show_all;
        }
        self.show_all
    }
}
