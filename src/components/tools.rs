use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    Pan,
    #[default]
    Pen,
    Eraser,
    Lasso,
    LassoEraser,
}

/// Tools grouped by what they do to the active label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolFamily {
    Navigation,
    /// Adds pixels (Pen, Lasso). Swap-markers applies here.
    Drawing,
    /// Removes pixels (Eraser, LassoEraser). Erase-all applies here.
    Erasing,
}

impl Tool {
    pub const COUNT: usize = 5;

    pub const ALL: [Tool; Tool::COUNT] = [
        Tool::Pan,
        Tool::Pen,
        Tool::Eraser,
        Tool::Lasso,
        Tool::LassoEraser,
    ];

    /// Stable numeric id shared with toolbars and recorded scripts.
    pub fn id(self) -> u8 {
        match self {
            Tool::Pan => 0,
            Tool::Pen => 1,
            Tool::Lasso => 2,
            Tool::LassoEraser => 3,
            Tool::Eraser => 8,
        }
    }

    pub fn from_id(id: u8) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.id() == id)
    }

    /// Position in [`Tool::ALL`], used to index handler tables.
    pub fn slot(self) -> usize {
        match self {
            Tool::Pan => 0,
            Tool::Pen => 1,
            Tool::Eraser => 2,
            Tool::Lasso => 3,
            Tool::LassoEraser => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tool::Pan => "pan",
            Tool::Pen => "pen",
            Tool::Eraser => "eraser",
            Tool::Lasso => "lasso",
            Tool::LassoEraser => "lasso-eraser",
        }
    }

    pub fn family(self) -> ToolFamily {
        match self {
            Tool::Pan => ToolFamily::Navigation,
            Tool::Pen | Tool::Lasso => ToolFamily::Drawing,
            Tool::Eraser | Tool::LassoEraser => ToolFamily::Erasing,
        }
    }

    pub fn is_drawing_tool(self) -> bool {
        self.family() == ToolFamily::Drawing
    }

    pub fn is_eraser(self) -> bool {
        self.family() == ToolFamily::Erasing
    }

    pub fn is_lasso(self) -> bool {
        matches!(self, Tool::Lasso | Tool::LassoEraser)
    }

    /// Tools whose footprint depends on the brush width.
    pub fn has_brush_size(self) -> bool {
        matches!(self, Tool::Pen | Tool::Eraser)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tool {s:?}"))
    }
}

/// One entry per tool, indexed by [`Tool::slot`].
pub struct ToolTable<H>(pub [H; Tool::COUNT]);

impl<H> ToolTable<H> {
    pub fn get(&self, tool: Tool) -> &H {
        &self.0[tool.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_match_all_order() {
        for (i, tool) in Tool::ALL.into_iter().enumerate() {
            assert_eq!(tool.slot(), i);
            assert_eq!(Tool::from_id(tool.id()), Some(tool));
            assert_eq!(tool.name().parse::<Tool>(), Ok(tool));
        }
        assert_eq!(Tool::from_id(5), None);
    }

    #[test]
    fn families() {
        assert!(Tool::Lasso.is_drawing_tool());
        assert!(Tool::LassoEraser.is_eraser());
        assert!(!Tool::Pan.is_drawing_tool() && !Tool::Pan.is_eraser());
        assert!(Tool::Eraser.has_brush_size());
        assert!(!Tool::Lasso.has_brush_size());
    }

    #[test]
    fn table_lookup() {
        let table = ToolTable(Tool::ALL.map(|t| t.name()));
        assert_eq!(*table.get(Tool::LassoEraser), "lasso-eraser");
    }
}
