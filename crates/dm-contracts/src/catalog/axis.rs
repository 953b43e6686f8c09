use std::fmt;

use serde::Serialize;

/// One of the five independent parameter dimensions a generation request is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Choice,
    Biome,
    Features,
    Constriction,
    TextStyle,
}

impl Axis {
    /// Catalog order. Also the order in which settings are rendered and missing
    /// fields are reported.
    pub const ALL: [Axis; 5] = [
        Axis::Choice,
        Axis::Biome,
        Axis::Features,
        Axis::Constriction,
        Axis::TextStyle,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Axis::Choice => "Choice",
            Axis::Biome => "Biome",
            Axis::Features => "Features",
            Axis::Constriction => "Constriction",
            Axis::TextStyle => "Text Style",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Axis::Choice => "choice",
            Axis::Biome => "biome",
            Axis::Features => "features",
            Axis::Constriction => "constriction",
            Axis::TextStyle => "text_style",
        }
    }

    /// Constriction may be left unset; every other axis must be chosen before submitting.
    pub fn is_required(self) -> bool {
        !matches!(self, Axis::Constriction)
    }

    pub fn parse(raw: &str) -> Option<Axis> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        match normalized.as_str() {
            "choice" => Some(Axis::Choice),
            "biome" => Some(Axis::Biome),
            "features" | "feature" => Some(Axis::Features),
            "constriction" | "constrictions" => Some(Axis::Constriction),
            "style" | "text_style" | "textstyle" => Some(Axis::TextStyle),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
