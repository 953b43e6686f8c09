use indexmap::IndexMap;

use super::axis::Axis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogOption {
    pub value: String,
    pub label: String,
    pub description: String,
}

/// Immutable per-axis option lists, identical for every session.
#[derive(Debug, Clone)]
pub struct OptionCatalog {
    axes: IndexMap<Axis, Vec<CatalogOption>>,
}

impl Default for OptionCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OptionCatalog {
    pub fn new(axes: Option<IndexMap<Axis, Vec<CatalogOption>>>) -> Self {
        Self {
            axes: axes.unwrap_or_else(default_options),
        }
    }

    pub fn options(&self, axis: Axis) -> &[CatalogOption] {
        self.axes
            .get(&axis)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, axis: Axis, value: &str) -> Option<&CatalogOption> {
        self.options(axis)
            .iter()
            .find(|option| option.value == value)
    }

    pub fn contains(&self, axis: Axis, value: &str) -> bool {
        self.get(axis, value).is_some()
    }

    /// Tooltip text for the currently selected value of `axis`.
    pub fn describe(&self, axis: Axis, value: Option<&str>) -> String {
        value
            .and_then(|value| self.get(axis, value))
            .map(|option| option.description.clone())
            .unwrap_or_else(|| placeholder_description(axis))
    }

    /// Maps user input onto a canonical option value, matching value or label
    /// without regard to ASCII case.
    pub fn resolve(&self, axis: Axis, input: &str) -> Option<&str> {
        let needle = input.trim();
        if needle.is_empty() {
            return None;
        }
        self.options(axis)
            .iter()
            .find(|option| {
                option.value.eq_ignore_ascii_case(needle)
                    || option.label.eq_ignore_ascii_case(needle)
            })
            .map(|option| option.value.as_str())
    }
}

pub fn placeholder_description(axis: Axis) -> String {
    format!("Select a {}", axis.label().to_ascii_lowercase())
}

fn default_options() -> IndexMap<Axis, Vec<CatalogOption>> {
    let mut map = IndexMap::new();

    let mut insert = |axis: Axis, rows: &[(&str, &str)]| {
        map.insert(
            axis,
            rows.iter()
                .map(|(value, description)| CatalogOption {
                    value: (*value).to_string(),
                    label: (*value).to_string(),
                    description: (*description).to_string(),
                })
                .collect(),
        );
    };

    insert(
        Axis::Choice,
        &[
            ("NPC", "Generate a detailed non-player character"),
            ("Village", "Create a small settlement with its inhabitants"),
            ("Town", "Design a larger settlement with various districts"),
            ("Lore", "Generate world-building lore and history"),
            ("Quest", "Create an adventure quest with objectives"),
            ("Dungeon", "Design a dungeon layout with encounters"),
            ("Shop", "Generate a merchant establishment"),
            ("Tavern", "Create a social gathering place"),
        ],
    );
    insert(
        Axis::Biome,
        &[
            ("Forest", "Wooded area with various trees"),
            ("Desert", "Arid, sandy environment"),
            ("Mountain", "Rocky, elevated terrain"),
            ("Swamp", "Wet, marshy area"),
            ("Tundra", "Cold, frozen landscape"),
            ("Jungle", "Dense, tropical vegetation"),
            ("Plains", "Open, grassy area"),
        ],
    );
    insert(
        Axis::Features,
        &[
            ("Ancient", "Historical or aged elements"),
            ("Magical", "Supernatural or enchanted aspects"),
            ("Dangerous", "Hazardous or threatening elements"),
            ("Peaceful", "Calm, tranquil atmosphere"),
            ("Secret", "Hidden or concealed elements"),
            ("Sacred", "Religious or holy aspects"),
        ],
    );
    insert(
        Axis::Constriction,
        &[
            ("No Wind", "Environment without wind effects"),
            ("No Sand", "Location without sand or desert elements"),
            ("No People", "Area devoid of humanoid presence"),
            ("No Water", "Setting without water sources"),
            ("No Magic", "Non-magical environment"),
            ("No Light", "Dark or dimly lit area"),
            ("No Sound", "Silent or soundless environment"),
        ],
    );
    insert(
        Axis::TextStyle,
        &[
            ("Descriptive", "Detailed, vivid descriptions"),
            ("Concise", "Brief, to-the-point writing"),
            ("Poetic", "Flowery, lyrical language"),
            ("Technical", "Precise, mechanical details"),
            ("Mysterious", "Enigmatic, cryptic tone"),
            ("Humorous", "Light-hearted, funny style"),
        ],
    );

    map
}
