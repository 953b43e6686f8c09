use super::axis::Axis;
use super::registry::OptionCatalog;

/// Current value of each axis. Empty or whitespace-only input leaves an axis unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSelection {
    pub choice: Option<String>,
    pub biome: Option<String>,
    pub features: Option<String>,
    pub constriction: Option<String>,
    pub text_style: Option<String>,
}

impl ParameterSelection {
    pub fn get(&self, axis: Axis) -> Option<&str> {
        self.slot(axis).as_deref()
    }

    /// Stores `value` as given. Blank input leaves the axis unset.
    pub fn set(&mut self, axis: Axis, value: Option<&str>) {
        *self.slot_mut(axis) = value
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string);
    }

    /// Required axes without a value, in catalog order.
    pub fn missing_required(&self) -> Vec<Axis> {
        Axis::ALL
            .into_iter()
            .filter(|axis| axis.is_required() && self.get(*axis).is_none())
            .collect()
    }

    /// Set values the catalog does not know about, in catalog order.
    pub fn unknown_values(&self, catalog: &OptionCatalog) -> Vec<(Axis, String)> {
        Axis::ALL
            .into_iter()
            .filter_map(|axis| {
                let value = self.get(axis)?;
                (!catalog.contains(axis, value)).then(|| (axis, value.to_string()))
            })
            .collect()
    }

    /// Fails with every set value the catalog does not know about.
    pub fn validate(&self, catalog: &OptionCatalog) -> Result<(), Vec<(Axis, String)>> {
        let unknown = self.unknown_values(catalog);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(unknown)
        }
    }

    fn slot(&self, axis: Axis) -> &Option<String> {
        match axis {
            Axis::Choice => &self.choice,
            Axis::Biome => &self.biome,
            Axis::Features => &self.features,
            Axis::Constriction => &self.constriction,
            Axis::TextStyle => &self.text_style,
        }
    }

    fn slot_mut(&mut self, axis: Axis) -> &mut Option<String> {
        match axis {
            Axis::Choice => &mut self.choice,
            Axis::Biome => &mut self.biome,
            Axis::Features => &mut self.features,
            Axis::Constriction => &mut self.constriction,
            Axis::TextStyle => &mut self.text_style,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Axis, OptionCatalog, ParameterSelection};

    #[test]
    fn blank_values_unset_the_axis() {
        let mut selection = ParameterSelection::default();
        selection.set(Axis::Biome, Some("Forest"));
        assert_eq!(selection.get(Axis::Biome), Some("Forest"));
        selection.set(Axis::Biome, Some("   "));
        assert_eq!(selection.get(Axis::Biome), None);
        selection.set(Axis::Biome, Some("\t\n"));
        assert_eq!(selection.get(Axis::Biome), None);
    }

    #[test]
    fn non_blank_values_are_kept_verbatim() {
        let mut selection = ParameterSelection::default();
        selection.set(Axis::Choice, Some("  Old Mill "));
        assert_eq!(selection.get(Axis::Choice), Some("  Old Mill "));
    }

    #[test]
    fn missing_required_skips_constriction() {
        let mut selection = ParameterSelection::default();
        selection.set(Axis::Biome, Some("Forest"));
        assert_eq!(
            selection.missing_required(),
            vec![Axis::Choice, Axis::Features, Axis::TextStyle]
        );
    }

    #[test]
    fn unknown_values_reports_off_catalog_entries() {
        let catalog = OptionCatalog::default();
        let mut selection = ParameterSelection::default();
        selection.set(Axis::Choice, Some("encounter"));
        selection.set(Axis::Biome, Some("Forest"));
        selection.set(Axis::TextStyle, Some("in a descriptive style"));
        assert_eq!(
            selection.unknown_values(&catalog),
            vec![
                (Axis::Choice, "encounter".to_string()),
                (Axis::TextStyle, "in a descriptive style".to_string()),
            ]
        );
        assert_eq!(
            selection.validate(&catalog),
            Err(selection.unknown_values(&catalog))
        );

        selection.set(Axis::Choice, Some("NPC"));
        selection.set(Axis::TextStyle, None);
        assert_eq!(selection.validate(&catalog), Ok(()));
    }
}
