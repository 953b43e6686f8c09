mod axis;
mod registry;
mod selection;

pub use axis::Axis;
pub use registry::{placeholder_description, CatalogOption, OptionCatalog};
pub use selection::ParameterSelection;
