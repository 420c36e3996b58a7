// THEORY:
// The export form is a cascade: a region unlocks its collections, a collection
// unlocks the territory tables, a table (optionally narrowed by state, property
// and feature) unlocks the data types, and a data type unlocks its periods.
// Instead of callbacks mutating shared state, the cascade is an explicit state
// machine:
//
//     Empty -> RegionChosen -> CollectionChosen -> FeatureChosen
//           -> DataTypeChosen -> Ready
//
// Key architectural principles:
// 1.  **Pure Transitions**: `transition` maps `(selection, input)` to the next
//     selection plus a list of `Effect`s. It performs no I/O; the host (a UI, the
//     CLI runner, a test) decides how to carry the effects out.
// 2.  **Reset Downstream**: Choosing something at a higher level discards every
//     choice below it. A new collection forgets the table, a new feature forgets
//     the data type and periods, and so on.
// 3.  **Errors Leave State Untouched**: An out-of-order or unknown input returns
//     an error and the caller keeps its previous selection.
// 4.  **Placeholder is a No-Op**: Choosing the `"None"` entry of a pick list
//     produces neither a state change nor effects.
//
// `Ready` means a data type is chosen and at least one period is checked. It is
// the only stage from which an export can be planned.

use crate::core_modules::catalog::{
    CollectionVersion, DataProduct, NONE_LABEL, RegionKey, buffer_distance, catalog, state_code,
};
use crate::error::{Result, ToolkitError};
use std::collections::BTreeSet;

/// Region and collection a selection draws its rasters from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dataset {
    pub region: RegionKey,
    pub collection: CollectionVersion,
}

/// Which part of which vector table the export is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureTarget {
    /// Asset id of the table.
    pub table: String,
    /// IBGE code the table is narrowed to, if any.
    pub state: Option<u8>,
    pub property: Option<String>,
    /// Value of `property` identifying the chosen feature(s).
    pub feature: Option<String>,
}

impl FeatureTarget {
    pub fn table(asset: impl Into<String>) -> Self {
        Self {
            table: asset.into(),
            state: None,
            property: None,
            feature: None,
        }
    }

    pub fn table_name(&self) -> &str {
        self.table.rsplit('/').next().unwrap_or(&self.table)
    }

    /// Name shown for map layers and used in export file names.
    pub fn layer_label(&self) -> &str {
        self.feature.as_deref().unwrap_or_else(|| self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Stage {
    #[default]
    Empty,
    RegionChosen {
        region: RegionKey,
    },
    CollectionChosen {
        dataset: Dataset,
    },
    FeatureChosen {
        dataset: Dataset,
        target: FeatureTarget,
    },
    DataTypeChosen {
        dataset: Dataset,
        target: FeatureTarget,
        data_type: DataProduct,
    },
    Ready {
        dataset: Dataset,
        target: FeatureTarget,
        data_type: DataProduct,
        periods: BTreeSet<String>,
    },
}

impl Stage {
    pub fn region(&self) -> Option<RegionKey> {
        match self {
            Stage::Empty => None,
            Stage::RegionChosen { region } => Some(*region),
            other => other.dataset().map(|d| d.region),
        }
    }

    pub fn dataset(&self) -> Option<Dataset> {
        match self {
            Stage::Empty | Stage::RegionChosen { .. } => None,
            Stage::CollectionChosen { dataset }
            | Stage::FeatureChosen { dataset, .. }
            | Stage::DataTypeChosen { dataset, .. }
            | Stage::Ready { dataset, .. } => Some(*dataset),
        }
    }

    pub fn target(&self) -> Option<&FeatureTarget> {
        match self {
            Stage::FeatureChosen { target, .. }
            | Stage::DataTypeChosen { target, .. }
            | Stage::Ready { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn data_type(&self) -> Option<DataProduct> {
        match self {
            Stage::DataTypeChosen { data_type, .. } | Stage::Ready { data_type, .. } => {
                Some(*data_type)
            }
            _ => None,
        }
    }

    pub fn periods(&self) -> Option<&BTreeSet<String>> {
        match self {
            Stage::Ready { periods, .. } => Some(periods),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Empty => "empty",
            Stage::RegionChosen { .. } => "region-chosen",
            Stage::CollectionChosen { .. } => "collection-chosen",
            Stage::FeatureChosen { .. } => "feature-chosen",
            Stage::DataTypeChosen { .. } => "data-type-chosen",
            Stage::Ready { .. } => "ready",
        }
    }
}

/// One user action, carrying the pick-list entry exactly as shown.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionInput {
    ChooseRegion(String),
    ChooseCollection(String),
    ChooseTable(String),
    ChooseState(String),
    ChooseProperty(String),
    ChooseFeature(String),
    ChooseDataType(String),
    ChooseBuffer(String),
    TogglePeriod { period: String, checked: bool },
}

/// Work the host should carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ClearMap,
    PopulateCollections(Vec<CollectionVersion>),
    /// Run table discovery for the region and show the result.
    DiscoverTables(RegionKey),
    LoadCollection(Dataset),
    ShowPreview { dataset: Dataset, period: String },
    LoadTable(String),
    FilterTableByState(u8),
    ShowOutline { label: String },
    /// List the property names of the loaded table.
    PopulateProperties,
    PopulateFeatureNames { property: String },
    PopulateDataTypes(Vec<DataProduct>),
    RebuildLayerList { label: String, periods: Vec<String> },
    AddImageLayer { label: String, period: String },
    RemoveImageLayer { label: String },
    SetExportEnabled(bool),
}

/// A complete, validated selection handed to export planning.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSelection {
    pub dataset: Dataset,
    pub target: FeatureTarget,
    pub data_type: DataProduct,
    /// Checked periods, oldest first.
    pub periods: Vec<String>,
    /// Buffer distance in meters; zero for none.
    pub buffer_distance: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    stage: Stage,
    buffer_distance: f64,
}

/// The next selection and its effects. `current` is never modified.
pub fn transition(current: &Selection, input: SelectionInput) -> Result<(Selection, Vec<Effect>)> {
    let mut next = current.clone();
    let effects = next.apply(input)?;
    Ok((next, effects))
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn buffer_distance(&self) -> f64 {
        self.buffer_distance
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.stage, Stage::Ready { .. })
    }

    /// Applies `input` in place. On error the selection is unchanged.
    pub fn apply(&mut self, input: SelectionInput) -> Result<Vec<Effect>> {
        let was_ready = self.is_ready();
        let mut effects = self.step(input)?;
        if was_ready != self.is_ready() {
            effects.push(Effect::SetExportEnabled(self.is_ready()));
        }
        Ok(effects)
    }

    pub fn export_selection(&self) -> Result<ExportSelection> {
        match &self.stage {
            Stage::Ready {
                dataset,
                target,
                data_type,
                periods,
            } => Ok(ExportSelection {
                dataset: *dataset,
                target: target.clone(),
                data_type: *data_type,
                periods: periods.iter().cloned().collect(),
                buffer_distance: self.buffer_distance,
            }),
            other => Err(ToolkitError::incomplete(format!(
                "export needs a data type and at least one period (selection is {})",
                other.name()
            ))),
        }
    }

    fn step(&mut self, input: SelectionInput) -> Result<Vec<Effect>> {
        match input {
            SelectionInput::ChooseBuffer(label) => {
                self.buffer_distance = buffer_distance(&label)?;
                Ok(Vec::new())
            }
            SelectionInput::TogglePeriod { period, checked } => self.toggle_period(period, checked),
            SelectionInput::ChooseRegion(name)
            | SelectionInput::ChooseCollection(name)
            | SelectionInput::ChooseTable(name)
            | SelectionInput::ChooseState(name)
            | SelectionInput::ChooseProperty(name)
            | SelectionInput::ChooseFeature(name)
            | SelectionInput::ChooseDataType(name)
                if name == NONE_LABEL =>
            {
                Ok(Vec::new())
            }
            SelectionInput::ChooseRegion(name) => self.choose_region(&name),
            SelectionInput::ChooseCollection(name) => self.choose_collection(&name),
            SelectionInput::ChooseTable(asset) => self.choose_table(asset),
            SelectionInput::ChooseState(name) => self.choose_state(&name),
            SelectionInput::ChooseProperty(name) => self.choose_property(name),
            SelectionInput::ChooseFeature(label) => self.choose_feature(label),
            SelectionInput::ChooseDataType(name) => self.choose_data_type(&name),
        }
    }

    fn choose_region(&mut self, name: &str) -> Result<Vec<Effect>> {
        let region: RegionKey = name.parse()?;
        let entry = catalog().region(region)?;
        self.stage = Stage::RegionChosen { region };
        Ok(vec![
            Effect::ClearMap,
            Effect::PopulateCollections(entry.collection_list()),
            Effect::DiscoverTables(region),
        ])
    }

    fn choose_collection(&mut self, name: &str) -> Result<Vec<Effect>> {
        let region = self
            .stage
            .region()
            .ok_or_else(|| ToolkitError::incomplete("choose a region before a collection"))?;
        let collection: CollectionVersion = name.parse()?;
        let preview = catalog()
            .product(region, collection, DataProduct::DeforestationSecondaryVegetation)?
            .last_period();
        let dataset = Dataset { region, collection };
        self.stage = Stage::CollectionChosen { dataset };
        Ok(vec![
            Effect::LoadCollection(dataset),
            Effect::ClearMap,
            Effect::ShowPreview {
                dataset,
                period: preview,
            },
        ])
    }

    fn choose_table(&mut self, asset: String) -> Result<Vec<Effect>> {
        let dataset = self
            .stage
            .dataset()
            .ok_or_else(|| ToolkitError::incomplete("choose a collection before a table"))?;
        let target = FeatureTarget::table(asset.clone());
        let label = target.layer_label().to_string();
        self.stage = Stage::FeatureChosen { dataset, target };
        Ok(vec![
            Effect::ClearMap,
            Effect::LoadTable(asset),
            Effect::ShowOutline { label },
            Effect::PopulateProperties,
            Effect::PopulateDataTypes(data_types(dataset)?),
        ])
    }

    fn choose_state(&mut self, name: &str) -> Result<Vec<Effect>> {
        let (dataset, table) = self.chosen_table("choose a table before a state")?;
        let Some(code) = state_code(name)? else {
            return Ok(Vec::new());
        };
        let target = FeatureTarget {
            state: Some(code),
            ..FeatureTarget::table(table)
        };
        let label = target.layer_label().to_string();
        self.stage = Stage::FeatureChosen { dataset, target };
        Ok(vec![
            Effect::ClearMap,
            Effect::FilterTableByState(code),
            Effect::ShowOutline { label },
            Effect::PopulateProperties,
            Effect::PopulateDataTypes(data_types(dataset)?),
        ])
    }

    fn choose_property(&mut self, property: String) -> Result<Vec<Effect>> {
        let (dataset, target) = self.chosen_target("choose a table before a property")?;
        let target = FeatureTarget {
            property: Some(property.clone()),
            feature: None,
            ..target
        };
        self.stage = Stage::FeatureChosen { dataset, target };
        Ok(vec![Effect::PopulateFeatureNames { property }])
    }

    fn choose_feature(&mut self, label: String) -> Result<Vec<Effect>> {
        let (dataset, target) = self.chosen_target("choose a table before a feature")?;
        if target.property.is_none() {
            return Err(ToolkitError::incomplete("choose a property before a feature"));
        }
        let target = FeatureTarget {
            feature: Some(label.clone()),
            ..target
        };
        self.stage = Stage::FeatureChosen { dataset, target };
        Ok(vec![
            Effect::ClearMap,
            Effect::ShowOutline { label },
            Effect::PopulateDataTypes(data_types(dataset)?),
        ])
    }

    fn choose_data_type(&mut self, name: &str) -> Result<Vec<Effect>> {
        let (dataset, target) = self.chosen_target("choose a table before a data type")?;
        let data_type: DataProduct = name.parse()?;
        let entry = catalog().product(dataset.region, dataset.collection, data_type)?;
        let effect = Effect::RebuildLayerList {
            label: target.layer_label().to_string(),
            periods: entry.periods(),
        };
        self.stage = Stage::DataTypeChosen {
            dataset,
            target,
            data_type,
        };
        Ok(vec![effect])
    }

    fn toggle_period(&mut self, period: String, checked: bool) -> Result<Vec<Effect>> {
        let (Some(dataset), Some(target), Some(data_type)) = (
            self.stage.dataset(),
            self.stage.target().cloned(),
            self.stage.data_type(),
        ) else {
            return Err(ToolkitError::incomplete("choose a data type before a period"));
        };
        let entry = catalog().product(dataset.region, dataset.collection, data_type)?;
        if !entry.has_period(&period) {
            return Err(ToolkitError::UnknownKey {
                kind: "period",
                key: format!("{period} for {data_type} in {}", dataset.collection),
            });
        }

        let mut periods = self.stage.periods().cloned().unwrap_or_default();
        let label = format!("{} {}", target.layer_label(), period);
        let effect = if checked {
            periods.insert(period.clone());
            Effect::AddImageLayer { label, period }
        } else {
            periods.remove(&period);
            Effect::RemoveImageLayer { label }
        };

        self.stage = if periods.is_empty() {
            Stage::DataTypeChosen {
                dataset,
                target,
                data_type,
            }
        } else {
            Stage::Ready {
                dataset,
                target,
                data_type,
                periods,
            }
        };
        Ok(vec![effect])
    }

    fn chosen_target(&self, message: &str) -> Result<(Dataset, FeatureTarget)> {
        match (self.stage.dataset(), self.stage.target()) {
            (Some(dataset), Some(target)) => Ok((dataset, target.clone())),
            _ => Err(ToolkitError::incomplete(message)),
        }
    }

    fn chosen_table(&self, message: &str) -> Result<(Dataset, String)> {
        self.chosen_target(message)
            .map(|(dataset, target)| (dataset, target.table))
    }
}

fn data_types(dataset: Dataset) -> Result<Vec<DataProduct>> {
    Ok(catalog()
        .collection(dataset.region, dataset.collection)?
        .data_types())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIOMES: &str =
        "projects/mapbiomas-territories/assets/TERRITORIES/LULC/BRAZIL/COLLECTION9/WORKSPACE/BIOMES";

    fn choose(selection: &mut Selection, input: SelectionInput) -> Vec<Effect> {
        selection.apply(input).expect("transition")
    }

    fn up_to_data_type(collection: &str, data_type: &str) -> Selection {
        let mut s = Selection::new();
        choose(&mut s, SelectionInput::ChooseRegion("mapbiomas-brazil".into()));
        choose(&mut s, SelectionInput::ChooseCollection(collection.into()));
        choose(&mut s, SelectionInput::ChooseTable(BIOMES.into()));
        choose(&mut s, SelectionInput::ChooseProperty("name".into()));
        choose(&mut s, SelectionInput::ChooseFeature("Pampa".into()));
        choose(&mut s, SelectionInput::ChooseDataType(data_type.into()));
        s
    }

    #[test]
    fn happy_path_reaches_ready() {
        let mut s = Selection::new();
        let effects = choose(&mut s, SelectionInput::ChooseRegion("mapbiomas-brazil".into()));
        assert!(matches!(s.stage(), Stage::RegionChosen { .. }));
        assert!(effects.contains(&Effect::DiscoverTables(RegionKey::MapbiomasBrazil)));

        let effects = choose(&mut s, SelectionInput::ChooseCollection("collection-9.0".into()));
        assert!(effects.iter().any(|e| matches!(e, Effect::ShowPreview { period, .. } if period == "2023")));

        choose(&mut s, SelectionInput::ChooseTable(BIOMES.into()));
        assert_eq!(s.stage().target().map(|t| t.layer_label()), Some("BIOMES"));

        choose(&mut s, SelectionInput::ChooseProperty("name".into()));
        choose(&mut s, SelectionInput::ChooseFeature("Pampa".into()));
        let effects = choose(
            &mut s,
            SelectionInput::ChooseDataType("deforestation_sec_vegetation".into()),
        );
        assert!(matches!(&effects[0], Effect::RebuildLayerList { label, periods }
            if label == "Pampa" && periods.len() == 38));

        let effects = choose(
            &mut s,
            SelectionInput::TogglePeriod {
                period: "2020".into(),
                checked: true,
            },
        );
        assert!(s.is_ready());
        assert_eq!(
            effects,
            vec![
                Effect::AddImageLayer {
                    label: "Pampa 2020".into(),
                    period: "2020".into()
                },
                Effect::SetExportEnabled(true),
            ]
        );

        choose(&mut s, SelectionInput::ChooseBuffer("2km".into()));
        let export = s.export_selection().expect("ready");
        assert_eq!(export.periods, vec!["2020"]);
        assert_eq!(export.buffer_distance, 2_000.0);
        assert_eq!(export.target.feature.as_deref(), Some("Pampa"));
    }

    #[test]
    fn out_of_order_input_is_rejected_and_state_kept() {
        let s = Selection::new();
        let result = transition(&s, SelectionInput::ChooseCollection("collection-9.0".into()));
        assert!(matches!(result, Err(ToolkitError::UserSelectionIncomplete(_))));
        assert_eq!(s.stage(), &Stage::Empty);

        let mut s = Selection::new();
        choose(&mut s, SelectionInput::ChooseRegion("mapbiomas-brazil".into()));
        choose(&mut s, SelectionInput::ChooseCollection("collection-9.0".into()));
        choose(&mut s, SelectionInput::ChooseTable(BIOMES.into()));
        let before = s.clone();
        assert!(s.apply(SelectionInput::ChooseFeature("Pampa".into())).is_err());
        assert_eq!(s, before);
        assert!(s
            .apply(SelectionInput::TogglePeriod {
                period: "2020".into(),
                checked: true
            })
            .is_err());
    }

    #[test]
    fn higher_level_choice_resets_lower_ones() {
        let mut s = up_to_data_type("collection-9.0", "deforestation_sec_vegetation");
        choose(
            &mut s,
            SelectionInput::TogglePeriod {
                period: "2000".into(),
                checked: true,
            },
        );
        assert!(s.is_ready());

        let effects = choose(&mut s, SelectionInput::ChooseCollection("collection-8.0".into()));
        assert!(matches!(s.stage(), Stage::CollectionChosen { .. }));
        assert_eq!(effects.last(), Some(&Effect::SetExportEnabled(false)));
        assert!(matches!(
            s.export_selection(),
            Err(ToolkitError::UserSelectionIncomplete(_))
        ));

        let mut s = up_to_data_type("collection-9.0", "deforestation_sec_vegetation");
        choose(&mut s, SelectionInput::ChooseProperty("code".into()));
        let target = s.stage().target().expect("target");
        assert_eq!(target.feature, None);
        assert_eq!(s.stage().data_type(), None);
    }

    #[test]
    fn placeholder_entries_are_no_ops() {
        let mut s = up_to_data_type("collection-9.0", "deforestation_sec_vegetation");
        let before = s.clone();
        for input in [
            SelectionInput::ChooseTable("None".into()),
            SelectionInput::ChooseState("None".into()),
            SelectionInput::ChooseProperty("None".into()),
            SelectionInput::ChooseFeature("None".into()),
        ] {
            assert!(choose(&mut s, input).is_empty());
        }
        assert_eq!(s, before);
    }

    #[test]
    fn state_filter_narrows_the_table() {
        let mut s = Selection::new();
        choose(&mut s, SelectionInput::ChooseRegion("mapbiomas-brazil".into()));
        choose(&mut s, SelectionInput::ChooseCollection("collection-9.0".into()));
        choose(&mut s, SelectionInput::ChooseTable(BIOMES.into()));
        let effects = choose(&mut s, SelectionInput::ChooseState("Pará".into()));
        assert!(effects.contains(&Effect::FilterTableByState(15)));
        assert_eq!(s.stage().target().and_then(|t| t.state), Some(15));
    }

    #[test]
    fn unchecking_last_period_leaves_ready() {
        let mut s = up_to_data_type("collection-7.1", "secondary_vegetation_age");
        let check = |checked| SelectionInput::TogglePeriod {
            period: "2019".into(),
            checked,
        };
        choose(&mut s, check(true));
        assert!(s.is_ready());
        let effects = choose(&mut s, check(false));
        assert!(matches!(s.stage(), Stage::DataTypeChosen { .. }));
        assert_eq!(
            effects,
            vec![
                Effect::RemoveImageLayer {
                    label: "Pampa 2019".into()
                },
                Effect::SetExportEnabled(false),
            ]
        );
    }

    #[test]
    fn unavailable_product_and_period_are_rejected() {
        let mut s = up_to_data_type("collection-5.0", "deforestation_sec_vegetation");
        assert!(matches!(
            s.apply(SelectionInput::ChooseDataType("secondary_vegetation_age".into())),
            Err(ToolkitError::UnknownKey { .. })
        ));
        assert!(s
            .apply(SelectionInput::TogglePeriod {
                period: "2021".into(),
                checked: true
            })
            .is_err());
        assert!(s.apply(SelectionInput::ChooseBuffer("7km".into())).is_err());
    }
}
