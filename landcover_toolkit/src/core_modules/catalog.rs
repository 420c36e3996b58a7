// THEORY:
// The catalog is the toolkit's static knowledge about what can be exported:
// which regions exist, which collection versions each region has, which data
// products each collection publishes (asset id plus the years it covers), how
// each product is presented, and the fixed dictionaries used to label classes.
//
// Key architectural principles:
// 1.  **Typed Keys**: Regions, collection versions and products are enums. A
//     string only becomes a key through `FromStr`, and an unknown string is an
//     `UnknownKey` error rather than a silently missing map entry.
// 2.  **Explicit Availability**: Each `CollectionEntry` lists the products it
//     actually provides. Asking a collection for a product it does not publish
//     is an error, never a null asset.
// 3.  **Built Once**: The catalog is immutable and built on first access behind
//     a `OnceLock`, the same way the lookup tables of the pixel layer were.

use crate::core_modules::raster::ClassCode;
use crate::error::{Result, ToolkitError};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const TOOLKIT_NAME: &str = "MapBiomas User Toolkit";
pub const TOOLKIT_SUBTITLE: &str = "Deforestation and Secondary Vegetation";
pub const TOOLKIT_VERSION: &str = "1.5.0";

/// Placeholder entry every pick list starts with. Choosing it changes nothing.
pub const NONE_LABEL: &str = "None";

const TERRITORY_ROOT: &str =
    "projects/mapbiomas-territories/assets/TERRITORIES/LULC/BRAZIL/COLLECTION9/WORKSPACE";

/// Heading shown by hosts: name, version and subtitle.
pub fn toolkit_title() -> String {
    format!("{TOOLKIT_NAME} {TOOLKIT_VERSION} | {TOOLKIT_SUBTITLE}")
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionKey {
    MapbiomasBrazil,
}

impl RegionKey {
    pub const ALL: [RegionKey; 1] = [RegionKey::MapbiomasBrazil];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKey::MapbiomasBrazil => "mapbiomas-brazil",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionVersion {
    C5_0,
    C6_0,
    C7_0,
    C7_1,
    C8_0,
    C9_0,
}

impl CollectionVersion {
    /// Oldest first.
    pub const ALL: [CollectionVersion; 6] = [
        CollectionVersion::C5_0,
        CollectionVersion::C6_0,
        CollectionVersion::C7_0,
        CollectionVersion::C7_1,
        CollectionVersion::C8_0,
        CollectionVersion::C9_0,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionVersion::C5_0 => "collection-5.0",
            CollectionVersion::C6_0 => "collection-6.0",
            CollectionVersion::C7_0 => "collection-7.0",
            CollectionVersion::C7_1 => "collection-7.1",
            CollectionVersion::C8_0 => "collection-8.0",
            CollectionVersion::C9_0 => "collection-9.0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataProduct {
    DeforestationSecondaryVegetation,
    SecondaryVegetationAge,
}

impl DataProduct {
    pub const ALL: [DataProduct; 2] = [
        DataProduct::DeforestationSecondaryVegetation,
        DataProduct::SecondaryVegetationAge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataProduct::DeforestationSecondaryVegetation => "deforestation_sec_vegetation",
            DataProduct::SecondaryVegetationAge => "secondary_vegetation_age",
        }
    }

    pub fn style(&self) -> &'static ProductStyle {
        match self {
            DataProduct::DeforestationSecondaryVegetation => &DEFORESTATION_SEC_VEGETATION_STYLE,
            DataProduct::SecondaryVegetationAge => &SECONDARY_VEGETATION_AGE_STYLE,
        }
    }
}

macro_rules! string_key {
    ($ty:ty, $kind:literal) => {
        impl FromStr for $ty {
            type Err = ToolkitError;

            fn from_str(s: &str) -> Result<Self> {
                <$ty>::ALL
                    .iter()
                    .copied()
                    .find(|key| key.as_str() == s)
                    .ok_or_else(|| ToolkitError::UnknownKey {
                        kind: $kind,
                        key: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_key!(RegionKey, "region");
string_key!(CollectionVersion, "collection");
string_key!(DataProduct, "data type");

// ---------------------------------------------------------------------------
// Presentation
// ---------------------------------------------------------------------------

/// How the integer codes of a product are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassEncoding {
    /// `process * 100 + land_cover`; the process half is named by `process_names`.
    Compound {
        process_names: &'static [(i32, &'static str)],
    },
    /// Raw values (ages, counts) with no class dictionary.
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub min: ClassCode,
    pub max: ClassCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegendEntry {
    pub color: &'static str,
    pub value: ClassCode,
    pub label: &'static str,
}

/// Everything needed to show and export one product, independent of collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductStyle {
    /// Band name is `band_prefix + period`.
    pub band_prefix: &'static str,
    /// Band-name fragment some published assets still carry, with its replacement.
    pub band_rename: Option<(&'static str, &'static str)>,
    pub palette: &'static [&'static str],
    pub range: ValueRange,
    /// Maximum side length, in pixels, of one exported tile.
    pub file_dimensions: u32,
    pub encoding: ClassEncoding,
    /// Map layers show `value / display_divisor` when set.
    pub display_divisor: Option<ClassCode>,
    pub legend: &'static [LegendEntry],
}

impl ProductStyle {
    /// Palette colour of a displayed value. Values are stretched linearly over
    /// `range` and clamped at both ends.
    pub fn color_for(&self, value: ClassCode) -> Option<&'static str> {
        let last = self.palette.len().checked_sub(1)?;
        let span = (self.range.max - self.range.min).max(1) as f64;
        let t = ((value - self.range.min) as f64 / span).clamp(0.0, 1.0);
        self.palette.get((t * last as f64).round() as usize).copied()
    }
}

pub const PROCESS_CLASS_NAMES: &[(i32, &str)] = &[
    (0, "Other"),
    (1, "Anthropic"),
    (2, "Primary Vegetation"),
    (3, "Secondary Vegetation"),
    (4, "Deforestation in  Primary Vegetation"),
    (5, "Secondary Vegetation Regrowth"),
    (6, "Deforestation in  Secondary Vegetation"),
    (7, "Not applied"),
    (8, "Not applied"),
];

pub const LAND_COVER_CLASS_NAMES: &[(i32, &str)] = &[
    (0, "Non Observed"),
    (1, "Forest"),
    (2, "Natural Forest"),
    (3, "Forest Formation"),
    (4, "Savanna Formation"),
    (5, "Magrove"),
    (6, "Áreas Naturales Inundables - Leñosas (Bosque Inundable)"),
    (9, "Forest Plantation"),
    (10, "Non Forest Natural Formation"),
    (11, "Wetland"),
    (12, "Grassland (Pastizal, Formación Herbácea)"),
    (13, "Other Non Forest Natural Formation"),
    (14, "Farming"),
    (15, "Pasture"),
    (18, "Agriculture"),
    (19, "Temporary Crops (Herbaceas - Agricultura)"),
    (20, "Sugar Cane"),
    (21, "Mosaic of Agriculture and Pasture"),
    (22, "Non vegetated area"),
    (23, "Beach and Dune"),
    (24, "Urban Infrastructure"),
    (25, "Other Non Vegetated Area"),
    (26, "Water"),
    (27, "Non Observed"),
    (29, "Rocky outcrop"),
    (30, "Mining"),
    (31, "Aquaculture"),
    (32, "Salt flat"),
    (33, "River, Lake and Ocean"),
    (34, "Glacier"),
    (35, "Oil Palm"),
    (36, "Perennial Crops"),
    (37, "Artificial Water Body"),
    (38, "Water Reservoirs"),
    (39, "Soy Beans"),
    (40, "Rice"),
    (41, "Mosaic of Crops"),
    // 42..=45, 57 and 58 only occur in the Chaco legend
    (42, "Pastizal abierto"),
    (43, "Pastizal cerrado"),
    (44, "Pastizal disperso"),
    (45, "Leñosas dispersas"),
    (46, "Coffe"),
    (47, "Citrus"),
    (48, "Other Perennial Crops"),
    (49, "Wooded Sandbank Vegetation"),
    (50, "Herbaceous Sandbank Vegetation"),
    (57, "Cultivo Simples"),
    (58, "Cultivo Múltiple"),
    (62, "Cotton"),
];

pub fn land_cover_class_name(code: i32) -> Option<&'static str> {
    LAND_COVER_CLASS_NAMES
        .iter()
        .find(|(key, _)| *key == code)
        .map(|(_, name)| *name)
}

static DEFORESTATION_SEC_VEGETATION_STYLE: ProductStyle = ProductStyle {
    band_prefix: "classification_",
    band_rename: Some(("product", "classification")),
    palette: &[
        "#212121", "#fffbc2", "#09611f", "#4ea376", "#e31a1c", "#94fc03", "#ffa500", "#212121",
    ],
    range: ValueRange { min: 0, max: 7 },
    file_dimensions: 256 * 124,
    encoding: ClassEncoding::Compound {
        process_names: PROCESS_CLASS_NAMES,
    },
    display_divisor: Some(100),
    legend: &[
        LegendEntry { color: "#fffbc2", value: 1, label: "Anthropic" },
        LegendEntry { color: "#09611f", value: 2, label: "Primary Vegetation" },
        LegendEntry { color: "#4ea376", value: 3, label: "Secondary Vegetation" },
        LegendEntry { color: "#e31a1c", value: 4, label: "Deforestation in  Primary Vegetation" },
        LegendEntry { color: "#94fc03", value: 5, label: "Secondary Vegetation Regrowth" },
        LegendEntry { color: "#ffa500", value: 6, label: "Deforestation in  Secondary Vegetation" },
        LegendEntry { color: "#212121", value: 7, label: "Not applied" },
    ],
};

static SECONDARY_VEGETATION_AGE_STYLE: ProductStyle = ProductStyle {
    band_prefix: "secondary_vegetation_age_",
    band_rename: None,
    palette: &[
        "#ffffe5", "#f7fcb9", "#d9f0a3", "#addd8e", "#78c679", "#41ab5d", "#238443", "#006837",
        "#004529",
    ],
    range: ValueRange { min: 0, max: 30 },
    file_dimensions: 256 * 512,
    encoding: ClassEncoding::Plain,
    display_divisor: None,
    legend: &[],
};

// ---------------------------------------------------------------------------
// Collections, tables and pick lists
// ---------------------------------------------------------------------------

/// One product as published by one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductEntry {
    pub product: DataProduct,
    pub asset: &'static str,
    pub first_year: u16,
    pub last_year: u16,
}

impl ProductEntry {
    /// Period labels, oldest first.
    pub fn periods(&self) -> Vec<String> {
        (self.first_year..=self.last_year).map(|y| y.to_string()).collect()
    }

    pub fn has_period(&self, period: &str) -> bool {
        period
            .parse::<u16>()
            .is_ok_and(|y| (self.first_year..=self.last_year).contains(&y))
    }

    pub fn band_name(&self, period: &str) -> String {
        format!("{}{}", self.product.style().band_prefix, period)
    }

    pub fn last_period(&self) -> String {
        self.last_year.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub version: CollectionVersion,
    pub products: Vec<ProductEntry>,
}

impl CollectionEntry {
    pub fn product(&self, product: DataProduct) -> Result<&ProductEntry> {
        self.products
            .iter()
            .find(|p| p.product == product)
            .ok_or_else(|| ToolkitError::UnknownKey {
                kind: "data type",
                key: format!("{product} in {}", self.version),
            })
    }

    pub fn data_types(&self) -> Vec<DataProduct> {
        self.products.iter().map(|p| p.product).collect()
    }
}

/// A named vector table offered for a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub label: String,
    pub asset: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEntry {
    pub key: RegionKey,
    /// Oldest first.
    pub collections: Vec<CollectionEntry>,
    pub tables: Vec<TableEntry>,
}

impl RegionEntry {
    pub fn collection(&self, version: CollectionVersion) -> Result<&CollectionEntry> {
        self.collections
            .iter()
            .find(|c| c.version == version)
            .ok_or_else(|| ToolkitError::UnknownKey {
                kind: "collection",
                key: format!("{version} in {}", self.key),
            })
    }

    /// Collection versions the way a pick list shows them, newest first.
    pub fn collection_list(&self) -> Vec<CollectionVersion> {
        self.collections.iter().rev().map(|c| c.version).collect()
    }

    pub fn table_assets(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.asset.clone()).collect()
    }
}

#[derive(Debug)]
pub struct Catalog {
    regions: Vec<RegionEntry>,
}

impl Catalog {
    pub fn regions(&self) -> &[RegionEntry] {
        &self.regions
    }

    pub fn region(&self, key: RegionKey) -> Result<&RegionEntry> {
        self.regions
            .iter()
            .find(|r| r.key == key)
            .ok_or_else(|| ToolkitError::UnknownKey {
                kind: "region",
                key: key.to_string(),
            })
    }

    pub fn collection(&self, region: RegionKey, version: CollectionVersion) -> Result<&CollectionEntry> {
        self.region(region)?.collection(version)
    }

    pub fn product(
        &self,
        region: RegionKey,
        version: CollectionVersion,
        product: DataProduct,
    ) -> Result<&ProductEntry> {
        self.collection(region, version)?.product(product)
    }
}

pub fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(|| Catalog {
        regions: vec![brazil()],
    })
}

fn brazil() -> RegionEntry {
    use CollectionVersion::*;
    use DataProduct::*;

    let entry = |product: DataProduct, asset: &'static str, first_year: u16, last_year: u16| ProductEntry {
        product,
        asset,
        first_year,
        last_year,
    };

    let collections = vec![
        CollectionEntry {
            version: C5_0,
            products: vec![entry(
                DeforestationSecondaryVegetation,
                "projects/mapbiomas-workspace/public/collection5/mapbiomas_collection50_deforestation_regeneration_v1",
                1988,
                2017,
            )],
        },
        CollectionEntry {
            version: C6_0,
            products: vec![entry(
                DeforestationSecondaryVegetation,
                "projects/mapbiomas-workspace/public/collection6/mapbiomas_collection60_deforestation_regeneration_v1",
                1988,
                2019,
            )],
        },
        CollectionEntry {
            version: C7_0,
            products: vec![entry(
                DeforestationSecondaryVegetation,
                "projects/mapbiomas-workspace/public/collection7/mapbiomas_collection70_deforestation_regeneration_v1",
                1988,
                2019,
            )],
        },
        CollectionEntry {
            version: C7_1,
            products: vec![
                entry(
                    DeforestationSecondaryVegetation,
                    "projects/mapbiomas-workspace/public/collection7_1/mapbiomas_collection71_deforestation_regeneration_v1",
                    1988,
                    2019,
                ),
                entry(
                    SecondaryVegetationAge,
                    "projects/mapbiomas-workspace/public/collection7_1/mapbiomas_collection71_secondary_vegetation_age_v1",
                    1988,
                    2019,
                ),
            ],
        },
        CollectionEntry {
            version: C8_0,
            products: vec![
                entry(
                    DeforestationSecondaryVegetation,
                    "projects/mapbiomas-workspace/public/collection8/mapbiomas_collection80_deforestation_secondary_vegetation_v1",
                    1986,
                    2021,
                ),
                entry(
                    SecondaryVegetationAge,
                    "projects/mapbiomas-workspace/public/collection8/mapbiomas_collection80_secondary_vegetation_age_v1",
                    1986,
                    2021,
                ),
            ],
        },
        CollectionEntry {
            version: C9_0,
            products: vec![
                entry(
                    DeforestationSecondaryVegetation,
                    "projects/mapbiomas-public/assets/brazil/lulc/collection9/mapbiomas_collection90_deforestation_secondary_vegetation_v1",
                    1986,
                    2023,
                ),
                entry(
                    SecondaryVegetationAge,
                    "projects/mapbiomas-public/assets/brazil/lulc/collection9/mapbiomas_collection90_secondary_vegetation_age_v1",
                    1986,
                    2023,
                ),
            ],
        },
    ];

    let tables = BRAZIL_TABLES
        .iter()
        .map(|(label, name)| TableEntry {
            label: (*label).to_string(),
            asset: format!("{TERRITORY_ROOT}/{name}"),
        })
        .collect();

    RegionEntry {
        key: RegionKey::MapbiomasBrazil,
        collections,
        tables,
    }
}

const BRAZIL_TABLES: &[(&str, &str)] = &[
    ("Amacro", "AMACRO"),
    ("Ministry of the Environment priority areas 2018", "AREAS_PRIORITARIAS_DO_MMA_2018"),
    ("Atlantic Forest Law", "ATLANTIC_FOREST_LAW"),
    ("Basin Level 1 DNAEE", "BASIN_LEVEL_1_DNAEE"),
    ("Basin Level 1 PNRH", "BASIN_LEVEL_1_PNRH"),
    ("Basin Level 2 DNAEE", "BASIN_LEVEL_2_DNAEE"),
    ("Basin Level 2 PNRH", "BASIN_LEVEL_2_PNRH"),
    ("Biomes", "BIOMES"),
    ("Coastal Marine Zone", "COASTAL_MARINE_ZONE"),
    ("Forest Concessions", "CONCESSOES_FLORESTAIS"),
    ("DHN250 Level 1", "DHN250_LEVEL_1"),
    ("DHN250 Level 2", "DHN250_LEVEL_2"),
    ("DHN250 Level 3", "DHN250_LEVEL_3"),
    ("Non-Designated Public Forests", "FLORESTAS_PUBLICAS_NAO_DESTINADAS"),
    ("Geoparques", "GEOPARQUES"),
    ("Indigenous Territories", "INDIGENOUS_TERRITORIES"),
    ("Legal Amazon", "LEGAL_AMAZON"),
    ("Matopiba", "MATOPIBA"),
    ("Political Level 1", "POLITICAL_LEVEL_1"),
    ("Political Level 2", "POLITICAL_LEVEL_2"),
    ("Political Level 3", "POLITICAL_LEVEL_3"),
    ("Protected Area", "PROTECTED_AREA"),
    ("Quilombos", "QUILOMBOS"),
    ("Biosphere Reserve", "RESERVA_DA_BIOSFERA"),
    ("Semiarid", "SEMIARID"),
    ("Settlements", "SETTLEMENTS"),
    ("UGRHS", "UGRHS"),
];

/// Brazilian states and their IBGE codes, in pick-list order.
pub const STATES: &[(&str, u8)] = &[
    ("Acre", 12),
    ("Alagoas", 27),
    ("Amazonas", 13),
    ("Amapá", 16),
    ("Bahia", 29),
    ("Ceará", 23),
    ("Distrito Federal", 53),
    ("Espírito Santo", 32),
    ("Goiás", 52),
    ("Maranhão", 21),
    ("Minas Gerais", 31),
    ("Mato Grosso do Sul", 50),
    ("Mato Grosso", 51),
    ("Pará", 15),
    ("Paraíba", 25),
    ("Pernambuco", 26),
    ("Piauí", 22),
    ("Paraná", 41),
    ("Rio de Janeiro", 33),
    ("Rio Grande do Norte", 24),
    ("Rondônia", 11),
    ("Roraima", 14),
    ("Rio Grande do Sul", 43),
    ("Santa Catarina", 42),
    ("Sergipe", 28),
    ("São Paulo", 35),
    ("Tocantins", 17),
];

/// State code for a pick-list name. `None` for the placeholder entry.
pub fn state_code(name: &str) -> Result<Option<u8>> {
    if name == NONE_LABEL {
        return Ok(None);
    }
    STATES
        .iter()
        .find(|(state, _)| *state == name)
        .map(|(_, code)| Some(*code))
        .ok_or_else(|| ToolkitError::UnknownKey {
            kind: "state",
            key: name.to_string(),
        })
}

/// Buffer pick list and the distance each entry stands for, in meters.
pub const BUFFER_CHOICES: &[(&str, f64)] = &[
    ("None", 0.0),
    ("1km", 1_000.0),
    ("2km", 2_000.0),
    ("3km", 3_000.0),
    ("4km", 4_000.0),
    ("5km", 5_000.0),
];

pub fn buffer_distance(label: &str) -> Result<f64> {
    BUFFER_CHOICES
        .iter()
        .find(|(choice, _)| *choice == label)
        .map(|(_, meters)| *meters)
        .ok_or_else(|| ToolkitError::UnknownKey {
            kind: "buffer",
            key: label.to_string(),
        })
}
