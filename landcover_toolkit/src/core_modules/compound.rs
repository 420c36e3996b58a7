// THEORY:
// Some products stack two classifications into one integer. The deforestation /
// secondary vegetation product stores `process * 100 + land_cover`, where
// `process` is the transition state (primary vegetation, deforestation in
// secondary vegetation, regrowth, …) and `land_cover` is the underlying
// land-use / land-cover legend class.
//
// Decomposition is plain Euclidean division by 100, so recomposing the two
// halves always gives the original code back. Labels for each half come from
// two fixed dictionaries held by the catalog; a code with no entry has no label.

pub mod compound {
    use crate::core_modules::catalog::{ClassEncoding, land_cover_class_name};
    use crate::core_modules::raster::ClassCode;

    pub type ProcessClass = i32;
    pub type LandCoverClass = i32;

    /// Multiplier between the process half and the land-cover half.
    pub const COMPOUND_FACTOR: ClassCode = 100;

    /// Human-readable names attached to an exported area row.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ClassLabels {
        pub class_name: Option<&'static str>,
        pub lulc_class_name: Option<&'static str>,
    }

    pub fn decompose(code: ClassCode) -> (ProcessClass, LandCoverClass) {
        (code.div_euclid(COMPOUND_FACTOR), code.rem_euclid(COMPOUND_FACTOR))
    }

    pub fn recompose(process: ProcessClass, land_cover: LandCoverClass) -> ClassCode {
        process * COMPOUND_FACTOR + land_cover
    }

    /// Labels for `code` under the product's class encoding.
    pub fn labels(code: ClassCode, encoding: &ClassEncoding) -> ClassLabels {
        match encoding {
            ClassEncoding::Compound { process_names } => {
                let (process, land_cover) = decompose(code);
                ClassLabels {
                    class_name: lookup(process_names, process),
                    lulc_class_name: land_cover_class_name(land_cover),
                }
            }
            ClassEncoding::Plain => ClassLabels::default(),
        }
    }

    pub fn lookup(dictionary: &[(i32, &'static str)], code: i32) -> Option<&'static str> {
        dictionary
            .iter()
            .find(|(key, _)| *key == code)
            .map(|(_, name)| *name)
    }
}
