// THEORY:
// Exported files are named from the selection: region, collection, feature and
// either the period (rasters) or the word `area` (the statistics table). Names
// must be safe as file names and stable across runs, so they are folded to a
// lowercase ASCII-ish form with the accents of Portuguese and Spanish place
// names removed and punctuation dropped.

/// Placeholder used instead of a period in the statistics table name.
pub const TABLE_SUFFIX: &str = "area";

const ACCENTS: &[(char, char)] = &[
    ('á', 'a'),
    ('à', 'a'),
    ('â', 'a'),
    ('ã', 'a'),
    ('ä', 'a'),
    ('ª', 'a'),
    ('é', 'e'),
    ('ê', 'e'),
    ('í', 'i'),
    ('ó', 'o'),
    ('ô', 'o'),
    ('õ', 'o'),
    ('ú', 'u'),
    ('û', 'u'),
    ('ũ', 'u'),
    ('ç', 'c'),
    ('ñ', 'n'),
];

const DROPPED: &[char] = &['&', '@', ' ', '"', '\'', '(', ')', '/'];

pub fn format_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| !DROPPED.contains(c))
        .map(|c| {
            ACCENTS
                .iter()
                .find(|(accented, _)| *accented == c)
                .map_or(c, |(_, plain)| *plain)
        })
        .collect()
}

/// `region-collection-feature-suffix`, with empty parts collapsed and the first
/// dot removed, then formatted.
pub fn join_name(region: &str, collection: &str, feature: &str, suffix: &str) -> String {
    let joined = [region, collection, feature, suffix].join("-");
    let collapsed = joined.replace("--", "-").replace("--", "-").replacen('.', "", 1);
    format_name(&collapsed)
}

pub fn image_file_name(region: &str, collection: &str, feature: &str, period: &str) -> String {
    join_name(region, collection, &format_name(feature), period)
}

pub fn table_file_name(region: &str, collection: &str, feature: &str) -> String {
    join_name(region, collection, &format_name(feature), TABLE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_accents_and_drops_punctuation() {
        assert_eq!(format_name("São Félix do Xingu"), "saofelixdoxingu");
        assert_eq!(format_name("Terra Indígena (Kayapó)"), "terraindigenakayapo");
        assert_eq!(format_name("A&B @ C/D 'x' \"y\""), "abcdxy");
        assert_eq!(format_name("Paraná"), "parana");
    }

    #[test]
    fn image_names() {
        assert_eq!(
            image_file_name("mapbiomas-brazil", "collection-9.0", "Amazônia", "2020"),
            "mapbiomas-brazil-collection-90-amazonia-2020"
        );
    }

    #[test]
    fn empty_feature_collapses_separator() {
        assert_eq!(
            image_file_name("mapbiomas-brazil", "collection-7.1", "", "1990"),
            "mapbiomas-brazil-collection-71-1990"
        );
        assert_eq!(
            table_file_name("mapbiomas-brazil", "collection-8.0", ""),
            "mapbiomas-brazil-collection-80-area"
        );
    }

    #[test]
    fn only_the_first_dot_is_removed() {
        assert_eq!(
            table_file_name("mapbiomas-brazil", "collection-9.0", "st. john"),
            "mapbiomas-brazil-collection-90-st.john-area"
        );
    }
}
