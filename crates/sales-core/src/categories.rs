//! Fixed product-category lookup table.

/// Raw category code → human-readable label.
pub const CATEGORY_MAPPING: &[(&str, &str)] = &[
    ("AA", "Carbonated Drink"),
    ("AB", "Plant-Based Drink"),
    ("AC", "Milkshake"),
    ("AD", "Fruit Juice"),
    ("AE", "Diet Drink"),
    ("AF", "Functional Beverage"),
];

/// Group key used by aggregation for rows whose code has no label.
pub const UNMAPPED_LABEL: &str = "unmapped";

/// Map a raw category code to its label.
///
/// Matching is exact (no trimming, no case folding). Unknown codes yield
/// `None` rather than an error.
pub fn map_category(code: &str) -> Option<&'static str> {
    CATEGORY_MAPPING
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| *label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_known_codes() {
        assert_eq!(map_category("AA"), Some("Carbonated Drink"));
        assert_eq!(map_category("AB"), Some("Plant-Based Drink"));
        assert_eq!(map_category("AF"), Some("Functional Beverage"));
    }

    #[test]
    fn test_every_code_maps_to_its_label() {
        for (code, label) in CATEGORY_MAPPING {
            assert_eq!(map_category(code), Some(*label));
        }
    }

    #[test]
    fn test_unknown_code_is_none() {
        assert_eq!(map_category("ZZ"), None);
        assert_eq!(map_category(""), None);
    }

    #[test]
    fn test_matching_is_exact() {
        assert_eq!(map_category("aa"), None);
        assert_eq!(map_category(" AA"), None);
    }
}
