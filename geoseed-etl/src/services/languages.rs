//! Official languages per country
//!
//! ISO 639 codes for the `official_languages` column. Lookup order: the
//! country table, then the UN subregion from the boundary metadata, then
//! English. Sub-national rows use their country's languages.

/// ISO3 to language codes, sorted by ISO3
static COUNTRY_LANGUAGES: &[(&str, &[&str])] = &[
    ("ABW", &["nl", "pap"]),
    ("AFG", &["ps", "uz", "tk"]),
    ("AGO", &["pt"]),
    ("AIA", &["en"]),
    ("ALB", &["sq"]),
    ("AND", &["ca"]),
    ("ARE", &["ar"]),
    ("ARG", &["es"]),
    ("ARM", &["hy"]),
    ("ASM", &["en", "sm"]),
    ("ATA", &[]),
    ("ATG", &["en"]),
    ("AUS", &["en"]),
    ("AUT", &["de"]),
    ("AZE", &["az"]),
    ("BDI", &["fr", "rn"]),
    ("BEL", &["nl", "fr", "de"]),
    ("BEN", &["fr"]),
    ("BES", &["nl"]),
    ("BFA", &["fr"]),
    ("BGD", &["bn"]),
    ("BGR", &["bg"]),
    ("BHR", &["ar"]),
    ("BHS", &["en"]),
    ("BIH", &["bs", "hr", "sr"]),
    ("BLM", &["fr"]),
    ("BLR", &["be", "ru"]),
    ("BLZ", &["en"]),
    ("BMU", &["en"]),
    ("BOL", &["es", "qu", "ay"]),
    ("BRA", &["pt"]),
    ("BRB", &["en"]),
    ("BRN", &["ms"]),
    ("BTN", &["dz"]),
    ("BWA", &["en", "tn"]),
    ("CAF", &["fr", "sg"]),
    ("CAN", &["en", "fr"]),
    ("CHE", &["de", "fr", "it", "rm"]),
    ("CHL", &["es"]),
    ("CHN", &["zh"]),
    ("CIV", &["fr"]),
    ("CMR", &["fr", "en"]),
    ("COD", &["fr"]),
    ("COG", &["fr"]),
    ("COK", &["en", "mi"]),
    ("COL", &["es"]),
    ("COM", &["ar", "fr"]),
    ("CPV", &["pt"]),
    ("CRI", &["es"]),
    ("CUB", &["es"]),
    ("CUW", &["nl", "pap"]),
    ("CYM", &["en"]),
    ("CYP", &["el", "tr"]),
    ("CZE", &["cs"]),
    ("DEU", &["de"]),
    ("DJI", &["fr", "ar"]),
    ("DMA", &["en"]),
    ("DNK", &["da"]),
    ("DOM", &["es"]),
    ("DZA", &["ar"]),
    ("ECU", &["es"]),
    ("EGY", &["ar"]),
    ("ERI", &["ti", "ar", "en"]),
    ("ESP", &["es"]),
    ("EST", &["et"]),
    ("ETH", &["am"]),
    ("FIN", &["fi", "sv"]),
    ("FJI", &["en", "fj", "hi"]),
    ("FLK", &["en"]),
    ("FRA", &["fr"]),
    ("FRO", &["fo", "da"]),
    ("FSM", &["en"]),
    ("GAB", &["fr"]),
    ("GBR", &["en"]),
    ("GEO", &["ka"]),
    ("GGY", &["en", "fr"]),
    ("GHA", &["en"]),
    ("GIB", &["en"]),
    ("GIN", &["fr"]),
    ("GLP", &["fr"]),
    ("GMB", &["en"]),
    ("GNB", &["pt"]),
    ("GNQ", &["es", "fr", "pt"]),
    ("GRC", &["el"]),
    ("GRD", &["en"]),
    ("GRL", &["kl", "da"]),
    ("GTM", &["es"]),
    ("GUF", &["fr"]),
    ("GUM", &["en", "ch"]),
    ("GUY", &["en"]),
    ("HND", &["es"]),
    ("HRV", &["hr"]),
    ("HTI", &["fr", "ht"]),
    ("HUN", &["hu"]),
    ("IDN", &["id"]),
    ("IMN", &["en", "gv"]),
    ("IND", &["hi", "en"]),
    ("IRL", &["ga", "en"]),
    ("IRN", &["fa"]),
    ("IRQ", &["ar", "ku"]),
    ("ISL", &["is"]),
    ("ISR", &["he", "ar"]),
    ("ITA", &["it"]),
    ("JAM", &["en"]),
    ("JOR", &["ar"]),
    ("JPN", &["ja"]),
    ("KAZ", &["kk", "ru"]),
    ("KEN", &["sw", "en"]),
    ("KGZ", &["ky", "ru"]),
    ("KHM", &["km"]),
    ("KIR", &["en"]),
    ("KNA", &["en"]),
    ("KOR", &["ko"]),
    ("KWT", &["ar"]),
    ("LAO", &["lo"]),
    ("LBN", &["ar", "fr"]),
    ("LBR", &["en"]),
    ("LBY", &["ar"]),
    ("LCA", &["en"]),
    ("LIE", &["de"]),
    ("LKA", &["si", "ta"]),
    ("LSO", &["st", "en"]),
    ("LTU", &["lt"]),
    ("LUX", &["lb", "fr", "de"]),
    ("LVA", &["lv"]),
    ("MAR", &["ar", "ber"]),
    ("MCO", &["fr"]),
    ("MDA", &["ro"]),
    ("MDG", &["mg", "fr"]),
    ("MDV", &["dv"]),
    ("MEX", &["es"]),
    ("MHL", &["mh", "en"]),
    ("MKD", &["mk", "sq"]),
    ("MLI", &["fr"]),
    ("MLT", &["mt", "en"]),
    ("MMR", &["my"]),
    ("MNE", &["sr", "bs", "sq", "hr"]),
    ("MNG", &["mn"]),
    ("MNP", &["en"]),
    ("MOZ", &["pt"]),
    ("MRT", &["ar"]),
    ("MSR", &["en"]),
    ("MTQ", &["fr"]),
    ("MUS", &["en", "fr"]),
    ("MWI", &["en", "ny"]),
    ("MYS", &["ms"]),
    ("MYT", &["fr"]),
    ("NAM", &["en", "af"]),
    ("NCL", &["fr"]),
    ("NER", &["fr"]),
    ("NGA", &["en"]),
    ("NIC", &["es"]),
    ("NIU", &["en"]),
    ("NLD", &["nl"]),
    ("NOR", &["no", "nb", "nn"]),
    ("NPL", &["ne"]),
    ("NRU", &["na", "en"]),
    ("NZL", &["en", "mi"]),
    ("OMN", &["ar"]),
    ("PAK", &["ur", "en"]),
    ("PAN", &["es"]),
    ("PCN", &["en"]),
    ("PER", &["es", "qu", "ay"]),
    ("PHL", &["fil", "en"]),
    ("PLW", &["pau", "en"]),
    ("PNG", &["en", "tpi", "ho"]),
    ("POL", &["pl"]),
    ("PRI", &["es", "en"]),
    ("PRK", &["ko"]),
    ("PRT", &["pt"]),
    ("PRY", &["es", "gn"]),
    ("PSE", &["ar"]),
    ("PYF", &["fr"]),
    ("QAT", &["ar"]),
    ("REU", &["fr"]),
    ("ROU", &["ro"]),
    ("RUS", &["ru"]),
    ("RWA", &["rw", "fr", "en"]),
    ("SAU", &["ar"]),
    ("SDN", &["ar", "en"]),
    ("SEN", &["fr"]),
    ("SGP", &["en", "ms", "zh", "ta"]),
    ("SHN", &["en"]),
    ("SLB", &["en"]),
    ("SLE", &["en"]),
    ("SLV", &["es"]),
    ("SMR", &["it"]),
    ("SOM", &["so", "ar"]),
    ("SRB", &["sr"]),
    ("SSD", &["en", "ar"]),
    ("STP", &["pt"]),
    ("SUR", &["nl"]),
    ("SVK", &["sk"]),
    ("SVN", &["sl"]),
    ("SWE", &["sv"]),
    ("SWZ", &["ss", "en"]),
    ("SYC", &["fr", "en", "cr"]),
    ("SYR", &["ar"]),
    ("TCA", &["en"]),
    ("TCD", &["fr", "ar"]),
    ("TGO", &["fr"]),
    ("THA", &["th"]),
    ("TJK", &["tg", "ru"]),
    ("TKL", &["en"]),
    ("TKM", &["tk"]),
    ("TLS", &["pt", "tet"]),
    ("TON", &["to", "en"]),
    ("TTO", &["en"]),
    ("TUN", &["ar"]),
    ("TUR", &["tr"]),
    ("TUV", &["en"]),
    ("TWN", &["zh"]),
    ("TZA", &["sw", "en"]),
    ("UGA", &["en", "sw"]),
    ("UKR", &["uk"]),
    ("URY", &["es"]),
    ("USA", &["en"]),
    ("UZB", &["uz"]),
    ("VAT", &["it", "la"]),
    ("VCT", &["en"]),
    ("VEN", &["es"]),
    ("VGB", &["en"]),
    ("VIR", &["en"]),
    ("VNM", &["vi"]),
    ("VUT", &["bi", "en", "fr"]),
    ("WLF", &["fr"]),
    ("WSM", &["sm", "en"]),
    ("XKX", &["sq", "sr"]),
    ("YEM", &["ar"]),
    ("ZAF", &["zu", "xh", "af", "en", "st", "tn", "ts", "ss", "ve", "nr", "nd"]),
    ("ZMB", &["en"]),
    ("ZWE", &["en", "sn", "nd"]),
];

/// UN subregion to language codes
static REGION_LANGUAGES: &[(&str, &[&str])] = &[
    ("Sub-Saharan Africa", &["fr"]),
    ("Northern Africa", &["ar"]),
    ("Western Africa", &["fr"]),
    ("Middle Africa", &["fr"]),
    ("Eastern Africa", &["en"]),
    ("Southern Africa", &["en"]),
    ("Western Asia", &["ar"]),
    ("Central Asia", &["ru"]),
    ("Eastern Asia", &["zh"]),
    ("South-Eastern Asia", &["en"]),
    ("Southern Asia", &["en"]),
    ("Eastern Europe", &["ru"]),
    ("Western Europe", &["fr"]),
    ("Northern Europe", &["en"]),
    ("Southern Europe", &["es"]),
    ("Latin America and the Caribbean", &["es"]),
    ("Caribbean", &["en"]),
    ("Northern America", &["en"]),
    ("Australia and New Zealand", &["en"]),
    ("Melanesia", &["en"]),
    ("Micronesia", &["en"]),
    ("Polynesia", &["en"]),
];

/// Official languages of a country
///
/// # Arguments
/// * `iso3` - Country code (any case)
/// * `region` - UN subregion name, used only when the country is not listed
///
/// # Returns
/// Never empty; countries without an official language get `["en"]`.
pub fn official_languages(iso3: &str, region: Option<&str>) -> Vec<String> {
    let iso3 = iso3.to_uppercase();
    let listed = COUNTRY_LANGUAGES
        .binary_search_by(|(code, _)| (*code).cmp(iso3.as_str()))
        .ok()
        .map(|idx| COUNTRY_LANGUAGES[idx].1);

    let codes = match listed {
        Some(codes) => codes,
        None => region
            .map(str::trim)
            .and_then(|r| REGION_LANGUAGES.iter().find(|(name, _)| *name == r))
            .map(|(_, codes)| *codes)
            .unwrap_or(&[]),
    };

    if codes.is_empty() {
        vec!["en".to_string()]
    } else {
        codes.iter().map(|c| c.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sorted_for_binary_search() {
        assert!(COUNTRY_LANGUAGES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_country_lookup() {
        assert_eq!(official_languages("NZL", None), vec!["en", "mi"]);
        assert_eq!(official_languages("che", None), vec!["de", "fr", "it", "rm"]);
    }

    #[test]
    fn test_region_fallback_and_default() {
        assert_eq!(official_languages("ZZZ", Some("Eastern Asia")), vec!["zh"]);
        assert_eq!(official_languages("ZZZ", Some("Atlantis")), vec!["en"]);
        assert_eq!(official_languages("ZZZ", None), vec!["en"]);
        // Listed without an official language
        assert_eq!(official_languages("ATA", Some("Eastern Asia")), vec!["en"]);
    }
}
