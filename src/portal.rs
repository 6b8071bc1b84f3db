/// Site-specific rules for recognising listing links on a search page.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalProfile {
    pub name: String,
    /// Search URL used when a query does not bring its own.
    pub search_url: String,
    /// CSS selector that must match before a page counts as loaded.
    pub detail_link_selector: String,
    /// Regex an absolute link must match to count as a detail page.
    pub detail_pattern: String,
    pub consent_selector: String,
    /// Every one of these that holds an array in a captured JSON body is read.
    pub container_fields: Vec<String>,
    /// Tried in order against each container item.
    pub url_fields: Vec<String>,
}

const CONSENT_SELECTOR: &str = "button, [id*='cookie'], [class*='cookie']";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl PortalProfile {
    pub fn immovlan() -> Self {
        Self {
            name: "immovlan".to_string(),
            search_url: "https://immovlan.be/en/real-estate?transactiontypes=for-sale,in-public-sale&propertytypes=house,apartment&municipals={locality}&noindex=1".to_string(),
            detail_link_selector: "a[href*='/en/detail/']".to_string(),
            detail_pattern: r"/en/detail/".to_string(),
            consent_selector: CONSENT_SELECTOR.to_string(),
            container_fields: strings(&["items", "list", "results"]),
            url_fields: strings(&["detailUrl", "url"]),
        }
    }

    pub fn immoweb() -> Self {
        Self {
            name: "immoweb".to_string(),
            search_url: "https://www.immoweb.be/en/search/house-and-apartment/for-sale/{locality}/be?countries=BE&orderBy=relevance".to_string(),
            detail_link_selector: "a[href*='/en/classified/']".to_string(),
            detail_pattern: r"/en/classified/".to_string(),
            consent_selector: "#uc-btn-accept-banner, ".to_string() + CONSENT_SELECTOR,
            container_fields: strings(&["results", "items", "list"]),
            url_fields: strings(&["url", "detailUrl"]),
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "immovlan" | "immovlan.be" => Some(Self::immovlan()),
            "immoweb" | "immoweb.be" => Some(Self::immoweb()),
            _ => None,
        }
    }
}

impl Default for PortalProfile {
    fn default() -> Self {
        Self::immovlan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(PortalProfile::by_name("Immovlan.be"), Some(PortalProfile::immovlan()));
        assert_eq!(PortalProfile::by_name(" immoweb "), Some(PortalProfile::immoweb()));
        assert!(PortalProfile::by_name("zimmo").is_none());
    }
}
