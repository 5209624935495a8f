//! Compiled-in source catalog. Discovery adds to this at runtime; removal is
//! a blacklist entry, never deletion.

use newsloom_common::Source;

fn source(
    domain: &str,
    name: &str,
    base_url: &str,
    rss_feeds: &[&str],
    link_selectors: &[&str],
    rate_limit_secs: f64,
    tier: u8,
    language: &str,
    category: Option<&str>,
) -> Source {
    Source {
        domain: domain.to_string(),
        name: name.to_string(),
        base_url: base_url.to_string(),
        link_selectors: link_selectors.iter().map(|s| s.to_string()).collect(),
        title_selector: Some("h1".to_string()),
        content_selector: Some("article p".to_string()),
        rss_feeds: rss_feeds.iter().map(|s| s.to_string()).collect(),
        rate_limit_secs,
        tier,
        language: language.to_string(),
        category: category.map(|c| c.to_string()),
        auto_discovered: false,
    }
}

pub fn default_catalog() -> Vec<Source> {
    vec![
        source(
            "lemonde.fr",
            "Le Monde",
            "https://www.lemonde.fr",
            &["https://www.lemonde.fr/rss/une.xml"],
            &["/article/"],
            2.0,
            1,
            "fr",
            Some("general"),
        ),
        source(
            "lefigaro.fr",
            "Le Figaro",
            "https://www.lefigaro.fr",
            &["https://www.lefigaro.fr/rss/figaro_actualites.xml"],
            &["/actualite"],
            2.0,
            1,
            "fr",
            Some("general"),
        ),
        source(
            "liberation.fr",
            "Libération",
            "https://www.liberation.fr",
            &["https://www.liberation.fr/arc/outboundfeeds/rss-all/"],
            &["/politique/", "/economie/"],
            2.0,
            2,
            "fr",
            Some("general"),
        ),
        source(
            "lesechos.fr",
            "Les Échos",
            "https://www.lesechos.fr",
            &[],
            &["/economie-france/", "/finance-marches/"],
            3.0,
            2,
            "fr",
            Some("economie"),
        ),
        source(
            "francetvinfo.fr",
            "France Info",
            "https://www.francetvinfo.fr",
            &["https://www.francetvinfo.fr/titres.rss"],
            &["/politique/", "/societe/"],
            1.5,
            2,
            "fr",
            Some("general"),
        ),
        source(
            "reuters.com",
            "Reuters",
            "https://www.reuters.com",
            &[],
            &["/world/", "/business/"],
            2.0,
            1,
            "en",
            Some("general"),
        ),
        source(
            "theguardian.com",
            "The Guardian",
            "https://www.theguardian.com",
            &["https://www.theguardian.com/world/rss"],
            &["/world/"],
            1.5,
            1,
            "en",
            Some("general"),
        ),
        source(
            "techcrunch.com",
            "TechCrunch",
            "https://techcrunch.com",
            &["https://techcrunch.com/feed/"],
            &["/2025/", "/2026/"],
            2.0,
            2,
            "en",
            Some("technologie"),
        ),
        source(
            "sciencedaily.com",
            "Science Daily",
            "https://www.sciencedaily.com",
            &["https://www.sciencedaily.com/rss/all.xml"],
            &["/releases/"],
            3.0,
            3,
            "en",
            Some("science"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_tiers_are_valid() {
        for s in default_catalog() {
            assert!((1..=3).contains(&s.tier), "{} has tier {}", s.domain, s.tier);
            assert!(s.rate_limit_secs > 0.0);
            assert!(s.base_url.starts_with("https://"));
        }
    }
}
