//! Article extraction: RSS/Atom entries via feed-rs, HTML pages via regex
//! heuristics. Strategy order per source: feeds first (guaranteed legal),
//! then HTML scraping with a title+meta partial fallback for paywalls.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use newsloom_common::{extract_domain, Article, ExtractionMethod, Source};
use regex::Regex;
use tracing::debug;

static RE_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a[^>]+href=["']([^"'#]+)["']"#).unwrap());
static RE_TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static RE_H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap());
static RE_OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+property=["']og:title["'][^>]+content=["']([^"']+)["']"#).unwrap()
});
static RE_META_DESC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+name=["']description["'][^>]+content=["']([^"']+)["']"#).unwrap()
});
static RE_OG_DESC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+property=["']og:description["'][^>]+content=["']([^"']+)["']"#)
        .unwrap()
});
static RE_OG_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+property=["']og:image["'][^>]+content=["']([^"']+)["']"#).unwrap()
});
static RE_PUBLISHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]+property=["']article:published_time["'][^>]+content=["']([^"']+)["']"#,
    )
    .unwrap()
});
static RE_TIME_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<time[^>]+datetime=["']([^"']+)["']"#).unwrap());
static RE_AUTHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+name=["']author["'][^>]+content=["']([^"']+)["']"#).unwrap()
});
static RE_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p[^>]*>(.*?)</p>").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static RE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());

/// Path fragments that never lead to an article page.
const NON_ARTICLE_PATHS: &[&str] = &[
    "/tag/", "/tags/", "/category/", "/categories/", "/author/", "/login", "/abonnement",
    "/subscribe", "/newsletter", "/video/", "/videos/", "/podcast", "/mentions-legales",
    "/cgu", "/contact", "/rss", "/feed",
];

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn strip_tags(html: &str) -> String {
    let without_scripts = RE_SCRIPT.replace_all(html, " ");
    let without_tags = RE_TAG.replace_all(&without_scripts, " ");
    decode_entities(&without_tags)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_capture(re: &Regex, html: &str) -> Option<String> {
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|s| !s.is_empty())
}

pub fn extract_title(html: &str) -> String {
    first_capture(&RE_OG_TITLE, html)
        .or_else(|| first_capture(&RE_TITLE_TAG, html).map(|t| strip_tags(&t)))
        .or_else(|| first_capture(&RE_H1, html).map(|t| strip_tags(&t)))
        .unwrap_or_default()
}

pub fn extract_meta_description(html: &str) -> String {
    first_capture(&RE_META_DESC, html)
        .or_else(|| first_capture(&RE_OG_DESC, html))
        .unwrap_or_default()
}

pub fn extract_published(html: &str) -> Option<DateTime<Utc>> {
    first_capture(&RE_PUBLISHED, html)
        .or_else(|| first_capture(&RE_TIME_TAG, html))
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Body text: paragraph blocks stripped of markup, short fragments dropped.
pub fn extract_body(html: &str) -> String {
    RE_PARAGRAPH
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| strip_tags(m.as_str()))
        .filter(|p| p.chars().count() >= 40)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn absolutize(href: &str, base_url: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if href.starts_with("//") {
        return Some(format!("https:{href}"));
    }
    if href.starts_with('/') {
        let base = url::Url::parse(base_url).ok()?;
        return Some(format!("{}://{}{}", base.scheme(), base.host_str()?, href));
    }
    None
}

fn looks_like_article_path(url: &str) -> bool {
    let path = url.split("://").nth(1).and_then(|r| r.find('/').map(|i| &r[i..])).unwrap_or("/");
    if path.len() < 8 {
        return false;
    }
    let has_digits = path.chars().any(|c| c.is_ascii_digit());
    let has_slug = path.split('/').any(|seg| seg.matches('-').count() >= 2);
    has_digits || has_slug
}

/// Candidate article URLs from a section page: same-domain links matching the
/// source's selector hints (or an article-ish heuristic when none), minus the
/// obvious non-article paths. Order-preserving, deduplicated.
pub fn discover_article_urls(html: &str, source: &Source, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for capture in RE_HREF.captures_iter(html) {
        let Some(href) = capture.get(1) else { continue };
        let Some(url) = absolutize(href.as_str(), &source.base_url) else {
            continue;
        };
        if extract_domain(&url) != extract_domain(&source.base_url) {
            continue;
        }
        let lower = url.to_lowercase();
        if NON_ARTICLE_PATHS.iter().any(|p| lower.contains(p)) {
            continue;
        }
        let selector_match = if source.link_selectors.is_empty() {
            looks_like_article_path(&url)
        } else {
            source.link_selectors.iter().any(|sel| lower.contains(&sel.to_lowercase()))
                || looks_like_article_path(&url)
        };
        if !selector_match {
            continue;
        }
        if seen.insert(url.clone()) {
            urls.push(url);
            if urls.len() >= max {
                break;
            }
        }
    }
    urls
}

/// Build an Article from a fetched page. Full bodies become `scrape_full`;
/// thin bodies with a usable title + meta description degrade to
/// `scrape_partial` with a synthesized body. Returns None when the content
/// gate rejects the page.
pub fn article_from_html(
    html: &str,
    url: &str,
    source: &Source,
    partial_threshold: usize,
) -> Option<Article> {
    let title = extract_title(html);
    let meta_description = extract_meta_description(html);
    let mut body = extract_body(html);
    let mut method = ExtractionMethod::ScrapeFull;

    if body.chars().count() < partial_threshold {
        if title.chars().count() >= 10 && meta_description.chars().count() >= 30 {
            body = format!("{title}. {meta_description}");
            method = ExtractionMethod::ScrapePartial;
        } else if body.chars().count() < 50 {
            debug!(url, "Rejecting page: body and metadata both too thin");
            return None;
        }
    }

    let article = Article {
        url: url.to_string(),
        source_domain: source.domain.clone(),
        source_name: source.name.clone(),
        raw_title: title,
        raw_text: body,
        published_at: extract_published(html),
        authors: first_capture(&RE_AUTHOR, html)
            .map(|a| vec![a])
            .unwrap_or_default(),
        image_url: first_capture(&RE_OG_IMAGE, html),
        language: source.language.clone(),
        extraction_method: method,
        tier: source.tier,
        category: source.category.clone(),
        meta_description,
        used_in_synthesis_id: String::new(),
        covered_by_sources: Vec::new(),
        duplicate_count: 0,
    };
    article.passes_content_gate().then_some(article)
}

/// Parse an RSS/Atom document into Articles. Entries with full content become
/// `rss_full`; title+summary entries become `rss_metadata`.
pub fn articles_from_feed(body: &str, source: &Source, max: usize) -> Vec<Article> {
    let feed = match feed_rs::parser::parse(body.as_bytes()) {
        Ok(feed) => feed,
        Err(e) => {
            debug!(domain = %source.domain, error = %e, "Unparseable feed");
            return Vec::new();
        }
    };

    let mut articles = Vec::new();
    for entry in feed.entries.into_iter().take(max) {
        let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
            continue;
        };
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default();
        let summary = entry
            .summary
            .as_ref()
            .map(|t| strip_tags(&t.content))
            .unwrap_or_default();
        let content = entry
            .content
            .as_ref()
            .and_then(|c| c.body.as_ref())
            .map(|b| strip_tags(b))
            .unwrap_or_default();

        let (body_text, method) = if content.chars().count() >= 200 {
            (content, ExtractionMethod::RssFull)
        } else if !summary.is_empty() {
            (summary.clone(), ExtractionMethod::RssMetadata)
        } else {
            continue;
        };

        let article = Article {
            url: link,
            source_domain: source.domain.clone(),
            source_name: source.name.clone(),
            raw_title: title,
            raw_text: body_text,
            published_at: entry.published.or(entry.updated),
            authors: entry.authors.iter().map(|p| p.name.clone()).collect(),
            image_url: None,
            language: source.language.clone(),
            extraction_method: method,
            tier: source.tier,
            category: source.category.clone(),
            meta_description: summary,
            used_in_synthesis_id: String::new(),
            covered_by_sources: Vec::new(),
            duplicate_count: 0,
        };
        if article.passes_content_gate() {
            articles.push(article);
        }
    }
    articles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Source {
        Source {
            domain: "journal.fr".to_string(),
            name: "Le Journal".to_string(),
            base_url: "https://journal.fr".to_string(),
            link_selectors: vec!["/article/".to_string()],
            title_selector: None,
            content_selector: None,
            rss_feeds: Vec::new(),
            rate_limit_secs: 1.0,
            tier: 2,
            language: "fr".to_string(),
            category: None,
            auto_discovered: false,
        }
    }

    const PAGE: &str = r#"<html><head>
        <title>Titre de page</title>
        <meta property="og:title" content="Grande annonce economique" />
        <meta name="description" content="Le gouvernement annonce un plan de relance massif." />
        <meta property="article:published_time" content="2026-07-30T08:00:00+00:00" />
        <meta name="author" content="Jean Dupont" />
        </head><body>
        <h1>Grande annonce</h1>
        <article>
        <p>Le gouvernement a annoncé ce mardi un plan de relance de cinquante milliards d'euros.</p>
        <p>Les marchés ont réagi positivement à cette annonce qui dépasse les attentes des analystes.</p>
        <p>court</p>
        </article>
        <script>var x = "<p>pas un paragraphe</p>";</script>
        </body></html>"#;

    #[test]
    fn title_prefers_og_title() {
        assert_eq!(extract_title(PAGE), "Grande annonce economique");
    }

    #[test]
    fn body_joins_long_paragraphs_only() {
        let body = extract_body(PAGE);
        assert!(body.contains("plan de relance"));
        assert!(body.contains("\n\n"));
        assert!(!body.contains("court"));
        assert!(!body.contains("pas un paragraphe"), "script content must be ignored");
    }

    #[test]
    fn published_time_parsed() {
        let published = extract_published(PAGE).unwrap();
        assert_eq!(published.to_rfc3339(), "2026-07-30T08:00:00+00:00");
    }

    #[test]
    fn full_page_extracts_as_scrape_full() {
        let article = article_from_html(PAGE, "https://journal.fr/article/plan", &source(), 100).unwrap();
        assert_eq!(article.extraction_method, ExtractionMethod::ScrapeFull);
        assert_eq!(article.authors, vec!["Jean Dupont"]);
    }

    #[test]
    fn thin_body_falls_back_to_partial() {
        let page = r#"<html><head>
            <meta property="og:title" content="Un titre suffisamment long" />
            <meta name="description" content="Une description qui fait au moins trente caractères." />
            </head><body><p>Accès réservé aux abonnés.</p></body></html>"#;
        let article = article_from_html(page, "https://journal.fr/article/paywall", &source(), 200).unwrap();
        assert_eq!(article.extraction_method, ExtractionMethod::ScrapePartial);
        assert!(article.raw_text.starts_with("Un titre suffisamment long. "));
    }

    #[test]
    fn hopeless_page_is_rejected() {
        let page = "<html><head><title>x</title></head><body><p>rien</p></body></html>";
        assert!(article_from_html(page, "https://journal.fr/a", &source(), 200).is_none());
    }

    #[test]
    fn discover_urls_filters_by_selector_and_domain() {
        let html = r#"
            <a href="/article/une-grande-annonce-2026">lien 1</a>
            <a href="https://journal.fr/article/autre-sujet-du-jour">lien 2</a>
            <a href="https://ailleurs.com/article/externe">externe</a>
            <a href="/tag/economie">tag</a>
            <a href="/article/une-grande-annonce-2026">doublon</a>
        "#;
        let urls = discover_article_urls(html, &source(), 10);
        assert_eq!(
            urls,
            vec![
                "https://journal.fr/article/une-grande-annonce-2026",
                "https://journal.fr/article/autre-sujet-du-jour",
            ]
        );
    }

    #[test]
    fn discover_urls_respects_cap() {
        let html: String = (0..20)
            .map(|i| format!("<a href=\"/article/sujet-{i}-du-jour\">l</a>"))
            .collect();
        assert_eq!(discover_article_urls(&html, &source(), 5).len(), 5);
    }

    #[test]
    fn feed_entries_become_articles() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Le Journal</title>
<item>
  <title>Annonce economique majeure</title>
  <link>https://journal.fr/article/annonce</link>
  <description>Le plan de relance depasse les attentes et mobilise cinquante milliards.</description>
  <pubDate>Wed, 30 Jul 2026 08:00:00 GMT</pubDate>
</item>
</channel></rss>"#;
        let articles = articles_from_feed(rss, &source(), 10);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].extraction_method, ExtractionMethod::RssMetadata);
        assert_eq!(articles[0].url, "https://journal.fr/article/annonce");
        assert!(articles[0].published_at.is_some());
    }

    #[test]
    fn unparseable_feed_yields_nothing() {
        assert!(articles_from_feed("not xml", &source(), 10).is_empty());
    }
}
