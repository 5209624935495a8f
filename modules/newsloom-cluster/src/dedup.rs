//! Two-pass deduplication: a cheap MD5 fingerprint rejects exact repeats,
//! then pairwise embedding similarity collapses near-duplicates across
//! sources, keeping the earliest-published representative.

use std::collections::HashSet;

use newsloom_common::Article;
use newsloom_store::cosine_similarity;
use tracing::{debug, info};

/// MD5 over lowercased `title || body`. Stable within and across runs.
pub fn fingerprint(title: &str, body: &str) -> String {
    let normalized = format!("{}{}", title.to_lowercase(), body.to_lowercase());
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub articles: Vec<Article>,
    pub embeddings: Vec<Vec<f32>>,
    pub removed: Vec<Article>,
}

/// Deduplicate a run's articles. `embeddings` is parallel to `articles`.
/// Idempotent: feeding the output back in returns it unchanged.
pub fn dedup_articles(
    articles: Vec<Article>,
    embeddings: Vec<Vec<f32>>,
    similarity_threshold: f32,
) -> DedupOutcome {
    debug_assert_eq!(articles.len(), embeddings.len());

    // Pass 1: exact fingerprint within the run.
    let mut seen = HashSet::new();
    let mut survivors: Vec<(Article, Vec<f32>)> = Vec::new();
    let mut removed = Vec::new();
    for (article, embedding) in articles.into_iter().zip(embeddings) {
        let fp = fingerprint(&article.raw_title, &article.raw_text);
        if seen.insert(fp) {
            survivors.push((article, embedding));
        } else {
            debug!(url = %article.url, "Exact duplicate dropped by fingerprint");
            removed.push(article);
        }
    }

    // Pass 2: group near-duplicates by pairwise cosine, greedily seeded in
    // input order. Each group keeps its earliest-published member.
    let n = survivors.len();
    let mut group_of: Vec<Option<usize>> = vec![None; n];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for i in 0..n {
        if group_of[i].is_some() {
            continue;
        }
        let group_id = groups.len();
        group_of[i] = Some(group_id);
        let mut members = vec![i];
        for j in (i + 1)..n {
            if group_of[j].is_some() {
                continue;
            }
            let sim = cosine_similarity(&survivors[i].1, &survivors[j].1);
            if sim >= similarity_threshold {
                group_of[j] = Some(group_id);
                members.push(j);
            }
        }
        groups.push(members);
    }

    let mut outcome = DedupOutcome::default();
    for members in groups {
        let representative = *members
            .iter()
            .min_by_key(|&&idx| {
                survivors[idx]
                    .0
                    .published_at
                    .map(|t| t.timestamp())
                    .unwrap_or(i64::MAX)
            })
            .unwrap_or(&members[0]);

        let covered: Vec<String> = members
            .iter()
            .filter(|&&idx| idx != representative)
            .map(|&idx| survivors[idx].0.source_name.clone())
            .collect();

        let (mut kept, embedding) = survivors[representative].clone();
        // Only extend provenance when this pass actually collapsed something,
        // so a second run over the output is a no-op.
        if !covered.is_empty() {
            kept.duplicate_count += covered.len() as u32;
            for name in covered {
                if !kept.covered_by_sources.contains(&name) && name != kept.source_name {
                    kept.covered_by_sources.push(name);
                }
            }
        }
        outcome.articles.push(kept);
        outcome.embeddings.push(embedding);

        for &idx in &members {
            if idx != representative {
                outcome.removed.push(survivors[idx].0.clone());
            }
        }
    }

    info!(
        unique = outcome.articles.len(),
        removed = outcome.removed.len(),
        "Deduplication complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use newsloom_common::ExtractionMethod;

    fn article(url: &str, source: &str, title: &str, hours_ago: i64) -> Article {
        Article {
            url: url.to_string(),
            source_domain: format!("{source}.fr"),
            source_name: source.to_string(),
            raw_title: title.to_string(),
            raw_text: format!("corps de l'article {title} avec suffisamment de contenu textuel"),
            published_at: Some(Utc::now() - Duration::hours(hours_ago)),
            authors: Vec::new(),
            image_url: None,
            language: "fr".to_string(),
            extraction_method: ExtractionMethod::ScrapeFull,
            tier: 2,
            category: None,
            meta_description: String::new(),
            used_in_synthesis_id: String::new(),
            covered_by_sources: Vec::new(),
            duplicate_count: 0,
        }
    }

    #[test]
    fn fingerprint_is_case_insensitive() {
        assert_eq!(fingerprint("Titre", "Corps"), fingerprint("TITRE", "CORPS"));
        assert_ne!(fingerprint("Titre", "Corps"), fingerprint("Titre", "Autre"));
    }

    #[test]
    fn exact_duplicates_removed_by_fingerprint() {
        let a = article("https://a.fr/1", "A", "Même titre", 1);
        let mut b = article("https://b.fr/1", "B", "Même titre", 2);
        b.raw_text = a.raw_text.clone();
        let out = dedup_articles(vec![a, b], vec![vec![1.0, 0.0], vec![0.0, 1.0]], 0.92);
        assert_eq!(out.articles.len(), 1);
        assert_eq!(out.removed.len(), 1);
    }

    #[test]
    fn near_duplicates_collapse_keeping_earliest() {
        let older = article("https://a.fr/1", "A", "Annonce du plan", 5);
        let newer = article("https://b.fr/1", "B", "Plan annoncé", 1);
        let out = dedup_articles(
            vec![newer, older],
            vec![vec![1.0, 0.0], vec![0.99, 0.01]],
            0.92,
        );
        assert_eq!(out.articles.len(), 1);
        let kept = &out.articles[0];
        assert_eq!(kept.source_name, "A", "earliest-published wins");
        assert_eq!(kept.duplicate_count, 1);
        assert_eq!(kept.covered_by_sources, vec!["B"]);
    }

    #[test]
    fn dissimilar_articles_survive() {
        let a = article("https://a.fr/1", "A", "Sujet économie", 1);
        let b = article("https://b.fr/1", "B", "Sujet sport", 1);
        let out = dedup_articles(vec![a, b], vec![vec![1.0, 0.0], vec![0.0, 1.0]], 0.92);
        assert_eq!(out.articles.len(), 2);
        assert!(out.removed.is_empty());
    }

    #[test]
    fn dedup_is_idempotent() {
        let articles = vec![
            article("https://a.fr/1", "A", "Annonce du plan", 5),
            article("https://b.fr/1", "B", "Plan annoncé", 1),
            article("https://c.fr/1", "C", "Autre sujet", 2),
        ];
        let embeddings = vec![vec![1.0, 0.0], vec![0.99, 0.01], vec![0.0, 1.0]];
        let first = dedup_articles(articles, embeddings, 0.92);
        let second = dedup_articles(first.articles.clone(), first.embeddings.clone(), 0.92);
        let urls_first: Vec<&str> = first.articles.iter().map(|a| a.url.as_str()).collect();
        let urls_second: Vec<&str> = second.articles.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls_first, urls_second);
        assert!(second.removed.is_empty());
        assert_eq!(
            first.articles[0].duplicate_count,
            second.articles[0].duplicate_count
        );
    }
}
