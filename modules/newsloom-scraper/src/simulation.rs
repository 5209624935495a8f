//! Deterministic in-memory articles for SIMULATION runs: exercises the whole
//! pipeline downstream of the scraper without touching the network.

use chrono::{Duration, Utc};
use newsloom_common::{Article, ExtractionMethod};

const SIM_SOURCES: &[(&str, &str)] = &[
    ("simulation-un.fr", "Simulation Un"),
    ("simulation-deux.fr", "Simulation Deux"),
    ("simulation-trois.fr", "Simulation Trois"),
];

pub fn simulated_articles(topics: &[String], max_per_source: usize) -> Vec<Article> {
    let default_topics = vec!["energie".to_string(), "transports".to_string()];
    let topics = if topics.is_empty() { &default_topics } else { topics };
    let now = Utc::now();

    let mut articles = Vec::new();
    for (source_index, (domain, name)) in SIM_SOURCES.iter().enumerate() {
        for (topic_index, topic) in topics.iter().take(max_per_source).enumerate() {
            let body = format!(
                "Selon plusieurs acteurs du secteur {topic}, la situation a évolué de manière \
                 significative cette semaine. Les chiffres publiés mardi montrent une progression \
                 de {pct}% par rapport au trimestre précédent, et trois organisations ont annoncé \
                 des mesures coordonnées. Les observateurs attendent une décision officielle dans \
                 les prochains jours concernant le dossier {topic}.",
                pct = 10 + source_index * 5 + topic_index
            );
            articles.push(Article {
                url: format!("https://{domain}/article/{topic}-{topic_index}"),
                source_domain: domain.to_string(),
                source_name: name.to_string(),
                raw_title: format!("Développements autour de {topic} ({name})"),
                raw_text: body,
                published_at: Some(now - Duration::hours(source_index as i64 + 1)),
                authors: vec!["Rédaction".to_string()],
                image_url: None,
                language: "fr".to_string(),
                extraction_method: ExtractionMethod::Api,
                tier: 2,
                category: Some("general".to_string()),
                meta_description: format!("Le point sur {topic}."),
                used_in_synthesis_id: String::new(),
                covered_by_sources: Vec::new(),
                duplicate_count: 0,
            });
        }
    }
    articles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_is_deterministic_in_shape() {
        let topics = vec!["climat".to_string()];
        let a = simulated_articles(&topics, 5);
        let b = simulated_articles(&topics, 5);
        assert_eq!(a.len(), 3);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].url, b[0].url);
        assert!(a.iter().all(|x| x.passes_content_gate()));
    }

    #[test]
    fn empty_topics_fall_back_to_defaults() {
        let articles = simulated_articles(&[], 5);
        assert_eq!(articles.len(), 6);
    }
}
