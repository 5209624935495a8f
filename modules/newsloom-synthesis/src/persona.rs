//! Editorial personas: category-driven weighted selection with a learnable
//! keyword override, and the quality scorer that gates every persona-styled
//! rewrite before it replaces the neutral version.

use std::sync::Mutex;

use newsloom_common::config::PersonaConfig;
use newsloom_common::{Sentiment, TopicIntensity};
use rand::Rng;
use regex::Regex;
use tracing::{debug, info};

// --- Persona definitions ---

#[derive(Debug)]
pub struct Persona {
    pub id: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    pub tone_keywords: &'static [&'static str],
    pub style_keywords: &'static [&'static str],
    pub style_patterns: &'static [&'static str],
    pub forbidden: &'static [&'static str],
    pub vocabulary_positive: &'static [&'static str],
    pub vocabulary_negative: &'static [&'static str],
    pub signature: &'static str,
    pub prompt_prefix: &'static str,
}

pub static NEUTRAL: Persona = Persona {
    id: "neutral",
    name: "Rédaction",
    emoji: "📰",
    tone_keywords: &["factuel", "objectif", "neutre", "informatif"],
    style_keywords: &[],
    style_patterns: &[],
    forbidden: &[],
    vocabulary_positive: &[],
    vocabulary_negative: &[],
    signature: "",
    prompt_prefix: "Tu écris dans un style neutre et factuel de grand quotidien.",
};

pub static LE_CYNIQUE: Persona = Persona {
    id: "le_cynique",
    name: "Le Cynique",
    emoji: "🕶️",
    tone_keywords: &["cynique", "ironique", "sardonique", "désabusé", "amer", "mordant"],
    style_keywords: &[
        "n'est-ce pas", "on se demande", "curieusement", "étonnamment", "à qui profite",
        "quelle surprise", "bien sûr", "évidemment", "naturellement", "sans surprise",
        "coïncidence", "paradoxalement",
    ],
    style_patterns: &[r"\?\s*$", r"on se demande", r"curieusement|étonnamment", r"à qui profite"],
    forbidden: &["formidable", "extraordinaire", "merveilleux", "fantastique", "génial", "super"],
    vocabulary_positive: &["certes", "néanmoins", "toutefois", "force est de constater", "de facto"],
    vocabulary_negative: &["trop cool", "génial", "super", "wow"],
    signature: "À qui profite le crime, n'est-ce pas ?",
    prompt_prefix: "Tu es Le Cynique: un éditorialiste désabusé et mordant. Questions rhétoriques, \
                    ironie froide, jamais d'enthousiasme.",
};

pub static L_OPTIMISTE: Persona = Persona {
    id: "l_optimiste",
    name: "L'Optimiste",
    emoji: "🌅",
    tone_keywords: &["positif", "prometteur", "espoir", "solution", "progrès", "opportunité"],
    style_keywords: &[
        "pourrait bien", "permet", "transforme", "révolutionne", "ouvre", "potentiel",
        "prometteur", "opportunité", "avenir", "solution", "innovant", "espoir", "et si c'était",
        "imaginons", "fascinant",
    ],
    style_patterns: &[r"Et si .+\?", r"pourrait|permettrait", r"potentiel|opportunité"],
    forbidden: &["catastrophe", "désastre", "échec total", "sans espoir", "irrémédiable"],
    vocabulary_positive: &["transforme", "révolutionne", "permet", "ouvre", "améliore", "crée"],
    vocabulary_negative: &["impossible", "échec", "catastrophe", "jamais"],
    signature: "Et si c'était le début de quelque chose de grand ?",
    prompt_prefix: "Tu es L'Optimiste: tu mets en avant les solutions, le potentiel et les \
                    ouvertures que révèle l'actualité, sans naïveté.",
};

pub static LE_CONTEUR: Persona = Persona {
    id: "le_conteur",
    name: "Le Conteur",
    emoji: "🎭",
    tone_keywords: &["épique", "dramatique", "haletant", "suspense", "rebondissement"],
    style_keywords: &[
        "dans les couloirs", "bataille", "siège", "alliance", "trahison", "échiquier",
        "personnage", "acte", "scène", "intrigue", "saga", "rebondissement", "dénouement",
        "feuilleton",
    ],
    style_patterns: &[r"la suite au prochain", r"acte|scène", r"bataille|siège|alliance", r"\.\.\."],
    forbidden: &[],
    vocabulary_positive: &["ainsi", "tandis que", "cependant", "dès lors", "en effet", "jadis"],
    vocabulary_negative: &[],
    signature: "La suite au prochain épisode.",
    prompt_prefix: "Tu es Le Conteur: tu racontes l'actualité comme un feuilleton, avec des \
                    personnages, des actes et du suspense, sans jamais trahir les faits.",
};

pub static LE_SATIRISTE: Persona = Persona {
    id: "le_satiriste",
    name: "Le Satiriste",
    emoji: "🃏",
    tone_keywords: &["parodique", "absurde", "exagération", "satire"],
    style_keywords: &[
        "on ne sait plus si c'est vrai", "selon un expert", "communiqué de presse",
        "source proche", "officiellement", "bien évidemment", "comme prévu", "en toute logique",
        "sans surprise aucune", "quelle coïncidence",
    ],
    style_patterns: &[r"on ne sait plus si c'est vrai", r"\d+\s*%", r"officiellement|communiqué"],
    forbidden: &[],
    vocabulary_positive: &["officiellement", "communiqué", "selon nos informations", "expert", "statistiques"],
    vocabulary_negative: &[],
    signature: "On ne sait plus si c'est vrai.",
    prompt_prefix: "Tu es Le Satiriste: tu détournes les codes du journalisme officiel avec des \
                    statistiques parodiques et des sources anonymes, tout en restant factuel sur le fond.",
};

pub static L_ANALYSTE: Persona = Persona {
    id: "l_analyste",
    name: "L'Analyste",
    emoji: "📊",
    tone_keywords: &["analyse", "structurel", "tendance", "indicateur", "données"],
    style_keywords: &[
        "les données montrent", "en chiffres", "statistiquement", "l'indicateur",
        "tendance de fond", "sur le long terme", "les fondamentaux", "corrélation",
        "en pourcentage", "le signal",
    ],
    style_patterns: &[r"\d+\s*%", r"les données|les chiffres", r"tendance"],
    forbidden: &[],
    vocabulary_positive: &["mesure", "quantifie", "indique", "corrèle", "projette"],
    vocabulary_negative: &["on dit que", "paraît-il"],
    signature: "Les chiffres parlent d'eux-mêmes.",
    prompt_prefix: "Tu es L'Analyste: tu lis l'actualité à travers les données, les ordres de \
                    grandeur et les tendances de fond.",
};

pub fn named_personas() -> [&'static Persona; 5] {
    [&LE_CYNIQUE, &L_OPTIMISTE, &LE_CONTEUR, &LE_SATIRISTE, &L_ANALYSTE]
}

pub fn persona_by_id(id: &str) -> Option<&'static Persona> {
    if id == NEUTRAL.id {
        return Some(&NEUTRAL);
    }
    named_personas().into_iter().find(|p| p.id == id)
}

fn category_persona(category: Option<&str>, sentiment: Sentiment) -> &'static Persona {
    match sentiment {
        Sentiment::Positive => return &L_OPTIMISTE,
        Sentiment::Negative => return &LE_CYNIQUE,
        _ => {}
    }
    match category.unwrap_or("general") {
        "politique" => &LE_SATIRISTE,
        "economie" | "science" => &L_ANALYSTE,
        "technologie" => &L_OPTIMISTE,
        "culture" | "sport" => &LE_CONTEUR,
        _ => &LE_CYNIQUE,
    }
}

// --- Keyword table (learnable override) ---

#[derive(Debug, Clone)]
pub struct KeywordEntry {
    pub phrase: String,
    pub persona_id: String,
    pub confidence: f64,
    pub hits: u32,
}

/// Domain-phrase -> persona override table. Seeded with a few stable
/// associations; the learning loop reinforces entries over time.
pub struct KeywordTable {
    entries: Mutex<Vec<KeywordEntry>>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::with_seed()
    }
}

impl KeywordTable {
    pub fn empty() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_seed() -> Self {
        let seed = [
            ("intelligence artificielle", "l_analyste", 0.7),
            ("élection", "le_satiriste", 0.65),
            ("scandale", "le_cynique", 0.7),
            ("découverte", "l_optimiste", 0.65),
            ("procès", "le_conteur", 0.6),
        ];
        Self {
            entries: Mutex::new(
                seed.into_iter()
                    .map(|(phrase, persona_id, confidence)| KeywordEntry {
                        phrase: phrase.to_string(),
                        persona_id: persona_id.to_string(),
                        confidence,
                        hits: 0,
                    })
                    .collect(),
            ),
        }
    }

    /// Best matching entry against a haystack (title + key entities),
    /// highest confidence first.
    pub fn lookup(&self, haystack: &str) -> Option<(String, f64)> {
        let lower = haystack.to_lowercase();
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|e| lower.contains(&e.phrase))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|e| (e.persona_id.clone(), e.confidence))
    }

    /// Online update: reinforce an existing association or learn a new one
    /// at low initial confidence.
    pub fn record_hit(&self, phrase: &str, persona_id: &str) {
        let phrase = phrase.to_lowercase();
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.phrase == phrase && e.persona_id == persona_id)
        {
            entry.hits += 1;
            entry.confidence = (entry.confidence + 0.05).min(0.99);
        } else {
            entries.push(KeywordEntry {
                phrase,
                persona_id: persona_id.to_string(),
                confidence: 0.5,
                hits: 1,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

// --- Selection ---

pub struct PersonaSelector {
    table: KeywordTable,
    config: PersonaConfig,
}

impl PersonaSelector {
    pub fn new(table: KeywordTable, config: PersonaConfig) -> Self {
        Self { table, config }
    }

    pub fn table(&self) -> &KeywordTable {
        &self.table
    }

    /// Pick the persona for a synthesis. Breaking news is always neutral;
    /// a confident keyword match overrides the category rules; otherwise a
    /// weighted draw (70% category mapping, 30% uniform).
    pub fn select(
        &self,
        category: Option<&str>,
        sentiment: Sentiment,
        intensity: TopicIntensity,
        title: &str,
        key_entities: &[String],
    ) -> &'static Persona {
        let mut rng = rand::rng();
        let roll = rng.random_range(0.0..1.0);
        let uniform_pick = rng.random_range(0..named_personas().len());
        self.select_with_rolls(category, sentiment, intensity, title, key_entities, roll, uniform_pick)
    }

    /// Deterministic core, exposed for tests.
    pub fn select_with_rolls(
        &self,
        category: Option<&str>,
        sentiment: Sentiment,
        intensity: TopicIntensity,
        title: &str,
        key_entities: &[String],
        roll: f64,
        uniform_pick: usize,
    ) -> &'static Persona {
        if intensity == TopicIntensity::Breaking {
            debug!("Breaking news: forcing neutral persona");
            return &NEUTRAL;
        }

        let haystack = format!("{title} {}", key_entities.join(" "));
        if let Some((persona_id, confidence)) = self.table.lookup(&haystack) {
            if confidence >= self.config.keyword_confidence_threshold {
                if let Some(persona) = persona_by_id(&persona_id) {
                    info!(persona = persona.id, confidence, "Keyword table override");
                    return persona;
                }
            }
        }

        let favored = category_persona(category, sentiment);
        if roll < 0.7 {
            favored
        } else {
            let others: Vec<&'static Persona> = named_personas()
                .into_iter()
                .filter(|p| p.id != favored.id)
                .collect();
            others[uniform_pick % others.len()]
        }
    }
}

// --- Quality scoring ---

const WEIGHT_TONE: f64 = 0.35;
const WEIGHT_STYLE: f64 = 0.25;
const WEIGHT_SIGNATURE: f64 = 0.15;
const WEIGHT_VOCABULARY: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct QualityResult {
    pub tone_score: f64,
    pub style_markers: usize,
    pub style_score: f64,
    pub signature_present: bool,
    pub vocabulary_score: f64,
    pub overall: f64,
}

fn count_hits(text: &str, needles: &[&str]) -> usize {
    needles.iter().map(|n| text.matches(n).count()).sum()
}

/// Score a persona-styled text against its persona's fixed marker sets.
pub fn score_quality(text: &str, persona: &Persona) -> QualityResult {
    if persona.id == NEUTRAL.id {
        return QualityResult {
            tone_score: 1.0,
            style_markers: 0,
            style_score: 1.0,
            signature_present: true,
            vocabulary_score: 1.0,
            overall: 1.0,
        };
    }

    let lower = text.to_lowercase();

    let tone_hits = count_hits(&lower, persona.tone_keywords);
    let tone_score = (tone_hits as f64 / 2.0).min(1.0);

    let keyword_hits = count_hits(&lower, persona.style_keywords);
    let pattern_hits = persona
        .style_patterns
        .iter()
        .filter(|p| Regex::new(p).map(|re| re.is_match(text)).unwrap_or(false))
        .count();
    let style_markers = keyword_hits + pattern_hits;
    let forbidden_hits = count_hits(&lower, persona.forbidden);
    let base_style = (style_markers as f64 / 4.0).min(1.0);
    let style_score = (base_style - (forbidden_hits as f64 * 0.2).min(0.4)).max(0.0);

    let signature_present =
        persona.signature.is_empty() || lower.contains(&persona.signature.to_lowercase());

    let positive = count_hits(&lower, persona.vocabulary_positive);
    let negative = count_hits(&lower, persona.vocabulary_negative);
    let vocabulary_score = ((positive as f64 / 3.0).min(1.0) - negative as f64 * 0.2).clamp(0.0, 1.0);

    let overall = tone_score * WEIGHT_TONE
        + style_score * WEIGHT_STYLE
        + if signature_present { WEIGHT_SIGNATURE } else { 0.0 }
        + vocabulary_score * WEIGHT_VOCABULARY;

    QualityResult {
        tone_score,
        style_markers,
        style_score,
        signature_present,
        vocabulary_score,
        overall,
    }
}

/// Acceptance gate: below threshold, or missing the signature while the tone
/// is off, keeps the neutral version.
pub fn quality_accepts(result: &QualityResult, threshold: f64) -> bool {
    if result.overall < threshold {
        return false;
    }
    if !result.signature_present && result.tone_score < 0.4 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> PersonaSelector {
        PersonaSelector::new(KeywordTable::with_seed(), PersonaConfig::default())
    }

    #[test]
    fn breaking_forces_neutral() {
        let s = selector();
        let persona = s.select_with_rolls(
            Some("politique"),
            Sentiment::Negative,
            TopicIntensity::Breaking,
            "Alerte majeure",
            &[],
            0.1,
            0,
        );
        assert_eq!(persona.id, "neutral");
    }

    #[test]
    fn category_mapping_drives_seventy_percent() {
        let s = selector();
        let persona = s.select_with_rolls(
            Some("economie"),
            Sentiment::Neutral,
            TopicIntensity::Standard,
            "Rapport trimestriel",
            &[],
            0.4,
            0,
        );
        assert_eq!(persona.id, "l_analyste");
    }

    #[test]
    fn sentiment_biases_selection() {
        let s = selector();
        let positive = s.select_with_rolls(
            Some("politique"),
            Sentiment::Positive,
            TopicIntensity::Standard,
            "Accord trouvé",
            &[],
            0.3,
            0,
        );
        assert_eq!(positive.id, "l_optimiste");
        let negative = s.select_with_rolls(
            Some("technologie"),
            Sentiment::Negative,
            TopicIntensity::Standard,
            "Faille critique",
            &[],
            0.3,
            0,
        );
        assert_eq!(negative.id, "le_cynique");
    }

    #[test]
    fn uniform_branch_avoids_favored_persona() {
        let s = selector();
        for pick in 0..8 {
            let persona = s.select_with_rolls(
                Some("economie"),
                Sentiment::Neutral,
                TopicIntensity::Standard,
                "Rapport trimestriel",
                &[],
                0.9,
                pick,
            );
            assert_ne!(persona.id, "l_analyste");
        }
    }

    #[test]
    fn keyword_override_beats_category() {
        let s = selector();
        let persona = s.select_with_rolls(
            Some("economie"),
            Sentiment::Neutral,
            TopicIntensity::Standard,
            "Nouveau scandale dans le secteur bancaire",
            &[],
            0.4,
            0,
        );
        assert_eq!(persona.id, "le_cynique", "'scandale' keyword should override");
    }

    #[test]
    fn low_confidence_keyword_does_not_override() {
        let table = KeywordTable::empty();
        table.record_hit("dossier", "le_conteur"); // starts at 0.5 < 0.6
        let s = PersonaSelector::new(table, PersonaConfig::default());
        let persona = s.select_with_rolls(
            Some("economie"),
            Sentiment::Neutral,
            TopicIntensity::Standard,
            "Un dossier sensible",
            &[],
            0.4,
            0,
        );
        assert_eq!(persona.id, "l_analyste");
    }

    #[test]
    fn keyword_learning_reinforces_confidence() {
        let table = KeywordTable::empty();
        table.record_hit("dossier", "le_conteur");
        for _ in 0..3 {
            table.record_hit("dossier", "le_conteur");
        }
        let (persona_id, confidence) = table.lookup("un dossier sensible").unwrap();
        assert_eq!(persona_id, "le_conteur");
        assert!(confidence >= 0.6);
    }

    #[test]
    fn quality_scorer_rewards_on_voice_text() {
        let on_voice = "Curieusement, on se demande à qui profite cette réforme. Sans surprise, \
                        les acteurs concernés applaudissent, n'est-ce pas ? Force est de constater \
                        que le cynisme paie, cynique et ironique, certes, néanmoins. \
                        À qui profite le crime, n'est-ce pas ?";
        let result = score_quality(on_voice, &LE_CYNIQUE);
        assert!(result.signature_present);
        assert!(result.overall >= 0.6, "overall was {}", result.overall);
        assert!(quality_accepts(&result, 0.6));
    }

    #[test]
    fn quality_scorer_rejects_off_voice_text() {
        let off_voice = "C'est formidable et génial, un progrès extraordinaire et merveilleux \
                         pour tout le monde, super nouvelle fantastique.";
        let result = score_quality(off_voice, &LE_CYNIQUE);
        assert!(!result.signature_present);
        assert!(!quality_accepts(&result, 0.6));
    }

    #[test]
    fn neutral_always_passes() {
        let result = score_quality("n'importe quoi", &NEUTRAL);
        assert_eq!(result.overall, 1.0);
        assert!(quality_accepts(&result, 0.6));
    }

    #[test]
    fn forbidden_words_penalize_style() {
        let with_markers = "On se demande, curieusement, sans surprise, à qui profite tout cela.";
        let with_forbidden = format!("{with_markers} C'est génial, formidable et fantastique.");
        let clean = score_quality(with_markers, &LE_CYNIQUE);
        let penalized = score_quality(&with_forbidden, &LE_CYNIQUE);
        assert!(penalized.style_score < clean.style_score);
    }
}
