//! Keyword-based topic routing for incoming questions.
//!
//! Classification is a heuristic: count keyword pattern hits per topic and
//! pick the topic with the most. Ties break by the fixed priority order of
//! [`BUILTIN_TOPICS`]; zero hits anywhere falls through to `general`. The
//! winning topic contributes a short addition to the generation prompt and a
//! localized label for the answer payload.

use regex::Regex;

use crate::config::TopicsConfig;
use crate::errors::EngineError;

pub struct TopicDef {
    pub name: &'static str,
    pub label_en: &'static str,
    pub label_fr: &'static str,
    keywords: &'static [&'static str],
    pub prompt_addition: &'static str,
}

/// Topics in tie-break priority order. `general` is the fallback and carries
/// no keywords of its own.
pub const BUILTIN_TOPICS: &[TopicDef] = &[
    TopicDef {
        name: "water_utilities",
        label_en: "Water & Utilities",
        label_fr: "Eau et services publics",
        keywords: &[
            "water", "sewer", "sewage", "utility", "utilities", "hydrant", "meter",
            "billing", "drainage", "storm ?water", "eau", "aqueduc", "égout", "compteur",
        ],
        prompt_addition: "The question concerns water or utility services. Mention how to \
                          report outages or billing issues when relevant.",
    },
    TopicDef {
        name: "building_permits",
        label_en: "Building & Permits",
        label_fr: "Construction et permis",
        keywords: &[
            "permit", "permits", "zoning", "construction", "renovation", "inspection",
            "building code", "variance", "demolition", "fence", "deck", "permis",
            "zonage", "rénovation",
        ],
        prompt_addition: "The question concerns building permits or zoning. Point to the \
                          application process and required documents when relevant.",
    },
    TopicDef {
        name: "recreation",
        label_en: "Recreation & Parks",
        label_fr: "Loisirs et parcs",
        keywords: &[
            "pool", "arena", "rink", "park", "parks", "trail", "camp", "swim",
            "skating", "recreation", "fitness", "program", "registration", "piscine",
            "aréna", "parc", "loisirs",
        ],
        prompt_addition: "The question concerns recreation programs or facilities. Include \
                          hours and registration details when available.",
    },
    TopicDef {
        name: "taxes_finance",
        label_en: "Taxes & Finance",
        label_fr: "Taxes et finances",
        keywords: &[
            "tax", "taxes", "property tax", "assessment", "payment", "due date",
            "budget", "fee", "fees", "invoice", "taxe", "évaluation", "paiement",
        ],
        prompt_addition: "The question concerns taxes or municipal finance. Quote amounts \
                          and due dates only when the context states them.",
    },
    TopicDef {
        name: "roads_transportation",
        label_en: "Roads & Transportation",
        label_fr: "Routes et transport",
        keywords: &[
            "road", "roads", "street", "pothole", "snow", "plow", "plowing",
            "sidewalk", "traffic", "parking", "transit", "bus", "route", "déneigement",
            "stationnement", "trottoir",
        ],
        prompt_addition: "The question concerns roads or transportation. Mention how to \
                          report road problems when relevant.",
    },
    TopicDef {
        name: "waste_collection",
        label_en: "Waste & Recycling",
        label_fr: "Déchets et recyclage",
        keywords: &[
            "garbage", "trash", "waste", "recycling", "recycle", "compost", "landfill",
            "pickup", "collection", "bin", "bulky", "ordures", "recyclage", "déchets",
        ],
        prompt_addition: "The question concerns waste collection. Give the relevant \
                          schedule and sorting rules when the context has them.",
    },
    TopicDef {
        name: "council_meetings",
        label_en: "Council & Meetings",
        label_fr: "Conseil et réunions",
        keywords: &[
            "council", "meeting", "meetings", "agenda", "minutes", "bylaw", "by-law",
            "mayor", "councillor", "motion", "public hearing", "conseil", "réunion",
            "règlement", "maire",
        ],
        prompt_addition: "The question concerns council business. Cite the specific \
                          meeting or bylaw from the context when possible.",
    },
    TopicDef {
        name: "general",
        label_en: "General",
        label_fr: "Général",
        keywords: &[],
        prompt_addition: "",
    },
];

struct CompiledTopic {
    def: &'static TopicDef,
    patterns: Vec<Regex>,
}

pub struct TopicRouter {
    topics: Vec<CompiledTopic>,
    bias: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TopicMatch {
    pub name: &'static str,
    pub label_en: &'static str,
    pub label_fr: &'static str,
    pub prompt_addition: &'static str,
}

impl TopicMatch {
    pub fn label(&self, language: &str) -> &'static str {
        if language == "fr" {
            self.label_fr
        } else {
            self.label_en
        }
    }
}

fn compile_keyword(keyword: &str) -> Result<Regex, EngineError> {
    // Word-bounded so "bin" does not hit "binding".
    Regex::new(&format!(r"(?i)\b(?:{})\b", keyword))
        .map_err(|e| EngineError::Config(format!("bad topic keyword '{}': {}", keyword, e)))
}

impl TopicRouter {
    pub fn new(config: &TopicsConfig) -> Result<Self, EngineError> {
        let mut topics = Vec::with_capacity(BUILTIN_TOPICS.len());

        for def in BUILTIN_TOPICS {
            let mut patterns = Vec::with_capacity(def.keywords.len());
            for keyword in def.keywords {
                patterns.push(compile_keyword(keyword)?);
            }
            if let Some(extra) = config.extra_keywords.get(def.name) {
                for keyword in extra {
                    patterns.push(compile_keyword(keyword)?);
                }
            }
            topics.push(CompiledTopic { def, patterns });
        }

        Ok(Self {
            topics,
            bias: config.bias.clone(),
        })
    }

    /// Source-key prefix preferred in retrieval for a topic, if configured.
    pub fn bias_prefix(&self, topic: &str) -> Option<&str> {
        self.bias.get(topic).map(String::as_str)
    }

    /// Classify a question. Never fails; the worst case is `general`.
    pub fn classify(&self, question: &str) -> TopicMatch {
        let mut best: Option<(&CompiledTopic, usize)> = None;

        for topic in &self.topics {
            let hits = topic
                .patterns
                .iter()
                .filter(|p| p.is_match(question))
                .count();
            if hits == 0 {
                continue;
            }
            // Strictly-greater keeps the earlier topic on ties.
            if best.map_or(true, |(_, b)| hits > b) {
                best = Some((topic, hits));
            }
        }

        let def = best
            .map(|(t, _)| t.def)
            .unwrap_or_else(|| &BUILTIN_TOPICS[BUILTIN_TOPICS.len() - 1]);

        TopicMatch {
            name: def.name,
            label_en: def.label_en,
            label_fr: def.label_fr,
            prompt_addition: def.prompt_addition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TopicRouter {
        TopicRouter::new(&TopicsConfig::default()).unwrap()
    }

    #[test]
    fn test_clear_single_topic() {
        let m = router().classify("When is garbage pickup on my street side?");
        // "garbage" and "pickup" outscore the single roads hit on "street"
        assert_eq!(m.name, "waste_collection");
    }

    #[test]
    fn test_no_keywords_falls_back_to_general() {
        let m = router().classify("Tell me something interesting.");
        assert_eq!(m.name, "general");
        assert_eq!(m.label("en"), "General");
    }

    #[test]
    fn test_tie_breaks_by_priority_order() {
        // One water hit, one recreation hit: water_utilities is listed first.
        let m = router().classify("Is the water at the park safe?");
        assert_eq!(m.name, "water_utilities");
    }

    #[test]
    fn test_tax_question_prefers_taxes_over_general_terms() {
        let m = router().classify("When is my property tax payment due?");
        assert_eq!(m.name, "taxes_finance");
    }

    #[test]
    fn test_word_boundaries() {
        // "binding" must not match the waste keyword "bin"
        let m = router().classify("Is this agreement binding?");
        assert_eq!(m.name, "general");
    }

    #[test]
    fn test_french_keywords_and_labels() {
        let m = router().classify("Quand passe la collecte des ordures?");
        assert_eq!(m.name, "waste_collection");
        assert_eq!(m.label("fr"), "Déchets et recyclage");
    }

    #[test]
    fn test_extra_keywords_from_config() {
        let mut config = TopicsConfig::default();
        config
            .extra_keywords
            .insert("recreation".to_string(), vec!["pickleball".to_string()]);
        let router = TopicRouter::new(&config).unwrap();

        assert_eq!(router.classify("pickleball times?").name, "recreation");
    }

    #[test]
    fn test_bias_prefix_lookup() {
        let mut config = TopicsConfig::default();
        config
            .bias
            .insert("council_meetings".to_string(), "meeting://".to_string());
        let router = TopicRouter::new(&config).unwrap();

        assert_eq!(router.bias_prefix("council_meetings"), Some("meeting://"));
        assert_eq!(router.bias_prefix("recreation"), None);
    }

    #[test]
    fn test_bad_extra_keyword_is_a_config_error() {
        let mut config = TopicsConfig::default();
        config
            .extra_keywords
            .insert("recreation".to_string(), vec!["(unclosed".to_string()]);
        assert!(TopicRouter::new(&config).is_err());
    }
}
