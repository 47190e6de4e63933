//! Archetype inference (spec §4.E Stage 3): a coarse classification of the
//! decision used to steer downstream heuristics and option synthesis.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Archetype {
    Investment,
    Hiring,
    BuyVsBuild,
    Generic,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchetypeMatch {
    pub archetype: Archetype,
    pub match_quality: f64,
    pub confidence: f64,
}

const KEYWORDS: &[(&str, Archetype)] = &[
    ("invest", Archetype::Investment),
    ("funding", Archetype::Investment),
    ("hire", Archetype::Hiring),
    ("hiring", Archetype::Hiring),
    ("recruit", Archetype::Hiring),
    ("buy", Archetype::BuyVsBuild),
    ("build", Archetype::BuyVsBuild),
    ("vendor", Archetype::BuyVsBuild),
];

/// Keyword match over the brief, deterministic and LLM-independent. Ties
/// favour the earliest-declared archetype in `KEYWORDS`.
pub fn infer(brief: &str, hint: Option<&str>) -> ArchetypeMatch {
    if let Some(hint) = hint {
        if let Some((_, archetype)) = KEYWORDS.iter().find(|(k, _)| hint.to_lowercase().contains(k)) {
            return ArchetypeMatch {
                archetype: *archetype,
                match_quality: 1.0,
                confidence: 0.95,
            };
        }
    }

    let lower = brief.to_lowercase();
    let mut hits: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    for (keyword, archetype) in KEYWORDS {
        if lower.contains(keyword) {
            *hits.entry(archetype_key(*archetype)).or_insert(0) += 1;
        }
    }

    if hits.is_empty() {
        return ArchetypeMatch {
            archetype: Archetype::Generic,
            match_quality: 0.0,
            confidence: 0.3,
        };
    }

    let (best_key, count) = hits
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .expect("hits is non-empty");

    let archetype = match best_key {
        "investment" => Archetype::Investment,
        "hiring" => Archetype::Hiring,
        "buy-vs-build" => Archetype::BuyVsBuild,
        _ => Archetype::Generic,
    };

    ArchetypeMatch {
        archetype,
        match_quality: (count as f64 / KEYWORDS.len() as f64).min(1.0),
        confidence: 0.5 + 0.1 * count as f64,
    }
}

fn archetype_key(archetype: Archetype) -> &'static str {
    match archetype {
        Archetype::Investment => "investment",
        Archetype::Hiring => "hiring",
        Archetype::BuyVsBuild => "buy-vs-build",
        Archetype::Generic => "generic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_vs_build_brief_is_classified_correctly() {
        let result = infer("Should we buy a CRM or build our own?", None);
        assert_eq!(result.archetype, Archetype::BuyVsBuild);
    }

    #[test]
    fn hiring_brief_is_classified_correctly() {
        let result = infer("We need to hire a new VP of Sales", None);
        assert_eq!(result.archetype, Archetype::Hiring);
    }

    #[test]
    fn unrelated_brief_falls_back_to_generic() {
        let result = infer("What color should the office walls be?", None);
        assert_eq!(result.archetype, Archetype::Generic);
        assert_eq!(result.match_quality, 0.0);
    }

    #[test]
    fn explicit_hint_overrides_keyword_scan() {
        let result = infer("something unrelated", Some("hiring"));
        assert_eq!(result.archetype, Archetype::Hiring);
        assert_eq!(result.confidence, 0.95);
    }
}
