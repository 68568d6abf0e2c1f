use serde::Serialize;
use skinmatch_catalog::WearCondition;

/// Best candidate found for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Query variant whose search produced this candidate
    pub query_variant_used: String,
    /// Catalog row
    pub candidate_index: usize,
    /// Cosine similarity in `[-1, 1]`
    pub similarity_score: f32,
    pub catalog_name: String,
    pub canonical_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(MatchResult),
    /// A candidate exists but scores below the cutoff.
    BelowThreshold { best: MatchResult },
    /// No search returned any candidate.
    NoCandidates,
    EmptyQuery,
    EmptyCatalog,
}

impl MatchOutcome {
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    #[must_use]
    pub fn canonical_name(&self) -> Option<&str> {
        match self {
            Self::Matched(result) => Some(&result.canonical_name),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_canonical_name(self) -> Option<String> {
        match self {
            Self::Matched(result) => Some(result.canonical_name),
            _ => None,
        }
    }

    /// Best candidate, whether or not it cleared the cutoff.
    #[must_use]
    pub const fn best(&self) -> Option<&MatchResult> {
        match self {
            Self::Matched(best) | Self::BelowThreshold { best } => Some(best),
            _ => None,
        }
    }
}

/// Full answer to one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub query: String,
    /// Cutoff actually applied, after clamping
    pub score_cutoff: u32,
    pub outcome: MatchOutcome,
    /// Wear condition mentioned in the query; informational only.
    pub wear_hint: Option<WearCondition>,
}

impl Resolution {
    #[must_use]
    pub fn canonical_name(&self) -> Option<&str> {
        self.outcome.canonical_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn result() -> MatchResult {
        MatchResult {
            query_variant_used: "awp asiimov".to_string(),
            candidate_index: 1,
            similarity_score: 0.5,
            catalog_name: "AWP | 二西莫夫 (久经沙场)".to_string(),
            canonical_name: "AWP | Asiimov (Field-Tested)".to_string(),
        }
    }

    #[test]
    fn outcomes_serialize_with_status_tag() {
        let matched = serde_json::to_value(MatchOutcome::Matched(result())).unwrap();
        assert_eq!(matched["status"], "matched");
        assert_eq!(matched["canonical_name"], "AWP | Asiimov (Field-Tested)");
        assert_eq!(matched["candidate_index"], 1);

        let below = serde_json::to_value(MatchOutcome::BelowThreshold { best: result() }).unwrap();
        assert_eq!(below["status"], "below_threshold");
        assert_eq!(below["best"]["similarity_score"], 0.5);

        assert_eq!(
            serde_json::to_value(MatchOutcome::EmptyCatalog).unwrap(),
            json!({ "status": "empty_catalog" })
        );
    }

    #[test]
    fn only_matched_outcomes_carry_a_canonical_name() {
        let below = MatchOutcome::BelowThreshold { best: result() };
        assert!(!below.is_match());
        assert_eq!(below.canonical_name(), None);
        assert_eq!(below.best().map(|b| b.candidate_index), Some(1));

        let matched = MatchOutcome::Matched(result());
        assert_eq!(
            matched.into_canonical_name().as_deref(),
            Some("AWP | Asiimov (Field-Tested)")
        );
    }
}
