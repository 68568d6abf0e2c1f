//! Wear-condition vocabulary.
//!
//! Descriptive metadata only: the matcher reports a detected condition as a
//! hint but never folds it into the similarity score.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WearCondition {
    FactoryNew,
    MinimalWear,
    FieldTested,
    WellWorn,
    BattleScarred,
}

impl WearCondition {
    pub const ALL: [Self; 5] = [
        Self::FactoryNew,
        Self::MinimalWear,
        Self::FieldTested,
        Self::WellWorn,
        Self::BattleScarred,
    ];

    /// Suffix as it appears in market names, e.g. `(Field-Tested)`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FactoryNew => "(Factory New)",
            Self::MinimalWear => "(Minimal Wear)",
            Self::FieldTested => "(Field-Tested)",
            Self::WellWorn => "(Well-Worn)",
            Self::BattleScarred => "(Battle-Scarred)",
        }
    }

    /// Recognized user spellings: abbreviation, English phrase, Chinese terms.
    #[must_use]
    pub const fn surface_forms(self) -> &'static [&'static str] {
        match self {
            Self::FactoryNew => &["fn", "factory new", "崭新出厂", "崭新"],
            Self::MinimalWear => &["mw", "minimal wear", "略有磨损", "略磨"],
            Self::FieldTested => &["ft", "field tested", "久经沙场", "久经"],
            Self::WellWorn => &["ww", "well worn", "破烂不堪", "破烂"],
            Self::BattleScarred => &["bs", "battle scarred", "战痕累累", "战痕"],
        }
    }

    /// Condition mentioned in `query`, if any.
    ///
    /// ASCII forms must match whole words (`ft` does not match `left`), other
    /// forms match as substrings. The longest matching form wins; equal
    /// lengths keep table order.
    #[must_use]
    pub fn detect(query: &str) -> Option<Self> {
        let lowered = query.to_lowercase();
        let words = word_normalize(&lowered);

        let mut best: Option<(usize, Self)> = None;
        for condition in Self::ALL {
            for form in condition.surface_forms() {
                let hit = if form.is_ascii() {
                    words.contains(&format!(" {form} "))
                } else {
                    lowered.contains(form)
                };
                if !hit {
                    continue;
                }
                let len = form.chars().count();
                if best.map_or(true, |(best_len, _)| len > best_len) {
                    best = Some((len, condition));
                }
            }
        }
        best.map(|(_, condition)| condition)
    }
}

impl fmt::Display for WearCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn word_normalize(lowered: &str) -> String {
    let mut out = String::with_capacity(lowered.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for ch in lowered.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_abbreviations_as_whole_words() {
        assert_eq!(
            WearCondition::detect("ak47 redline ft"),
            Some(WearCondition::FieldTested)
        );
        assert_eq!(WearCondition::detect("left handed"), None);
        assert_eq!(
            WearCondition::detect("M4A1-S Nightmare MW"),
            Some(WearCondition::MinimalWear)
        );
    }

    #[test]
    fn detects_phrases_across_punctuation() {
        assert_eq!(
            WearCondition::detect("AWP Asiimov (Battle-Scarred)"),
            Some(WearCondition::BattleScarred)
        );
        assert_eq!(
            WearCondition::detect("glock fade factory new"),
            Some(WearCondition::FactoryNew)
        );
    }

    #[test]
    fn detects_chinese_terms() {
        assert_eq!(
            WearCondition::detect("ak红线久经沙场"),
            Some(WearCondition::FieldTested)
        );
        assert_eq!(
            WearCondition::detect("沙鹰 破烂"),
            Some(WearCondition::WellWorn)
        );
    }

    #[test]
    fn labels_match_market_suffixes() {
        assert_eq!(WearCondition::FieldTested.to_string(), "(Field-Tested)");
        assert!(WearCondition::ALL
            .iter()
            .all(|c| c.surface_forms().len() == 4));
    }
}
