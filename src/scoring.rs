//! ICP scoring engine — lead attributes → score → tier.
//!
//! Pure and total: scoring never fails and the same attributes always
//! produce the same result. Points accumulate from independently-capped
//! categories, then a single multiplier (looked up on seniority × industry
//! fit, never on the raw score) is applied, then the result is clamped to
//! [0,100]. The clamp comes after the multiplier so high raw scores don't
//! silently swallow the multiplier's effect.

use serde::{Deserialize, Serialize};

use crate::leads::LeadAttributes;

/// Ordered tier buckets, highest fit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    Unqualified,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::Unqualified => "unqualified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tier1" => Some(Self::Tier1),
            "tier2" => Some(Self::Tier2),
            "tier3" => Some(Self::Tier3),
            "unqualified" => Some(Self::Unqualified),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (factor, points) entry of the score breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreFactor {
    pub factor: String,
    pub points: u32,
}

/// Immutable scoring snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Final clamped score, 0–100 inclusive.
    pub score: u8,
    pub tier: Tier,
    /// Per-category points awarded (post-cap), for audit.
    pub breakdown: Vec<ScoreFactor>,
}

/// Seniority class derived from the title keyword table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeniorityClass {
    Executive,
    VicePresident,
    Director,
    Manager,
    Contributor,
}

/// Industry fit class derived from the industry lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndustryFit {
    Primary,
    Adjacent,
    Other,
}

// ── Rule table ──────────────────────────────────────────────────────

/// Organization-size band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeBand {
    pub min: u32,
    pub max: u32,
    pub points: u32,
}

/// Title keyword rule: any keyword match awards the class and points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleRule {
    pub keywords: Vec<String>,
    pub class: SeniorityClass,
    pub points: u32,
}

/// Keyword → points entry for tech/intent signal matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordPoints {
    pub keyword: String,
    pub points: u32,
}

/// Per-category caps applied before summation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCaps {
    pub company_size: u32,
    pub title: u32,
    pub industry: u32,
    pub tech: u32,
    pub intent: u32,
}

impl Default for CategoryCaps {
    fn default() -> Self {
        Self {
            company_size: 20,
            title: 25,
            industry: 20,
            tech: 15,
            intent: 20,
        }
    }
}

/// Multiplier lookup on (seniority class, industry fit). Values are fixed
/// constants; the lookup never consults the raw score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Multipliers {
    pub executive_primary: f64,
    pub executive_adjacent: f64,
    pub vp_primary: f64,
    pub vp_adjacent: f64,
    pub director_primary: f64,
    pub fallback: f64,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self {
            executive_primary: 1.5,
            executive_adjacent: 1.3,
            vp_primary: 1.3,
            vp_adjacent: 1.2,
            director_primary: 1.2,
            fallback: 1.0,
        }
    }
}

impl Multipliers {
    fn lookup(&self, class: SeniorityClass, fit: IndustryFit) -> f64 {
        use IndustryFit::*;
        use SeniorityClass::*;

        match (class, fit) {
            (Executive, Primary) => self.executive_primary,
            (Executive, Adjacent) => self.executive_adjacent,
            (VicePresident, Primary) => self.vp_primary,
            (VicePresident, Adjacent) => self.vp_adjacent,
            (Director, Primary) => self.director_primary,
            _ => self.fallback,
        }
    }
}

/// Tier threshold ladder over the clamped score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    pub tier1: u8,
    pub tier2: u8,
    pub tier3: u8,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            tier1: 80,
            tier2: 60,
            tier3: 40,
        }
    }
}

/// The complete fixed rule table, loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    pub size_bands: Vec<SizeBand>,
    pub title_rules: Vec<TitleRule>,
    pub primary_industries: Vec<String>,
    pub adjacent_industries: Vec<String>,
    pub industry_points_primary: u32,
    pub industry_points_adjacent: u32,
    pub tech_keywords: Vec<KeywordPoints>,
    pub intent_keywords: Vec<KeywordPoints>,
    pub caps: CategoryCaps,
    /// Whether the engagement bonus counts inside the intent-signal cap
    /// (`true`) or is added after category summation (`false`).
    pub engagement_bonus_inside_cap: bool,
    pub multipliers: Multipliers,
    pub tier_thresholds: TierThresholds,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            size_bands: vec![
                SizeBand { min: 1, max: 10, points: 4 },
                SizeBand { min: 11, max: 50, points: 10 },
                SizeBand { min: 51, max: 250, points: 20 },
                SizeBand { min: 251, max: 1000, points: 14 },
                SizeBand { min: 1001, max: u32::MAX, points: 8 },
            ],
            title_rules: vec![
                TitleRule {
                    keywords: vec!["ceo".into(), "founder".into(), "chief".into()],
                    class: SeniorityClass::Executive,
                    points: 25,
                },
                TitleRule {
                    keywords: vec!["vp".into(), "vice president".into()],
                    class: SeniorityClass::VicePresident,
                    points: 20,
                },
                TitleRule {
                    keywords: vec!["director".into()],
                    class: SeniorityClass::Director,
                    points: 15,
                },
                TitleRule {
                    keywords: vec!["head of".into(), "manager".into()],
                    class: SeniorityClass::Manager,
                    points: 8,
                },
            ],
            primary_industries: vec!["saas".into(), "fintech".into(), "devtools".into()],
            adjacent_industries: vec!["ecommerce".into(), "healthtech".into()],
            industry_points_primary: 20,
            industry_points_adjacent: 10,
            tech_keywords: vec![
                KeywordPoints { keyword: "kubernetes".into(), points: 5 },
                KeywordPoints { keyword: "terraform".into(), points: 5 },
                KeywordPoints { keyword: "aws".into(), points: 5 },
            ],
            intent_keywords: vec![
                KeywordPoints { keyword: "hiring".into(), points: 7 },
                KeywordPoints { keyword: "migrating".into(), points: 7 },
                KeywordPoints { keyword: "evaluating".into(), points: 7 },
            ],
            caps: CategoryCaps::default(),
            engagement_bonus_inside_cap: false,
            multipliers: Multipliers::default(),
            tier_thresholds: TierThresholds::default(),
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// The scoring engine. Holds the rule table; `score()` is pure.
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    rules: ScoringRules,
}

impl ScoreEngine {
    pub fn new(rules: ScoringRules) -> Self {
        Self { rules }
    }

    /// Score a lead's attributes. Total: never fails, always in [0,100].
    pub fn score(&self, attrs: &LeadAttributes) -> ScoreResult {
        let rules = &self.rules;
        let mut breakdown = Vec::with_capacity(6);

        let size_points = rules
            .size_bands
            .iter()
            .find(|b| attrs.org_size >= b.min && attrs.org_size <= b.max)
            .map(|b| b.points)
            .unwrap_or(0)
            .min(rules.caps.company_size);
        breakdown.push(ScoreFactor {
            factor: "company_size".into(),
            points: size_points,
        });

        let (class, title_points) = self.classify_title(&attrs.title);
        let title_points = title_points.min(rules.caps.title);
        breakdown.push(ScoreFactor {
            factor: "title_seniority".into(),
            points: title_points,
        });

        let (fit, industry_points) = self.classify_industry(&attrs.industry);
        let industry_points = industry_points.min(rules.caps.industry);
        breakdown.push(ScoreFactor {
            factor: "industry_fit".into(),
            points: industry_points,
        });

        let tech_points = match_keywords(&rules.tech_keywords, &attrs.tech_signals)
            .min(rules.caps.tech);
        breakdown.push(ScoreFactor {
            factor: "tech_signal".into(),
            points: tech_points,
        });

        let raw_intent = match_keywords(&rules.intent_keywords, &attrs.intent_signals);
        let (intent_points, bonus_points) = if rules.engagement_bonus_inside_cap {
            ((raw_intent + attrs.engagement_bonus).min(rules.caps.intent), 0)
        } else {
            (raw_intent.min(rules.caps.intent), attrs.engagement_bonus)
        };
        breakdown.push(ScoreFactor {
            factor: "intent_signal".into(),
            points: intent_points,
        });
        if bonus_points > 0 {
            breakdown.push(ScoreFactor {
                factor: "engagement_bonus".into(),
                points: bonus_points,
            });
        }

        let subtotal =
            (size_points + title_points + industry_points + tech_points + intent_points
                + bonus_points) as f64;

        // Multiplier first, clamp second. The lookup depends only on the
        // classes, never on the subtotal.
        let multiplier = rules.multipliers.lookup(class, fit);
        let score = (subtotal * multiplier).clamp(0.0, 100.0) as u8;

        ScoreResult {
            score,
            tier: self.tier_for(score),
            breakdown,
        }
    }

    fn classify_title(&self, title: &str) -> (SeniorityClass, u32) {
        let title = title.to_lowercase();
        self.rules
            .title_rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| title.contains(k.as_str())))
            .map(|rule| (rule.class, rule.points))
            .unwrap_or((SeniorityClass::Contributor, 0))
    }

    fn classify_industry(&self, industry: &str) -> (IndustryFit, u32) {
        let industry = industry.to_lowercase();
        if self
            .rules
            .primary_industries
            .iter()
            .any(|i| i.to_lowercase() == industry)
        {
            (IndustryFit::Primary, self.rules.industry_points_primary)
        } else if self
            .rules
            .adjacent_industries
            .iter()
            .any(|i| i.to_lowercase() == industry)
        {
            (IndustryFit::Adjacent, self.rules.industry_points_adjacent)
        } else {
            (IndustryFit::Other, 0)
        }
    }

    fn tier_for(&self, score: u8) -> Tier {
        let t = &self.rules.tier_thresholds;
        if score >= t.tier1 {
            Tier::Tier1
        } else if score >= t.tier2 {
            Tier::Tier2
        } else if score >= t.tier3 {
            Tier::Tier3
        } else {
            Tier::Unqualified
        }
    }
}

impl Default for ScoreEngine {
    fn default() -> Self {
        Self::new(ScoringRules::default())
    }
}

/// Sum points for every keyword table entry matched by any signal string.
/// Matching is case-insensitive substring, each table entry counted once.
fn match_keywords(table: &[KeywordPoints], signals: &[String]) -> u32 {
    table
        .iter()
        .filter(|entry| {
            signals
                .iter()
                .any(|s| s.to_lowercase().contains(&entry.keyword.to_lowercase()))
        })
        .map(|entry| entry.points)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ceo_lead() -> LeadAttributes {
        LeadAttributes {
            title: "CEO".into(),
            organization: "Acme".into(),
            org_size: 120,
            industry: "saas".into(),
            tech_signals: vec![],
            intent_signals: vec![],
            engagement_bonus: 0,
        }
    }

    #[test]
    fn score_is_deterministic() {
        let engine = ScoreEngine::default();
        let attrs = ceo_lead();
        let a = engine.score(&attrs);
        let b = engine.score(&attrs);
        assert_eq!(a.score, b.score);
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.breakdown, b.breakdown);
    }

    #[test]
    fn score_always_in_range() {
        let engine = ScoreEngine::default();
        let maxed = LeadAttributes {
            title: "CEO and founder".into(),
            organization: "Acme".into(),
            org_size: 100,
            industry: "saas".into(),
            tech_signals: vec!["kubernetes terraform aws".into()],
            intent_signals: vec!["hiring, migrating, evaluating".into()],
            engagement_bonus: 50,
        };
        let result = engine.score(&maxed);
        assert!(result.score <= 100);

        let empty = engine.score(&LeadAttributes::default());
        assert_eq!(empty.score, 0);
        assert_eq!(empty.tier, Tier::Unqualified);
    }

    #[test]
    fn ceo_primary_industry_midsize_scores_97() {
        // 25 (title) + 20 (industry) + 20 (size) = 65, ×1.5 = 97.5 → 97.
        let engine = ScoreEngine::default();
        let result = engine.score(&ceo_lead());
        assert_eq!(result.score, 97);
        assert_eq!(result.tier, Tier::Tier1);
    }

    #[test]
    fn clamp_is_applied_after_multiplier() {
        // Pre-multiplier 70 (65 + one tech keyword) with ×1.5 must saturate
        // at 100, not come out as if the multiplier were skipped.
        let engine = ScoreEngine::default();
        let mut attrs = ceo_lead();
        attrs.tech_signals = vec!["we run kubernetes".into()];
        let result = engine.score(&attrs);
        assert_eq!(result.score, 100);
    }

    #[test]
    fn multiplier_independent_of_raw_score() {
        // Same (class, fit) pair gets the same multiplier at low and high
        // raw scores: 20 → 30 and 65 → 97 are both ×1.5.
        let engine = ScoreEngine::default();
        let mut low = ceo_lead();
        low.org_size = 0; // no size band match
        low.industry = "saas".into();
        low.title = "CEO".into();
        // 25 + 20 + 0 = 45, ×1.5 = 67.5 → 67
        assert_eq!(engine.score(&low).score, 67);
    }

    #[test]
    fn category_caps_apply_before_summation() {
        let mut rules = ScoringRules::default();
        rules.tech_keywords = vec![
            KeywordPoints { keyword: "a".into(), points: 10 },
            KeywordPoints { keyword: "b".into(), points: 10 },
        ];
        let engine = ScoreEngine::new(rules);
        let attrs = LeadAttributes {
            tech_signals: vec!["a b".into()],
            ..Default::default()
        };
        let result = engine.score(&attrs);
        let tech = result
            .breakdown
            .iter()
            .find(|f| f.factor == "tech_signal")
            .unwrap();
        // 20 raw, capped to 15.
        assert_eq!(tech.points, 15);
    }

    #[test]
    fn engagement_bonus_outside_cap() {
        let mut rules = ScoringRules::default();
        rules.engagement_bonus_inside_cap = false;
        let engine = ScoreEngine::new(rules);
        let attrs = LeadAttributes {
            intent_signals: vec!["hiring migrating evaluating".into()],
            engagement_bonus: 10,
            ..Default::default()
        };
        let result = engine.score(&attrs);
        // Intent raw 21 → capped 20; bonus 10 added on top: 30 total.
        assert_eq!(result.score, 30);
        assert!(
            result
                .breakdown
                .iter()
                .any(|f| f.factor == "engagement_bonus" && f.points == 10)
        );
    }

    #[test]
    fn engagement_bonus_inside_cap() {
        let mut rules = ScoringRules::default();
        rules.engagement_bonus_inside_cap = true;
        let engine = ScoreEngine::new(rules);
        let attrs = LeadAttributes {
            intent_signals: vec!["hiring migrating evaluating".into()],
            engagement_bonus: 10,
            ..Default::default()
        };
        let result = engine.score(&attrs);
        // (21 + 10) capped at 20: the bonus is swallowed by the cap.
        assert_eq!(result.score, 20);
        assert!(
            !result
                .breakdown
                .iter()
                .any(|f| f.factor == "engagement_bonus")
        );
    }

    #[test]
    fn tier_ladder_boundaries() {
        let engine = ScoreEngine::default();
        let t = |score: u8| match score {
            s if s >= 80 => Tier::Tier1,
            s if s >= 60 => Tier::Tier2,
            s if s >= 40 => Tier::Tier3,
            _ => Tier::Unqualified,
        };
        for score in [0u8, 39, 40, 59, 60, 79, 80, 100] {
            assert_eq!(engine.tier_for(score), t(score), "score {score}");
        }
    }

    #[test]
    fn tier_ordering() {
        assert!(Tier::Tier1 < Tier::Tier2);
        assert!(Tier::Tier3 < Tier::Unqualified);
    }

    #[test]
    fn title_classification_case_insensitive() {
        let engine = ScoreEngine::default();
        let (class, points) = engine.classify_title("Chief Revenue Officer");
        assert_eq!(class, SeniorityClass::Executive);
        assert_eq!(points, 25);
        let (class, points) = engine.classify_title("software engineer");
        assert_eq!(class, SeniorityClass::Contributor);
        assert_eq!(points, 0);
    }
}
