//! Market opportunity analysis.
//!
//! Inputs `in-1` (technology description) and `in-2` (competitive analysis
//! artifact). Outputs `out-2` (market data) and `out-3` (scoring).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::ProviderEnvelope;
use super::ProviderSpec;
use crate::error::ValidationResult;
use crate::validation::{Fields, UNKNOWN};

const MARKET_OUTPUT: &str = "out-2";
const SCORING_OUTPUT: &str = "out-3";

/// Field mapping for the market provider
#[derive(Debug, Clone, Copy)]
pub struct MarketProvider;

/// Input to the market provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketInput {
    pub tech_description: String,
    pub competitive_analysis: String,
}

/// The market the score is based on. TAM and CAGR are carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryMarket {
    pub description: String,
    pub tam_usd: f64,
    pub cagr_percent: f64,
    pub rationale: String,
}

/// Another market segment considered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSegment {
    pub description: String,
    pub tam_current_usd: f64,
    pub cagr_percent: f64,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreJustification {
    pub summary: String,
    pub strengths: Vec<String>,
    pub limitations: Vec<String>,
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RubricApplication {
    pub tam_category: String,
    pub cagr_category: String,
    pub intersection: String,
    pub base_score: f64,
    pub adjustment: f64,
    pub adjustment_rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub executive_summary: String,
    pub trends: Vec<String>,
    pub opportunities: Vec<String>,
    pub unmet_needs: Vec<String>,
    pub barriers: Vec<String>,
    pub problem_statement: String,
    pub differentiation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringAlignment {
    pub tam_category: String,
    pub cagr_category: String,
    pub suggested_min: f64,
    pub suggested_max: f64,
    pub strengths: Vec<String>,
    pub limitations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub recency: String,
    pub concerns: Vec<String>,
}

/// Normalized market analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketResult {
    pub score: u8,
    pub confidence: Option<f64>,
    pub primary_market: PrimaryMarket,
    pub markets: Vec<MarketSegment>,
    pub justification: ScoreJustification,
    pub rubric: RubricApplication,
    pub analysis: MarketAnalysis,
    pub scoring_alignment: ScoringAlignment,
    pub data_quality: DataQuality,
    pub raw_response: Value,
}

impl ProviderSpec for MarketProvider {
    const NAME: &'static str = "market";
    type Input = MarketInput;
    type Output = MarketResult;

    fn inputs(input: &MarketInput) -> Vec<(&'static str, String)> {
        vec![
            ("in-1", input.tech_description.clone()),
            ("in-2", input.competitive_analysis.clone()),
        ]
    }

    fn normalize(envelope: &ProviderEnvelope) -> ValidationResult<MarketResult> {
        let market = envelope.decoded(MARKET_OUTPUT)?;
        let scoring = envelope.decoded(SCORING_OUTPUT)?;
        let market = Fields::of(&market, "")?;
        let scoring = Fields::of(&scoring, "")?;

        let primary = Fields::of_map(market.object("primary_market")?, "primary_market");
        let primary_market = PrimaryMarket {
            tam_usd: primary.number("tam_usd")?,
            cagr_percent: primary.number("cagr_percent")?,
            description: primary.string_or("description", UNKNOWN),
            rationale: primary.string_or("selection_rationale", ""),
        };

        let score = scoring.score("score", "market")?;

        Ok(MarketResult {
            score,
            confidence: scoring.confidence("confidence"),
            primary_market,
            markets: market
                .get("markets")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(segment_from_value).collect())
                .unwrap_or_default(),
            justification: justification(&scoring),
            rubric: with_section(&scoring, "rubric_application", |r| RubricApplication {
                tam_category: r.string_or("tam_category", UNKNOWN),
                cagr_category: r.string_or("cagr_category", UNKNOWN),
                intersection: r.string_or("rubric_intersection", ""),
                base_score: r.number_or_zero("base_score"),
                adjustment: r.number_or_zero("adjustment"),
                adjustment_rationale: r.string_or("adjustment_rationale", ""),
            }),
            analysis: with_section(&market, "market_analysis", |a| MarketAnalysis {
                executive_summary: a.string_or("executive_summary", ""),
                trends: a.string_list("trends"),
                opportunities: a.string_list("opportunities"),
                unmet_needs: a.string_list("unmet_needs"),
                barriers: a.string_list("barriers_to_entry"),
                problem_statement: a.string_or("problem_statement", ""),
                differentiation: a.string_or("differentiation", ""),
            }),
            scoring_alignment: with_section(&market, "scoring_alignment", |s| ScoringAlignment {
                tam_category: s.string_or("tam_category", UNKNOWN),
                cagr_category: s.string_or("cagr_category", UNKNOWN),
                suggested_min: s.number_or_zero("suggested_score_min"),
                suggested_max: s.number_or_zero("suggested_score_max"),
                strengths: s.string_list("strengths"),
                limitations: s.string_list("limitations"),
            }),
            data_quality: with_section(&scoring, "data_quality", |d| DataQuality {
                recency: d.string_or("data_recency", UNKNOWN),
                concerns: d.string_list("data_concerns"),
            }),
            raw_response: envelope.raw.clone(),
        })
    }
}

/// Map an optional sub-object; when absent, map an empty one so every
/// field takes its default.
fn with_section<T>(parent: &Fields<'_>, field: &str, map: impl FnOnce(&Fields<'_>) -> T) -> T {
    let empty = Map::new();
    let section = parent.optional_object(field).unwrap_or(&empty);
    map(&Fields::of_map(section, field))
}

/// The provider sends either a plain summary string or a structured object.
fn justification(scoring: &Fields<'_>) -> ScoreJustification {
    match scoring.get("justification") {
        Some(Value::String(summary)) => ScoreJustification {
            summary: summary.trim().to_string(),
            ..Default::default()
        },
        _ => with_section(scoring, "justification", |j| ScoreJustification {
            summary: j.string_or("summary", ""),
            strengths: j.string_list("strengths_considered"),
            limitations: j.string_list("limitations_considered"),
            risks: j.string_list("key_risks"),
        }),
    }
}

fn segment_from_value(value: &Value) -> Option<MarketSegment> {
    let fields = Fields::of(value, "markets").ok()?;
    Some(MarketSegment {
        description: fields.optional_string("description")?,
        tam_current_usd: fields.number_or_zero("tam_current_usd"),
        cagr_percent: fields.number_or_zero("cagr_percent"),
        confidence: fields.confidence("confidence"),
    })
}
