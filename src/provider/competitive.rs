//! Competitive landscape analysis.
//!
//! Input `in-0` is the technology description. Outputs: `out-6` is the
//! analysis artifact (passed verbatim to the market provider), `out-7` the
//! graded assessment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::ProviderEnvelope;
use super::ProviderSpec;
use crate::error::ValidationResult;
use crate::validation::{is_placeholder, Fields, UNKNOWN};

const ANALYSIS_OUTPUT: &str = "out-6";
const GRADED_OUTPUT: &str = "out-7";
const MAX_COMPETITORS: usize = 10;

/// Field mapping for the competitive provider
#[derive(Debug, Clone, Copy)]
pub struct CompetitiveProvider;

/// Competitor counts by company size
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitorCount {
    pub total: u32,
    pub large: u32,
    pub mid_size: u32,
    pub startups: u32,
}

/// A single competitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    pub description: String,
    pub size: String,
    pub products: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

/// Normalized competitive analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveResult {
    /// The analysis artifact exactly as the provider produced it
    pub analysis_text: String,
    /// Structured form of the artifact, when it decodes as JSON
    pub analysis: Option<Value>,
    pub score: u8,
    pub justification: String,
    pub confidence: Option<f64>,
    pub competitor_count: CompetitorCount,
    pub market_leaders: Vec<String>,
    pub competitive_intensity: String,
    pub key_risks: Vec<String>,
    pub opportunities: Vec<String>,
    pub rubric_match: String,
    pub sources_used: Vec<String>,
    pub competitors: Vec<Competitor>,
    pub raw_response: Value,
}

impl ProviderSpec for CompetitiveProvider {
    const NAME: &'static str = "competitive";
    type Input = String;
    type Output = CompetitiveResult;

    fn inputs(tech_description: &String) -> Vec<(&'static str, String)> {
        vec![("in-0", tech_description.clone())]
    }

    fn normalize(envelope: &ProviderEnvelope) -> ValidationResult<CompetitiveResult> {
        let artifact = envelope.output(ANALYSIS_OUTPUT)?;
        let graded = envelope.decoded(GRADED_OUTPUT)?;
        let graded = Fields::of(&graded, "")?;

        let score = graded.score("score", "competitive")?;
        let counts = Fields::of_map(graded.object("competitor_count")?, "competitor_count");

        // The structured artifact is optional: free text is still a usable
        // market-provider input.
        let analysis = artifact
            .decode(ANALYSIS_OUTPUT)
            .ok()
            .filter(Value::is_object);
        let data_quality = analysis
            .as_ref()
            .and_then(|a| a.get("data_quality"))
            .cloned()
            .unwrap_or(Value::Null);
        let (confidence, sources_used) = match Fields::of(&data_quality, "data_quality") {
            Ok(dq) => (dq.confidence("confidence_level"), dq.string_list("sources_used")),
            Err(_) => (None, Vec::new()),
        };

        let market_leaders = graded.string_list("market_leaders");
        let competitors = build_competitors(analysis.as_ref(), &market_leaders);

        Ok(CompetitiveResult {
            analysis_text: artifact.as_text(),
            score,
            justification: graded.string_or("score_justification", ""),
            confidence,
            competitor_count: CompetitorCount {
                total: counts.count("total"),
                large: counts.count("large_companies"),
                mid_size: counts.count("mid_size_companies"),
                startups: counts.count("startups"),
            },
            market_leaders,
            competitive_intensity: graded.string_or("competitive_intensity", UNKNOWN),
            key_risks: graded.string_list("key_risk_factors"),
            opportunities: graded.string_list("differentiation_opportunities"),
            rubric_match: graded.string_or("rubric_match_explanation", ""),
            sources_used,
            competitors,
            analysis,
            raw_response: envelope.raw.clone(),
        })
    }
}

/// Competitors from the structured artifact; market leaders stand in when
/// the artifact lists none.
fn build_competitors(analysis: Option<&Value>, market_leaders: &[String]) -> Vec<Competitor> {
    let listed: Vec<Competitor> = analysis
        .and_then(|a| a.get("competitors"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(competitor_from_value).collect())
        .unwrap_or_default();

    let competitors = if listed.is_empty() {
        market_leaders
            .iter()
            .map(|leader| Competitor {
                name: leader.clone(),
                description: "Market leader in the space".to_string(),
                size: "Large".to_string(),
                products: Vec::new(),
                strengths: Vec::new(),
                weaknesses: Vec::new(),
            })
            .collect()
    } else {
        listed
    };

    competitors.into_iter().take(MAX_COMPETITORS).collect()
}

fn competitor_from_value(value: &Value) -> Option<Competitor> {
    let fields = Fields::of(value, "competitors").ok()?;
    let name = fields.optional_string("company_name")?;
    if is_placeholder(&name) {
        return None;
    }

    let product_name = fields.optional_string("product_name");
    let description = fields
        .optional_string("product_description")
        .or_else(|| product_name.clone())
        .unwrap_or_default();

    Some(Competitor {
        name,
        description,
        size: fields.string_or("size_category", "Unknown"),
        products: product_name.into_iter().collect(),
        strengths: fields.string_list("strengths"),
        weaknesses: fields.string_list("weaknesses"),
    })
}
