//! Company profile extraction.
//!
//! Input `in-0` is the company URL; output `out-6` is the extracted profile.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::ProviderEnvelope;
use super::ProviderSpec;
use crate::error::{ValidationError, ValidationResult};
use crate::validation::{Fields, UNKNOWN};

const PROFILE_OUTPUT: &str = "out-6";

/// Descriptions shorter than this get a generic closing sentence.
const MIN_DESCRIPTION_CHARS: usize = 200;
const FILLER_SENTENCE: &str =
    "This company is developing innovative technology solutions for their target market.";

/// Field mapping for the company provider
#[derive(Debug, Clone, Copy)]
pub struct CompanyProvider;

/// Normalized company profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    pub website: String,
    pub mission: Option<String>,
    pub description: Option<String>,
    pub core_technology: String,
    pub technology_category: String,
    pub technical_approach: Option<String>,
    pub key_innovations: Vec<String>,
    pub primary_application: Option<String>,
    pub target_industries: Vec<String>,
    pub use_cases: Vec<String>,
    pub industry: String,
    pub problem_addressed: Option<String>,
    pub value_proposition: Option<String>,
    pub business_model: Option<String>,
    /// The profile object as received
    pub raw: Value,
}

impl ProviderSpec for CompanyProvider {
    const NAME: &'static str = "company";
    type Input = String;
    type Output = CompanyProfile;

    fn inputs(url: &String) -> Vec<(&'static str, String)> {
        vec![("in-0", url.clone())]
    }

    fn normalize(envelope: &ProviderEnvelope) -> ValidationResult<CompanyProfile> {
        let profile = envelope.decoded(PROFILE_OUTPUT)?;
        CompanyProfile::from_value(profile)
    }
}

impl CompanyProfile {
    /// Validate and normalize a decoded profile object
    pub fn from_value(raw: Value) -> ValidationResult<Self> {
        let root = Fields::of(&raw, "")?;

        let overview = Fields::of_map(root.object("company_overview")?, "company_overview");
        let technology = Fields::of_map(root.object("technology")?, "technology");
        let products =
            Fields::of_map(root.object("products_and_applications")?, "products_and_applications");
        let market = Fields::of_map(root.object("market_context")?, "market_context");

        let name = overview.string("name")?;
        let website = overview.string("website")?;
        if Url::parse(&website).is_err() {
            return Err(ValidationError::new(
                "company_overview.website",
                "Invalid company website URL",
            ));
        }
        let core_technology = technology.string("core_technology")?;

        Ok(Self {
            name,
            website,
            mission: overview.optional_string("mission_statement"),
            description: overview.optional_string("company_description"),
            core_technology,
            technology_category: technology.string_or("technology_category", UNKNOWN),
            technical_approach: technology.optional_string("technical_approach"),
            key_innovations: technology.string_list("key_innovations"),
            primary_application: products.optional_string("primary_application"),
            target_industries: products.string_list("target_industries"),
            use_cases: products.string_list("use_cases"),
            industry: market.string_or("industry", UNKNOWN),
            problem_addressed: market.optional_string("problem_addressed"),
            value_proposition: market.optional_string("value_proposition"),
            business_model: market.optional_string("business_model"),
            raw,
        })
    }

    /// Text description of the company's technology, used as input to the
    /// competitive and market providers.
    pub fn tech_description(&self) -> String {
        let mut parts = vec![format!("Company: {}", self.name)];

        if let Some(mission) = &self.mission {
            parts.push(format!("Mission: {}", mission));
        }
        if let Some(description) = &self.description {
            parts.push(description.clone());
        }
        parts.push(format!("Core Technology: {}", self.core_technology));
        if let Some(approach) = &self.technical_approach {
            parts.push(format!("Technical Approach: {}", approach));
        }
        if !self.key_innovations.is_empty() {
            let top: Vec<&str> = self.key_innovations.iter().take(3).map(String::as_str).collect();
            parts.push(format!("Key Innovations: {}", top.join("; ")));
        }
        if let Some(application) = &self.primary_application {
            parts.push(format!("Primary Application: {}", application));
        }
        if !self.target_industries.is_empty() {
            parts.push(format!("Target Industries: {}", self.target_industries.join(", ")));
        }
        if let Some(problem) = &self.problem_addressed {
            parts.push(format!("Problem Addressed: {}", problem));
        }
        if let Some(value) = &self.value_proposition {
            parts.push(format!("Value Proposition: {}", value));
        }

        if parts.join("\n\n").chars().count() < MIN_DESCRIPTION_CHARS {
            parts.push(FILLER_SENTENCE.to_string());
        }
        parts.join("\n\n")
    }
}
