pub mod schema;
pub mod normalizer;
pub mod llm;
pub mod prompt;
pub mod repair;
pub mod validator;

pub use schema::{Entity, ParsedResult};
pub use normalizer::{EntityDeduplicator, entity_key, merge_results};
pub use llm::{GenerationConfig, Generator, HybridExtractor, OllamaClient, RegexFallback};
pub use prompt::PromptStyle;
pub use repair::{JsonRepairer, RepairMethod, RepairOutcome, RepairStage};
pub use validator::{ResponseValidator, Validation};

/// Repair raw model output and validate the result in one step
pub fn parse_response(raw: &str) -> (RepairOutcome, Validation) {
    let outcome = JsonRepairer::new().repair(raw);
    let validation = ResponseValidator::new().validate(&outcome.value);
    (outcome, validation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_end_to_end() {
        let raw = "Sure! Here's what I found:\n{\"entities\": [{\"value\": \"Jane Doe\", \"type\": \"PARTY\", \"confidence\": 95}]}";
        let (outcome, validation) = parse_response(raw);

        assert!(outcome.recovered());
        assert!(validation.is_usable());
        assert_eq!(validation.result.entities[0].text, "Jane Doe");
        assert_eq!(validation.result.entities[0].entity_type, "PARTY");
        assert!((validation.confidence - 0.95).abs() < 1e-9);
    }
}
