use serde::{Deserialize, Serialize};

/// Which instruction template wraps the document text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    #[default]
    Standard,
    /// Re-worded, example-driven instructions for models that ignored the standard ones
    Alternative,
    /// Entities only, no auxiliary sequences
    Simplified,
}

pub fn build_prompt(style: PromptStyle, document_text: &str) -> String {
    match style {
        PromptStyle::Standard => build_extraction_prompt(document_text),
        PromptStyle::Alternative => build_alternative_prompt(document_text),
        PromptStyle::Simplified => build_simplified_prompt(document_text),
    }
}

pub fn build_extraction_prompt(document_text: &str) -> String {
    format!(
        r#"Extract legal entities, citations and relationships from the following document.

INSTRUCTIONS:
1. Identify parties, courts, judges, attorneys, statutes, cases, dates, monetary amounts and defined terms
2. Extract citations to statutes, regulations and case law
3. Extract relationships between entities (e.g. "represents", "presides_over", "party_to")
4. Output ONLY valid JSON, nothing else
5. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"text": "exact text from the document", "entity_type": "PARTY|COURT|JUDGE|ATTORNEY|STATUTE|CASE|DATE|MONEY|DEFINED_TERM", "confidence": 0.0}}
  ],
  "citations": [
    {{"text": "42 U.S.C. § 1983", "citation_type": "STATUTE|REGULATION|CASE"}}
  ],
  "relationships": [
    {{"source": "entity text", "target": "entity text", "relation": "relationship_type", "evidence": "quote from text"}}
  ],
  "confidence": 0.0
}}

RULES:
- Entity text must appear verbatim in the document
- Confidence values are between 0.0 and 1.0
- Output ONLY the JSON object, no markdown, no explanations

DOCUMENT:
{}

JSON OUTPUT:"#,
        document_text
    )
}

pub fn build_alternative_prompt(document_text: &str) -> String {
    format!(
        r#"You are a legal document parser. Your entire reply must be one JSON object and nothing else.

Example reply:
{{"entities": [{{"text": "Acme Corp", "entity_type": "PARTY", "confidence": 0.9}}], "citations": [], "relationships": []}}

Rules:
- Start your reply with {{ and end it with }}
- Escape any double quote inside a value as \"
- If the document contains no entities, reply with {{"entities": []}}

Document:
{}"#,
        document_text
    )
}

pub fn build_simplified_prompt(document_text: &str) -> String {
    format!(
        r#"List the named legal entities in the text below as JSON of the form
{{"entities": [{{"text": "...", "entity_type": "..."}}]}}
Reply with the JSON only.

TEXT:
{}"#,
        document_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_style_embeds_the_document() {
        for style in [PromptStyle::Standard, PromptStyle::Alternative, PromptStyle::Simplified] {
            let prompt = build_prompt(style, "THIS LEASE is made between Acme Corp and Jane Doe");
            assert!(prompt.contains("Acme Corp and Jane Doe"));
            assert!(prompt.contains("\"entities\""));
        }
    }
}
