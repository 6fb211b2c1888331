//! Prompt templates.
//!
//! Two fixed templates with named placeholders: open Q&A over the document
//! corpus, and EU AI Act risk classification of a project description. The
//! classification template ends with [`RISK_FORMAT_INSTRUCTIONS`], which the
//! parser in [`crate::parse`] relies on.

use crate::models::Chunk;

const QA_TEMPLATE: &str = "You are a legal expert in AI governance and ethics. \
Answer the question based on the context provided.
If you don't know the answer, say that it is not within the scope of the documentation. \
Don't try to make up an answer.

Context: {context}
Question: {question}
Answer:";

const RISK_TEMPLATE: &str = "You are a legal expert on the EU Artificial Intelligence Act. \
Classify the AI system described below into one of the Act's risk levels, using the context provided.

Risk levels:
- Unacceptable: practices the Act prohibits, such as social scoring, manipulative techniques \
or untargeted scraping of facial images.
- High: systems listed in Annex III or used as safety components, such as biometric \
identification, critical infrastructure, education, employment, essential services, \
law enforcement, migration or the administration of justice.
- Limited: systems with transparency obligations, such as chatbots, emotion recognition \
or generated content.
- Minimal: every other system.

Context: {context}
AI system description: {description}

{format_instructions}";

/// Output contract appended to the risk prompt.
pub const RISK_FORMAT_INSTRUCTIONS: &str = "Respond with exactly two lines and nothing else:
risk: <one of Unacceptable, High, Limited, Minimal>
reason: <one or two sentences explaining the classification>";

/// Join retrieved chunk texts into a single context block.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_qa(context: &str, question: &str) -> String {
    render(QA_TEMPLATE, &[("context", context), ("question", question)])
}

pub fn render_risk(context: &str, description: &str) -> String {
    render(
        RISK_TEMPLATE,
        &[
            ("context", context),
            ("description", description),
            ("format_instructions", RISK_FORMAT_INSTRUCTIONS),
        ],
    )
}

/// Substitute `{name}` placeholders in a single pass, so braces inside the
/// substituted values are never re-expanded.
fn render(template: &str, fields: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let name = &after[..close];
            fields
                .iter()
                .find(|(field, _)| *field == name)
                .map(|(_, value)| (close, *value))
        });
        match substituted {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;

    #[test]
    fn test_qa_template_fills_fields() {
        let prompt = render_qa("Article 6 defines high-risk systems.", "What is high risk?");
        assert!(prompt.contains("Context: Article 6 defines high-risk systems."));
        assert!(prompt.contains("Question: What is high risk?"));
        assert!(prompt.ends_with("Answer:"));
        assert!(!prompt.contains("{context}"));
    }

    #[test]
    fn test_risk_template_includes_format_instructions() {
        let prompt = render_risk("ctx", "Facial recognition at airports");
        assert!(prompt.contains("AI system description: Facial recognition at airports"));
        assert!(prompt.contains("risk: <one of Unacceptable, High, Limited, Minimal>"));
        assert!(prompt.contains("reason:"));
        assert!(!prompt.contains("{format_instructions}"));
    }

    #[test]
    fn test_values_are_not_re_expanded() {
        let prompt = render_qa("{question}", "literal {braces}");
        assert!(prompt.contains("Context: {question}"));
        assert!(prompt.contains("Question: literal {braces}"));
    }

    #[test]
    fn test_format_context_joins_with_blank_line() {
        let make = |t: &str| Chunk {
            source: "a.pdf".into(),
            page: 1,
            chunk_index: 0,
            start: 0,
            text: t.into(),
            hash: content_hash(t),
        };
        assert_eq!(format_context(&[make("one"), make("two")]), "one\n\ntwo");
        assert_eq!(format_context(&[]), "");
    }
}
