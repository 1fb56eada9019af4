//! Prompt construction and response parsing for the language stage.

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityError;

/// Tones the model is asked to choose from.
pub const TONES: [&str; 6] = ["Formal", "Casual", "Sarcastic", "Excited", "Sad", "Questioning"];

/// The model's interpretation of one gloss + emotion pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    pub sentence: String,
    pub tone: String,
}

pub fn interpretation_prompt(raw_gloss: &str, dominant_emotion: &str) -> String {
    format!(
        "You are an expert in linguistics and communication. Your task is to interpret sign language gloss and emotion.\n\
         Given the following raw sign language gloss and the user's dominant emotion, perform two tasks:\n\
         1. Convert the gloss into a natural, grammatically correct, conversational English sentence.\n\
         2. Analyze the combination of the sentence and emotion to determine the overall conversational tone. \
         The tone should be one of: {tones}.\n\
         Return the response as a single, minified JSON object with two keys: \"sentence\" and \"tone\". \
         Do not include any other text or markdown formatting.\n\
         ---\n\
         Input:\n\
         Emotion: {dominant_emotion}\n\
         Gloss: {raw_gloss}\n",
        tones = TONES.join(", "),
    )
}

/// Parse the model's reply.
///
/// Models sometimes wrap JSON in a markdown code fence despite being told not
/// to; the fence is stripped. An empty sentence counts as an invalid response.
/// Unknown tones are passed through unchanged.
pub fn parse_interpretation(text: &str) -> Result<Interpretation, CapabilityError> {
    let body = strip_code_fence(text.trim());
    let mut parsed: Interpretation = serde_json::from_str(body).map_err(|e| {
        CapabilityError::InvalidResponse(format!("not an interpretation object: {e}"))
    })?;

    parsed.sentence = parsed.sentence.trim().to_string();
    parsed.tone = parsed.tone.trim().to_string();
    if parsed.sentence.is_empty() {
        return Err(CapabilityError::InvalidResponse("empty sentence".into()));
    }
    Ok(parsed)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) up to the first newline.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_inputs_and_tone_list() {
        let prompt = interpretation_prompt("ME HAPPY SEE YOU", "happy");
        assert!(prompt.contains("Gloss: ME HAPPY SEE YOU"));
        assert!(prompt.contains("Emotion: happy"));
        assert!(prompt.contains("Formal, Casual, Sarcastic, Excited, Sad, Questioning"));
    }

    #[test]
    fn parses_minified_json() {
        let reply = r#"{"sentence":"I am happy to see you.","tone":"Excited"}"#;
        let parsed = parse_interpretation(reply).unwrap();
        assert_eq!(parsed.sentence, "I am happy to see you.");
        assert_eq!(parsed.tone, "Excited");
    }

    #[test]
    fn tolerates_code_fences() {
        let text = "```json\n{\"sentence\": \"Hello.\", \"tone\": \"Casual\"}\n```\n";
        assert_eq!(parse_interpretation(text).unwrap().sentence, "Hello.");

        let bare = "```\n{\"sentence\": \"Hi.\", \"tone\": \"Formal\"}\n```";
        assert_eq!(parse_interpretation(bare).unwrap().tone, "Formal");
    }

    #[test]
    fn rejects_prose_and_missing_keys() {
        assert!(matches!(
            parse_interpretation("Sure! Here is the sentence: Hello."),
            Err(CapabilityError::InvalidResponse(_))
        ));
        assert!(parse_interpretation(r#"{"sentence":"Hello."}"#).is_err());
        assert!(parse_interpretation(r#"{"sentence":"  ","tone":"Casual"}"#).is_err());
    }
}
