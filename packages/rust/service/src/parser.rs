//! Chat-completion reply validation.

use serde::Deserialize;

use kbforge_shared::{KbForgeError, Result};

use crate::ServiceReply;

/// Reply envelope. Only the fields we read are modelled; the rest is ignored.
#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the first choice's message content from a reply body.
///
/// The body must be JSON with a non-empty `choices` array where every
/// choice carries a message with non-empty content. Status is not checked
/// here; see [`ServiceReply::generated_text`].
pub fn parse(reply: &ServiceReply) -> Result<String> {
    let body = reply.raw_body.as_str();

    let completion: ChatCompletion = serde_json::from_str(body)
        .map_err(|e| KbForgeError::malformed(format!("body is not valid JSON: {e}"), body))?;

    let choices = match completion.choices {
        Some(choices) if !choices.is_empty() => choices,
        Some(_) => return Err(KbForgeError::malformed("choices list is empty", body)),
        None => return Err(KbForgeError::malformed("reply has no choices", body)),
    };

    let mut contents = Vec::with_capacity(choices.len());
    for (index, choice) in choices.into_iter().enumerate() {
        let content = choice
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                KbForgeError::malformed(format!("choice {index} has no message content"), body)
            })?;
        contents.push(content);
    }

    // Non-empty was checked above.
    Ok(contents.swap_remove(0))
}
