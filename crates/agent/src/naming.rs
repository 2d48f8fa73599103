//! Chat naming: a short title generated from the start of a chat.

use reagent_core::message::PromptMessage;
use reagent_memory::Transcript;

use crate::llm::{ChatOutcome, LlmClient};

pub const NAMING_PROMPT: &str = "You are an intelligent assistant skilled at generating short chat names based on contextual content. Please ensure the generated names are concise and clear, accurately reflecting the chat content.";

/// The naming request for `transcript`, or `None` before the first query.
pub fn naming_messages(transcript: &Transcript, language: &str) -> Option<Vec<PromptMessage>> {
    let (user, thinking) = transcript.naming_context();
    let user = user?;
    let query = format!(
        "# history\n```text\n# user\n{user}\n\n# assistant\n{thinking}\n```\n\n\
         Generate a short {language} chat name based on context. \n\
         Return name only (strictly no JSON/XML/formatting). \n\
         Requirements: max 20 chars, must contain letters, no pure numbers/symbols/spaces.\n\
         please generate a name:"
    );
    Some(vec![PromptMessage::system(NAMING_PROMPT), PromptMessage::user(query)])
}

/// Ask the model for a name. Returns the name and the tokens spent.
pub async fn generate_name(client: &LlmClient, transcript: &Transcript, language: &str) -> Option<(String, u64)> {
    let messages = naming_messages(transcript, language)?;
    let ChatOutcome::Complete { text, tokens } = client.call(messages, 0, false).await? else {
        return None;
    };
    let name = text.lines().next().unwrap_or_default().trim();
    (!name.is_empty()).then(|| (name.to_string(), tokens))
}

/// Name for chats driven by plugins: the local timestamp.
pub fn timestamp_name() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
