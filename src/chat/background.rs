//! Secondary model calls made after a turn: conversation titles and category picks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{Category, Message};
use crate::error::AppError;
use crate::proxy::{ChatMessage, CompletionOptions, UpstreamChatClient};

const TITLE_PROMPT: &str = "You generate conversation titles. Summarize the conversation below in a \
short, precise title. Reply with the title only: no explanation, no quotes, no trailing punctuation.";

const CLASSIFY_PROMPT: &str = "You sort conversations into categories. Pick the one category from the \
list that best matches the conversation. Reply with a JSON object holding a single key \"category_id\" \
whose value is the numeric id of your choice, for example {\"category_id\": 3}.";

/// Remove `<think>...</think>` reasoning blocks some models emit before answering.
pub fn strip_reasoning(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Normalize a raw model reply into a title: first non-empty line, unquoted, at most `max_chars` characters.
pub fn clean_title(raw: &str, max_chars: usize) -> String {
    let text = strip_reasoning(raw);
    let line = text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");

    let quotes: &[char] = &['"', '\'', '“', '”', '「', '」', '`'];
    let line = line.trim_matches(|c: char| quotes.contains(&c) || c.is_whitespace());
    let line = line.strip_prefix("Title:").map(str::trim).unwrap_or(line);

    line.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

fn transcript(history: &[Message]) -> String {
    history
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str(), message.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ask `model` for a title. `Ok(None)` when the reply cleaned down to nothing.
pub async fn generate_title(
    upstream: &dyn UpstreamChatClient,
    model: &str,
    history: &[Message],
    max_chars: usize,
) -> Result<Option<String>, AppError> {
    let messages = vec![
        ChatMessage::system(TITLE_PROMPT),
        ChatMessage::user(transcript(history)),
    ];

    let completion = upstream
        .complete_buffered(model, &messages, CompletionOptions::default())
        .await?;
    let title = clean_title(&completion.content, max_chars);
    debug!("Title model replied {:?}, cleaned to {:?}", completion.content, title);

    Ok(if title.is_empty() { None } else { Some(title) })
}

#[derive(Serialize)]
struct CategoryOption<'a> {
    id: i64,
    name: &'a str,
}

#[derive(Deserialize)]
struct CategoryChoice {
    category_id: i64,
}

/// Pull the `category_id` out of a reply that may wrap its JSON in prose or code fences.
pub fn parse_category_choice(reply: &str) -> Option<i64> {
    let text = strip_reasoning(reply);
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<CategoryChoice>(&text[start..=end])
        .ok()
        .map(|choice| choice.category_id)
}

/// Ask `model` which of `categories` fits the conversation. Answers outside the list are discarded.
pub async fn choose_category(
    upstream: &dyn UpstreamChatClient,
    model: &str,
    history: &[Message],
    categories: &[Category],
) -> Result<Option<i64>, AppError> {
    if history.is_empty() {
        return Err(AppError::InvalidInput("cannot classify an empty conversation".to_string()));
    }
    if categories.is_empty() {
        return Err(AppError::InvalidInput("no categories available for classification".to_string()));
    }

    let options: Vec<CategoryOption<'_>> = categories
        .iter()
        .map(|category| CategoryOption {
            id: category.id,
            name: &category.name,
        })
        .collect();
    let options = serde_json::to_string(&options).map_err(|e| AppError::Internal(e.to_string()))?;

    let messages = vec![
        ChatMessage::system(CLASSIFY_PROMPT),
        ChatMessage::user(format!(
            "=== Categories ===\n{}\n\n=== Conversation ===\n{}",
            options,
            transcript(history)
        )),
    ];

    let completion = upstream
        .complete_buffered(model, &messages, CompletionOptions::default())
        .await?;
    let choice = parse_category_choice(&completion.content)
        .filter(|id| categories.iter().any(|category| category.id == *id));
    debug!("Classifier replied {:?}, chose {:?}", completion.content, choice);
    Ok(choice)
}
