use serde_json::Value;

use crate::model::{BookContext, ChatMessage, GenerationRequest, StreamRequest};

fn base_instruction(genre: &str, style: &str) -> String {
    format!("You are an expert writing assistant. Genre: {genre}. Style: {style}.")
}

/// Render one character entry: a bare string, or an object's `name` plus
/// optional `description`/`role`. Anything else is rendered as JSON.
fn character_line(c: &Value) -> String {
    match c {
        Value::String(s) => s.clone(),
        Value::Object(o) => {
            let name = o.get("name").and_then(Value::as_str).unwrap_or("unnamed");
            let about = o
                .get("description")
                .or_else(|| o.get("role"))
                .and_then(Value::as_str);
            match about {
                Some(a) => format!("{name}: {a}"),
                None => name.to_string(),
            }
        }
        other => other.to_string(),
    }
}

pub fn system_instruction(book: &BookContext) -> String {
    let mut s = base_instruction(&book.genre, &book.style);
    if let Some(plot) = &book.plot_summary {
        s.push_str("\nPlot summary: ");
        s.push_str(plot);
    }
    if let Some(chars) = &book.characters
        && !chars.is_empty()
    {
        s.push_str("\nCharacters:");
        for c in chars {
            s.push_str("\n- ");
            s.push_str(&character_line(c));
        }
    }
    s
}

pub fn generation_messages(req: &GenerationRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_instruction(&req.book_context)),
        ChatMessage::user(req.context.clone()),
    ]
}

pub fn stream_messages(req: &StreamRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(base_instruction(
            &req.book_context.genre,
            &req.book_context.style,
        )),
        ChatMessage::user(req.prompt.clone()),
    ]
}
