//! Inbound SMS intent parsing
//!
//! Matched in order: a well-formed http(s) URL, then a known command, then
//! free text (treated as an approval answer).

/// What the user meant by their message
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Url(String),
    Command(Command),
    Answer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Report,
    Stop,
    Start,
}

/// Parse a trimmed SMS body; None for empty messages
pub fn parse_intent(body: &str) -> Option<Intent> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if is_url(trimmed) {
        return Some(Intent::Url(trimmed.to_string()));
    }

    match trimmed.to_lowercase().as_str() {
        "help" => return Some(Intent::Command(Command::Help)),
        "status" => return Some(Intent::Command(Command::Status)),
        "report" => return Some(Intent::Command(Command::Report)),
        "stop" => return Some(Intent::Command(Command::Stop)),
        "start" => return Some(Intent::Command(Command::Start)),
        _ => {}
    }

    Some(Intent::Answer(trimmed.to_string()))
}

fn is_url(text: &str) -> bool {
    if text.contains(char::is_whitespace) {
        return false;
    }
    match reqwest::Url::parse(text) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
