use std::fmt;

/// A controller command. Free text is classified once, in [`Command::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Name fragment of an effect to overlay.
    Overlay(String),
}

impl Command {
    /// Lowercases `text`; anything mentioning "start" starts, anything
    /// mentioning "stop" stops, everything else names an effect.
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_lowercase();
        if text.contains("start") {
            Command::Start
        } else if text.contains("stop") {
            Command::Stop
        } else {
            Command::Overlay(text)
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => f.write_str("start"),
            Command::Stop => f.write_str("stop"),
            Command::Overlay(name) => write!(f, "overlay {}", name),
        }
    }
}
