//! Keyword matcher over free-text bot descriptions.
//!
//! Deliberately not NLU: a feature is detected when one of its keywords
//! appears anywhere in the lowercased description. Good enough to pick
//! template blocks, cheap enough to run on every create.

use std::collections::BTreeSet;

use botforge_core::domain::bot::Framework;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BotFeature {
    Echo,
    Weather,
    Reminders,
    Notes,
    Polls,
    Files,
    Admin,
    Inline,
}

impl BotFeature {
    pub fn as_str(self) -> &'static str {
        match self {
            BotFeature::Echo => "echo",
            BotFeature::Weather => "weather",
            BotFeature::Reminders => "reminders",
            BotFeature::Notes => "notes",
            BotFeature::Polls => "polls",
            BotFeature::Files => "files",
            BotFeature::Admin => "admin",
            BotFeature::Inline => "inline",
        }
    }
}

const FEATURE_KEYWORDS: &[(BotFeature, &[&str])] = &[
    (BotFeature::Echo, &["echo", "repeat back", "parrot"]),
    (BotFeature::Weather, &["weather", "forecast", "temperature"]),
    (BotFeature::Reminders, &["remind", "schedule", "alarm", "recurring"]),
    (BotFeature::Notes, &["note", "memo", "todo", "task", "habit", "track"]),
    (BotFeature::Polls, &["poll", "vote", "survey", "quiz"]),
    (BotFeature::Files, &["file", "document", "photo", "image", "upload"]),
    (BotFeature::Admin, &["admin", "moderat", "ban ", "mute", "kick"]),
    (BotFeature::Inline, &["inline"]),
];

const NODEJS_HINTS: &[&str] = &["node", "javascript", "typescript", "telegraf"];
const PYTHON_HINTS: &[&str] = &["python", "aiogram"];

/// Commands the generated skeleton always defines; a `/start` mention in the
/// description must not produce a duplicate handler.
const BUILTIN_COMMANDS: &[&str] = &["start", "help", "cancel"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BotRequirements {
    pub features: BTreeSet<BotFeature>,
    /// Command words the description mentions as `/word`, without the slash,
    /// in order of first appearance.
    pub commands: Vec<String>,
    pub framework_hint: Option<Framework>,
}

pub fn parse_requirements(description: &str) -> BotRequirements {
    let text = description.to_lowercase();

    let mut features = BTreeSet::new();
    for (feature, keywords) in FEATURE_KEYWORDS {
        if keywords.iter().any(|keyword| text.contains(keyword)) {
            features.insert(*feature);
        }
    }

    let mut commands = Vec::new();
    for token in text.split_whitespace() {
        let Some(word) = token.strip_prefix('/') else { continue };
        let word: String = word
            .chars()
            .take_while(|character| character.is_ascii_alphanumeric() || *character == '_')
            .collect();
        if word.len() < 2 || word.len() > 32 {
            continue;
        }
        if BUILTIN_COMMANDS.contains(&word.as_str()) || commands.contains(&word) {
            continue;
        }
        commands.push(word);
    }

    let framework_hint = if NODEJS_HINTS.iter().any(|hint| text.contains(hint)) {
        Some(Framework::Nodejs)
    } else if PYTHON_HINTS.iter().any(|hint| text.contains(hint)) {
        Some(Framework::Python)
    } else {
        None
    };

    BotRequirements { features, commands, framework_hint }
}

#[cfg(test)]
mod tests {
    use botforge_core::domain::bot::Framework;

    use super::{parse_requirements, BotFeature};

    #[test]
    fn keywords_map_to_features() {
        let requirements =
            parse_requirements("Tracks my habits and reminds me about them every morning");
        assert!(requirements.features.contains(&BotFeature::Notes));
        assert!(requirements.features.contains(&BotFeature::Reminders));
        assert!(!requirements.features.contains(&BotFeature::Weather));
    }

    #[test]
    fn slash_mentions_become_custom_commands() {
        let requirements =
            parse_requirements("Use /mood to log a mood and /report for a weekly summary.");
        assert_eq!(requirements.commands, vec!["mood", "report"]);
    }

    #[test]
    fn builtin_and_repeated_commands_are_skipped() {
        let requirements = parse_requirements("send /start then /mood, later /mood again");
        assert_eq!(requirements.commands, vec!["mood"]);
    }

    #[test]
    fn framework_hints_are_detected() {
        assert_eq!(
            parse_requirements("an echo bot written in nodejs").framework_hint,
            Some(Framework::Nodejs)
        );
        assert_eq!(
            parse_requirements("a python aiogram quiz bot").framework_hint,
            Some(Framework::Python)
        );
        assert_eq!(parse_requirements("a quiz bot").framework_hint, None);
    }

    #[test]
    fn featureless_descriptions_report_nothing() {
        let requirements = parse_requirements("just a friendly companion to chat with");
        assert!(requirements.features.is_empty());
        assert!(requirements.commands.is_empty());
    }
}
