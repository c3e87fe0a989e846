//! Maps parsed requirements onto a concrete bot architecture.

use std::collections::BTreeSet;

use serde::Serialize;

use botforge_core::domain::bot::{BotName, Framework};

use crate::parser::{BotFeature, BotRequirements};

/// One command handler in the generated bot.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct HandlerSpec {
    /// Identifier-safe name used for the handler function.
    pub name: String,
    /// Command word without the leading slash.
    pub command: String,
    pub summary: String,
    /// Canned reply the skeleton sends until the owner fills the handler in.
    pub reply: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DependencyPin {
    pub name: String,
    pub version: String,
}

/// Everything the templates need to render a runnable bot skeleton.
#[derive(Clone, Debug, Serialize)]
pub struct BotBlueprint {
    pub bot_name: String,
    pub description: String,
    pub framework: Framework,
    pub handlers: Vec<HandlerSpec>,
    pub has_echo: bool,
    pub has_inline: bool,
    pub services: Vec<String>,
    pub middleware: Vec<String>,
    pub dependencies: Vec<DependencyPin>,
    pub env: Vec<String>,
    /// Pre-joined command list for welcome messages, e.g. "/note, /remind".
    pub command_menu: String,
}

fn feature_handler(feature: BotFeature) -> Option<HandlerSpec> {
    let (name, command, summary, reply) = match feature {
        // Echo is a catch-all text handler, not a command.
        BotFeature::Echo | BotFeature::Inline => return None,
        BotFeature::Weather => (
            "weather",
            "weather",
            "Replies with a weather report for the requested city.",
            "Weather lookups are not connected to a provider yet.",
        ),
        BotFeature::Reminders => (
            "remind",
            "remind",
            "Stores a reminder and pings the chat when it is due.",
            "Reminder noted. Scheduling is not wired up yet.",
        ),
        BotFeature::Notes => (
            "note",
            "note",
            "Saves a short note for later.",
            "Saved. Ask me with /note to see this grow into real storage.",
        ),
        BotFeature::Polls => (
            "poll",
            "poll",
            "Creates a quick poll in the chat.",
            "Polls are on the roadmap for this bot.",
        ),
        BotFeature::Files => (
            "save",
            "save",
            "Accepts a document or photo and stores it.",
            "Send me a file and I will keep it once storage is wired up.",
        ),
        BotFeature::Admin => (
            "rules",
            "rules",
            "Posts the chat rules; moderation hooks guard the other handlers.",
            "Be kind. Moderation commands are owner-only.",
        ),
    };
    Some(HandlerSpec {
        name: name.to_owned(),
        command: command.to_owned(),
        summary: summary.to_owned(),
        reply: reply.to_owned(),
    })
}

fn feature_service(feature: BotFeature) -> Option<&'static str> {
    match feature {
        BotFeature::Weather => Some("http"),
        BotFeature::Reminders => Some("scheduler"),
        BotFeature::Notes | BotFeature::Files => Some("storage"),
        _ => None,
    }
}

pub fn analyze(
    name: &BotName,
    description: &str,
    framework: Framework,
    requirements: &BotRequirements,
) -> BotBlueprint {
    let mut handlers: Vec<HandlerSpec> = Vec::new();
    let mut services: BTreeSet<&'static str> = BTreeSet::new();
    let mut middleware: Vec<String> = Vec::new();

    for feature in &requirements.features {
        if let Some(handler) = feature_handler(*feature) {
            handlers.push(handler);
        }
        if let Some(service) = feature_service(*feature) {
            services.insert(service);
        }
        if *feature == BotFeature::Admin {
            middleware.push("admin_guard".to_owned());
        }
    }

    for command in &requirements.commands {
        if handlers.iter().any(|handler| handler.command == *command) {
            continue;
        }
        handlers.push(HandlerSpec {
            name: command.clone(),
            command: command.clone(),
            summary: "Custom command from the bot description.".to_owned(),
            reply: "This command is still being built.".to_owned(),
        });
    }

    let mut has_echo = requirements.features.contains(&BotFeature::Echo);
    let has_inline = requirements.features.contains(&BotFeature::Inline);
    // A bot that matched nothing still has to answer somehow.
    if handlers.is_empty() && !has_echo {
        has_echo = true;
    }

    let dependencies = match framework {
        Framework::Python => {
            let mut pins = vec![pin("aiogram", "3.13.1")];
            if services.contains("http") {
                pins.push(pin("aiohttp", "3.10.5"));
            }
            if services.contains("scheduler") {
                pins.push(pin("apscheduler", "3.10.4"));
            }
            if services.contains("storage") {
                pins.push(pin("aiosqlite", "0.20.0"));
            }
            pins
        }
        Framework::Nodejs => {
            let mut pins = vec![pin("telegraf", "4.16.3")];
            if services.contains("scheduler") {
                pins.push(pin("node-cron", "3.0.3"));
            }
            pins
        }
    };

    let mut env = vec!["BOT_TOKEN".to_owned()];
    if requirements.features.contains(&BotFeature::Weather) {
        env.push("WEATHER_API_URL".to_owned());
    }

    let command_menu = if handlers.is_empty() {
        "/start".to_owned()
    } else {
        handlers
            .iter()
            .map(|handler| format!("/{}", handler.command))
            .collect::<Vec<_>>()
            .join(", ")
    };

    BotBlueprint {
        bot_name: name.as_str().to_owned(),
        description: description.to_owned(),
        framework,
        handlers,
        has_echo,
        has_inline,
        services: services.into_iter().map(str::to_owned).collect(),
        middleware,
        dependencies,
        env,
        command_menu,
    }
}

fn pin(name: &str, version: &str) -> DependencyPin {
    DependencyPin { name: name.to_owned(), version: version.to_owned() }
}

#[cfg(test)]
mod tests {
    use botforge_core::domain::bot::{BotName, Framework};

    use super::analyze;
    use crate::parser::parse_requirements;

    fn name() -> BotName {
        BotName::parse("tracker").expect("valid name")
    }

    #[test]
    fn habit_tracker_gets_notes_reminders_and_their_services() {
        let description = "Tracks my habits and reminds me every morning";
        let requirements = parse_requirements(description);
        let blueprint = analyze(&name(), description, Framework::Python, &requirements);

        let commands: Vec<&str> =
            blueprint.handlers.iter().map(|handler| handler.command.as_str()).collect();
        assert_eq!(commands, vec!["remind", "note"]);
        assert_eq!(blueprint.services, vec!["scheduler", "storage"]);
        assert!(blueprint
            .dependencies
            .iter()
            .any(|dependency| dependency.name == "apscheduler"));
        assert_eq!(blueprint.command_menu, "/remind, /note");
    }

    #[test]
    fn empty_match_falls_back_to_echo() {
        let description = "just a friendly companion";
        let requirements = parse_requirements(description);
        let blueprint = analyze(&name(), description, Framework::Python, &requirements);

        assert!(blueprint.handlers.is_empty());
        assert!(blueprint.has_echo);
        assert_eq!(blueprint.command_menu, "/start");
        assert_eq!(blueprint.dependencies.len(), 1);
    }

    #[test]
    fn custom_commands_do_not_shadow_feature_handlers() {
        let description = "a weather bot, also handles /weather and /wind";
        let requirements = parse_requirements(description);
        let blueprint = analyze(&name(), description, Framework::Nodejs, &requirements);

        let commands: Vec<&str> =
            blueprint.handlers.iter().map(|handler| handler.command.as_str()).collect();
        assert_eq!(commands, vec!["weather", "wind"]);
        assert!(blueprint.dependencies.iter().any(|dependency| dependency.name == "telegraf"));
        assert_eq!(blueprint.env, vec!["BOT_TOKEN", "WEATHER_API_URL"]);
    }

    #[test]
    fn admin_feature_installs_the_guard_middleware() {
        let description = "moderation bot that can ban spammers";
        let requirements = parse_requirements(description);
        let blueprint = analyze(&name(), description, Framework::Python, &requirements);

        assert_eq!(blueprint.middleware, vec!["admin_guard"]);
    }
}
