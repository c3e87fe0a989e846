//! MarkdownV2 rendering for every message botforge sends.
//!
//! Telegram rejects a whole message over one unescaped reserved character,
//! so all dynamic content goes through [`escape_markdown`] and the static
//! literals are written pre-escaped.

use botforge_core::domain::intent::MIN_DESCRIPTION_CHARS;
use botforge_core::{BotRecord, BotState, BotStatusView, RuntimeStatus};

/// The characters MarkdownV2 reserves outside code entities, plus the escape
/// character itself.
const RESERVED: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Escaping inside ``` fences, where only the backtick and backslash are
/// significant.
fn escape_code(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\\' || ch == '`' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn state_emoji(state: BotState) -> &'static str {
    match state {
        BotState::Draft => "📋",
        BotState::Generating => "📝",
        BotState::Building => "🔨",
        BotState::Deploying => "🚀",
        BotState::Running => "🟢",
        BotState::Stopped => "⏸️",
        BotState::Failed => "❌",
        BotState::Removed => "🗑️",
    }
}

pub fn state_label(state: BotState) -> &'static str {
    match state {
        BotState::Draft => "Draft",
        BotState::Generating => "Generating",
        BotState::Building => "Building",
        BotState::Deploying => "Deploying",
        BotState::Running => "Running",
        BotState::Stopped => "Stopped",
        BotState::Failed => "Failed",
        BotState::Removed => "Removed",
    }
}

fn runtime_word(status: RuntimeStatus) -> &'static str {
    match status {
        RuntimeStatus::Running => "running",
        RuntimeStatus::Exited => "exited",
        RuntimeStatus::Absent => "missing",
    }
}

pub fn welcome_message() -> String {
    concat!(
        "👋 *Welcome to botforge\\!*\n\n",
        "I turn a plain\\-words description into a running Telegram bot: you ",
        "describe it, I generate the code, build an image, and start it on my ",
        "server\\.\n\n",
        "*How it works*\n",
        "1\\. Send /create\n",
        "2\\. Describe what the bot should do\n",
        "3\\. Pick a name and paste a token from @BotFather\n",
        "4\\. Your bot goes live\n\n",
        "Send /help for the full command list\\."
    )
    .to_owned()
}

pub fn help_message() -> String {
    concat!(
        "📖 *botforge commands*\n\n",
        "`/create` \\- build and deploy a new bot\n",
        "`/list` \\- your bots and their states\n",
        "`/status <name>` \\- one bot in detail\n",
        "`/start <name>` \\- start a stopped bot\n",
        "`/stop <name>` \\- stop a running bot\n",
        "`/retry <name>` \\- retry a failed deployment\n",
        "`/remove <name>` \\- tear a bot down for good\n",
        "`/logs <name>` \\- recent container output\n",
        "`/cancel` \\- abort the current create conversation\n",
        "`/help` \\- this message"
    )
    .to_owned()
}

pub fn describe_prompt() -> String {
    concat!(
        "🤖 *Let's build your bot\\!*\n\n",
        "Describe what it should do\\. Mention node or javascript if you want ",
        "it generated for Node\\.js; Python is the default\\.\n\n",
        "Example: \"a habit tracker that sends me daily reminders\""
    )
    .to_owned()
}

pub fn name_prompt() -> String {
    concat!(
        "✅ Got it\\.\n\n",
        "Now pick a *name*: 3 to 32 characters, starting with a letter or ",
        "digit, using only letters, digits, `_`, and `-`\\."
    )
    .to_owned()
}

pub fn token_prompt() -> String {
    concat!(
        "✅ Name accepted\\.\n\n",
        "Paste the *bot token* you got from @BotFather\\. It looks like ",
        "`123456789:ABCdefGhij`\\. The token stays on this server and is only ",
        "handed to your bot\\."
    )
    .to_owned()
}

pub fn description_too_short() -> String {
    format!(
        "❌ That description is too short\\. Give me at least {MIN_DESCRIPTION_CHARS} characters\\."
    )
}

pub fn invalid_name(detail: &str) -> String {
    format!("❌ {}\\. Try another name\\.", escape_markdown(detail))
}

pub fn invalid_token() -> String {
    concat!(
        "❌ That doesn't look like a BotFather token \\(expected ",
        "`<id>:<secret>`, 20\\+ characters\\)\\. Paste it exactly as ",
        "@BotFather sent it\\."
    )
    .to_owned()
}

pub fn create_in_progress() -> String {
    concat!(
        "✋ We're already in the middle of creating a bot\\. Answer the ",
        "question above, or send /cancel to abort\\."
    )
    .to_owned()
}

pub fn cancelled() -> String {
    "🚫 Create conversation cancelled\\. Send /create to start over\\.".to_owned()
}

pub fn nothing_to_cancel() -> String {
    "Nothing to cancel\\. Send /create to start a bot\\.".to_owned()
}

pub fn usage_hint(command: &str) -> String {
    format!("Usage: `/{command} <name>`\\. Send /list if you forgot the name\\.")
}

pub fn unknown_command(input: &str) -> String {
    format!("❓ Unknown command {}\\. Send /help for the list\\.", escape_markdown(input))
}

pub fn bot_list(bots: &[BotRecord]) -> String {
    if bots.is_empty() {
        return "📭 You don't have any bots yet\\. Send /create to build your first one\\."
            .to_owned();
    }

    let mut lines = vec!["🤖 *Your bots*".to_owned(), String::new()];
    for bot in bots {
        lines.push(format!(
            "{} *{}* \\- {}",
            state_emoji(bot.state),
            escape_markdown(bot.name.as_str()),
            state_label(bot.state)
        ));
    }
    lines.join("\n")
}

pub fn status_view(view: &BotStatusView) -> String {
    let record = &view.record;
    let mut lines = vec![
        format!("{} *{}*", state_emoji(record.state), escape_markdown(record.name.as_str())),
        String::new(),
        format!("State: {}", state_label(record.state)),
        format!("Framework: {}", record.framework.as_str()),
    ];

    if let Some(container) = &record.container_ref {
        lines.push(format!("Container: `{}`", escape_code(short_ref(container.as_str()))));
    }
    if let Some(runtime) = view.runtime {
        lines.push(format!("Runtime: {}", runtime_word(runtime)));
    }
    if let Some(error) = &record.last_error {
        lines.push(format!("Last error: {}", escape_markdown(error)));
    }
    if let Some(failed_from) = record.failed_from {
        lines.push(format!("Failed during: {}", state_label(failed_from)));
        lines.push("Send /retry to pick up where it left off\\.".to_owned());
    }
    lines.push(format!(
        "Updated: {}",
        escape_markdown(&record.updated_at.format("%Y-%m-%d %H:%M UTC").to_string())
    ));

    if view.drift_detected {
        if let Some(runtime) = view.runtime {
            lines.push(String::new());
            lines.push(format!(
                "⚠️ Drift: the record says *{}* but the container reports {}\\.",
                state_label(record.state),
                runtime_word(runtime)
            ));
            lines.push("A background check will reconcile this shortly\\.".to_owned());
        }
    }

    lines.join("\n")
}

pub fn deploy_success(record: &BotRecord) -> String {
    let mut lines = vec![
        format!("🚀 *{}* deployed\\!", escape_markdown(record.name.as_str())),
        String::new(),
        format!("{} State: {}", state_emoji(record.state), state_label(record.state)),
    ];
    if let Some(container) = &record.container_ref {
        lines.push(format!("Container: `{}`", escape_code(short_ref(container.as_str()))));
    }
    lines.push(String::new());
    lines.push("Send /list to see all your bots\\.".to_owned());
    lines.join("\n")
}

pub fn started_message(name: &str) -> String {
    format!("🟢 *{}* is running again\\.", escape_markdown(name))
}

pub fn stopped_message(name: &str) -> String {
    format!(
        "⏸️ *{}* stopped\\. Send `/start {}` when you want it back\\.",
        escape_markdown(name),
        name
    )
}

pub fn removed_message(name: &str) -> String {
    format!("🗑️ *{}* removed\\. Its name is free for reuse\\.", escape_markdown(name))
}

pub fn logs_message(name: &str, lines: &[String]) -> String {
    if lines.is_empty() {
        return format!("📜 *{}* has produced no output yet\\.", escape_markdown(name));
    }

    let body = lines.iter().map(|line| escape_code(line)).collect::<Vec<_>>().join("\n");
    format!(
        "📜 *{}* \\- last {} lines\n\n```\n{}\n```",
        escape_markdown(name),
        lines.len(),
        body
    )
}

pub fn error_message(summary: &str, retryable: bool) -> String {
    let mut message = format!("❌ {}", escape_markdown(summary));
    if retryable {
        message.push_str("\n\nThis looks transient \\- sending the command again may succeed\\.");
    }
    message
}

fn short_ref(container: &str) -> &str {
    container.get(..12).unwrap_or(container)
}
