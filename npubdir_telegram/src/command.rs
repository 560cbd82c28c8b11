use npubdir_core::{ConsentAction, Npub};
use teloxide::types::BotCommand;

const CONSENT_PREFIX: &str = "consent";
/// Identifier characters carried in callback data (Telegram allows 64 bytes).
const CALLBACK_ID_LEN: usize = 48;
const RESET_FLAG: &str = "--reset";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenameRequest {
    /// `@handle` or identifier prefix.
    pub target: String,
    /// `None` clears the custom name.
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    MyProfile,
    Forget,
    WebYes,
    WebNo,
    Stats,
    /// `None` when the arguments were missing.
    Rename(Option<RenameRequest>),
    Refresh,
}

impl Command {
    fn all() -> Vec<BotCommand> {
        [
            ("help", "How the directory works"),
            ("myprofile", "Show your registered profiles"),
            ("forget", "Remove your profiles from the directory"),
            ("webyes", "Appear in the public web directory"),
            ("webno", "Stay out of the public web directory"),
            ("stats", "Directory statistics"),
        ]
        .into_iter()
        .map(|(command, description)| BotCommand {
            command: command.to_string(),
            description: description.to_string(),
        })
        .collect()
    }

    #[must_use]
    pub fn bot_commands() -> Vec<BotCommand> {
        Self::all()
    }

    /// Parse `/command[@bot] args`. Commands addressed to another bot are
    /// ignored when `bot_name` is known.
    #[must_use]
    pub fn parse_from_text(text: &str, bot_name: &str) -> Option<Self> {
        let text = text.trim();
        let (head, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let head = head.strip_prefix('/')?;

        let (name, mention) = head.split_once('@').unwrap_or((head, ""));
        if !mention.is_empty() && !bot_name.is_empty() && !mention.eq_ignore_ascii_case(bot_name)
        {
            return None;
        }

        match name.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "myprofile" => Some(Self::MyProfile),
            "forget" => Some(Self::Forget),
            "webyes" => Some(Self::WebYes),
            "webno" => Some(Self::WebNo),
            "stats" => Some(Self::Stats),
            "rename" => Some(Self::Rename(parse_rename(args))),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_admin_only(&self) -> bool {
        matches!(self, Self::Rename(_) | Self::Refresh)
    }

    #[must_use]
    pub const fn help_text() -> &'static str {
        "🟣 <b>Nostr directory bot</b>

Send your <code>npub1…</code> in the group and it will be added to the pinned directory.

<b>Commands:</b>
/myprofile - Show your registered profiles
/forget - Remove your profiles from the directory
/webyes - Also appear in the public web directory
/webno - Only appear in this group
/stats - Directory statistics

<b>Admins:</b>
/rename &lt;npub-prefix|@handle&gt; &lt;name|--reset&gt;
/refresh - Rebuild the pinned directory and republish"
    }

    #[must_use]
    pub const fn rename_usage() -> &'static str {
        "Usage: <code>/rename &lt;npub-prefix or @handle&gt; &lt;new name&gt;</code>
To clear: <code>/rename &lt;npub-prefix&gt; --reset</code>

Example: <code>/rename npub19yw Satoshi</code>"
    }
}

fn parse_rename(args: &str) -> Option<RenameRequest> {
    let (target, name) = args.trim().split_once(char::is_whitespace)?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(RenameRequest {
        target: target.to_string(),
        name: (name != RESET_FLAG).then(|| name.to_string()),
    })
}

/// Payload of the consent prompt's inline buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentCallback {
    pub action: ConsentAction,
    /// Leading characters of the identifier the prompt was issued for.
    pub identifier_prefix: String,
}

impl ConsentCallback {
    #[must_use]
    pub fn encode(action: ConsentAction, identifier: &Npub) -> String {
        let id = identifier.as_str();
        let prefix = id.get(..CALLBACK_ID_LEN).unwrap_or(id);
        format!("{CONSENT_PREFIX}:{}:{prefix}", action.as_str())
    }

    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.splitn(3, ':');
        if parts.next()? != CONSENT_PREFIX {
            return None;
        }
        let action = ConsentAction::from_str_lowercase(parts.next()?)?;
        let identifier_prefix = parts.next().filter(|p| p.starts_with("npub1"))?;
        Some(Self {
            action,
            identifier_prefix: identifier_prefix.to_string(),
        })
    }
}
