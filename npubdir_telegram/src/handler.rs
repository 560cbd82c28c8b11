use crate::command::{ConsentCallback, RenameRequest};
use crate::transport::no_preview;
use crate::{Command, Error, Result, TelegramBot};
use chrono::Utc;
use npubdir_core::util::escape_html;
use npubdir_core::{ConsentAction, ConsentState, OwnerRef, Profile, Upserted};
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, ParseMode,
    ReplyParameters, User,
};
use tracing::{info, warn};

const NO_PROFILE: &str =
    "You have no registered profile. Send your <code>npub1…</code> in the group first.";
const ADMIN_ONLY: &str = "⚠️ Only group administrators can use this command.";

fn owner_of(user: &User) -> OwnerRef {
    OwnerRef {
        user_id: user.id.0,
        name: user.full_name(),
        username: user.username.clone(),
    }
}

fn consent_label(state: ConsentState) -> &'static str {
    match state {
        ConsentState::Granted => "✅ yes",
        ConsentState::Denied => "❌ no",
        ConsentState::Undecided => "⏳ not answered yet",
    }
}

/// Send an HTML reply to `msg`, in its thread.
async fn reply(bot: &TelegramBot, msg: &Message, text: impl Into<String>) -> Result<Message> {
    let mut request = bot
        .bot
        .send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .link_preview_options(no_preview())
        .reply_parameters(ReplyParameters::new(msg.id));
    if let Some(thread) = msg.thread_id {
        request = request.message_thread_id(thread);
    }
    Ok(request.await?)
}

/// Await `notify`, then `sync` even when notifying failed, so a lost reply
/// never leaves the pinned chain or the remote copy behind the store.
async fn notify_then_sync<N, S>(notify: N, sync: S) -> Result<()>
where
    N: Future<Output = Result<()>>,
    S: Future<Output = ()>,
{
    let notified = notify.await;
    sync.await;
    notified
}

fn consent_keyboard(profile: &Profile) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            "✅ Yes, publish on the web",
            ConsentCallback::encode(ConsentAction::Grant, &profile.identifier),
        ),
        InlineKeyboardButton::callback(
            "❌ Only this group",
            ConsentCallback::encode(ConsentAction::Deny, &profile.identifier),
        ),
    ]])
}

/// Handle any message (commands or regular text)
pub async fn handle_message(bot: TelegramBot, msg: Message) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let in_scope = bot.in_scope(&msg);

    if let Some(cmd) = Command::parse_from_text(text, &bot.username) {
        // Commands also work in a private chat with the bot.
        if in_scope || msg.chat.is_private() {
            return handle_command(&bot, &msg, user, cmd).await;
        }
        return Ok(());
    }

    if !in_scope {
        return Ok(());
    }
    handle_sightings(&bot, &msg, user, text).await
}

async fn handle_sightings(bot: &TelegramBot, msg: &Message, user: &User, text: &str) -> Result<()> {
    let recorded = bot
        .directory
        .record_sightings(text, &owner_of(user), msg.date)
        .await?;
    if recorded.is_empty() {
        return Ok(());
    }

    let replies = async {
        for Upserted { profile, created } in &recorded {
            let short = escape_html(&profile.identifier.short(20));
            if *created {
                info!("[{}] Registered {}", user.id, profile.identifier.short(20));
                let prompt = format!(
                    "🟣 <b>Profile added to the directory!</b>\n\n\
                     <code>{short}</code>\n\n\
                     Do you also want to appear in the public web directory?\n\n\
                     <i>You can change this later with /webyes or /webno</i>"
                );
                let mut request = bot
                    .bot
                    .send_message(msg.chat.id, prompt)
                    .parse_mode(ParseMode::Html)
                    .link_preview_options(no_preview())
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .reply_markup(consent_keyboard(profile));
                if let Some(thread) = msg.thread_id {
                    request = request.message_thread_id(thread);
                }
                request.await?;
            } else {
                reply(
                    bot,
                    msg,
                    format!("✅ <code>{short}</code> is already in the directory."),
                )
                .await?;
            }
        }
        Ok::<(), Error>(())
    };
    notify_then_sync(replies, bot.directory.sync(bot.scope)).await
}

/// Handle a press on a consent prompt button.
pub async fn handle_callback(bot: TelegramBot, q: CallbackQuery) -> Result<()> {
    let Some(callback) = q.data.as_deref().and_then(ConsentCallback::parse) else {
        return Ok(());
    };

    let profile = bot.directory.find(&callback.identifier_prefix).await?;
    let Some(profile) = profile else {
        bot.bot
            .answer_callback_query(q.id.clone())
            .text("This profile is no longer in the directory.")
            .show_alert(true)
            .await?;
        return Ok(());
    };
    if profile.owner.user_id != q.from.id.0 {
        bot.bot
            .answer_callback_query(q.id.clone())
            .text("⚠️ Only the owner of this profile can answer.")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let change = bot
        .directory
        .apply_consent(&profile.identifier, callback.action, Utc::now())
        .await?;
    info!(
        "[{}] Consent answer for {}: {}",
        q.from.id,
        profile.identifier.short(20),
        change.to
    );

    let text = match change.to {
        ConsentState::Granted => {
            "✅ <b>Added to the group directory and the public web directory</b>\n\n\
             Leave the web with /webno or remove yourself entirely with /forget"
        }
        _ => {
            "✅ <b>Added to the group directory only</b>\n\n\
             You will not appear on the public web. Changed your mind? /webyes"
        }
    };
    let notify = async {
        let edited = match q.regular_message() {
            Some(prompt) => bot
                .bot
                .edit_message_text(prompt.chat.id, prompt.id, text)
                .parse_mode(ParseMode::Html)
                .link_preview_options(no_preview())
                .await
                .map(|_| ()),
            None => Ok(()),
        };
        if let Err(e) = edited {
            warn!("Could not update consent prompt: {e}");
        }
        bot.bot.answer_callback_query(q.id.clone()).await?;
        Ok::<(), Error>(())
    };

    if change.changed() {
        notify_then_sync(notify, bot.directory.sync(bot.scope)).await
    } else {
        notify.await
    }
}

async fn is_admin(bot: &TelegramBot, user: &User) -> bool {
    match bot
        .bot
        .get_chat_member(ChatId(bot.scope.chat.0), user.id)
        .await
    {
        Ok(member) => member.is_privileged(),
        Err(e) => {
            warn!("Could not check admin status of {}: {e}", user.id);
            false
        }
    }
}

/// Handle bot commands
async fn handle_command(bot: &TelegramBot, msg: &Message, user: &User, cmd: Command) -> Result<()> {
    let who = user
        .username
        .as_deref()
        .map_or_else(|| user.id.to_string(), |u| format!("@{u}"));
    info!("[{who}] Command: {cmd:?}");

    if cmd.is_admin_only() && !is_admin(bot, user).await {
        reply(bot, msg, ADMIN_ONLY).await?;
        return Ok(());
    }

    match cmd {
        Command::Start | Command::Help => {
            reply(bot, msg, Command::help_text()).await?;
        }
        Command::MyProfile => my_profile(bot, msg, user).await?,
        Command::Forget => forget(bot, msg, user).await?,
        Command::WebYes => set_web_consent(bot, msg, user, ConsentAction::Grant).await?,
        Command::WebNo => set_web_consent(bot, msg, user, ConsentAction::Deny).await?,
        Command::Stats => {
            let stats = bot.directory.stats().await?;
            reply(
                bot,
                msg,
                format!(
                    "📊 <b>Nostr directory</b>\n\n\
                     👥 Total profiles: <b>{}</b>\n\
                     🌐 On the web: <b>{}</b>\n\
                     🔒 Group only: <b>{}</b>",
                    stats.total,
                    stats.published,
                    stats.chat_only()
                ),
            )
            .await?;
        }
        Command::Rename(None) => {
            reply(bot, msg, Command::rename_usage()).await?;
        }
        Command::Rename(Some(request)) => rename(bot, msg, request).await?,
        Command::Refresh => {
            let report = bot.directory.refresh_pins(bot.scope).await?;
            let published = bot.directory.publish().await;
            let mut text = format!(
                "✅ Directory refreshed: {} edited, {} new, {} removed.",
                report.edited, report.created, report.removed
            );
            if !report.is_complete() {
                text.push_str("\n⚠️ Some messages could not be updated; they will be retried.");
            }
            if let Err(e) = published {
                warn!("Publication after /refresh failed: {e}");
                text.push_str("\n⚠️ Web publication failed; it will be retried.");
            }
            reply(bot, msg, text).await?;
        }
    }

    Ok(())
}

async fn my_profile(bot: &TelegramBot, msg: &Message, user: &User) -> Result<()> {
    let profiles = bot.directory.profiles_of(user.id.0).await?;
    if profiles.is_empty() {
        reply(bot, msg, NO_PROFILE).await?;
        return Ok(());
    }

    let base = &bot.directory.renderer().config().deep_link_base;
    let mut text = String::from("🟣 <b>Your profile</b>\n");
    for profile in &profiles {
        text.push_str(&format!(
            "\n<b>Name:</b> {}\n<b>npub:</b> <code>{}</code>\n🔗 <a href=\"{base}{}\">View on Nostr</a>\n📅 Registered: {}\n🌐 On the web: {}\n",
            escape_html(&profile.display_name()),
            profile.identifier,
            profile.identifier,
            profile.created_at.format("%Y-%m-%d"),
            consent_label(profile.consent),
        ));
        if let Some(custom) = &profile.custom_name {
            text.push_str(&format!("✏️ Custom name: <b>{}</b>\n", escape_html(custom)));
        }
    }
    text.push_str("\nCommands: /forget | /webyes | /webno");
    reply(bot, msg, text).await?;
    Ok(())
}

async fn forget(bot: &TelegramBot, msg: &Message, user: &User) -> Result<()> {
    let profiles = bot.directory.profiles_of(user.id.0).await?;
    if profiles.is_empty() {
        reply(bot, msg, "You had no registered profile.").await?;
        return Ok(());
    }
    for profile in &profiles {
        bot.directory.remove(&profile.identifier).await?;
    }
    notify_then_sync(
        async {
            reply(bot, msg, "✅ Your profile has been removed from the directory.").await?;
            Ok::<(), Error>(())
        },
        bot.directory.sync(bot.scope),
    )
    .await
}

async fn set_web_consent(
    bot: &TelegramBot,
    msg: &Message,
    user: &User,
    action: ConsentAction,
) -> Result<()> {
    let profiles = bot.directory.profiles_of(user.id.0).await?;
    if profiles.is_empty() {
        reply(bot, msg, NO_PROFILE).await?;
        return Ok(());
    }

    let now = Utc::now();
    let mut changed = false;
    for profile in &profiles {
        let change = bot
            .directory
            .apply_consent(&profile.identifier, action, now)
            .await?;
        changed |= change.changed();
    }

    let text = match action {
        ConsentAction::Grant => "✅ You now appear in the public web directory.",
        ConsentAction::Deny => {
            "✅ You no longer appear on the public web. You stay in the group directory."
        }
    };
    let notify = async {
        reply(bot, msg, text).await?;
        Ok::<(), Error>(())
    };
    if changed {
        notify_then_sync(notify, bot.directory.sync(bot.scope)).await
    } else {
        notify.await
    }
}

async fn rename(bot: &TelegramBot, msg: &Message, request: RenameRequest) -> Result<()> {
    let Some(profile) = bot.directory.find(&request.target).await? else {
        reply(
            bot,
            msg,
            format!(
                "❌ No profile matches <code>{}</code>",
                escape_html(&request.target)
            ),
        )
        .await?;
        return Ok(());
    };

    let renamed = bot
        .directory
        .rename(&profile.identifier, request.name, Utc::now())
        .await?;
    let text = match &renamed.custom_name {
        Some(name) => format!(
            "✅ Name updated:\n<b>{}</b>\nnpub: <code>{}</code>",
            escape_html(name),
            renamed.identifier.short(20)
        ),
        None => format!(
            "✅ Custom name removed.\nNow showing: <b>{}</b>",
            escape_html(&renamed.display_name())
        ),
    };
    notify_then_sync(
        async {
            reply(bot, msg, text).await?;
            Ok::<(), Error>(())
        },
        bot.directory.sync(bot.scope),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn sync_runs_when_reply_fails() {
        let synced = AtomicBool::new(false);
        let result = notify_then_sync(
            async {
                Err(Error::Directory(npubdir_core::Error::NotFound(
                    "message to be replied".to_string(),
                )))
            },
            async { synced.store(true, Ordering::SeqCst) },
        )
        .await;

        assert!(matches!(result, Err(Error::Directory(_))));
        assert!(synced.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn sync_runs_after_reply() {
        let synced = AtomicBool::new(false);
        let result = notify_then_sync(async { Ok(()) }, async {
            synced.store(true, Ordering::SeqCst);
        })
        .await;

        assert!(result.is_ok());
        assert!(synced.load(Ordering::SeqCst));
    }
}
