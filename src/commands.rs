//! Moderator slash commands

use crate::error::ModerationError;
use crate::ledger::{CaseAction, ModerationCase, render_case};
use crate::platform::{Actor, case_embed, poll_components, poll_embed};
use crate::polls::Poll;
use crate::store::PollStore;
use crate::sweeper::{SweepRequest, close_and_render};
use crate::temp_bans::describe_duration;
use crate::{Context, Error};
use chrono::Utc;
use poise::serenity_prelude::{self as serenity, CreateMessage};
use poise::{CreateReply, command};
use std::time::Duration;

/// Most options a poll can offer (the select menu limit)
const MAX_POLL_OPTIONS: usize = 25;

fn guild_of(ctx: Context<'_>) -> Result<u64, Error> {
    ctx.guild_id()
        .map(serenity::GuildId::get)
        .ok_or_else(|| "This command only works in a server".into())
}

fn actor(user: &serenity::User) -> Actor {
    Actor::new(user.id.get(), user.tag())
}

/// Reply with user-facing failures, hand the rest to `on_error`
async fn reply_or_raise(ctx: Context<'_>, error: ModerationError) -> Result<(), Error> {
    match error {
        ModerationError::Validation(message) => {
            ctx.say(message).await?;
            Ok(())
        }
        ModerationError::NotFound(what) => {
            ctx.say(format!("{what} was not found.")).await?;
            Ok(())
        }
        ModerationError::PermissionDenied(_) => {
            ctx.say("I don't have permission to do that.").await?;
            Ok(())
        }
        other => Err(other.into()),
    }
}

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// View and manage moderation cases
#[command(
    slash_command,
    guild_only,
    subcommands("case_view", "case_reason", "case_search"),
    subcommand_required,
    required_permissions = "MANAGE_MESSAGES",
    default_member_permissions = "MANAGE_MESSAGES"
)]
pub async fn case(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show a single case
#[command(slash_command, guild_only, rename = "view")]
pub async fn case_view(
    ctx: Context<'_>,
    #[description = "Case number"] number: u64,
) -> Result<(), Error> {
    let guild_id = guild_of(ctx)?;
    match ctx.data().ledger.get_case(guild_id, number).await? {
        Some(case) => {
            ctx.send(CreateReply::default().embed(case_embed(&render_case(&case))))
                .await?;
        }
        None => {
            ctx.say(format!("Case #{number} does not exist.")).await?;
        }
    }
    Ok(())
}

/// Change the reason recorded on a case
#[command(slash_command, guild_only, rename = "reason")]
pub async fn case_reason(
    ctx: Context<'_>,
    #[description = "Case number"] number: u64,
    #[description = "New reason"] reason: String,
) -> Result<(), Error> {
    let guild_id = guild_of(ctx)?;
    match ctx.data().ledger.edit_reason(guild_id, number, &reason).await {
        Ok(case) => {
            ctx.say(format!("Updated reason for case #{}.", case.case_number))
                .await?;
            Ok(())
        }
        Err(e) => reply_or_raise(ctx, e).await,
    }
}

/// List recent cases for a user
#[command(slash_command, guild_only, rename = "search")]
pub async fn case_search(
    ctx: Context<'_>,
    #[description = "User to look up"] user: serenity::User,
    #[description = "Only this action (warn, ban, tempban, automod, ...)"] action: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_of(ctx)?;
    let action = match action.as_deref().map(str::parse::<CaseAction>).transpose() {
        Ok(action) => action,
        Err(e) => return reply_or_raise(ctx, e).await,
    };

    let cases = ctx
        .data()
        .ledger
        .search(guild_id, user.id.get(), action)
        .await?;
    if cases.is_empty() {
        ctx.say(format!("No cases found for {}.", user.tag())).await?;
        return Ok(());
    }

    let lines: Vec<String> = cases.iter().map(case_line).collect();
    ctx.say(format!("Cases for {}:\n{}", user.tag(), lines.join("\n")))
        .await?;
    Ok(())
}

fn case_line(case: &ModerationCase) -> String {
    format!(
        "`#{}` **{}** {} ({})",
        case.case_number,
        case.action,
        case.reason,
        case.created_at.format("%Y-%m-%d")
    )
}

/// Ban a member for a limited time
#[command(
    slash_command,
    guild_only,
    required_permissions = "BAN_MEMBERS",
    required_bot_permissions = "BAN_MEMBERS",
    default_member_permissions = "BAN_MEMBERS"
)]
pub async fn tempban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Length in minutes"]
    #[min = 1]
    minutes: u64,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_of(ctx)?;
    let data = ctx.data();
    let log_channel = data.policies.fetch(guild_id).mod_log_channel_id;
    let duration = Duration::from_secs(minutes.saturating_mul(60));

    let receipt = match data
        .temp_bans
        .issue(
            guild_id,
            log_channel,
            actor(&user),
            actor(ctx.author()),
            duration,
            reason.as_deref().unwrap_or_default(),
        )
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => return reply_or_raise(ctx, e).await,
    };

    let case = receipt
        .case
        .as_ref()
        .map_or_else(String::new, |case| format!(" (case #{})", case.case_number()));
    ctx.say(format!(
        "Banned {} for {}{case}.",
        user.tag(),
        describe_duration(duration.as_secs())
    ))
    .await?;
    Ok(())
}

/// Create and close polls
#[command(
    slash_command,
    guild_only,
    subcommands("poll_create", "poll_close"),
    subcommand_required
)]
pub async fn poll(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Split `a | b | c` into trimmed, non-empty option labels
fn parse_poll_options(raw: &str) -> Result<Vec<String>, ModerationError> {
    let options: Vec<String> = raw
        .split('|')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .map(ToString::to_string)
        .collect();
    if options.len() < 2 {
        return Err(ModerationError::Validation(
            "A poll needs at least two options, separated by `|`.".to_string(),
        ));
    }
    if options.len() > MAX_POLL_OPTIONS {
        return Err(ModerationError::Validation(format!(
            "A poll can have at most {MAX_POLL_OPTIONS} options."
        )));
    }
    Ok(options)
}

/// Start a poll in this channel
#[command(
    slash_command,
    guild_only,
    rename = "create",
    required_permissions = "MANAGE_MESSAGES",
    default_member_permissions = "MANAGE_MESSAGES"
)]
pub async fn poll_create(
    ctx: Context<'_>,
    #[description = "Question to ask"] question: String,
    #[description = "Options separated by |"] options: String,
    #[description = "Close after this many minutes"]
    #[min = 1]
    #[max = 43200]
    minutes: Option<i64>,
) -> Result<(), Error> {
    let guild_id = guild_of(ctx)?;
    let labels = match parse_poll_options(&options) {
        Ok(labels) => labels,
        Err(e) => return reply_or_raise(ctx, e).await,
    };
    let ends_at = minutes
        .map(|minutes| minutes.clamp(1, 43_200))
        .map(|minutes| Utc::now() + chrono::Duration::minutes(minutes));

    let mut poll = Poll::new(
        guild_id,
        ctx.channel_id().get(),
        0,
        ctx.author().id.get(),
        question.trim(),
        labels,
        ends_at,
    );
    let view = poll.view(Utc::now());
    let message = ctx
        .channel_id()
        .send_message(
            ctx.http(),
            CreateMessage::new()
                .embed(poll_embed(&view))
                .components(poll_components(&view)),
        )
        .await?;
    poll.message_id = message.id.get();

    let id = poll.id.clone();
    ctx.data().store.insert_poll(poll).await?;
    ctx.send(
        CreateReply::default()
            .content(format!("Poll created (id `{id}`)."))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Close a poll now
#[command(
    slash_command,
    guild_only,
    rename = "close",
    required_permissions = "MANAGE_MESSAGES",
    default_member_permissions = "MANAGE_MESSAGES"
)]
pub async fn poll_close(
    ctx: Context<'_>,
    #[description = "Poll id"] id: String,
) -> Result<(), Error> {
    let guild_id = guild_of(ctx)?;
    let data = ctx.data();
    let id = id.trim();

    let belongs_here = data
        .store
        .get_poll(id)
        .await?
        .is_some_and(|poll| poll.guild_id == guild_id);
    if !belongs_here {
        ctx.say("No poll with that id in this server.").await?;
        return Ok(());
    }

    let reply = match close_and_render(&*data.store, data.platform.as_ref(), id).await? {
        Some(poll) => format!("Poll closed with {} vote(s).", poll.total_votes()),
        None => "That poll is already closed.".to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Run every expiry sweeper now
#[command(slash_command, guild_only, owners_only, hide_in_help)]
pub async fn sweep(ctx: Context<'_>) -> Result<(), Error> {
    ctx.data().sweeps.send(SweepRequest::SweepAll).await?;
    ctx.say("Sweep requested.").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CaseDraft;
    use chrono::TimeZone;

    #[test]
    fn test_command_definitions() {
        let cmd = ping();
        assert_eq!(cmd.name, "ping");
        assert!(cmd.guild_only);

        let case = case();
        let names: Vec<&str> = case.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["view", "reason", "search"]);

        let poll = poll();
        let names: Vec<&str> = poll.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["create", "close"]);

        assert!(tempban().create_as_slash_command().is_some());
    }

    #[test]
    fn test_parse_poll_options() {
        assert_eq!(
            parse_poll_options(" pizza | tacos ||  ").unwrap(),
            vec!["pizza".to_string(), "tacos".to_string()]
        );
        assert!(matches!(
            parse_poll_options("only one"),
            Err(ModerationError::Validation(_))
        ));
        let many = vec!["x"; 26].join("|");
        assert!(parse_poll_options(&many).is_err());
    }

    #[test]
    fn test_case_line() {
        let created = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let case = CaseDraft::new(
            CaseAction::Warn,
            Actor::new(2, "target"),
            Actor::new(3, "moderator"),
        )
        .reason("spamming")
        .into_case(1, 7, created);
        assert_eq!(case_line(&case), "`#7` **warn** spamming (2024-03-09)");
    }
}
