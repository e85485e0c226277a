//! Gateway event glue
//!
//! Turns serenity events into moderation inputs: guild messages go through
//! the automod pipeline, poll component clicks become votes.

use crate::error::ModerationResult;
use crate::moderation::{InboundMessage, MentionSet, MessageState};
use crate::platform::{Actor, Platform};
use crate::polls::{VoteOutcome, parse_custom_id};
use crate::store::PollStore;
use crate::sweeper::render_closed;
use crate::{Data, EVENT_TARGET, Error};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, ComponentInteraction, ComponentInteractionDataKind, CreateInteractionResponse,
    CreateInteractionResponseMessage, FullEvent, GuildId, Interaction, Message, Permissions, RoleId,
};
use tracing::{debug, info, warn};

/// Poise event handler
///
/// # Errors
/// Only interaction responses propagate errors; moderation failures are
/// reported through logs.
pub async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!(
                target: EVENT_TARGET,
                "Connected as {}, shard {}",
                data_about_bot.user.name,
                ctx.shard_id
            );
        }
        FullEvent::CacheReady { guilds } => {
            let cached = ctx.cache.guild_count();
            if cached != guilds.len() {
                warn!(
                    target: EVENT_TARGET,
                    "Cache guild count mismatch: {cached} (cache) vs {} (actual)",
                    guilds.len()
                );
            }
            info!(target: EVENT_TARGET, "Cache ready! Moderating {} guild(s)", guilds.len());
        }
        FullEvent::Message { new_message } => handle_message(ctx, new_message, data).await,
        FullEvent::InteractionCreate {
            interaction: Interaction::Component(component),
        } => handle_component(ctx, component, data).await?,
        _ => {}
    }
    Ok(())
}

async fn handle_message(ctx: &serenity::Context, message: &Message, data: &Data) {
    if message.author.bot {
        return;
    }
    let Some(guild_id) = message.guild_id else {
        return;
    };

    let inbound = inbound_message(ctx, message, guild_id);
    let config = data.policies.fetch(guild_id.get());
    let report = data.pipeline.process(&config, &inbound).await;

    if report.state != MessageState::Clean {
        debug!(
            target: EVENT_TARGET,
            guild_id = inbound.guild_id,
            message_id = inbound.message_id,
            state = ?report.state,
            cases = ?report.cases,
            escalation = ?report.escalation,
            "Message moderated"
        );
    }
}

fn inbound_message(ctx: &serenity::Context, message: &Message, guild_id: GuildId) -> InboundMessage {
    let author_roles: Vec<RoleId> = message
        .member
        .as_ref()
        .map(|member| member.roles.clone())
        .unwrap_or_default();

    let mut mentions = MentionSet::default();
    mentions.users.extend(message.mentions.iter().map(|user| user.id.get()));
    mentions.roles.extend(message.mention_roles.iter().map(|role| role.get()));
    mentions.everyone = message.mention_everyone;

    InboundMessage {
        guild_id: guild_id.get(),
        channel_id: message.channel_id.get(),
        message_id: message.id.get(),
        author: Actor::new(message.author.id.get(), message.author.tag()),
        author_is_staff: is_staff(ctx, guild_id, message, &author_roles),
        author_roles: author_roles.iter().map(|role| role.get()).collect(),
        content: message.content.clone(),
        mentions,
    }
}

/// Whether the author holds Manage Messages (or Administrator) guild-wide
///
/// Falls back to `false` when the guild is not cached.
fn is_staff(ctx: &serenity::Context, guild_id: GuildId, message: &Message, roles: &[RoleId]) -> bool {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return false;
    };
    if guild.owner_id == message.author.id {
        return true;
    }

    let everyone = RoleId::new(guild_id.get());
    let permissions = std::iter::once(&everyone)
        .chain(roles)
        .filter_map(|role_id| guild.roles.get(role_id))
        .fold(Permissions::empty(), |acc, role| acc | role.permissions);

    permissions.contains(Permissions::ADMINISTRATOR)
        || permissions.contains(Permissions::MANAGE_MESSAGES)
}

async fn handle_component(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    data: &Data,
) -> Result<(), Error> {
    let Some((poll_id, button_option)) = parse_custom_id(&component.data.custom_id) else {
        return Ok(());
    };
    let option_id = match (&component.data.kind, button_option) {
        (_, Some(option)) => option.to_string(),
        (ComponentInteractionDataKind::StringSelect { values }, None) => {
            let Some(value) = values.first() else {
                return Ok(());
            };
            value.clone()
        }
        _ => return Ok(()),
    };

    let reply = match record_vote(
        &*data.store,
        data.platform.as_ref(),
        poll_id,
        component.user.id.get(),
        option_id,
        Utc::now(),
    )
    .await
    {
        Ok(outcome) => vote_reply(outcome),
        Err(e) => {
            warn!(target: EVENT_TARGET, poll_id, error = %e, "Failed to record vote");
            "Your vote could not be recorded, please try again."
        }
    };

    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(reply)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

/// Apply a vote and redraw the poll when its state changed
pub(crate) async fn record_vote(
    store: &dyn PollStore,
    platform: &dyn Platform,
    poll_id: &str,
    user_id: u64,
    option_id: String,
    now: DateTime<Utc>,
) -> ModerationResult<VoteOutcome> {
    let (outcome, poll) = store.cast_vote(poll_id, user_id, option_id, now).await?;
    match (outcome, poll) {
        (VoteOutcome::Recorded, Some(poll)) => {
            if let Err(e) = platform.render_poll(poll).await {
                warn!(target: EVENT_TARGET, poll_id, error = %e, "Failed to redraw poll after vote");
            }
        }
        (VoteOutcome::Expired, Some(poll)) => render_closed(platform, &poll).await,
        _ => {}
    }
    Ok(outcome)
}

fn vote_reply(outcome: VoteOutcome) -> &'static str {
    match outcome {
        VoteOutcome::Recorded => "Your vote has been recorded.",
        VoteOutcome::Closed | VoteOutcome::Expired => "This poll has ended.",
        VoteOutcome::UnknownOption | VoteOutcome::UnknownPoll => {
            "This poll is no longer available."
        }
    }
}
