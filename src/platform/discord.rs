//! serenity-backed [`Platform`]

use crate::error::{ModerationError, ModerationResult};
use crate::ledger::CaseLogEntry;
use crate::platform::{Actor, MemberStanding, Platform};
use crate::polls::{Poll, PollControls, PollView};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    ButtonStyle, ChannelId, CreateActionRow, CreateButton, CreateEmbed, CreateEmbedFooter,
    CreateMessage, CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption, EditMember,
    EditMessage, GuildId, Http, Member, MessageId, PartialGuild, Timestamp, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Discord caps member timeouts at 28 days
const MAX_TIMEOUT: Duration = Duration::from_secs(28 * 24 * 60 * 60);

pub struct DiscordPlatform {
    http: Arc<Http>,
    bot: Actor,
    notice_ttl: Duration,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, bot: Actor, notice_ttl: Duration) -> Self {
        Self {
            http,
            bot,
            notice_ttl,
        }
    }

    fn http(&self) -> &Http {
        &self.http
    }

    async fn fetch_member(&self, guild: &PartialGuild, user_id: u64) -> ModerationResult<Member> {
        Ok(guild.member(self.http(), UserId::new(user_id)).await?)
    }
}

/// Highest role position a member holds, 0 for `@everyone` only
fn top_role_position(guild: &PartialGuild, member: &Member) -> u16 {
    member
        .roles
        .iter()
        .filter_map(|role_id| guild.roles.get(role_id))
        .map(|role| role.position)
        .max()
        .unwrap_or(0)
}

fn timestamp_to_chrono(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0)
}

pub(crate) fn case_embed(entry: &CaseLogEntry) -> CreateEmbed {
    let mut embed = CreateEmbed::new().title(&entry.title).colour(entry.colour);
    for (name, value, inline) in &entry.fields {
        embed = embed.field(name, value, *inline);
    }
    match Timestamp::from_unix_timestamp(entry.timestamp.timestamp()) {
        Ok(timestamp) => embed.timestamp(timestamp),
        Err(_) => embed,
    }
}

pub(crate) fn poll_embed(view: &PollView) -> CreateEmbed {
    CreateEmbed::new()
        .title(&view.title)
        .description(&view.description)
        .footer(CreateEmbedFooter::new(&view.footer))
}

pub(crate) fn poll_components(view: &PollView) -> Vec<CreateActionRow> {
    match &view.controls {
        PollControls::Buttons(choices) => {
            let buttons = choices
                .iter()
                .map(|(id, label)| {
                    CreateButton::new(view.button_id(id))
                        .label(label)
                        .style(ButtonStyle::Primary)
                        .disabled(view.disabled)
                })
                .collect();
            vec![CreateActionRow::Buttons(buttons)]
        }
        PollControls::Select(choices) => {
            let options = choices
                .iter()
                .map(|(id, label)| CreateSelectMenuOption::new(label, id))
                .collect();
            let menu = CreateSelectMenu::new(
                view.select_id(),
                CreateSelectMenuKind::String { options },
            )
            .placeholder("Choose an option")
            .disabled(view.disabled);
            vec![CreateActionRow::SelectMenu(menu)]
        }
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    fn bot_identity(&self) -> Actor {
        self.bot.clone()
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> ModerationResult<()> {
        ChannelId::new(channel_id)
            .delete_message(self.http(), MessageId::new(message_id))
            .await?;
        Ok(())
    }

    async fn send_ephemeral_notice(&self, channel_id: u64, text: String) -> ModerationResult<()> {
        let channel = ChannelId::new(channel_id);
        let notice = channel.say(self.http(), text).await?;

        let http = Arc::clone(&self.http);
        let ttl = self.notice_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = channel.delete_message(&http, notice.id).await {
                debug!(channel_id, error = %e, "Notice already gone");
            }
        });
        Ok(())
    }

    async fn resolve_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<MemberStanding> {
        let guild = GuildId::new(guild_id).to_partial_guild(self.http()).await?;
        let member = self.fetch_member(&guild, user_id).await?;

        let moderatable = if guild.owner_id.get() == user_id {
            false
        } else if guild.owner_id.get() == self.bot.id {
            true
        } else {
            let bot = self.fetch_member(&guild, self.bot.id).await?;
            top_role_position(&guild, &bot) > top_role_position(&guild, &member)
        };

        Ok(MemberStanding {
            moderatable,
            timed_out_until: member
                .communication_disabled_until
                .and_then(timestamp_to_chrono),
        })
    }

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: String,
    ) -> ModerationResult<()> {
        if duration.is_zero() || duration > MAX_TIMEOUT {
            return Err(ModerationError::Validation(format!(
                "Timeout of {}s is outside Discord's limits",
                duration.as_secs()
            )));
        }
        let seconds = i64::try_from(duration.as_secs())
            .map_err(|e| ModerationError::Validation(e.to_string()))?;
        let until = Timestamp::from_unix_timestamp(Utc::now().timestamp() + seconds)
            .map_err(|e| ModerationError::Validation(e.to_string()))?;

        GuildId::new(guild_id)
            .edit_member(
                self.http(),
                UserId::new(user_id),
                EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(&reason),
            )
            .await?;
        info!(guild_id, user_id, until = %until, "Member timed out");
        Ok(())
    }

    async fn ban_member(&self, guild_id: u64, user_id: u64, reason: String) -> ModerationResult<()> {
        GuildId::new(guild_id)
            .ban_with_reason(self.http(), UserId::new(user_id), 0, &reason)
            .await?;
        Ok(())
    }

    async fn unban_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: String,
    ) -> ModerationResult<()> {
        self.http()
            .remove_ban(GuildId::new(guild_id), UserId::new(user_id), Some(reason.as_str()))
            .await?;
        Ok(())
    }

    async fn send_case_log(&self, channel_id: u64, entry: CaseLogEntry) -> ModerationResult<u64> {
        let message = ChannelId::new(channel_id)
            .send_message(self.http(), CreateMessage::new().embed(case_embed(&entry)))
            .await?;
        Ok(message.id.get())
    }

    async fn render_poll(&self, poll: Poll) -> ModerationResult<()> {
        let view = poll.view(Utc::now());
        ChannelId::new(poll.channel_id)
            .edit_message(
                self.http(),
                MessageId::new(poll.message_id),
                EditMessage::new()
                    .embed(poll_embed(&view))
                    .components(poll_components(&view)),
            )
            .await?;
        Ok(())
    }
}
