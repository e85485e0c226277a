//! Shared fixtures for unit tests

use crate::data::{ModerationPolicy, PolicyConfig};
use crate::moderation::{InboundMessage, MentionSet};
use crate::platform::{Actor, MockPlatform};

pub const GUILD_ID: u64 = 1;
pub const AUTHOR_ID: u64 = 500;

/// A platform mock that only knows who the bot is
pub fn bot_platform() -> MockPlatform {
    let mut platform = MockPlatform::new();
    platform
        .expect_bot_identity()
        .returning(|| Actor::new(1, "warden"));
    platform
}

pub fn message(content: &str) -> InboundMessage {
    InboundMessage {
        guild_id: GUILD_ID,
        channel_id: 100,
        message_id: 200,
        author: Actor::new(AUTHOR_ID, "member"),
        author_roles: Vec::new(),
        author_is_staff: false,
        content: content.to_string(),
        mentions: MentionSet::default(),
    }
}

/// Guild policy with every filter at its default, then adjusted by `edit`
pub fn policy_with(edit: impl FnOnce(&mut ModerationPolicy)) -> PolicyConfig {
    let mut config = PolicyConfig::for_guild(GUILD_ID);
    edit(&mut config.moderation);
    config
}

/// A store whose snapshot directory is a plain file, so every write fails
pub async fn unwritable_store() -> crate::store::MemoryStore {
    let dir = std::env::temp_dir().join(format!("warden-test-{}", uuid::Uuid::new_v4()));
    let store = crate::store::MemoryStore::open(dir.join("moderation.yaml"))
        .await
        .unwrap();
    tokio::fs::write(&dir, "not a directory").await.unwrap();
    assert!(store.persist().await.is_err());
    store
}
