use crate::{CASE_TARGET, COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, MODERATION_TARGET};
use dashmap::DashMap;
use poise::{Context, FrameworkError};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Case and enforcement log file name
pub const MODERATION_LOG_FILE: &str = "moderation";

/// Start times of in-flight commands, keyed by invocation id
static COMMAND_STARTS: LazyLock<DashMap<u64, Instant>> = LazyLock::new(DashMap::new);

/// Initialize the logging system with console and file outputs
///
/// # Errors
/// Fails if the log directory cannot be created or the default filter does
/// not parse.
pub fn init() -> Result<(), Error> {
    // Create log directory if it doesn't exist
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let moderation_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, MODERATION_LOG_FILE);

    // Create a layer for console output (human-readable format)
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Command logs (JSON), only the command and error targets
    let command_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(filter_fn(|meta| {
            matches!(meta.target(), COMMAND_TARGET | ERROR_TARGET)
        }));

    // Moderation logs (JSON), routed by is_moderation_target
    let moderation_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(moderation_file)
        .with_filter(filter_fn(|meta| is_moderation_target(meta.target())));

    // Use env filter to allow runtime configuration of log levels
    // Default to INFO if not specified, keeping serenity's heartbeat chatter out
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    // Set up the subscriber with all layers
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(moderation_layer)
        .init();

    info!("Logging system initialized");
    Ok(())
}

/// Targets routed to the moderation log file
fn is_moderation_target(target: &str) -> bool {
    target == MODERATION_TARGET
        || target == CASE_TARGET
        || target.starts_with("warden::sweeper")
        || target.starts_with("warden::temp_bans")
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    // Remember the start time for post_command
    COMMAND_STARTS.insert(ctx.id(), Instant::now());

    let command_name = ctx.command().qualified_name.clone();
    let guild_id = ctx
        .guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string());
    let user_id = ctx.author().id.get().to_string();

    // Record the raw invocation when the command takes arguments
    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        ctx.invocation_string()
    };

    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    // Calculate execution time
    let duration = COMMAND_STARTS
        .remove(&ctx.id())
        .map(|(_, start)| start.elapsed());

    let command_name = ctx.command().qualified_name.clone();
    let guild_id = ctx
        .guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string());
    let user_id = ctx.author().id.get().to_string();

    let duration_ms = u64::try_from(duration.map_or(0, |d| d.as_millis())).unwrap_or_default();
    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            // post_command does not run for failed commands
            COMMAND_STARTS.remove(&ctx.id());
            let command_name = ctx.command().qualified_name.clone();
            let guild_id = ctx
                .guild_id()
                .as_ref()
                .map_or_else(|| "DM".to_string(), ToString::to_string);
            let user_id = ctx.author().id.get().to_string();

            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let command_name = ctx.command().qualified_name.clone();
            let guild_id = ctx
                .guild_id()
                .as_ref()
                .map_or_else(|| "DM".to_string(), ToString::to_string);
            let user_id = ctx.author().id.get().to_string();

            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);

            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error_msg,
                "Command check failed"
            );
        }
        FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                user_id = ctx.author().id.get(),
                missing = ?missing_permissions,
                "User lacks permissions for command"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = ?err,
                "Other framework error"
            );
        }
    }
}

pub fn log_console(message: &str) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderation_targets() {
        assert!(is_moderation_target(MODERATION_TARGET));
        assert!(is_moderation_target(CASE_TARGET));
        assert!(is_moderation_target("warden::sweeper::temp_bans"));
        assert!(!is_moderation_target(COMMAND_TARGET));
        assert!(!is_moderation_target("serenity::gateway"));
    }
}
