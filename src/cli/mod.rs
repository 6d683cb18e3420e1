use chrono::DateTime;
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::config::{Command, Config};
use crate::control::ControlApi;
use crate::domain::{Attempt, ChannelId, Exception, Session};
use crate::store::{SqliteStore, StoreError};

/// Execute one management subcommand against the database and print the
/// result. Returns the process exit code.
pub fn execute(config: &Config, command: &Command) -> u8 {
    match run(config, command) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            exit_code(&err)
        }
    }
}

/// Map an error to the documented exit codes: 3 target not found,
/// 4 conflict, 5 storage, 1 otherwise. (Usage errors exit 2 at the
/// argument parser.)
pub fn exit_code(err: &StoreError) -> u8 {
    if err.is_not_found() {
        3
    } else if err.is_conflict() {
        4
    } else if err.is_storage() {
        5
    } else {
        1
    }
}

fn run(config: &Config, command: &Command) -> Result<(), StoreError> {
    let store = Arc::new(SqliteStore::open(config.db_path())?);
    let (control, _index_rx) = ControlApi::new(store)?;

    match command {
        Command::Run => unreachable!("the daemon is started from main"),

        Command::Isolate { channel_id, alias } => {
            let session = control.isolate(ChannelId(*channel_id), alias.as_deref())?;
            println!(
                "Started isolating channel {} (session {})",
                session.channel_id, session.id
            );
            if let Some(alias) = &session.alias {
                println!("Alias: {alias}");
            }
        }

        Command::Stop { channel_id } => {
            let session_id = control.stop(ChannelId(*channel_id))?;
            println!("Stopped isolating channel {channel_id} (session {session_id})");
        }

        Command::AddException {
            isolated_channel,
            allowed_channel,
            alias,
        } => {
            control.add_exception(
                ChannelId(*isolated_channel),
                ChannelId(*allowed_channel),
                alias.as_deref(),
            )?;
            println!("Added exception: {allowed_channel} can now route to {isolated_channel}");
        }

        Command::RemoveException {
            isolated_channel,
            allowed_channel,
        } => {
            control.remove_exception(ChannelId(*isolated_channel), ChannelId(*allowed_channel))?;
            println!(
                "Removed exception: {allowed_channel} can no longer route to {isolated_channel}"
            );
        }

        Command::List => {
            let sessions = control.list()?;
            if sessions.is_empty() {
                println!("No channels are currently isolated");
            } else {
                println!("Currently isolated channels:");
                print_table(sessions.iter().map(ActiveSessionRow::from));
            }
        }

        Command::Exceptions { channel_id } => {
            let (session, exceptions) = control.exceptions(ChannelId(*channel_id))?;
            if exceptions.is_empty() {
                println!("No exceptions configured for channel {channel_id}");
            } else {
                println!(
                    "Exceptions for channel {channel_id} (session {}):",
                    session.id
                );
                print_table(exceptions.iter().map(ExceptionRow::from));
            }
        }

        Command::History { channel } => {
            let sessions = control.history(channel.map(ChannelId))?;
            if sessions.is_empty() {
                println!("No isolation history found");
            } else {
                println!("Isolation history:");
                print_table(sessions.iter().map(HistoryRow::from));
            }
        }

        Command::Attempts { session_id, limit } => {
            let (session, attempts) = control.attempts(*session_id, Some(*limit))?;
            println!(
                "Attempts for session {} (channel {}, {})",
                session.id, session.channel_id, session.status
            );
            if attempts.is_empty() {
                println!("No attempts recorded");
            } else {
                print_table(attempts.iter().map(AttemptRow::from));
            }
        }

        Command::Stats => {
            let stats = control.stats()?;
            println!("Active isolations:   {}", stats.active_sessions);
            println!("Total sessions:      {}", stats.total_sessions);
            println!("Total attempts:      {}", stats.total_attempts);
            println!("  - resumed:         {}", stats.resumed);
            println!("  - failed:          {}", stats.failed);
        }
    }

    Ok(())
}

fn print_table<R: Tabled>(rows: impl Iterator<Item = R>) {
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");
}

/// Epoch milliseconds rendered for the operator, minute precision.
fn format_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn format_ms_opt(ms: Option<i64>) -> String {
    ms.map(format_ms).unwrap_or_else(|| "-".to_string())
}

fn format_alias(alias: &Option<String>) -> String {
    alias.clone().unwrap_or_else(|| "-".to_string())
}

#[derive(Tabled)]
struct ActiveSessionRow {
    #[tabled(rename = "Channel ID")]
    channel: String,
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Attempts")]
    attempts: u64,
    #[tabled(rename = "Resumed")]
    resumed: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
}

impl From<&Session> for ActiveSessionRow {
    fn from(session: &Session) -> Self {
        ActiveSessionRow {
            channel: session.channel_id.to_string(),
            alias: format_alias(&session.alias),
            started: format_ms(session.started_at),
            attempts: session.total_attempts,
            resumed: session.total_resumed,
            failed: session.total_failed,
        }
    }
}

#[derive(Tabled)]
struct ExceptionRow {
    #[tabled(rename = "Allowed Channel")]
    channel: String,
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "Added")]
    added: String,
}

impl From<&Exception> for ExceptionRow {
    fn from(exception: &Exception) -> Self {
        ExceptionRow {
            channel: exception.allowed_channel_id.to_string(),
            alias: format_alias(&exception.alias),
            added: format_ms(exception.created_at),
        }
    }
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Session")]
    session: i64,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Ended")]
    ended: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
}

impl From<&Session> for HistoryRow {
    fn from(session: &Session) -> Self {
        HistoryRow {
            session: session.id,
            channel: session.channel_id.to_string(),
            alias: format_alias(&session.alias),
            started: format_ms(session.started_at),
            ended: format_ms_opt(session.ended_at),
            status: session.status.to_string(),
            attempts: session.total_attempts,
            failed: session.total_failed,
        }
    }
}

#[derive(Tabled)]
struct AttemptRow {
    #[tabled(rename = "Incoming Channel")]
    incoming: String,
    #[tabled(rename = "Amount (msat)")]
    amount: u64,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Time")]
    time: String,
}

impl From<&Attempt> for AttemptRow {
    fn from(attempt: &Attempt) -> Self {
        AttemptRow {
            incoming: attempt.incoming_channel.to_string(),
            amount: attempt.amount_msat,
            decision: attempt.decision.to_string(),
            reason: attempt.reason.to_string(),
            time: format_ms_secs(attempt.observed_at),
        }
    }
}

/// Second precision for attempt rows; several can land in one minute.
fn format_ms_secs(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> Config {
        let db = dir.path().join("isolator.db");
        Cli::parse_from([
            "channel-isolator",
            "--db-path",
            db.to_str().unwrap(),
            "stats",
        ])
        .config
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&StoreError::NotActive(ChannelId(1))), 3);
        assert_eq!(exit_code(&StoreError::SessionNotFound(1)), 3);
        assert_eq!(
            exit_code(&StoreError::ExceptionNotFound {
                session_id: 1,
                allowed: ChannelId(2)
            }),
            3
        );
        assert_eq!(
            exit_code(&StoreError::AlreadyActive {
                channel_id: ChannelId(1),
                session_id: 1
            }),
            4
        );
        assert_eq!(
            exit_code(&StoreError::DuplicateException {
                session_id: 1,
                allowed: ChannelId(2)
            }),
            4
        );
        assert_eq!(
            exit_code(&StoreError::SchemaVersion {
                found: 9,
                expected: 1
            }),
            5
        );
    }

    #[test]
    fn test_command_flow_exit_codes() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);

        let isolate = Command::Isolate {
            channel_id: 700_000_000_000_000_000,
            alias: Some("noisy".into()),
        };
        assert_eq!(execute(&config, &isolate), 0);
        // conflict on repeat
        assert_eq!(execute(&config, &isolate), 4);

        let add = Command::AddException {
            isolated_channel: 700_000_000_000_000_000,
            allowed_channel: 800,
            alias: None,
        };
        assert_eq!(execute(&config, &add), 0);
        assert_eq!(execute(&config, &add), 4);

        assert_eq!(execute(&config, &Command::List), 0);
        assert_eq!(
            execute(
                &config,
                &Command::Exceptions {
                    channel_id: 700_000_000_000_000_000
                }
            ),
            0
        );

        // unknown targets
        assert_eq!(execute(&config, &Command::Stop { channel_id: 42 }), 3);
        assert_eq!(
            execute(
                &config,
                &Command::Attempts {
                    session_id: 99,
                    limit: 50
                }
            ),
            3
        );
        assert_eq!(
            execute(
                &config,
                &Command::RemoveException {
                    isolated_channel: 700_000_000_000_000_000,
                    allowed_channel: 999
                }
            ),
            3
        );

        assert_eq!(
            execute(
                &config,
                &Command::Stop {
                    channel_id: 700_000_000_000_000_000
                }
            ),
            0
        );
        assert_eq!(execute(&config, &Command::History { channel: None }), 0);
        assert_eq!(execute(&config, &Command::Stats), 0);
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "1970-01-01 00:00");
        assert_eq!(format_ms_opt(None), "-");
    }
}
