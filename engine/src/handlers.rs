//! Command handlers for CLI operations
//!
//! - config show / path: print the resolved configuration or its location
//! - history: recent fragments of a session
//! - sessions: sessions an actor was active in
//! - actors: known actors, optionally filtered by name

use anyhow::{Context, Result};
use sdk::store::{ActorStore, FragmentStore};
use sdk::types::Id;
use serde_json::json;

use crate::config::Config;
use crate::db::{Database, FragmentTable};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Accept either a UUID or a name mapped to its stable id
pub fn parse_id_arg(raw: &str) -> Id {
    raw.parse().unwrap_or_else(|_| Id::from_name(raw))
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

/// Print the resolved configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
            println!("{}", text);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}

/// Show the most recent fragments of a session, newest first
pub async fn handle_history(
    session: &str,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let session_id = parse_id_arg(session);
    let database = open_database(config).await?;
    let fragments = database.fragments(FragmentTable::Interactions, config.cache.to_cache_config());

    let history = fragments
        .get_by_session(session_id, limit)
        .await
        .context("Failed to fetch session history")?;

    match format {
        OutputFormat::Text => {
            if history.is_empty() {
                println!("No fragments in session {}", session_id);
            } else {
                println!("Session {} (last {} fragments):", session_id, limit);
                println!();
                for fragment in &history {
                    let created = fragment
                        .created_at
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    println!("[{}] {}: {}", created, fragment.actor_id, fragment.content);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "session_id": session_id,
                "fragments": history,
                "count": history.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// Show the sessions an actor was most recently active in
pub async fn handle_sessions(
    actor: &str,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let actor_id = parse_id_arg(actor);
    let database = open_database(config).await?;
    let fragments = database.fragments(FragmentTable::Interactions, config.cache.to_cache_config());

    let sessions = fragments
        .sessions_for_actor(actor_id, limit)
        .await
        .context("Failed to fetch sessions")?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions for actor {}", actor_id);
            } else {
                for session in &sessions {
                    println!(
                        "{}  last active {}  ({} fragments)",
                        session.session_id,
                        session.last_active.format("%Y-%m-%d %H:%M:%S"),
                        session.fragments
                    );
                }
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = sessions
                .iter()
                .map(|s| {
                    json!({
                        "session_id": s.session_id,
                        "last_active": s.last_active,
                        "fragments": s.fragments
                    })
                })
                .collect();
            let output = json!({ "actor_id": actor_id, "sessions": entries });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// List known actors, optionally filtered by name
pub async fn handle_actors(
    query: Option<&str>,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let store = database.actors();

    let actors = match query {
        Some(query) => store.search(query, limit).await,
        None => store.list(limit).await,
    }
    .context("Failed to fetch actors")?;

    match format {
        OutputFormat::Text => {
            if actors.is_empty() {
                println!("No actors found");
            }
            for actor in &actors {
                let marker = if actor.assistant { " (assistant)" } else { "" };
                println!("{}  {}{}", actor.id, actor.name, marker);
            }
        }
        OutputFormat::Json => {
            let output = json!({ "actors": actors, "count": actors.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_arg() {
        let id = Id::new();
        assert_eq!(parse_id_arg(&id.to_string()), id);
        assert_eq!(parse_id_arg("general"), Id::from_name("general"));
    }
}
