use anyhow::{anyhow, Result};

use super::args::SessionsCliArgs;
use crate::config::Config;
use crate::db::{init_db, SessionRepository};

pub fn handle_sessions_command(args: SessionsCliArgs, config: &Config) -> Result<()> {
    let conn = init_db(&config.ledger_path()?)?;

    if let Some(id) = args.id {
        let session = SessionRepository::get(&conn, &id)?
            .ok_or_else(|| anyhow!("Session {} not found", id))?;
        let segments = SessionRepository::segments(&conn, &id)?;

        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "session": session,
                    "segments": segments,
                }))?
            );
            return Ok(());
        }

        println!("Session:  {}", session.id);
        println!("Meeting:  {}", session.meeting_url);
        println!("State:    {}", session.state);
        println!("Started:  {}", session.started_at);
        println!("Ended:    {}", session.ended_at.as_deref().unwrap_or("-"));
        if let Some(path) = &session.artifact_path {
            println!(
                "Artifact: {} ({} bytes, {}s)",
                path,
                session.artifact_bytes.unwrap_or(0),
                session.artifact_seconds.unwrap_or(0)
            );
        }
        if let Some(key) = &session.upload_key {
            println!("Uploaded: {}", key);
        }
        if let Some(error) = &session.error {
            println!("Error:    {}", error);
        }
        println!();
        for segment in segments {
            println!(
                "  #{:03} {:<15} {} -> {}{}",
                segment.index,
                segment.status,
                segment.started_at,
                segment.ended_at.as_deref().unwrap_or("-"),
                segment
                    .failure
                    .map(|f| format!("  ({})", f))
                    .unwrap_or_default()
            );
        }
        return Ok(());
    }

    let sessions = SessionRepository::list(&conn, args.limit)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!("Found {} session(s):\n", sessions.len());
    for session in sessions {
        println!("ID:      {}", session.id);
        println!("Started: {}", session.started_at);
        println!("State:   {}", session.state);
        println!("Meeting: {}", session.meeting_url);
        if let Some(error) = &session.error {
            println!("Error:   {}", error);
        }
        println!("---");
    }

    println!("\nTo see segments, use: meetrec sessions --id <ID>");

    Ok(())
}
