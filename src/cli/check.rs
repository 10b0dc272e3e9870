//! `meetrec check`: validate the configuration and the external tools
//! before a session is scheduled.

use anyhow::{bail, Result};

use crate::capture::{resolve_binary, AudioReadiness, PulseAudioReadiness};
use crate::config::{Config, StorageBackend};

pub async fn handle_check_command(config: &Config) -> Result<()> {
    let mut problems = 0;

    println!();
    println!("meetrec configuration check");
    println!("===========================");
    println!();

    let validation = if config.meeting.url.trim().is_empty() {
        println!("Meeting URL:  <not set, expected from MEETING_URL at run time>");
        config.validate_settings()
    } else {
        println!("Meeting URL:  {}", config.meeting.url);
        config.validate()
    };
    match validation {
        Ok(()) => println!("Settings:     ok"),
        Err(e) => {
            println!("Settings:     {}", e);
            problems += 1;
        }
    }

    println!("Bot name:     {}", config.meeting.bot_name);
    println!("Driver:       {}", config.meeting.client_url);
    println!(
        "Pause limit:  {} min (min recording {} min)",
        config.session.pause_timeout_minutes, config.session.min_recording_minutes
    );
    println!();

    let capture = &config.capture;
    let tools = [
        ("ffmpeg", capture.ffmpeg_path.as_deref()),
        ("ffprobe", capture.ffprobe_path.as_deref()),
        ("pactl", capture.pactl_path.as_deref()),
    ];
    for (name, configured) in tools {
        match resolve_binary(configured, name) {
            Ok(path) if path.exists() => println!("{:<13} {}", format!("{}:", name), path.display()),
            Ok(path) => {
                println!("{:<13} {} (missing)", format!("{}:", name), path.display());
                problems += 1;
            }
            Err(e) => {
                println!("{:<13} {}", format!("{}:", name), e);
                problems += 1;
            }
        }
    }

    if let Ok(pactl) = resolve_binary(capture.pactl_path.as_deref(), "pactl") {
        let readiness = PulseAudioReadiness::new(pactl, capture.audio_sink.clone());
        if readiness.is_ready().await {
            println!("Audio sink:   ready");
        } else {
            println!(
                "Audio sink:   not ready ({})",
                capture.audio_sink.as_deref().unwrap_or("any sink")
            );
        }
    }
    println!();

    println!("Recordings:   {}", config.recordings_dir()?.display());
    println!("Ledger:       {}", config.ledger_path()?.display());
    println!(
        "Storage:      {}",
        match config.storage.backend {
            StorageBackend::Http => config.storage.endpoint.clone().unwrap_or_default(),
            StorageBackend::Local => config.storage.local_dir.clone().unwrap_or_default(),
            StorageBackend::Disabled => "none (recording kept locally)".to_string(),
        }
    );
    if config.api.enabled {
        println!("Status API:   http://{}", config.api.bind);
    }
    println!();

    if problems > 0 {
        bail!("{} problem(s) found", problems);
    }
    println!("All checks passed.");
    Ok(())
}
