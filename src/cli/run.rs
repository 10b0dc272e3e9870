//! `meetrec run`: record one meeting and print the session report.

use anyhow::Result;

use crate::app;
use crate::cli::RunCliArgs;
use crate::config::Config;
use crate::session::{SessionReport, UploadStatus};

/// Returns whether the session succeeded, so the caller can pick an exit code.
pub async fn handle_run_command(args: RunCliArgs, mut config: Config) -> Result<bool> {
    config.apply_overrides(args.overrides());
    config.validate()?;

    let report = app::run_session(&config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(report.succeeded())
}

fn print_report(report: &SessionReport) {
    println!();
    println!("Session {}", report.session_id);
    println!("  State:     {}", report.state.as_str());
    println!(
        "  Segments:  {} ({} failed)",
        report.segments, report.failed_segments
    );

    match &report.artifact {
        Some(artifact) => println!(
            "  Artifact:  {} ({:.1} MiB, {}s)",
            artifact.path.display(),
            artifact.size_bytes as f64 / (1024.0 * 1024.0),
            artifact.duration.as_secs()
        ),
        None => println!("  Artifact:  none"),
    }

    let upload = match &report.upload {
        UploadStatus::NotAttempted => "not attempted".to_string(),
        UploadStatus::Uploaded { key } => format!("uploaded as {}", key),
        UploadStatus::KeptLocal => "kept locally".to_string(),
        UploadStatus::Rejected { reason } => format!("rejected: {}", reason),
        UploadStatus::Failed { reason } => format!("failed: {}", reason),
    };
    println!("  Upload:    {}", upload);

    if let Some(err) = &report.merge_error {
        println!("  Merge:     {}", err);
    }
    if let Some(err) = &report.error {
        println!("  Error:     {}", err);
    }
}
