//! FFmpeg screen + audio capture launcher.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use super::process::{failure_matcher, CaptureError, CaptureProcess, ChildCapture};
use crate::config::CaptureConfig;

/// Starts one capture process per segment.
pub trait CaptureLauncher: Send + Sync {
    fn launch(&self, target: &Path) -> Result<Box<dyn CaptureProcess>, CaptureError>;
}

/// Resolve a tool binary: explicit path from config, else `PATH` lookup.
pub fn resolve_binary(configured: Option<&str>, name: &str) -> Result<PathBuf, CaptureError> {
    match configured {
        Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => which::which(name).map_err(|_| CaptureError::MissingBinary(name.to_string())),
    }
}

pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
    settings: CaptureConfig,
    keywords: Arc<Regex>,
}

impl FfmpegLauncher {
    pub fn new(settings: &CaptureConfig) -> Result<Self, CaptureError> {
        let ffmpeg = resolve_binary(settings.ffmpeg_path.as_deref(), "ffmpeg")?;
        let keywords = Arc::new(failure_matcher(&settings.failure_keywords)?);
        info!("Using ffmpeg at {:?}", ffmpeg);

        Ok(Self {
            ffmpeg,
            settings: settings.clone(),
            keywords,
        })
    }

    pub fn args(&self, target: &Path) -> Vec<String> {
        let s = &self.settings;
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostats".into(),
            "-loglevel".into(),
            "warning".into(),
            "-y".into(),
            // Video input
            "-thread_queue_size".into(),
            "1024".into(),
            "-f".into(),
            s.video_format.clone(),
        ];

        if !s.video_size.is_empty() {
            args.push("-video_size".into());
            args.push(s.video_size.clone());
        }

        args.extend([
            "-framerate".into(),
            s.framerate.to_string(),
            "-i".into(),
            s.video_source.clone(),
            // Audio input
            "-thread_queue_size".into(),
            "1024".into(),
            "-f".into(),
            s.audio_format.clone(),
            "-i".into(),
            s.audio_source.clone(),
            // Encoding
            "-c:v".into(),
            s.video_codec.clone(),
            "-preset".into(),
            s.video_preset.clone(),
            "-crf".into(),
            s.crf.to_string(),
            "-pix_fmt".into(),
            s.pixel_format.clone(),
            "-c:a".into(),
            s.audio_codec.clone(),
            "-b:a".into(),
            s.audio_bitrate.clone(),
        ]);

        args.push(target.to_string_lossy().into_owned());
        args
    }
}

impl CaptureLauncher for FfmpegLauncher {
    fn launch(&self, target: &Path) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        let args = self.args(target);
        debug!("Spawning {:?} {}", self.ffmpeg, args.join(" "));

        let mut command = Command::new(&self.ffmpeg);
        command.args(&args);

        let process = ChildCapture::spawn(command, self.keywords.clone())?;
        Ok(Box::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher() -> FfmpegLauncher {
        let settings = CaptureConfig {
            ffmpeg_path: Some("/usr/bin/ffmpeg".to_string()),
            ..CaptureConfig::default()
        };
        FfmpegLauncher::new(&settings).unwrap()
    }

    #[test]
    fn test_configured_binary_is_used_verbatim() {
        let path = resolve_binary(Some("/opt/ffmpeg/bin/ffmpeg"), "ffmpeg").unwrap();
        assert_eq!(path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn test_missing_binary_reported() {
        let err = resolve_binary(None, "definitely-not-a-real-binary-name").unwrap_err();
        assert!(matches!(err, CaptureError::MissingBinary(name) if name == "definitely-not-a-real-binary-name"));
    }

    #[test]
    fn test_args_capture_screen_and_audio_into_target() {
        let args = launcher().args(Path::new("/recordings/segment-001.mp4"));

        assert_eq!(args.last().map(String::as_str), Some("/recordings/segment-001.mp4"));

        let joined = args.join(" ");
        assert!(joined.contains("-f x11grab -video_size 1280x720 -framerate 25 -i :99.0"));
        assert!(joined.contains("-f pulse -i default"));
        assert!(joined.contains("-c:v libx264 -preset veryfast -crf 23 -pix_fmt yuv420p"));
        assert!(joined.contains("-c:a aac -b:a 128k"));
    }

    #[test]
    fn test_empty_video_size_is_omitted() {
        let settings = CaptureConfig {
            ffmpeg_path: Some("/usr/bin/ffmpeg".to_string()),
            video_size: String::new(),
            ..CaptureConfig::default()
        };
        let args = FfmpegLauncher::new(&settings)
            .unwrap()
            .args(Path::new("/tmp/out.mp4"));
        assert!(!args.iter().any(|a| a == "-video_size"));
    }
}
