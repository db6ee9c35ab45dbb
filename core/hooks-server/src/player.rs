//! Audio playback through an external player process.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::HandlerError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioPlayer {
    /// Custom command line (`mpv --no-video`); the file path is appended.
    custom: Option<String>,
}

impl AudioPlayer {
    pub fn new(custom: Option<String>) -> Self {
        Self {
            custom: custom.filter(|c| !c.trim().is_empty()),
        }
    }

    /// Program and arguments used to play `path` at `volume` (0.0..=1.0).
    pub fn command_line(&self, path: &Path, volume: f32) -> (String, Vec<String>) {
        let volume = volume.clamp(0.0, 1.0);
        let file = path.display().to_string();

        if let Some(custom) = &self.custom {
            let mut parts = custom.split_whitespace().map(str::to_string);
            let program = parts.next().unwrap_or_default();
            let mut args: Vec<String> = parts.collect();
            args.push(file);
            return (program, args);
        }

        if cfg!(target_os = "macos") {
            (
                "afplay".to_string(),
                vec!["-v".to_string(), format!("{:.2}", volume), file],
            )
        } else {
            (
                "ffplay".to_string(),
                vec![
                    "-nodisp".to_string(),
                    "-autoexit".to_string(),
                    "-loglevel".to_string(),
                    "quiet".to_string(),
                    "-volume".to_string(),
                    ((volume * 100.0).round() as u32).to_string(),
                    file,
                ],
            )
        }
    }

    /// Plays the file and waits for the player to exit.
    pub async fn play(&self, path: &Path, volume: f32) -> Result<(), HandlerError> {
        let (program, args) = self.command_line(path, volume);
        debug!(player = %program, file = %path.display(), volume, "Playing audio");

        let status = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| HandlerError::PlayerSpawn {
                player: program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(HandlerError::PlayerFailed {
                player: program,
                status: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn custom_player_appends_file() {
        let player = AudioPlayer::new(Some("mpv --no-video".to_string()));
        let (program, args) = player.command_line(&PathBuf::from("/tmp/a.mp3"), 0.3);
        assert_eq!(program, "mpv");
        assert_eq!(args, vec!["--no-video".to_string(), "/tmp/a.mp3".to_string()]);
    }

    #[test]
    fn default_player_scales_volume() {
        let player = AudioPlayer::new(Some("   ".to_string()));
        let (program, args) = player.command_line(&PathBuf::from("/tmp/a.mp3"), 1.7);
        if cfg!(target_os = "macos") {
            assert_eq!(program, "afplay");
            assert_eq!(args[1], "1.00");
        } else {
            assert_eq!(program, "ffplay");
            assert!(args.windows(2).any(|w| w[0] == "-volume" && w[1] == "100"));
        }
        assert_eq!(args.last().map(String::as_str), Some("/tmp/a.mp3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_player_exit_status() {
        let ok = AudioPlayer::new(Some("true".to_string()));
        assert!(ok.play(Path::new("/dev/null"), 0.5).await.is_ok());

        let failing = AudioPlayer::new(Some("false".to_string()));
        assert!(matches!(
            failing.play(Path::new("/dev/null"), 0.5).await,
            Err(HandlerError::PlayerFailed { .. })
        ));

        let missing = AudioPlayer::new(Some("definitely-not-a-player".to_string()));
        assert!(matches!(
            missing.play(Path::new("/dev/null"), 0.5).await,
            Err(HandlerError::PlayerSpawn { .. })
        ));
    }
}
