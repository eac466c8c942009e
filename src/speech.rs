//! Speech capture and playback.
//!
//! - [`SpeechToText`] pulls frames from an [`AudioSource`] into a
//!   [`Recognizer`] until the speaker goes quiet or a frame budget runs out.
//! - [`PlaybackWorker`] speaks queued text on a dedicated thread so callers
//!   never block on audio output.

use std::process::Command;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, warn};

use crate::config::SpeechConfig;
use crate::traits::{AudioSource, Recognizer, Speaker};

/// How long [`PlaybackWorker::stop`] waits for the worker to exit.
pub const STOP_WAIT: Duration = Duration::from_secs(1);

pub struct SpeechToText {
    time_limit: Duration,
    max_silent_frames: usize,
}

impl Default for SpeechToText {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeechToText {
    pub fn new(time_limit: Duration, max_silent_frames: usize) -> Self {
        Self {
            time_limit,
            max_silent_frames,
        }
    }

    /// Capture one utterance. Recognized fragments are joined with single
    /// spaces; any failure yields an empty string.
    ///
    /// The time limit restarts whenever a fragment is recognized, so capture
    /// ends after `time_limit` of silence or after the frame budget is spent.
    pub fn listen(&self, source: &mut dyn AudioSource, recognizer: &mut dyn Recognizer) -> String {
        match self.capture(source, recognizer) {
            Ok(text) => {
                debug!(text = %text, "speech recognized");
                text
            }
            Err(e) => {
                error!(error = %e, "speech recognition failed");
                String::new()
            }
        }
    }

    fn capture(&self, source: &mut dyn AudioSource, recognizer: &mut dyn Recognizer) -> Result<String> {
        let mut started = Instant::now();
        let mut unrecognized = 0;
        let mut fragments: Vec<String> = Vec::new();

        while started.elapsed() < self.time_limit && unrecognized < self.max_silent_frames {
            let Some(frame) = source.read_frame()? else {
                break;
            };
            match recognizer.accept(&frame)? {
                Some(text) => {
                    push_fragment(&mut fragments, &text);
                    started = Instant::now();
                }
                None => unrecognized += 1,
            }
        }

        push_fragment(&mut fragments, &recognizer.finish()?);
        Ok(fragments.join(" "))
    }
}

fn push_fragment(fragments: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        fragments.push(text.to_string());
    }
}

enum PlaybackCommand {
    Speak(String),
    Stop,
}

/// Background text-to-speech queue.
pub struct PlaybackWorker {
    queue: mpsc::Sender<PlaybackCommand>,
    finished: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackWorker {
    pub fn spawn(mut speaker: Box<dyn Speaker>) -> Result<Self> {
        let (queue, commands) = mpsc::channel::<PlaybackCommand>();
        let (done, finished) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                for command in commands {
                    match command {
                        PlaybackCommand::Speak(text) => {
                            if let Err(e) = speaker.speak(&text) {
                                error!(error = %e, "playback failed");
                            }
                        }
                        PlaybackCommand::Stop => break,
                    }
                }
                let _ = done.send(());
            })
            .context("Failed to start playback thread")?;

        Ok(Self {
            queue,
            finished,
            handle: Some(handle),
        })
    }

    /// Queue `text` for playback. Empty text is ignored. Returns whether
    /// the text was queued.
    pub fn play(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        self.queue
            .send(PlaybackCommand::Speak(text.to_string()))
            .is_ok()
    }

    /// Ask the worker to exit after the queued text and wait at most
    /// [`STOP_WAIT`]. Returns whether it exited in time; otherwise the
    /// thread is left to finish on its own.
    pub fn stop(mut self) -> bool {
        let _ = self.queue.send(PlaybackCommand::Stop);
        match self.finished.recv_timeout(STOP_WAIT) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("playback worker did not stop in time");
                false
            }
        }
    }
}

/// Speaks through an external program such as `espeak` or `say`; the text
/// is passed as the last argument.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }

    pub fn from_config(config: &SpeechConfig) -> Option<Self> {
        config
            .is_enabled()
            .then(|| Self::new(config.command.trim(), &config.args))
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&mut self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .status()
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}
