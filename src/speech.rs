//! Continuous speech capture on top of the platform recognizer.
//!
//! One side listens at a time. Interim transcripts stream into that side's input field;
//! a final transcript is either submitted straight away (auto-send) or left in the field.
//! Recognizer sessions that end on their own are restarted, up to a cap.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Preferences, SpeechConfig};
use crate::session::Side;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    LanguageNotSupported,
    Other(String),
}

impl RecognitionError {
    /// Maps the platform's error code (`"no-speech"`, `"not-allowed"`, ...).
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => RecognitionError::NoSpeech,
            "aborted" => RecognitionError::Aborted,
            "audio-capture" => RecognitionError::AudioCapture,
            "network" => RecognitionError::Network,
            "not-allowed" => RecognitionError::NotAllowed,
            "service-not-allowed" => RecognitionError::ServiceNotAllowed,
            "language-not-supported" => RecognitionError::LanguageNotSupported,
            other => RecognitionError::Other(other.to_string()),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, RecognitionError::NoSpeech)
    }
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            RecognitionError::NoSpeech => "no-speech",
            RecognitionError::Aborted => "aborted",
            RecognitionError::AudioCapture => "audio-capture",
            RecognitionError::Network => "network",
            RecognitionError::NotAllowed => "not-allowed",
            RecognitionError::ServiceNotAllowed => "service-not-allowed",
            RecognitionError::LanguageNotSupported => "language-not-supported",
            RecognitionError::Other(code) => code,
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Result { transcript: String, is_final: bool },
    Error(RecognitionError),
    /// The recognizer session is over; no more events follow on this stream.
    End,
}

/// The platform speech recognizer, configured for continuous listening with interim
/// results.
pub trait SpeechRecognizer: Send + Sync {
    fn start(&self, language: &str) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, String>;
    fn stop(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("Speech recognition is unavailable: {0}")]
    Unavailable(String),
    #[error("Speech recognition error: {0}")]
    Recognition(RecognitionError),
    #[error("Speech recognition kept stopping, gave up after {0} restarts")]
    RestartLimit(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Interim { side: Side, text: String },
    /// Final transcript with auto-send off; it belongs in the input field.
    Final { side: Side, text: String },
    /// Final transcript with auto-send on; send it as a turn.
    Submit { side: Side, text: String },
    Notice(String),
    Failed { side: Side, error: SpeechError },
    Stopped { side: Side },
}

struct ActiveCapture {
    side: Side,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct SpeechCapture {
    recognizer: Arc<dyn SpeechRecognizer>,
    config: SpeechConfig,
    prefs: Arc<RwLock<Preferences>>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    active: tokio::sync::Mutex<Option<ActiveCapture>>,
    listening: Arc<Mutex<Option<Side>>>,
}

impl SpeechCapture {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        config: SpeechConfig,
        prefs: Arc<RwLock<Preferences>>,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let capture = Self {
            recognizer,
            config,
            prefs,
            events,
            active: tokio::sync::Mutex::new(None),
            listening: Arc::new(Mutex::new(None)),
        };
        (capture, rx)
    }

    /// The side currently listening, if any.
    pub fn active_side(&self) -> Option<Side> {
        *self.listening.lock().unwrap()
    }

    /// Starts listening for `side`, fully stopping the other side first.
    pub async fn start(&self, side: Side) -> Result<(), SpeechError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if current.side == side && !current.task.is_finished() {
                return Ok(());
            }
        }
        if let Some(previous) = active.take() {
            self.shutdown(previous).await;
        }

        let stream = self
            .recognizer
            .start(&self.config.language)
            .map_err(SpeechError::Unavailable)?;
        let cancel = CancellationToken::new();
        *self.listening.lock().unwrap() = Some(side);
        let worker = CaptureLoop {
            side,
            recognizer: self.recognizer.clone(),
            config: self.config.clone(),
            prefs: self.prefs.clone(),
            events: self.events.clone(),
            listening: self.listening.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(stream));
        *active = Some(ActiveCapture { side, cancel, task });
        tracing::info!(%side, "speech capture started");
        Ok(())
    }

    pub async fn stop(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            self.shutdown(previous).await;
        }
    }

    async fn shutdown(&self, capture: ActiveCapture) {
        capture.cancel.cancel();
        self.recognizer.stop();
        if let Err(e) = capture.task.await {
            tracing::warn!(error = %e, "speech capture task ended abnormally");
        }
        tracing::info!(side = %capture.side, "speech capture stopped");
    }
}

struct CaptureLoop {
    side: Side,
    recognizer: Arc<dyn SpeechRecognizer>,
    config: SpeechConfig,
    prefs: Arc<RwLock<Preferences>>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    listening: Arc<Mutex<Option<Side>>>,
    cancel: CancellationToken,
}

impl CaptureLoop {
    async fn run(self, mut stream: mpsc::UnboundedReceiver<RecognitionEvent>) {
        let mut restarts = 0u32;
        let mut interim = String::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = stream.recv() => event,
            };

            match event {
                Some(RecognitionEvent::Result {
                    transcript,
                    is_final: false,
                }) => {
                    restarts = 0;
                    interim = transcript.clone();
                    self.emit(CaptureEvent::Interim {
                        side: self.side,
                        text: transcript,
                    });
                }
                Some(RecognitionEvent::Result {
                    transcript,
                    is_final: true,
                }) => {
                    restarts = 0;
                    interim.clear();
                    self.finalize(&transcript);
                }
                Some(RecognitionEvent::Error(error)) if !error.is_fatal() => {
                    tracing::debug!(side = %self.side, %error, "transient recognition error");
                    self.emit(CaptureEvent::Notice(
                        "No speech detected, still listening".to_string(),
                    ));
                }
                Some(RecognitionEvent::Error(error)) => {
                    tracing::warn!(side = %self.side, %error, "speech recognition failed");
                    self.recognizer.stop();
                    self.emit(CaptureEvent::Failed {
                        side: self.side,
                        error: SpeechError::Recognition(error),
                    });
                    break;
                }
                Some(RecognitionEvent::End) | None => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    // Whatever was heard before the platform cut the session counts.
                    if !interim.trim().is_empty() {
                        let heard = std::mem::take(&mut interim);
                        self.finalize(&heard);
                        restarts = 0;
                    }
                    if restarts >= self.config.max_restarts {
                        tracing::warn!(side = %self.side, restarts, "giving up on speech capture");
                        self.emit(CaptureEvent::Failed {
                            side: self.side,
                            error: SpeechError::RestartLimit(restarts),
                        });
                        break;
                    }
                    restarts += 1;

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.restart_delay) => {}
                    }
                    match self.recognizer.start(&self.config.language) {
                        Ok(next) => {
                            tracing::debug!(side = %self.side, restarts, "speech recognizer restarted");
                            stream = next;
                        }
                        Err(reason) => {
                            self.emit(CaptureEvent::Failed {
                                side: self.side,
                                error: SpeechError::Unavailable(reason),
                            });
                            break;
                        }
                    }
                }
            }
        }

        {
            let mut listening = self.listening.lock().unwrap();
            if *listening == Some(self.side) {
                *listening = None;
            }
        }
        self.emit(CaptureEvent::Stopped { side: self.side });
    }

    fn finalize(&self, transcript: &str) {
        let text = transcript.trim();
        if text.is_empty() {
            return;
        }
        let auto_send = self.prefs.read().unwrap().auto_send;
        let event = if auto_send {
            CaptureEvent::Submit {
                side: self.side,
                text: text.to_string(),
            }
        } else {
            CaptureEvent::Final {
                side: self.side,
                text: text.to_string(),
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.events.send(event);
    }
}
