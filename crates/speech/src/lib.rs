//! dolmetscher-speech – Sprachdienste
//!
//! Schnittstellen zu den externen Kollaborateuren:
//! - [`TranscriptionBackend`]: nimmt einen Audio-Strom entgegen und liefert
//!   asynchron [`TranscriptEvent`]s ueber einen Channel
//! - [`Translator`]: `text, zielsprache -> uebersetzung`
//!
//! Dazu je eine Implementierung gegen OpenAI-kompatible HTTP-APIs.

pub mod error;
pub mod transcription;
pub mod translation;
pub mod whisper;

pub use error::{SpeechError, SpeechResult};
pub use transcription::{AudioSink, TranscriptEvent, TranscriptionBackend};
pub use translation::{OpenAiTranslator, TranslatorConfig, Translator};
pub use whisper::{WhisperBackend, WhisperConfig};
