//! Uebersetzungs-Schnittstelle und OpenAI-Chat-Implementierung

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::{SpeechError, SpeechResult};

/// Uebersetzungsdienst: `text, zielsprache -> uebersetzung`
///
/// Kein Retry; ein Fehler wird an den Aufrufer durchgereicht.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn uebersetzen(&self, text: &str, zielsprache: &str) -> SpeechResult<String>;
}

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Basis-URL einer OpenAI-kompatiblen API (ohne `/chat/completions`)
    pub base_url: String,
    pub api_key: String,
    pub modell: String,
    pub timeout: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            modell: "gpt-4-turbo-preview".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Baut den Prompt fuer eine Uebersetzung
pub fn uebersetzungs_prompt(text: &str, zielsprache: &str) -> String {
    format!(
        "Translate the following sentence into {zielsprache}, return ONLY the translation, nothing else.\n\nSentence: {text}"
    )
}

/// Uebersetzer gegen `/chat/completions`
pub struct OpenAiTranslator {
    client: reqwest::Client,
    config: TranslatorConfig,
}

impl OpenAiTranslator {
    pub fn neu(config: TranslatorConfig) -> SpeechResult<Self> {
        if config.api_key.is_empty() {
            return Err(SpeechError::NichtKonfiguriert(
                "API-Key fuer Uebersetzung fehlt".into(),
            ));
        }
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[derive(Deserialize)]
struct ChatAntwort {
    choices: Vec<ChatAuswahl>,
}

#[derive(Deserialize)]
struct ChatAuswahl {
    message: ChatNachricht,
}

#[derive(Deserialize)]
struct ChatNachricht {
    content: Option<String>,
}

/// Extrahiert den Text der ersten Antwort
fn antwort_text(antwort: ChatAntwort) -> SpeechResult<String> {
    antwort
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .ok_or_else(|| SpeechError::ungueltige_antwort("Antwort ohne Inhalt"))
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn uebersetzen(&self, text: &str, zielsprache: &str) -> SpeechResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.modell,
            "temperature": 0.0,
            "messages": [
                { "role": "user", "content": uebersetzungs_prompt(text, zielsprache) }
            ],
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let nachricht = res.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                status: status.as_u16(),
                nachricht,
            });
        }

        let antwort: ChatAntwort = res.json().await?;
        let uebersetzung = antwort_text(antwort)?;
        tracing::debug!(zielsprache, laenge = uebersetzung.len(), "Uebersetzung erhalten");
        Ok(uebersetzung)
    }
}
