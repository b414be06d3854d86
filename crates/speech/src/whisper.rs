//! Chunk-basierte Transkription gegen `/audio/transcriptions`
//!
//! Eingehendes PCM (16 kHz, mono, s16le) wird gepuffert und in Abschnitten
//! fester Laenge als WAV hochgeladen. Ein Worker pro Sitzung arbeitet die
//! Abschnitte nacheinander ab, damit die Ereignisse in Audio-Reihenfolge
//! ankommen. Jeder nicht-leere Abschnitt wird ein `Final`-Ereignis.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{SpeechError, SpeechResult};
use crate::transcription::{AudioSink, TranscriptEvent, TranscriptionBackend};

pub const SAMPLE_RATE: u32 = 16_000;
const BYTES_PRO_SAMPLE: usize = 2;

/// Kuerzere Reste werden beim Schliessen verworfen (0,1 s)
const MIN_REST_BYTES: usize = (SAMPLE_RATE as usize / 10) * BYTES_PRO_SAMPLE;

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Basis-URL einer OpenAI-kompatiblen API (ohne `/audio/transcriptions`)
    pub base_url: String,
    pub api_key: String,
    pub modell: String,
    /// Sprache des Hosts (ISO-639-1), `None` = automatisch erkennen
    pub sprache: Option<String>,
    /// Laenge eines hochgeladenen Abschnitts
    pub chunk_dauer: Duration,
    pub timeout: Duration,
    /// Wartende Abschnitte pro Sitzung, bevor `audio_senden` blockiert
    pub warteschlange: usize,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            modell: "whisper-1".to_string(),
            sprache: None,
            chunk_dauer: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
            warteschlange: 8,
        }
    }
}

impl WhisperConfig {
    fn chunk_bytes(&self) -> usize {
        let samples = (SAMPLE_RATE as f64 * self.chunk_dauer.as_secs_f64()) as usize;
        samples.max(1) * BYTES_PRO_SAMPLE
    }
}

/// Transkriptions-Backend fuer Whisper-kompatible Endpunkte
pub struct WhisperBackend {
    client: reqwest::Client,
    config: Arc<WhisperConfig>,
}

impl WhisperBackend {
    pub fn neu(config: WhisperConfig) -> SpeechResult<Self> {
        if config.api_key.is_empty() {
            return Err(SpeechError::NichtKonfiguriert(
                "API-Key fuer Transkription fehlt".into(),
            ));
        }
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    async fn sitzung_oeffnen(
        &self,
        ereignisse: mpsc::Sender<TranscriptEvent>,
    ) -> SpeechResult<Box<dyn AudioSink>> {
        ereignisse
            .send(TranscriptEvent::Geoeffnet)
            .await
            .map_err(|_| SpeechError::SitzungGeschlossen)?;

        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.warteschlange.max(1));
        let worker = tokio::spawn(chunk_worker(
            self.client.clone(),
            Arc::clone(&self.config),
            chunk_rx,
            ereignisse,
        ));

        Ok(Box::new(WhisperSink {
            puffer: Vec::new(),
            chunk_bytes: self.config.chunk_bytes(),
            chunk_tx: Some(chunk_tx),
            worker: Some(worker),
        }))
    }
}

struct WhisperSink {
    puffer: Vec<u8>,
    chunk_bytes: usize,
    chunk_tx: Option<mpsc::Sender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
}

#[async_trait]
impl AudioSink for WhisperSink {
    async fn audio_senden(&mut self, chunk: Bytes) -> SpeechResult<()> {
        let Some(tx) = &self.chunk_tx else {
            return Err(SpeechError::SitzungGeschlossen);
        };

        self.puffer.extend_from_slice(&chunk);
        while self.puffer.len() >= self.chunk_bytes {
            let rest = self.puffer.split_off(self.chunk_bytes);
            let abschnitt = std::mem::replace(&mut self.puffer, rest);
            tx.send(abschnitt)
                .await
                .map_err(|_| SpeechError::SitzungGeschlossen)?;
        }
        Ok(())
    }

    async fn schliessen(&mut self) -> SpeechResult<()> {
        let Some(tx) = self.chunk_tx.take() else {
            return Ok(());
        };

        let rest = std::mem::take(&mut self.puffer);
        if rest.len() >= MIN_REST_BYTES {
            let _ = tx.send(rest).await;
        }
        drop(tx);

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Transkriptions-Worker abgebrochen: {}", e);
            }
        }
        Ok(())
    }
}

/// Arbeitet die Abschnitte einer Sitzung der Reihe nach ab
async fn chunk_worker(
    client: reqwest::Client,
    config: Arc<WhisperConfig>,
    mut abschnitte: mpsc::Receiver<Vec<u8>>,
    ereignisse: mpsc::Sender<TranscriptEvent>,
) {
    while let Some(pcm) = abschnitte.recv().await {
        let ereignis = match abschnitt_transkribieren(&client, &config, &pcm).await {
            Ok(Some((text, confidence))) => TranscriptEvent::Final { text, confidence },
            Ok(None) => {
                tracing::trace!("Abschnitt ohne Sprache");
                continue;
            }
            Err(e) => {
                tracing::warn!("Transkription fehlgeschlagen: {}", e);
                TranscriptEvent::Fehler(e.to_string())
            }
        };
        if ereignisse.send(ereignis).await.is_err() {
            tracing::debug!("Ereignis-Empfaenger geschlossen, Worker endet");
            return;
        }
    }
    let _ = ereignisse.send(TranscriptEvent::Geschlossen).await;
}

#[derive(Deserialize)]
struct WhisperAntwort {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Deserialize)]
struct WhisperSegment {
    avg_logprob: f64,
}

async fn abschnitt_transkribieren(
    client: &reqwest::Client,
    config: &WhisperConfig,
    pcm: &[u8],
) -> SpeechResult<Option<(String, f64)>> {
    let wav = wav_erzeugen(pcm, SAMPLE_RATE, 1);
    let dauer_ms = (pcm.len() / BYTES_PRO_SAMPLE) as u64 * 1000 / SAMPLE_RATE as u64;
    tracing::debug!(dauer_ms, "Sende Audio-Abschnitt zur Transkription");

    let datei = reqwest::multipart::Part::bytes(wav)
        .file_name("audio.wav")
        .mime_str("audio/wav")?;
    let mut formular = reqwest::multipart::Form::new()
        .part("file", datei)
        .text("model", config.modell.clone())
        .text("response_format", "verbose_json");
    if let Some(sprache) = &config.sprache {
        formular = formular.text("language", sprache.clone());
    }

    let url = format!(
        "{}/audio/transcriptions",
        config.base_url.trim_end_matches('/')
    );
    let res = client
        .post(&url)
        .bearer_auth(&config.api_key)
        .multipart(formular)
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

    let antwort: WhisperAntwort = res.json().await?;
    Ok(antwort_auswerten(antwort))
}

/// Leerer Text ergibt kein Ereignis
fn antwort_auswerten(antwort: WhisperAntwort) -> Option<(String, f64)> {
    let text = antwort.text.trim();
    if text.is_empty() {
        return None;
    }
    Some((text.to_string(), konfidenz(&antwort.segments)))
}

/// `exp(mittlere avg_logprob)`, begrenzt auf [0, 1]; ohne Segmente 1.0
fn konfidenz(segmente: &[WhisperSegment]) -> f64 {
    if segmente.is_empty() {
        return 1.0;
    }
    let mittel = segmente.iter().map(|s| s.avg_logprob).sum::<f64>() / segmente.len() as f64;
    mittel.exp().clamp(0.0, 1.0)
}

/// Baut eine WAV-Datei aus PCM-Daten (s16le)
pub fn wav_erzeugen(pcm_le: &[u8], sample_rate: u32, kanaele: u16) -> Vec<u8> {
    // Ungerades Rest-Byte ist kein vollstaendiges Sample
    let daten = &pcm_le[..pcm_le.len() & !1];
    let daten_laenge = daten.len() as u32;
    let block_align = kanaele * BYTES_PRO_SAMPLE as u16;

    let mut wav = Vec::with_capacity(44 + daten.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + daten_laenge).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&kanaele.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&daten_laenge.to_le_bytes());
    wav.extend_from_slice(daten);
    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header() {
        let pcm = [0x01u8, 0x00, 0xff, 0x7f, 0x42];
        let wav = wav_erzeugen(&pcm, SAMPLE_RATE, 1);

        assert_eq!(wav.len(), 44 + 4);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 4);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16_000);
        // Byte-Rate = 16000 * 2
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 32_000);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 4);
        assert_eq!(&wav[44..], &pcm[..4]);
    }

    #[test]
    fn konfidenz_aus_logprob() {
        let segmente = vec![
            WhisperSegment { avg_logprob: -0.2 },
            WhisperSegment { avg_logprob: -0.4 },
        ];
        let k = konfidenz(&segmente);
        assert!((k - (-0.3f64).exp()).abs() < 1e-9);
        assert_eq!(konfidenz(&[]), 1.0);
    }

    #[test]
    fn leerer_text_ergibt_kein_ereignis() {
        let antwort: WhisperAntwort =
            serde_json::from_str(r#"{"text":"  ","segments":[]}"#).unwrap();
        assert!(antwort_auswerten(antwort).is_none());

        let antwort: WhisperAntwort =
            serde_json::from_str(r#"{"text":" hello world ","language":"english"}"#).unwrap();
        assert_eq!(
            antwort_auswerten(antwort),
            Some(("hello world".to_string(), 1.0))
        );
    }

    #[test]
    fn chunk_groesse() {
        let config = WhisperConfig::default();
        assert_eq!(config.chunk_bytes(), 3 * 16_000 * 2);
    }

    #[test]
    fn ohne_api_key_nicht_konfiguriert() {
        assert!(matches!(
            WhisperBackend::neu(WhisperConfig::default()),
            Err(SpeechError::NichtKonfiguriert(_))
        ));
    }

    #[tokio::test]
    async fn unerreichbarer_dienst_meldet_fehler_pro_abschnitt() {
        let backend = WhisperBackend::neu(WhisperConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: "test".into(),
            chunk_dauer: Duration::from_millis(100),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = backend.sitzung_oeffnen(tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(TranscriptEvent::Geoeffnet));

        // 0,25 s -> zwei volle Abschnitte, Rest zu kurz
        sink.audio_senden(Bytes::from(vec![0u8; 8_000])).await.unwrap();
        sink.schliessen().await.unwrap();
        assert!(matches!(
            sink.audio_senden(Bytes::from_static(&[0, 0])).await,
            Err(SpeechError::SitzungGeschlossen)
        ));

        let mut ereignisse = Vec::new();
        while let Some(e) = rx.recv().await {
            ereignisse.push(e);
        }
        assert_eq!(ereignisse.len(), 3);
        assert!(matches!(ereignisse[0], TranscriptEvent::Fehler(_)));
        assert!(matches!(ereignisse[1], TranscriptEvent::Fehler(_)));
        assert_eq!(ereignisse[2], TranscriptEvent::Geschlossen);
    }
}
