//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist. API-Keys fallen auf `OPENAI_API_KEY` zurueck.

use dolmetscher_observability::logging::{log_format_gueltig, log_level_gueltig};
use dolmetscher_rooms::RegistryConfig;
use dolmetscher_signaling::{SessionConfig, SignalingConfig, SweeperConfig};
use dolmetscher_speech::{TranslatorConfig, WhisperConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerEinstellungen,
    pub netzwerk: NetzwerkEinstellungen,
    pub raeume: RaumEinstellungen,
    pub liveness: LivenessEinstellungen,
    pub audio: AudioEinstellungen,
    pub transkription: DienstEinstellungen,
    pub uebersetzung: DienstEinstellungen,
    pub logging: LoggingEinstellungen,
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename (nur fuer Logs)
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Dolmetscher".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// Port fuer REST, WebSocket, `/health` und `/metrics`
    pub port: u16,
    /// CORS-Origins (leer = alle erlaubt)
    pub cors_origins: Vec<String>,
    /// Groesse der Send-Queue pro Client
    pub send_queue: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec![],
            send_queue: 64,
        }
    }
}

/// Raum-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaumEinstellungen {
    pub code_laenge: usize,
    /// Maximale Gaeste pro Raum (Host zaehlt nicht mit)
    pub max_teilnehmer: usize,
}

impl Default for RaumEinstellungen {
    fn default() -> Self {
        let standard = RegistryConfig::default();
        Self {
            code_laenge: standard.code_laenge,
            max_teilnehmer: standard.max_teilnehmer,
        }
    }
}

/// Keepalive und Liveness-Bereinigung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessEinstellungen {
    /// Ping nach so vielen Sekunden ohne eingehende Nachricht
    pub keepalive_sek: u64,
    /// Verbindung trennen nach so vielen Sekunden ohne eingehende Nachricht
    pub verbindungs_timeout_sek: u64,
    pub sweep_intervall_sek: u64,
    /// Teilnehmer ohne Lebenszeichen laenger als diese Schwelle werden entfernt
    pub inaktiv_schwelle_sek: u64,
    pub raum_bereinigung_intervall_sek: u64,
    /// Inaktive Raeume werden nach diesem Alter geloescht
    pub max_raum_alter_stunden: u64,
}

impl Default for LivenessEinstellungen {
    fn default() -> Self {
        Self {
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            sweep_intervall_sek: 30,
            inaktiv_schwelle_sek: 120,
            raum_bereinigung_intervall_sek: 3600,
            max_raum_alter_stunden: 24,
        }
    }
}

/// Audio vom Host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Maximal wartende Audio-Chunks pro Host-Sitzung
    pub queue_groesse: usize,
    /// Laenge eines Transkriptions-Abschnitts in Sekunden
    pub chunk_dauer_sek: u64,
    /// Sprache des Hosts (ISO-639-1); leer = automatische Erkennung
    pub sprache: Option<String>,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            queue_groesse: 256,
            chunk_dauer_sek: 3,
            sprache: None,
        }
    }
}

/// Anbindung an einen OpenAI-kompatiblen Dienst
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DienstEinstellungen {
    pub base_url: String,
    /// Leer = `OPENAI_API_KEY`
    pub api_key: Option<String>,
    /// Leer = Standardmodell des Dienstes
    pub modell: Option<String>,
    pub timeout_sek: u64,
}

impl Default for DienstEinstellungen {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            modell: None,
            timeout_sek: 30,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// `/metrics` und `/health` bereitstellen
    pub aktiviert: bool,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self { aktiviert: true }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Werte, die serde allein nicht ausschliesst
    pub fn validieren(&self) -> anyhow::Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!("Ungueltiges Log-Level: {}", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Ungueltiges Log-Format: {}", self.logging.format);
        }
        if self.raeume.code_laenge == 0 || self.raeume.max_teilnehmer == 0 {
            anyhow::bail!("raeume.code_laenge und raeume.max_teilnehmer muessen > 0 sein");
        }
        let l = &self.liveness;
        if l.keepalive_sek == 0 || l.sweep_intervall_sek == 0 || l.raum_bereinigung_intervall_sek == 0 {
            anyhow::bail!("Liveness-Intervalle muessen > 0 sein");
        }
        if l.verbindungs_timeout_sek <= l.keepalive_sek {
            anyhow::bail!("liveness.verbindungs_timeout_sek muss groesser als keepalive_sek sein");
        }
        if self.audio.chunk_dauer_sek == 0 || self.audio.queue_groesse == 0 {
            anyhow::bail!("audio.chunk_dauer_sek und audio.queue_groesse muessen > 0 sein");
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse zurueck
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            code_laenge: self.raeume.code_laenge,
            max_teilnehmer: self.raeume.max_teilnehmer,
        }
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            keepalive_sek: self.liveness.keepalive_sek,
            verbindungs_timeout_sek: self.liveness.verbindungs_timeout_sek,
            send_queue: self.netzwerk.send_queue,
            session: SessionConfig {
                audio_queue: self.audio.queue_groesse,
                ..SessionConfig::default()
            },
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        let l = &self.liveness;
        SweeperConfig {
            intervall: Duration::from_secs(l.sweep_intervall_sek),
            inaktiv_schwelle: Duration::from_secs(l.inaktiv_schwelle_sek),
            raum_bereinigung_intervall: Duration::from_secs(l.raum_bereinigung_intervall_sek),
            max_raum_alter: Duration::from_secs(l.max_raum_alter_stunden * 3600),
        }
    }

    pub fn whisper_config(&self, env_key: Option<&str>) -> WhisperConfig {
        let t = &self.transkription;
        let standard = WhisperConfig::default();
        WhisperConfig {
            base_url: t.base_url.clone(),
            api_key: api_key_aufloesen(t.api_key.as_deref(), env_key),
            modell: t.modell.clone().unwrap_or(standard.modell),
            sprache: self.audio.sprache.clone().filter(|s| !s.trim().is_empty()),
            chunk_dauer: Duration::from_secs(self.audio.chunk_dauer_sek),
            timeout: Duration::from_secs(t.timeout_sek),
            ..standard
        }
    }

    pub fn translator_config(&self, env_key: Option<&str>) -> TranslatorConfig {
        let u = &self.uebersetzung;
        let standard = TranslatorConfig::default();
        TranslatorConfig {
            base_url: u.base_url.clone(),
            api_key: api_key_aufloesen(u.api_key.as_deref(), env_key),
            modell: u.modell.clone().unwrap_or(standard.modell),
            timeout: Duration::from_secs(u.timeout_sek),
        }
    }
}

/// Konfigurierter Key hat Vorrang, sonst der aus der Umgebung
fn api_key_aufloesen(konfiguriert: Option<&str>, env_key: Option<&str>) -> String {
    konfiguriert
        .filter(|k| !k.trim().is_empty())
        .or(env_key)
        .unwrap_or_default()
        .trim()
        .to_string()
}
