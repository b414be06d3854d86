//! Liveness-Sweeper – entfernt inaktive Teilnehmer und alte Raeume
//!
//! Ein einzelner periodischer Task. Jeder Durchlauf laeuft in einem eigenen
//! Task; bricht er ab, wird das beim naechsten Tick einfach erneut versucht.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::server_state::SignalingState;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Abstand zwischen zwei Liveness-Durchlaeufen
    pub intervall: Duration,
    /// Ohne Lebenszeichen laenger als diese Schwelle gilt ein Teilnehmer als inaktiv
    pub inaktiv_schwelle: Duration,
    /// Abstand zwischen zwei Bereinigungen alter Raeume
    pub raum_bereinigung_intervall: Duration,
    /// Inaktive Raeume werden nach diesem Alter geloescht
    pub max_raum_alter: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            intervall: Duration::from_secs(30),
            inaktiv_schwelle: Duration::from_secs(120),
            raum_bereinigung_intervall: Duration::from_secs(3600),
            max_raum_alter: Duration::from_secs(24 * 3600),
        }
    }
}

/// Periodischer Liveness-Task
#[derive(Clone)]
pub struct LivenessSweeper {
    state: Arc<SignalingState>,
    config: SweeperConfig,
}

/// Ergebnis eines einzelnen Durchlaufs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurchlaufErgebnis {
    pub entfernte_gaeste: usize,
    pub geschlossene_raeume: usize,
    pub geloeschte_raeume: usize,
}

impl LivenessSweeper {
    pub fn neu(state: Arc<SignalingState>, config: SweeperConfig) -> Self {
        Self { state, config }
    }

    /// Startet den periodischen Task; endet mit dem Shutdown-Signal
    pub fn starten(self) -> JoinHandle<()> {
        self.zeitplan(|sweeper, alte_raeume| sweeper.durchlauf(alte_raeume))
    }

    /// Fuehrt `durchlauf` im Intervall aus, jeden Tick in einem eigenen Task
    fn zeitplan<F>(self, durchlauf: F) -> JoinHandle<()>
    where
        F: Fn(&LivenessSweeper, bool) -> DurchlaufErgebnis + Send + Sync + 'static,
    {
        let durchlauf = Arc::new(durchlauf);
        let mut shutdown_rx = self.state.shutdown_empfaenger();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.intervall);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Der erste Tick kommt sofort
            ticker.tick().await;
            let mut letzte_raum_bereinigung = Instant::now();

            tracing::info!(
                intervall_sek = self.config.intervall.as_secs(),
                schwelle_sek = self.config.inaktiv_schwelle.as_secs(),
                "Liveness-Sweeper gestartet"
            );

            loop {
                if *shutdown_rx.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    Ok(()) = shutdown_rx.changed() => continue,
                }

                let alte_raeume =
                    letzte_raum_bereinigung.elapsed() >= self.config.raum_bereinigung_intervall;
                if alte_raeume {
                    letzte_raum_bereinigung = Instant::now();
                }

                let sweeper = self.clone();
                let tick = Arc::clone(&durchlauf);
                let aufgabe = tokio::spawn(async move { tick(&sweeper, alte_raeume) });
                match aufgabe.await {
                    Ok(ergebnis) if ergebnis != DurchlaufErgebnis::default() => {
                        tracing::debug!(
                            gaeste = ergebnis.entfernte_gaeste,
                            raeume = ergebnis.geschlossene_raeume,
                            geloescht = ergebnis.geloeschte_raeume,
                            "Liveness-Durchlauf abgeschlossen"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Liveness-Durchlauf abgebrochen: {}", e);
                    }
                }
            }

            tracing::info!("Liveness-Sweeper beendet");
        })
    }

    /// Ein einzelner Durchlauf
    ///
    /// Mit `alte_raeume` werden zusaetzlich inaktive Raeume geloescht, die
    /// aelter als `max_raum_alter` sind.
    pub fn durchlauf(&self, alte_raeume: bool) -> DurchlaufErgebnis {
        let schwelle = chrono_dauer(self.config.inaktiv_schwelle);
        let bericht = self.state.registry.inaktive_bereinigen(schwelle);
        if !bericht.ist_leer() {
            self.state.bereinigung_melden(&bericht);
        }

        let geloeschte_raeume = if alte_raeume {
            self.state
                .registry
                .alte_raeume_bereinigen(chrono_dauer(self.config.max_raum_alter))
                .len()
        } else {
            0
        };

        DurchlaufErgebnis {
            entfernte_gaeste: bericht.entfernte_gaeste.len(),
            geschlossene_raeume: bericht.deaktivierte_raeume.len(),
            geloeschte_raeume,
        }
    }
}

fn chrono_dauer(dauer: Duration) -> chrono::Duration {
    chrono::Duration::from_std(dauer).unwrap_or_else(|_| chrono::Duration::days(365))
}
