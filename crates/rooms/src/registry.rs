//! Raum-Registry – Lebenszyklus, Mitgliedschaft und Liveness aller Raeume
//!
//! Thread-safe via Arc + DashMap. Clone der Registry teilt den inneren Zustand.
//!
//! ## Lock-Reihenfolge
//! - Raum-Mutex -> Index-Shard (Beitreten, Verlassen, Bereinigen)
//! - Index-Shard -> Raum-Shard (nur `raum_erstellen`)
//! - Raum-Shards werden nie gehalten, waehrend auf etwas anderes gewartet wird:
//!   Lookups klonen den `Arc` und geben den Shard sofort frei.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dolmetscher_core::{RoomCode, UserId};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

use crate::error::{RoomError, RoomResult};
use crate::room::Room;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Zeichenvorrat fuer Raum-Codes
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Laenge der Raum-Codes
    pub code_laenge: usize,
    /// Maximale Anzahl Gaeste pro Raum (Host nicht mitgezaehlt)
    pub max_teilnehmer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            code_laenge: 5,
            max_teilnehmer: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Ergebnis-Typen
// ---------------------------------------------------------------------------

/// Ergebnis von `raum_verlassen`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Benutzer war in keinem Raum
    NichtImRaum,
    /// Gast wurde entfernt, Raum bleibt aktiv
    GastEntfernt {
        code: RoomCode,
        verbleibend: usize,
    },
    /// Host hat verlassen, Raum ist geschlossen
    RaumGeschlossen {
        code: RoomCode,
        gaeste: Vec<UserId>,
    },
}

/// Ergebnis von `beitreten`
#[derive(Debug, Clone)]
pub struct Beitritt {
    pub raum: Room,
    /// Raum, aus dem eine veraltete Gast-Zuordnung entfernt wurde
    pub verlassen: Option<VerlassenerRaum>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerlassenerRaum {
    pub code: RoomCode,
    /// Teilnehmer (Host + Gaeste) nach dem Austritt
    pub verbleibend: usize,
}

/// Raum der wegen Host-Inaktivitaet geschlossen wurde
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeactivatedRoom {
    pub code: RoomCode,
    pub host_id: UserId,
    pub gaeste: Vec<UserId>,
}

/// Einzeln entfernter, inaktiver Gast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedGuest {
    pub code: RoomCode,
    pub user_id: UserId,
    /// Teilnehmer (Host + Gaeste) nach der Bereinigung dieses Raums
    pub verbleibend: usize,
}

/// Ergebnis eines Liveness-Durchlaufs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deaktivierte_raeume: Vec<DeactivatedRoom>,
    pub entfernte_gaeste: Vec<EvictedGuest>,
}

impl SweepReport {
    pub fn ist_leer(&self) -> bool {
        self.deaktivierte_raeume.is_empty() && self.entfernte_gaeste.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RoomRegistry
// ---------------------------------------------------------------------------

/// Zentrale Registry aller Raeume und der Zuordnung Benutzer -> Raum
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RoomRegistryInner>,
}

struct RoomRegistryInner {
    config: RegistryConfig,
    /// Alle Raeume inkl. inaktiver (Historie), indiziert nach Code
    raeume: DashMap<RoomCode, Arc<Mutex<Room>>>,
    /// Reverse-Index: in welchem Raum ist ein Benutzer
    user_index: DashMap<UserId, RoomCode>,
}

impl RoomRegistry {
    pub fn neu(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RoomRegistryInner {
                config,
                raeume: DashMap::new(),
                user_index: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Erstellt einen neuen Raum mit `host_id` als Host
    pub fn raum_erstellen(&self, host_id: UserId) -> RoomResult<Room> {
        let jetzt = Utc::now();

        let index_eintrag = match self.inner.user_index.entry(host_id.clone()) {
            Entry::Occupied(_) => return Err(RoomError::BereitsImRaum(host_id)),
            Entry::Vacant(v) => v,
        };

        // Kollisionen werden gegen alle bekannten Codes geprueft (auch inaktive)
        let raum = loop {
            let code = self.code_generieren();
            match self.inner.raeume.entry(code.clone()) {
                Entry::Occupied(_) => {
                    tracing::trace!(code = %code, "Raum-Code bereits vergeben, neuer Versuch");
                }
                Entry::Vacant(v) => {
                    let raum = Room::neu(
                        code.clone(),
                        host_id.clone(),
                        self.inner.config.max_teilnehmer,
                        jetzt,
                    );
                    // Index vor Freigabe des Raum-Shards setzen: wer den Raum
                    // sieht, sieht auch die Host-Zuordnung
                    drop(index_eintrag.insert(code));
                    v.insert(Arc::new(Mutex::new(raum.clone())));
                    break raum;
                }
            }
        };

        tracing::info!(code = %raum.code, host = %host_id, "Raum erstellt");
        Ok(raum)
    }

    /// Fuegt `user_id` als Gast dem Raum `code` hinzu
    ///
    /// Kurzform von [`beitreten`](Self::beitreten) fuer Aufrufer, die den
    /// verlassenen Raum nicht benachrichtigen muessen.
    pub fn raum_beitreten(&self, code: &RoomCode, user_id: UserId) -> RoomResult<Room> {
        self.beitreten(code, user_id).map(|b| b.raum)
    }

    /// Fuegt `user_id` als Gast dem Raum `code` hinzu
    ///
    /// Eine veraltete Gast-Zuordnung (z.B. nach abgebrochener Verbindung)
    /// wird erst aufgeloest, wenn der Zielraum existiert, aktiv ist und Platz
    /// hat. Ein abgelehnter Beitritt laesst die bisherige Mitgliedschaft
    /// unveraendert. Hosts aktiver Raeume werden abgelehnt.
    pub fn beitreten(&self, code: &RoomCode, user_id: UserId) -> RoomResult<Beitritt> {
        let raum_arc = self
            .raum_arc(code)
            .ok_or_else(|| RoomError::RaumNichtGefunden(code.clone()))?;

        {
            let raum = raum_arc.lock();
            Self::aufnahme_pruefen(&raum, &user_id)?;
        }

        let mut verlassen = None;
        if let Some(bisher) = self.raum_von_user(&user_id) {
            if bisher.ist_host(&user_id) {
                return Err(RoomError::BereitsImRaum(user_id));
            }
            tracing::debug!(
                user_id = %user_id,
                alter_raum = %bisher.code,
                "Veraltete Gast-Zuordnung wird aufgeloest"
            );
            if let LeaveOutcome::GastEntfernt {
                code: alter_code,
                verbleibend,
            } = self.raum_verlassen(&user_id)
            {
                verlassen = Some(VerlassenerRaum {
                    code: alter_code,
                    verbleibend,
                });
            }
        }

        // Zwischen Vorpruefung und Lock kann der Raum voll oder geschlossen
        // worden sein; dann bleibt der Benutzer ohne Raum
        let mut raum = raum_arc.lock();
        Self::aufnahme_pruefen(&raum, &user_id)?;

        let index_eintrag = match self.inner.user_index.entry(user_id.clone()) {
            Entry::Occupied(_) => return Err(RoomError::BereitsImRaum(user_id)),
            Entry::Vacant(v) => v,
        };

        drop(index_eintrag.insert(code.clone()));
        raum.gast_hinzufuegen(user_id.clone(), Utc::now());

        tracing::info!(
            code = %code,
            user_id = %user_id,
            teilnehmer = raum.teilnehmer_anzahl(),
            "Gast beigetreten"
        );
        Ok(Beitritt {
            raum: raum.clone(),
            verlassen,
        })
    }

    /// Aktiv und Platz frei; ein bereits eingetragener Gast belegt seinen
    /// Platz schon
    fn aufnahme_pruefen(raum: &Room, user_id: &UserId) -> RoomResult<()> {
        if !raum.ist_aktiv {
            return Err(RoomError::RaumInaktiv(raum.code.clone()));
        }
        if raum.ist_voll() && !raum.ist_gast(user_id) {
            return Err(RoomError::RaumVoll(raum.code.clone()));
        }
        Ok(())
    }

    /// Entfernt `user_id` aus seinem Raum
    ///
    /// Verlaesst der Host, wird der Raum geschlossen und alle Mitglieder aus
    /// dem Index entfernt; der Raum selbst bleibt als Historie erhalten.
    /// Mehrfacher Aufruf ist ein No-op.
    pub fn raum_verlassen(&self, user_id: &UserId) -> LeaveOutcome {
        let Some(code) = self.raum_code_von(user_id) else {
            return LeaveOutcome::NichtImRaum;
        };

        let Some(raum_arc) = self.raum_arc(&code) else {
            tracing::error!(
                user_id = %user_id,
                code = %code,
                "Index zeigt auf unbekannten Raum – Eintrag wird entfernt"
            );
            self.inner.user_index.remove_if(user_id, |_, c| c == &code);
            return LeaveOutcome::NichtImRaum;
        };

        let mut raum = raum_arc.lock();

        // Unter dem Raum-Lock erneut pruefen (paralleles Verlassen)
        let noch_zugeordnet = self
            .inner
            .user_index
            .get(user_id)
            .is_some_and(|c| *c == code);
        if !noch_zugeordnet {
            return LeaveOutcome::NichtImRaum;
        }

        if raum.ist_host(user_id) {
            let gaeste = self.raum_schliessen(&mut raum);
            tracing::info!(code = %code, host = %user_id, "Host hat Raum verlassen – Raum geschlossen");
            LeaveOutcome::RaumGeschlossen { code, gaeste }
        } else {
            raum.gast_entfernen(user_id);
            self.inner.user_index.remove(user_id);
            tracing::info!(code = %code, user_id = %user_id, "Gast hat Raum verlassen");
            LeaveOutcome::GastEntfernt {
                code,
                verbleibend: raum.teilnehmer_anzahl(),
            }
        }
    }

    /// Gibt eine Kopie des Raums zurueck
    pub fn raum(&self, code: &RoomCode) -> Option<Room> {
        self.raum_arc(code).map(|r| r.lock().clone())
    }

    /// Gibt den Raum zurueck in dem sich `user_id` gerade befindet
    pub fn raum_von_user(&self, user_id: &UserId) -> Option<Room> {
        let code = self.raum_code_von(user_id)?;
        self.raum(&code)
    }

    /// Gibt den Raum-Code des Benutzers zurueck (nur Index-Lookup)
    pub fn raum_code_von(&self, user_id: &UserId) -> Option<RoomCode> {
        self.inner.user_index.get(user_id).map(|c| c.clone())
    }

    pub fn ist_host(&self, code: &RoomCode, user_id: &UserId) -> bool {
        self.raum_arc(code)
            .is_some_and(|r| r.lock().ist_host(user_id))
    }

    /// Alle aktuellen Mitglieder eines aktiven Raums (Host zuerst)
    ///
    /// Inaktive oder unbekannte Raeume haben keine Mitglieder.
    pub fn mitglieder(&self, code: &RoomCode) -> Vec<UserId> {
        match self.raum_arc(code) {
            Some(r) => {
                let raum = r.lock();
                if raum.ist_aktiv {
                    raum.mitglieder()
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        }
    }

    /// Aktualisiert den Liveness-Zeitstempel; No-op wenn nicht in einem Raum
    pub fn aktivitaet_melden(&self, user_id: &UserId) -> bool {
        self.aktivitaet_melden_zum(user_id, Utc::now())
    }

    /// Wie `aktivitaet_melden`, mit explizitem Zeitpunkt
    pub fn aktivitaet_melden_zum(&self, user_id: &UserId, zeitpunkt: DateTime<Utc>) -> bool {
        let Some(code) = self.raum_code_von(user_id) else {
            return false;
        };
        let Some(raum_arc) = self.raum_arc(&code) else {
            return false;
        };
        let mut raum = raum_arc.lock();
        if !raum.ist_aktiv || !raum.ist_mitglied(user_id) {
            return false;
        }
        raum.letzte_aktivitaet.insert(user_id.clone(), zeitpunkt);
        true
    }

    /// Entfernt inaktive Teilnehmer
    ///
    /// Ist der Host laenger als `schwelle` inaktiv, wird der ganze Raum
    /// geschlossen (wie beim Verlassen durch den Host). Sonst werden einzelne
    /// inaktive Gaeste entfernt.
    pub fn inaktive_bereinigen(&self, schwelle: Duration) -> SweepReport {
        self.inaktive_bereinigen_zum(Utc::now(), schwelle)
    }

    /// Wie `inaktive_bereinigen`, mit explizitem Zeitpunkt
    pub fn inaktive_bereinigen_zum(&self, jetzt: DateTime<Utc>, schwelle: Duration) -> SweepReport {
        let grenze = jetzt - schwelle;
        let mut bericht = SweepReport::default();

        for (_, raum_arc) in self.raum_liste() {
            let mut raum = raum_arc.lock();
            if !raum.ist_aktiv {
                continue;
            }

            let host_zuletzt = raum
                .letzte_aktivitaet_von(&raum.host_id)
                .unwrap_or(raum.erstellt_am);
            if host_zuletzt < grenze {
                let gaeste = self.raum_schliessen(&mut raum);
                tracing::info!(code = %raum.code, host = %raum.host_id, "Host inaktiv – Raum geschlossen");
                bericht.deaktivierte_raeume.push(DeactivatedRoom {
                    code: raum.code.clone(),
                    host_id: raum.host_id.clone(),
                    gaeste,
                });
                continue;
            }

            let abgelaufen: Vec<UserId> = raum
                .gaeste
                .iter()
                .filter(|g| raum.letzte_aktivitaet_von(g).unwrap_or(raum.erstellt_am) < grenze)
                .cloned()
                .collect();
            if abgelaufen.is_empty() {
                continue;
            }

            for gast in &abgelaufen {
                raum.gast_entfernen(gast);
                self.inner.user_index.remove_if(gast, |_, c| c == &raum.code);
                tracing::info!(code = %raum.code, user_id = %gast, "Inaktiver Gast entfernt");
            }
            let verbleibend = raum.teilnehmer_anzahl();
            bericht
                .entfernte_gaeste
                .extend(abgelaufen.into_iter().map(|user_id| EvictedGuest {
                    code: raum.code.clone(),
                    user_id,
                    verbleibend,
                }));
        }

        bericht
    }

    /// Loescht inaktive Raeume die vor mehr als `max_alter` erstellt wurden
    pub fn alte_raeume_bereinigen(&self, max_alter: Duration) -> Vec<RoomCode> {
        self.alte_raeume_bereinigen_zum(Utc::now(), max_alter)
    }

    /// Wie `alte_raeume_bereinigen`, mit explizitem Zeitpunkt
    pub fn alte_raeume_bereinigen_zum(
        &self,
        jetzt: DateTime<Utc>,
        max_alter: Duration,
    ) -> Vec<RoomCode> {
        let grenze = jetzt - max_alter;

        // Inaktive Raeume sind unveraenderlich, die Pruefung bleibt nach dem
        // Freigeben des Mutex gueltig
        let entfernbar: Vec<RoomCode> = self
            .raum_liste()
            .into_iter()
            .filter(|(_, r)| {
                let raum = r.lock();
                !raum.ist_aktiv && raum.erstellt_am < grenze
            })
            .map(|(code, _)| code)
            .collect();

        for code in &entfernbar {
            self.inner.raeume.remove(code);
        }
        if !entfernbar.is_empty() {
            tracing::debug!(anzahl = entfernbar.len(), "Alte Raeume geloescht");
        }
        entfernbar
    }

    /// Anzahl aktiver Raeume
    pub fn aktive_raeume(&self) -> usize {
        self.raum_liste()
            .into_iter()
            .filter(|(_, r)| r.lock().ist_aktiv)
            .count()
    }

    /// Anzahl aller gehaltenen Raeume (inkl. Historie)
    pub fn raum_anzahl(&self) -> usize {
        self.inner.raeume.len()
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    fn raum_arc(&self, code: &RoomCode) -> Option<Arc<Mutex<Room>>> {
        self.inner.raeume.get(code).map(|r| Arc::clone(r.value()))
    }

    fn raum_liste(&self) -> Vec<(RoomCode, Arc<Mutex<Room>>)> {
        self.inner
            .raeume
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Deaktiviert den Raum und entfernt alle Mitglieder aus dem Index
    ///
    /// Muss unter dem Raum-Mutex aufgerufen werden.
    fn raum_schliessen(&self, raum: &mut Room) -> Vec<UserId> {
        raum.ist_aktiv = false;
        for mitglied in raum.mitglieder() {
            self.inner
                .user_index
                .remove_if(&mitglied, |_, c| c == &raum.code);
        }
        raum.gaeste.iter().cloned().collect()
    }

    fn code_generieren(&self) -> RoomCode {
        let mut rng = rand::thread_rng();
        let code = (0..self.inner.config.code_laenge)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        RoomCode(code)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::neu(RegistryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
