//! Raum-Datenmodell

use chrono::{DateTime, Utc};
use dolmetscher_core::{RoomCode, UserId};
use std::collections::{HashMap, HashSet};

/// Ein Raum mit genau einem Host und beliebig vielen Gaesten
///
/// Die Registry gibt Kopien dieses Typs heraus; Mutationen laufen
/// ausschliesslich ueber `RoomRegistry`.
#[derive(Debug, Clone)]
pub struct Room {
    /// Teilbarer Code, unveraenderlich
    pub code: RoomCode,
    /// Ersteller des Raums, unveraenderlich
    pub host_id: UserId,
    /// Gaeste (ohne Host)
    pub gaeste: HashSet<UserId>,
    pub erstellt_am: DateTime<Utc>,
    /// Wird genau einmal `false` (Host verlaesst Raum oder wird entfernt)
    pub ist_aktiv: bool,
    /// Obergrenze fuer `gaeste` (Host zaehlt nicht mit)
    pub max_teilnehmer: usize,
    /// Letzte Aktivitaet pro Teilnehmer (Host und Gaeste)
    pub letzte_aktivitaet: HashMap<UserId, DateTime<Utc>>,
}

impl Room {
    pub(crate) fn neu(
        code: RoomCode,
        host_id: UserId,
        max_teilnehmer: usize,
        jetzt: DateTime<Utc>,
    ) -> Self {
        let mut letzte_aktivitaet = HashMap::new();
        letzte_aktivitaet.insert(host_id.clone(), jetzt);
        Self {
            code,
            host_id,
            gaeste: HashSet::new(),
            erstellt_am: jetzt,
            ist_aktiv: true,
            max_teilnehmer,
            letzte_aktivitaet,
        }
    }

    pub fn ist_host(&self, user_id: &UserId) -> bool {
        &self.host_id == user_id
    }

    pub fn ist_gast(&self, user_id: &UserId) -> bool {
        self.gaeste.contains(user_id)
    }

    pub fn ist_mitglied(&self, user_id: &UserId) -> bool {
        self.ist_host(user_id) || self.ist_gast(user_id)
    }

    pub fn ist_voll(&self) -> bool {
        self.gaeste.len() >= self.max_teilnehmer
    }

    /// Host + Gaeste
    pub fn teilnehmer_anzahl(&self) -> usize {
        self.gaeste.len() + 1
    }

    /// Alle Mitglieder, Host zuerst
    pub fn mitglieder(&self) -> Vec<UserId> {
        std::iter::once(self.host_id.clone())
            .chain(self.gaeste.iter().cloned())
            .collect()
    }

    pub fn letzte_aktivitaet_von(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.letzte_aktivitaet.get(user_id).copied()
    }

    pub(crate) fn gast_hinzufuegen(&mut self, user_id: UserId, jetzt: DateTime<Utc>) {
        self.letzte_aktivitaet.insert(user_id.clone(), jetzt);
        self.gaeste.insert(user_id);
    }

    pub(crate) fn gast_entfernen(&mut self, user_id: &UserId) -> bool {
        self.letzte_aktivitaet.remove(user_id);
        self.gaeste.remove(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_raum() -> Room {
        Room::neu(RoomCode("ABCDE".into()), UserId::from("host"), 2, Utc::now())
    }

    #[test]
    fn neuer_raum_hat_nur_host() {
        let raum = test_raum();
        assert!(raum.ist_aktiv);
        assert_eq!(raum.teilnehmer_anzahl(), 1);
        assert!(raum.ist_mitglied(&UserId::from("host")));
        assert!(!raum.ist_gast(&UserId::from("host")));
        assert!(raum.letzte_aktivitaet_von(&UserId::from("host")).is_some());
    }

    #[test]
    fn kapazitaet_zaehlt_nur_gaeste() {
        let mut raum = test_raum();
        raum.gast_hinzufuegen(UserId::from("g1"), Utc::now());
        assert!(!raum.ist_voll());
        raum.gast_hinzufuegen(UserId::from("g2"), Utc::now());
        assert!(raum.ist_voll());
        assert_eq!(raum.teilnehmer_anzahl(), 3);
    }

    #[test]
    fn gast_entfernen_loescht_aktivitaet() {
        let mut raum = test_raum();
        let gast = UserId::from("g1");
        raum.gast_hinzufuegen(gast.clone(), Utc::now());
        assert!(raum.gast_entfernen(&gast));
        assert!(raum.letzte_aktivitaet_von(&gast).is_none());
        assert!(!raum.gast_entfernen(&gast));
    }

    #[test]
    fn mitglieder_host_zuerst() {
        let mut raum = test_raum();
        raum.gast_hinzufuegen(UserId::from("g1"), Utc::now());
        let mitglieder = raum.mitglieder();
        assert_eq!(mitglieder[0], UserId::from("host"));
        assert_eq!(mitglieder.len(), 2);
    }
}
