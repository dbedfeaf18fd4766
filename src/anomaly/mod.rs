//! AnomalyClassifier - Rule-Based Evidence Extraction
//!
//! ## Responsibilities
//!
//! - Turn one detection cycle's regions into typed evidence items
//! - Track per-door dwell timers for loitering detection
//!
//! One classifier instance per session. Rule variants are configuration
//! (label sets and thresholds), not code: all four rules read from a single
//! `AnomalyRules` table.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};

use crate::models::{EvidenceItem, Region};

/// Label sets and thresholds driving the four anomaly rules
#[derive(Debug, Clone)]
pub struct AnomalyRules {
    pub person_labels: Vec<String>,
    pub dangerous_animal_labels: Vec<String>,
    pub weapon_labels: Vec<String>,
    pub door_labels: Vec<String>,
    /// Regions below this confidence are ignored by every rule
    pub min_confidence: f32,
    /// A person inside this window is not "outside hours"
    pub working_hours_start: NaiveTime,
    pub working_hours_end: NaiveTime,
    /// Continuous presence at a door before loitering evidence fires
    pub stay_threshold: Duration,
}

impl Default for AnomalyRules {
    fn default() -> Self {
        Self {
            person_labels: vec!["person".into()],
            dangerous_animal_labels: vec![
                "dog".into(),
                "cat".into(),
                "snake".into(),
                "bear".into(),
                "lion".into(),
                "tiger".into(),
                "elephant".into(),
                "cow".into(),
            ],
            weapon_labels: vec!["knife".into(), "gun".into(), "pistol".into()],
            door_labels: vec!["door".into()],
            min_confidence: 0.5,
            working_hours_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            working_hours_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            stay_threshold: Duration::from_secs(10),
        }
    }
}

impl AnomalyRules {
    fn is_person(&self, region: &Region) -> bool {
        self.person_labels.iter().any(|l| l == &region.label)
    }

    fn is_dangerous_animal(&self, region: &Region) -> bool {
        self.dangerous_animal_labels
            .iter()
            .any(|l| l == &region.label)
    }

    fn is_weapon(&self, region: &Region) -> bool {
        self.weapon_labels.iter().any(|l| l == &region.label)
    }

    fn is_door(&self, region: &Region) -> bool {
        self.door_labels.iter().any(|l| l == &region.label)
    }

    /// Every label any rule can react to, for the detection adapter
    pub fn allowed_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .person_labels
            .iter()
            .chain(&self.dangerous_animal_labels)
            .chain(&self.weapon_labels)
            .chain(&self.door_labels)
            .cloned()
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Window check; start > end is treated as an overnight window
    fn within_working_hours(&self, local: NaiveTime) -> bool {
        if self.working_hours_start <= self.working_hours_end {
            local >= self.working_hours_start && local < self.working_hours_end
        } else {
            local >= self.working_hours_start || local < self.working_hours_end
        }
    }
}

struct DwellEntry {
    first_seen: DateTime<Utc>,
    /// Evidence already emitted for this continuous stay
    fired: bool,
}

/// Per-session anomaly classifier with dwell state
pub struct AnomalyClassifier {
    rules: AnomalyRules,
    dwell: HashMap<String, DwellEntry>,
}

impl AnomalyClassifier {
    pub fn new(rules: AnomalyRules) -> Self {
        Self {
            rules,
            dwell: HashMap::new(),
        }
    }

    /// Evaluate one detection cycle
    ///
    /// `now` drives the dwell timers; `local` is the wall-clock time used
    /// for the working-hours rule. Items are independent: a cycle can yield
    /// several kinds at once.
    pub fn evaluate(
        &mut self,
        regions: &[Region],
        now: DateTime<Utc>,
        local: NaiveTime,
    ) -> Vec<EvidenceItem> {
        let confident: Vec<&Region> = regions
            .iter()
            .filter(|r| r.confidence >= self.rules.min_confidence)
            .collect();

        let mut evidence = Vec::new();

        for region in &confident {
            if self.rules.is_dangerous_animal(region) {
                evidence.push(EvidenceItem::DangerousAnimal {
                    confidence: region.confidence,
                    region: (*region).clone(),
                });
            }
        }

        let persons: Vec<&Region> = confident
            .iter()
            .copied()
            .filter(|r| self.rules.is_person(r))
            .collect();

        if !self.rules.within_working_hours(local) {
            for person in &persons {
                evidence.push(EvidenceItem::PersonOutsideHours {
                    confidence: person.confidence,
                    region: (*person).clone(),
                });
            }
        }

        for person in &persons {
            for weapon in confident.iter().copied().filter(|r| self.rules.is_weapon(r)) {
                if person.bbox.overlaps(&weapon.bbox) {
                    evidence.push(EvidenceItem::PersonWithWeapon {
                        confidence: person.confidence.min(weapon.confidence),
                        person: (*person).clone(),
                        weapon: weapon.clone(),
                    });
                }
            }
        }

        evidence.extend(self.evaluate_loitering(&persons, &confident, now));
        evidence
    }

    /// Drop all dwell state (session teardown)
    pub fn reset(&mut self) {
        self.dwell.clear();
    }

    fn evaluate_loitering(
        &mut self,
        persons: &[&Region],
        confident: &[&Region],
        now: DateTime<Utc>,
    ) -> Vec<EvidenceItem> {
        let mut evidence = Vec::new();
        let mut occupied: HashSet<String> = HashSet::new();

        for door in confident.iter().copied().filter(|r| self.rules.is_door(r)) {
            let inside = persons
                .iter()
                .copied()
                .find(|p| {
                    let (cx, cy) = p.bbox.centroid();
                    door.bbox.contains_point(cx, cy)
                });

            let Some(person) = inside else { continue };

            let key = door_key(door);
            occupied.insert(key.clone());
            let entry = self.dwell.entry(key).or_insert(DwellEntry {
                first_seen: now,
                fired: false,
            });

            let dwell = (now - entry.first_seen)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if dwell >= self.rules.stay_threshold && !entry.fired {
                entry.fired = true;
                evidence.push(EvidenceItem::PersonLoiteringNearDoor {
                    confidence: person.confidence,
                    person: person.clone(),
                    door: door.clone(),
                    dwell_secs: dwell.as_secs_f64(),
                });
            }
        }

        // A frame with no person at a door clears that door's timer entirely
        self.dwell.retain(|key, _| occupied.contains(key));
        evidence
    }
}

/// Dwell-timer identity for a detected door region
///
/// Doors carry no tracker id across cycles, so identity is the bbox centroid
/// snapped to a 32px grid; static scene doors map to a stable key.
fn door_key(door: &Region) -> String {
    let (cx, cy) = door.bbox.centroid();
    format!("door:{}:{}", (cx / 32.0) as i64, (cy / 32.0) as i64)
}
