//! Multi-PV merge store
//!
//! Engines report each ranked variation piecemeal: a line may carry a new
//! depth but no score, or a score but no PV. The store keeps one record per
//! rank and patches it with whatever each update does carry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::uci::ParsedUpdate;

/// Current merged view of one ranked variation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationRecord {
    pub multipv: u32,
    pub depth: Option<u32>,
    pub nps: Option<u64>,
    pub cp: Option<i32>,
    pub mate: Option<i32>,
    pub pv: Option<Vec<String>>,
    pub wdl: Option<[u32; 3]>,
}

impl VariationRecord {
    fn new(multipv: u32) -> Self {
        Self {
            multipv,
            ..Default::default()
        }
    }

    /// Overwrite every field the update carries; keep the rest.
    fn merge(&mut self, update: &ParsedUpdate) {
        if let Some(depth) = update.depth {
            self.depth = Some(depth);
        }
        if let Some(nps) = update.nps {
            self.nps = Some(nps);
        }
        if let Some(cp) = update.cp {
            self.cp = Some(cp);
        }
        if let Some(mate) = update.mate {
            self.mate = Some(mate);
        }
        if let Some(pv) = &update.pv {
            self.pv = Some(pv.clone());
        }
        if let Some(wdl) = update.wdl {
            self.wdl = Some(wdl);
        }
    }

    /// Short score for display: mate takes precedence over centipawns.
    pub fn score_label(&self) -> String {
        match (self.mate, self.cp) {
            (Some(mate), _) => format!("M{mate}"),
            (None, Some(cp)) => format!("{:+.2}", cp as f64 / 100.0),
            (None, None) => "?".to_string(),
        }
    }
}

/// One record per variation rank, ordered by rank.
#[derive(Debug, Clone, Default)]
pub struct VariationStore {
    records: BTreeMap<u32, VariationRecord>,
}

impl VariationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update into the record for its rank. Updates without a rank
    /// (or with rank 0) cannot be placed and are dropped.
    pub fn apply(&mut self, update: &ParsedUpdate) -> Option<&VariationRecord> {
        let rank = update.multipv.filter(|&r| r > 0)?;
        let record = self
            .records
            .entry(rank)
            .or_insert_with(|| VariationRecord::new(rank));
        record.merge(update);
        Some(record)
    }

    /// Forget every variation (the analysed position changed).
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// The engine's current best line.
    pub fn best(&self) -> Option<&VariationRecord> {
        self.records.get(&1)
    }

    /// All records, ascending by rank.
    pub fn variations(&self) -> Vec<VariationRecord> {
        self.records.values().cloned().collect()
    }
}
