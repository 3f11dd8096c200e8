use crate::deadline::DeadlineRecord;
use crate::error::DeadlineError;
use crate::store::{RawDeadline, StoreDocument};
use chrono_tz::Tz;
use serde_json::Map;

/// Ordered deadlines, insertion order = display order.
///
/// `records` and `raw` always have the same length and order; only `raw` is
/// persisted. Positions are stable until the next removal.
#[derive(Debug, Clone)]
pub struct DeadlineCollection {
    local_zone: Tz,
    records: Vec<DeadlineRecord>,
    raw: Vec<RawDeadline>,
    extra: Map<String, serde_json::Value>,
}

impl DeadlineCollection {
    #[cfg(test)]
    pub fn new(local_zone: Tz) -> Self {
        Self {
            local_zone,
            records: Vec::new(),
            raw: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Build from the persisted entries; any unparsable entry fails the whole load.
    pub fn from_raw(raw: &[RawDeadline], local_zone: Tz) -> Result<Self, DeadlineError> {
        let records = raw
            .iter()
            .map(|entry| DeadlineRecord::from_raw(entry, local_zone))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            local_zone,
            records,
            raw: raw.to_vec(),
            extra: Map::new(),
        })
    }

    pub fn from_document(doc: &StoreDocument, local_zone: Tz) -> Result<Self, DeadlineError> {
        let mut collection = Self::from_raw(&doc.deadlines, local_zone)?;
        collection.extra = doc.extra.clone();
        Ok(collection)
    }

    pub fn to_document(&self) -> StoreDocument {
        StoreDocument {
            deadlines: self.raw.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn local_zone(&self) -> Tz {
        self.local_zone
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DeadlineRecord] {
        &self.records
    }

    pub fn add(&mut self, record: DeadlineRecord) {
        self.raw.push(record.to_raw());
        self.records.push(record);
    }

    /// Remove by 1-based position and return the removed record.
    pub fn remove_at(&mut self, index: usize) -> Result<DeadlineRecord, DeadlineError> {
        if index == 0 || index > self.records.len() {
            return Err(DeadlineError::OutOfRange(index.to_string()));
        }
        self.raw.remove(index - 1);
        Ok(self.records.remove(index - 1))
    }

    /// Like [`remove_at`](Self::remove_at) for user-typed text.
    pub fn remove_index_text(&mut self, input: &str) -> Result<DeadlineRecord, DeadlineError> {
        let index = parse_index(input)?;
        self.remove_at(index)
    }

    /// `(display index, formatted local date-time)` in display order.
    pub fn list_entries(&self) -> Vec<(usize, String)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| (i + 1, record.formatted()))
            .collect()
    }

    /// 0-based positions whose formatted instant equals `now`, ascending.
    pub fn due_positions(&self, now: &str) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.formatted() == now)
            .map(|(i, _)| i)
            .collect()
    }

    /// Remove 0-based positions taken from one snapshot. Highest first so
    /// earlier positions are not shifted.
    pub fn remove_positions(&mut self, positions: &[usize]) -> Vec<DeadlineRecord> {
        let mut sorted = positions.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut removed = Vec::with_capacity(sorted.len());
        for &pos in sorted.iter().rev() {
            if pos < self.records.len() {
                self.raw.remove(pos);
                removed.push(self.records.remove(pos));
            }
        }
        removed.reverse();
        removed
    }
}

/// Parse a 1-based deadline ID typed by the user. Anything that is not a
/// positive integer is reported the same way as an out-of-range index.
pub fn parse_index(input: &str) -> Result<usize, DeadlineError> {
    let trimmed = input.trim();
    match trimmed.parse::<usize>() {
        Ok(index) if index > 0 => Ok(index),
        _ => Err(DeadlineError::OutOfRange(trimmed.to_string())),
    }
}
