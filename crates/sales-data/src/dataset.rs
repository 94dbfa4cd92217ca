//! The consolidated, append-only table of sales records.

use sales_core::models::Record;

/// Ordered collection of [`Record`]s accumulated across batches.
///
/// Rows are only ever appended. The single in-place mutation allowed on
/// existing rows is the anomaly flag, which detection recomputes wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Append `incoming` after the existing rows, preserving both orders.
    ///
    /// No deduplication is performed.
    pub fn merge(&mut self, incoming: Vec<Record>) {
        self.records.extend(incoming);
    }

    /// Non-mutating form of [`Dataset::merge`].
    pub fn merged(&self, incoming: Vec<Record>) -> Self {
        let mut out = self.clone();
        out.merge(incoming);
        out
    }

    /// Copy of the rows matching `predicate`, in order.
    pub fn filtered<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool,
    {
        Self {
            records: self
                .records
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows currently flagged as anomalous.
    pub fn anomaly_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_anomaly).count()
    }

    /// `true` when at least one row carries a mapped category label.
    pub fn has_category_labels(&self) -> bool {
        self.records.iter().any(|r| r.category_label.is_some())
    }

    /// Overwrite every row's anomaly flag.
    pub fn set_all_anomalies(&mut self, flag: bool) {
        for record in &mut self.records {
            record.is_anomaly = flag;
        }
    }

    /// Overwrite the anomaly flag of the rows at `indices`.
    ///
    /// `flags[i]` applies to `indices[i]`; both slices must be the same length.
    pub(crate) fn set_anomalies(&mut self, indices: &[usize], flags: &[bool]) {
        debug_assert_eq!(indices.len(), flags.len());
        for (&idx, &flag) in indices.iter().zip(flags) {
            if let Some(record) = self.records.get_mut(idx) {
                record.is_anomaly = flag;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
