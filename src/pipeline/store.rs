use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::model::{InputRecord, ResultRecord};

/// The shared id → result table written by the accelerator filter and the
/// inbound receiver.
///
/// Keys are fixed when the store is built; nothing inserts or removes rows
/// afterwards. One lock covers the whole table and is only held for a
/// lookup-and-update, never across an await or a device wait.
///
/// Can be cloned to obtain another handle to the same table.
#[derive(Clone, Default)]
pub struct RecordStore {
    rows: Arc<Mutex<HashMap<i32, ResultRecord>>>,
}

impl RecordStore {
    pub fn from_records(records: &[InputRecord]) -> Self {
        let rows = records
            .iter()
            .map(|record| (record.id, ResultRecord::from_input(record)))
            .collect();
        Self {
            rows: Arc::new(Mutex::new(rows)),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Applies a batch of accelerator results under a single lock
    /// acquisition. Ids not in the table are skipped. Returns how many rows
    /// were updated.
    pub fn apply_reliability<I>(&self, updates: I) -> usize
    where
        I: IntoIterator<Item = (i32, f32)>,
    {
        let mut rows = self.rows.lock();
        updates
            .into_iter()
            .filter_map(|(id, reliability)| {
                rows.get_mut(&id)
                    .map(|row| row.apply_reliability(reliability))
            })
            .count()
    }

    /// Records a stability result. Returns false when the id is unknown, in
    /// which case the table is untouched.
    pub fn apply_stability(&self, id: i32, stability: f32) -> bool {
        match self.rows.lock().get_mut(&id) {
            Some(row) => {
                row.apply_stability(stability);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: i32) -> Option<ResultRecord> {
        self.rows.lock().get(&id).cloned()
    }

    /// A copy of every row, ordered by id.
    pub fn snapshot(&self) -> Vec<ResultRecord> {
        let mut rows: Vec<_> = self.rows.lock().values().cloned().collect();
        rows.sort_unstable_by_key(|row| row.id);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<InputRecord> {
        (1..=3)
            .map(|id| InputRecord {
                id,
                location: format!("site-{id}"),
                uptime: id * 100,
                load: id as f32 * 0.5,
            })
            .collect()
    }

    #[test]
    fn updates_commute() {
        let a = RecordStore::from_records(&records());
        a.apply_reliability([(2, 71.5)]);
        a.apply_stability(2, 64.25);

        let b = RecordStore::from_records(&records());
        b.apply_stability(2, 64.25);
        b.apply_reliability([(2, 71.5)]);

        assert_eq!(a.snapshot(), b.snapshot());
        let row = a.get(2).unwrap();
        assert!(row.passed_both());
        assert_eq!(row.reliability, 71.5);
        assert_eq!(row.stability, 64.25);
    }

    #[test]
    fn unknown_ids_leave_table_unchanged() {
        let store = RecordStore::from_records(&records());
        let before = store.snapshot();

        assert!(!store.apply_stability(42, 99.0));
        assert_eq!(store.apply_reliability([(42, 99.0), (-1, 75.0)]), 0);
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn batch_counts_only_known_ids() {
        let store = RecordStore::from_records(&records());
        let updated = store.apply_reliability([(1, 55.0), (9, 60.0), (3, 80.0)]);

        assert_eq!(updated, 2);
        assert!(store.get(1).unwrap().passed_accelerator);
        assert!(!store.get(2).unwrap().passed_accelerator);
        assert!(store.get(3).unwrap().passed_accelerator);
    }

    #[test]
    fn flags_never_reset() {
        let store = RecordStore::from_records(&records());
        store.apply_stability(1, 70.0);
        store.apply_reliability([(1, 52.0)]);
        store.apply_stability(1, 51.0);

        let row = store.get(1).unwrap();
        assert!(row.passed_accelerator);
        assert!(row.passed_external);
        assert_eq!(row.stability, 51.0);
    }

    #[test]
    fn clones_share_the_table() {
        let store = RecordStore::from_records(&records());
        let handle = store.clone();
        let writer = std::thread::spawn(move || handle.apply_stability(3, 88.0));

        assert!(writer.join().unwrap());
        assert!(store.get(3).unwrap().passed_external);
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let mut input = records();
        input.reverse();
        let store = RecordStore::from_records(&input);
        let ids: Vec<_> = store.snapshot().iter().map(|row| row.id).collect();

        assert_eq!(ids, vec![1, 2, 3]);
    }
}
