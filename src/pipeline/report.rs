use std::{fmt, fs, io, path::Path};

use tracing::info;

use super::{
    model::{InputRecord, ResultRecord},
    store::RecordStore,
};

const LINE_WIDTH: usize = 80;
const COL_ID: usize = 6;
const COL_LOC: usize = 16;
const COL_UPTIME: usize = 10;
const COL_LOAD: usize = 10;
const COL_REL: usize = 14;
const COL_STAB: usize = 14;

/// Pass counts over the finished store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub accelerator: usize,
    pub external: usize,
    pub both: usize,
    pub accelerator_only: usize,
    pub external_only: usize,
}

impl Summary {
    pub fn from_store(store: &RecordStore) -> Self {
        store
            .snapshot()
            .iter()
            .fold(Self::default(), |mut summary, row| {
                summary.total += 1;
                match (row.passed_accelerator, row.passed_external) {
                    (true, true) => {
                        summary.accelerator += 1;
                        summary.external += 1;
                        summary.both += 1;
                    }
                    (true, false) => {
                        summary.accelerator += 1;
                        summary.accelerator_only += 1;
                    }
                    (false, true) => {
                        summary.external += 1;
                        summary.external_only += 1;
                    }
                    (false, false) => {}
                }
                summary
            })
    }
}

/// The report: counts, the input table in input order, then every record
/// that passed both filters ordered by id.
pub struct Report<'a> {
    records: &'a [InputRecord],
    rows: Vec<ResultRecord>,
    summary: Summary,
}

impl<'a> Report<'a> {
    pub fn new(records: &'a [InputRecord], store: &RecordStore) -> Self {
        Self {
            records,
            rows: store.snapshot(),
            summary: Summary::from_store(store),
        }
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heavy = "=".repeat(LINE_WIDTH);
        let light = "-".repeat(LINE_WIDTH);
        let summary = &self.summary;

        writeln!(f, "{heavy}")?;
        writeln!(f, "STATISTICS:")?;
        writeln!(
            f,
            "  Total: {}, Filter1: {}, Filter2: {}, Both: {}",
            self.records.len(),
            summary.accelerator,
            summary.external,
            summary.both
        )?;
        writeln!(
            f,
            "  Filter1 only: {}, Filter2 only: {}",
            summary.accelerator_only, summary.external_only
        )?;
        writeln!(f)?;

        writeln!(f, "{heavy}")?;
        writeln!(f, "INITIAL DATA")?;
        writeln!(f, "{light}")?;
        writeln!(
            f,
            "{:<COL_ID$}{:<COL_LOC$}{:<COL_UPTIME$}{:<COL_LOAD$}",
            "ID", "Location", "Uptime", "Load"
        )?;
        writeln!(f, "{light}")?;
        for record in self.records {
            writeln!(
                f,
                "{:<COL_ID$}{:<COL_LOC$}{:<COL_UPTIME$}{:<COL_LOAD$.2}",
                record.id, record.location, record.uptime, record.load
            )?;
        }

        writeln!(f)?;
        writeln!(f, "{heavy}")?;
        writeln!(f, "FILTERED RESULTS (passed both filters)")?;
        writeln!(f, "{light}")?;
        writeln!(
            f,
            "{:<COL_ID$}{:<COL_LOC$}{:<COL_UPTIME$}{:<COL_LOAD$}{:<COL_REL$}{:<COL_STAB$}",
            "ID", "Location", "Uptime", "Load", "Reliability", "Stability"
        )?;
        writeln!(f, "{light}")?;
        for row in self.rows.iter().filter(|row| row.passed_both()) {
            write!(
                f,
                "{:<COL_ID$}{:<COL_LOC$}{:<COL_UPTIME$}{:<COL_LOAD$.2}",
                row.id, row.location, row.uptime, row.load
            )?;
            writeln!(
                f,
                "{:<COL_REL$.4}{:<COL_STAB$.4}",
                row.reliability, row.stability
            )?;
        }
        writeln!(f, "{heavy}")
    }
}

pub fn render(records: &[InputRecord], store: &RecordStore) -> String {
    Report::new(records, store).to_string()
}

/// Writes the report to `path`, creating missing parent directories.
pub fn write_report(
    path: impl AsRef<Path>,
    records: &[InputRecord],
    store: &RecordStore,
) -> io::Result<Summary> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let report = Report::new(records, store);
    fs::write(path, report.to_string())?;

    let summary = report.summary();
    info!(path = %path.display(), rows = summary.both, "report written");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<InputRecord> {
        vec![
            InputRecord {
                id: 3,
                location: "Vilnius".into(),
                uptime: 7_200,
                load: 0.456,
            },
            InputRecord {
                id: 1,
                location: "Riga".into(),
                uptime: 100,
                load: 1.0,
            },
            InputRecord {
                id: 2,
                location: "Tallinn".into(),
                uptime: 0,
                load: 0.25,
            },
        ]
    }

    fn scored() -> (Vec<InputRecord>, RecordStore) {
        let records = records();
        let store = RecordStore::from_records(&records);
        store.apply_reliability([(1, 51.0), (3, 62.123456)]);
        store.apply_stability(1, 70.5);
        store.apply_stability(3, 99.99999);
        store.apply_stability(2, 80.0);
        (records, store)
    }

    #[test]
    fn counts_each_combination() {
        let (_, store) = scored();
        store.apply_reliability([(1, 51.0)]);

        assert_eq!(
            Summary::from_store(&store),
            Summary {
                total: 3,
                accelerator: 2,
                external: 3,
                both: 2,
                accelerator_only: 0,
                external_only: 1,
            }
        );
    }

    #[test]
    fn renders_sections_and_rows() {
        let (records, store) = scored();
        let report = render(&records, &store);
        let lines: Vec<_> = report.lines().collect();

        assert_eq!(lines[0], "=".repeat(80));
        assert_eq!(lines[1], "STATISTICS:");
        assert_eq!(lines[2], "  Total: 3, Filter1: 2, Filter2: 3, Both: 2");
        assert!(report.contains("INITIAL DATA"));
        assert!(report.contains("3     Vilnius         7200      0.46      \n"));
        assert!(report
            .contains("1     Riga            100       1.00      51.0000       70.5000       \n"));
        assert!(report
            .contains("3     Vilnius         7200      0.46      62.1235       100.0000      \n"));
        assert_eq!(*lines.last().unwrap(), "=".repeat(80));
    }

    #[test]
    fn report_displays_a_snapshot() {
        let (records, store) = scored();
        let report = Report::new(&records, &store);
        let before = report.to_string();

        // later store writes do not leak into an already built report
        store.apply_reliability([(2, 99.0)]);

        assert_eq!(report.summary().both, 2);
        assert_eq!(report.to_string(), before);
        assert_ne!(render(&records, &store), before);
        assert_eq!(before.lines().filter(|l| *l == "=".repeat(80)).count(), 4);
    }

    #[test]
    fn filtered_rows_are_ordered_by_id() {
        let (records, store) = scored();
        let report = render(&records, &store);
        let filtered = report.split("FILTERED RESULTS").nth(1).unwrap();

        let riga = filtered.find("Riga").unwrap();
        let vilnius = filtered.find("Vilnius").unwrap();
        assert!(riga < vilnius);
        assert!(!filtered.contains("Tallinn"));
    }

    #[test]
    fn write_creates_parent_dirs() {
        let (records, store) = scored();
        let dir = std::env::temp_dir().join(format!("tandem-report-{}", std::process::id()));
        let path = dir.join("nested").join("output.txt");

        let summary = write_report(&path, &records, &store).unwrap();

        assert_eq!(summary.both, 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), render(&records, &store));
        fs::remove_dir_all(dir).unwrap();
    }
}
