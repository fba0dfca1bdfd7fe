//! Bad input collection with a tolerance

use super::input::InputRelationship;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Receives bad input entries that the import skips over
pub trait Collector: Send + Sync {
    /// A relationship referring to an input id no node has
    fn collect_bad_relationship(&self, relationship: &InputRelationship, missing: &str) -> Result<()>;

    /// A node whose input id was already taken by `existing`
    fn collect_duplicate_node(&self, input_id: &str, node_id: u64, existing: u64) -> Result<()>;

    /// An entity violating a uniqueness constraint
    fn collect_constraint_violation(&self, description: &str) -> Result<()>;

    /// Entries collected so far
    fn bad_entries(&self) -> u64;
}

/// Collector writing one report line per entry, up to a tolerance
///
/// The entry that goes past the tolerance fails with
/// [`Error::TooManyBadEntries`].
pub struct BadCollector {
    tolerance: u64,
    collected: AtomicU64,
    report: Mutex<Box<dyn Write + Send>>,
}

impl BadCollector {
    /// Collector reporting into `report`
    pub fn new(report: Box<dyn Write + Send>, tolerance: u64) -> Self {
        Self {
            tolerance,
            collected: AtomicU64::new(0),
            report: Mutex::new(report),
        }
    }

    /// Collector discarding its report
    pub fn silent(tolerance: u64) -> Self {
        Self::new(Box::new(std::io::sink()), tolerance)
    }

    fn collect(&self, line: String) -> Result<()> {
        let collected = self.collected.fetch_add(1, Ordering::AcqRel) + 1;
        if collected > self.tolerance {
            return Err(Error::TooManyBadEntries {
                collected,
                tolerance: self.tolerance,
            });
        }
        let mut report = self.report.lock();
        if let Err(e) = writeln!(report, "{}", line) {
            warn!("Failed to write bad entry report: {}", e);
        }
        Ok(())
    }

    /// Flush the report writer
    pub fn flush(&self) -> Result<()> {
        self.report.lock().flush()?;
        Ok(())
    }
}

impl Collector for BadCollector {
    fn collect_bad_relationship(&self, relationship: &InputRelationship, missing: &str) -> Result<()> {
        self.collect(format!(
            "({})-[{}]->({}) referring to missing node {}",
            relationship.start, relationship.rel_type, relationship.end, missing
        ))
    }

    fn collect_duplicate_node(&self, input_id: &str, node_id: u64, existing: u64) -> Result<()> {
        self.collect(format!(
            "Id '{}' of node {} is already used by node {}",
            input_id, node_id, existing
        ))
    }

    fn collect_constraint_violation(&self, description: &str) -> Result<()> {
        self.collect(description.to_string())
    }

    fn bad_entries(&self) -> u64 {
        self.collected.load(Ordering::Acquire).min(self.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Writer sharing its buffer with the test
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn relationship() -> InputRelationship {
        InputRelationship {
            start: "a".to_string(),
            end: "zz".to_string(),
            rel_type: 3,
            properties: Vec::new(),
        }
    }

    #[test]
    fn test_report_lines() {
        let buffer = SharedBuffer::default();
        let collector = BadCollector::new(Box::new(buffer.clone()), 10);
        collector.collect_bad_relationship(&relationship(), "zz").unwrap();
        collector.collect_duplicate_node("a", 4, 1).unwrap();
        collector.flush().unwrap();

        let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "(a)-[3]->(zz) referring to missing node zz",
            "Id 'a' of node 4 is already used by node 1",
        ]);
        assert_eq!(collector.bad_entries(), 2);
    }

    #[test]
    fn test_tolerance_exceeded() {
        let collector = BadCollector::silent(1);
        collector.collect_constraint_violation("first").unwrap();
        let err = collector.collect_constraint_violation("second").unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyBadEntries {
                collected: 2,
                tolerance: 1
            }
        ));
        assert_eq!(collector.bad_entries(), 1);
    }
}
