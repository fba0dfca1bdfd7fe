use crate::staging::BatchSender;
use crate::store::record::RecordFormat;
use crate::store::RecordStore;
use crate::Result;
use std::ops::Range;

/// Id ranges of `batch_size` covering `0..high_id`, in scan order
fn ranges(high_id: u64, batch_size: usize, forward: bool) -> Vec<Range<u64>> {
    let size = batch_size.max(1) as u64;
    let mut ranges: Vec<Range<u64>> = (0..high_id.div_ceil(size))
        .map(|i| i * size..((i + 1) * size).min(high_id))
        .collect();
    if !forward {
        ranges.reverse();
    }
    ranges
}

/// Feed every record of `store` into a stage, in batches
///
/// Backward scans emit batches from the highest ids down, each batch itself
/// in descending id order. Unused records are included.
pub(crate) fn send_records<F: RecordFormat>(
    store: &RecordStore<F>,
    batch_size: usize,
    forward: bool,
    sender: &mut BatchSender<Vec<F::Record>>,
) -> Result<()> {
    for range in ranges(store.high_id(), batch_size, forward) {
        if sender.is_halted() {
            break;
        }
        let mut batch = store.scan(range)?;
        if !forward {
            batch.reverse();
        }
        sender.send(batch)?;
    }
    Ok(())
}
