// =============================================================================
// Overflow-to-disk — spill closed bars past the in-memory ring
// =============================================================================
//
// Once a ring's live buffer crosses 80% utilization, the oldest closed bars
// are appended to a memory-mapped file in fixed-size records, grouped into
// segments of 4096 records each guarded by a trailing CRC32 checksum. This
// keeps per-timeframe memory bounded without discarding history outright.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use memmap2::Mmap;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::bars::bar::Bar;

pub const RECORDS_PER_SEGMENT: usize = 4096;
/// open, high, low, close as i64 millionths-of-a-unit, volume u64, trade_count
/// u32, bucket_start_millis i64, timeframe_secs u32, closed u8.
const RECORD_SIZE: usize = 8 * 4 + 8 + 4 + 8 + 4 + 1;
const SCALE: i64 = 1_000_000;

fn to_fixed(d: Decimal) -> i64 {
    (d * Decimal::from(SCALE)).to_i64().unwrap_or(0)
}

fn from_fixed(v: i64) -> Decimal {
    Decimal::from(v) / Decimal::from(SCALE)
}

fn encode(bar: &Bar) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    let mut offset = 0;
    for value in [to_fixed(bar.open), to_fixed(bar.high), to_fixed(bar.low), to_fixed(bar.close)] {
        buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        offset += 8;
    }
    buf[offset..offset + 8].copy_from_slice(&bar.volume.to_le_bytes());
    offset += 8;
    buf[offset..offset + 4].copy_from_slice(&bar.trade_count.to_le_bytes());
    offset += 4;
    buf[offset..offset + 8].copy_from_slice(&bar.bucket_start.timestamp_millis().to_le_bytes());
    offset += 8;
    buf[offset..offset + 4].copy_from_slice(&bar.timeframe_secs.to_le_bytes());
    offset += 4;
    buf[offset] = bar.closed as u8;
    buf
}

fn decode(contract_id: &str, buf: &[u8]) -> Bar {
    let mut offset = 0;
    let mut next_i64 = || {
        let v = i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        v
    };
    let open = from_fixed(next_i64());
    let high = from_fixed(next_i64());
    let low = from_fixed(next_i64());
    let close = from_fixed(next_i64());
    let volume = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let trade_count = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let bucket_start_millis = i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let timeframe_secs = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let closed = buf[offset] != 0;

    Bar {
        contract_id: contract_id.to_string(),
        timeframe_secs,
        bucket_start: Utc.timestamp_millis_opt(bucket_start_millis).single().unwrap_or_else(Utc::now),
        open,
        high,
        low,
        close,
        volume,
        trade_count,
        closed,
    }
}

/// Append-only spill file for one (contract, timeframe) ring.
pub struct OverflowStore {
    path: PathBuf,
    pending_segment: Vec<Bar>,
}

impl OverflowStore {
    pub fn new(dir: impl AsRef<Path>, contract_id: &str, timeframe_secs: u32) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join(format!("{contract_id}_{timeframe_secs}.bars"));
        Ok(Self { path, pending_segment: Vec::with_capacity(RECORDS_PER_SEGMENT) })
    }

    /// Append one closed bar; flushes a full segment (with its CRC32 trailer)
    /// to the memory-mapped file once `RECORDS_PER_SEGMENT` accumulate.
    pub fn append(&mut self, bar: Bar) -> std::io::Result<()> {
        self.pending_segment.push(bar);
        if self.pending_segment.len() >= RECORDS_PER_SEGMENT {
            self.flush_segment()?;
        }
        Ok(())
    }

    pub fn flush_segment(&mut self) -> std::io::Result<()> {
        if self.pending_segment.is_empty() {
            return Ok(());
        }
        let mut body = Vec::with_capacity(self.pending_segment.len() * RECORD_SIZE);
        for bar in &self.pending_segment {
            body.extend_from_slice(&encode(bar));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let checksum = hasher.finalize();

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&body)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.flush()?;

        self.pending_segment.clear();
        Ok(())
    }

    /// Read back every record in every complete segment, verifying each
    /// segment's CRC32 trailer. A segment that fails its checksum is skipped
    /// rather than failing the whole read — the in-memory ring remains the
    /// source of truth for recent data.
    pub fn read_all(&self, contract_id: &str) -> std::io::Result<Vec<Bar>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let segment_bytes = RECORDS_PER_SEGMENT * RECORD_SIZE + 4;

        let mut bars = Vec::new();
        let mut offset = 0;
        while offset + segment_bytes <= len {
            let segment = &mmap[offset..offset + segment_bytes];
            let body = &segment[..RECORDS_PER_SEGMENT * RECORD_SIZE];
            let trailer = u32::from_le_bytes(segment[RECORDS_PER_SEGMENT * RECORD_SIZE..].try_into().unwrap());

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(body);
            if hasher.finalize() == trailer {
                for chunk in body.chunks_exact(RECORD_SIZE) {
                    bars.push(decode(contract_id, chunk));
                }
            }
            offset += segment_bytes;
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn sample_bar(n: i64) -> Bar {
        Bar {
            contract_id: "ES".into(),
            timeframe_secs: 60,
            bucket_start: Utc.timestamp_millis_opt(n * 60_000).single().unwrap(),
            open: dec!(5000.00),
            high: dec!(5010.00),
            low: dec!(4995.00),
            close: dec!(5005.00),
            volume: 100,
            trade_count: 10,
            closed: true,
        }
    }

    #[test]
    fn roundtrips_a_full_segment_through_the_mmap_file() {
        let dir = tempdir().unwrap();
        let mut store = OverflowStore::new(dir.path(), "ES", 60).unwrap();
        for i in 0..RECORDS_PER_SEGMENT as i64 {
            store.append(sample_bar(i)).unwrap();
        }
        let read_back = store.read_all("ES").unwrap();
        assert_eq!(read_back.len(), RECORDS_PER_SEGMENT);
        assert_eq!(read_back[0].close, dec!(5005.00));
    }

    #[test]
    fn partial_segment_is_not_flushed_until_full() {
        let dir = tempdir().unwrap();
        let mut store = OverflowStore::new(dir.path(), "ES", 60).unwrap();
        store.append(sample_bar(0)).unwrap();
        assert_eq!(store.read_all("ES").unwrap().len(), 0);
        store.flush_segment().unwrap();
        assert_eq!(store.read_all("ES").unwrap().len(), 1);
    }
}
