#![allow(missing_docs)]

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use cereal::{
    CerealError, CerealReader, CerealWriter, Cerealizable, Cerealizer, ChunkedBuffer,
    ExternalSorter, SortConfig, SortState, StringCerealizer,
};
use tempfile::TempDir;

#[derive(Cerealizable, Debug, Clone, PartialEq)]
struct Forecast {
    station: String,
    timestamp: i64,
    sequence: i32,
    temperature: Option<f64>,
    summary: Option<String>,
}

fn forecasts(count: usize, seed: u64) -> Vec<Forecast> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count)
        .map(|i| Forecast {
            station: format!("ST{:03}", rng.u32(0..100)),
            timestamp: rng.i64(0..1_000),
            sequence: i as i32,
            temperature: rng.bool().then(|| rng.f64() * 40.0 - 10.0),
            summary: rng.bool().then(|| "partly cloudy".to_owned()),
        })
        .collect()
}

fn encode(records: &[Forecast]) -> cereal::Result<Vec<u8>> {
    let mut writer = CerealWriter::new(Vec::new());
    for record in records {
        writer.write(record)?;
    }
    Ok(writer.into_inner())
}

fn decode(bytes: &[u8]) -> cereal::Result<Vec<Forecast>> {
    CerealReader::new(bytes).records::<Forecast>().collect()
}

fn by_timestamp(a: &Forecast, b: &Forecast) -> std::cmp::Ordering {
    a.timestamp.cmp(&b.timestamp)
}

fn leftovers(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// Accepts `budget` bytes, then fails every write.
struct FailingSink {
    budget: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.budget {
            return Err(io::Error::other("disk full"));
        }
        self.budget -= buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Timestamps as bare `i64`s. Decoding fails once `limit` values were read.
struct LimitedTimestamps {
    decoded: AtomicUsize,
    limit: usize,
}

impl Cerealizer<i64> for LimitedTimestamps {
    fn cerealize_to(&self, buf: &mut ChunkedBuffer, value: &i64) -> cereal::Result<()> {
        buf.put_i64(*value);
        Ok(())
    }

    fn uncerealize_from(&self, buf: &mut ChunkedBuffer) -> cereal::Result<i64> {
        if self.decoded.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return Err(CerealError::OutOfRange("timestamp budget spent".into()));
        }
        buf.get_i64()
    }
}

#[test]
fn test_many_runs_sorted_by_timestamp() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let input = forecasts(5_000, 7);

    let mut sorter = ExternalSorter::new(by_timestamp)
        .with_config(SortConfig::default().with_block_size(2_048).with_workspace(workspace.path()));
    let mut output = Vec::new();
    let stats = sorter.sort(Cursor::new(encode(&input)?), &mut output)?;

    assert!(stats.runs > 1, "expected several runs, got {}", stats.runs);
    assert_eq!(stats.records_read, 5_000);
    assert_eq!(stats.records_written, 5_000);
    assert_eq!(sorter.state(), SortState::Done);

    let sorted = decode(&output)?;
    assert_eq!(sorted.len(), input.len());
    assert!(sorted.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    // Equal timestamps keep their input order.
    assert!(
        sorted
            .windows(2)
            .filter(|w| w[0].timestamp == w[1].timestamp)
            .all(|w| w[0].sequence < w[1].sequence)
    );

    let mut expected = input;
    expected.sort_by(by_timestamp);
    assert_eq!(sorted, expected);
    assert_eq!(leftovers(workspace.path()), 0);
    Ok(())
}

#[test]
fn test_single_run() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let input = forecasts(200, 11);

    let mut sorter = ExternalSorter::new(by_timestamp)
        .with_config(SortConfig::default().with_workspace(workspace.path()));
    let mut output = Vec::new();
    let stats = sorter.sort(Cursor::new(encode(&input)?), &mut output)?;

    assert_eq!(stats.runs, 1);
    let sorted = decode(&output)?;
    assert_eq!(sorted.len(), 200);
    assert!(sorted.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(leftovers(workspace.path()), 0);
    Ok(())
}

#[test]
fn test_filter_drops_records() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let input = forecasts(1_000, 3);
    let kept = input.iter().filter(|f| f.temperature.is_some()).count();

    let mut sorter = ExternalSorter::new(by_timestamp)
        .with_config(SortConfig::default().with_block_size(4_096).with_workspace(workspace.path()))
        .with_filter(|f: &Forecast| f.temperature.is_some());
    let mut output = Vec::new();
    let stats = sorter.sort(Cursor::new(encode(&input)?), &mut output)?;

    assert_eq!(stats.records_read, 1_000);
    assert_eq!(stats.records_written, kept as u64);
    assert!(decode(&output)?.iter().all(|f| f.temperature.is_some()));
    Ok(())
}

#[test]
fn test_truncated_input_fails_and_cleans_up() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let mut bytes = encode(&forecasts(500, 5))?;
    bytes.extend_from_slice(&64i32.to_be_bytes());
    bytes.extend_from_slice(b"short");

    let mut sorter = ExternalSorter::new(by_timestamp)
        .with_config(SortConfig::default().with_block_size(1_024).with_workspace(workspace.path()));
    let err = sorter.sort(Cursor::new(bytes), Vec::new()).unwrap_err();

    assert!(matches!(err, CerealError::SortFailure { phase: "partition", .. }));
    assert!(matches!(err.root_cause(), CerealError::Truncated { .. }));
    assert_eq!(sorter.state(), SortState::Failed);
    assert_eq!(leftovers(workspace.path()), 0);
    Ok(())
}

#[test]
fn test_failing_sink_fails_and_cleans_up() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let input = encode(&forecasts(2_000, 9))?;

    let mut sorter = ExternalSorter::new(by_timestamp)
        .with_config(SortConfig::default().with_block_size(2_048).with_workspace(workspace.path()));
    let err = sorter
        .sort(Cursor::new(input), FailingSink { budget: 10_000 })
        .unwrap_err();

    assert!(matches!(err, CerealError::SortFailure { phase: "merge", .. }));
    assert!(matches!(err.root_cause(), CerealError::Io(_)));
    assert_eq!(sorter.state(), SortState::Failed);
    assert_eq!(leftovers(workspace.path()), 0);
    Ok(())
}

#[test]
fn test_sort_file_in_place() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let data_dir = TempDir::new()?;
    let path = data_dir.path().join("forecasts.cereal");
    fs::write(&path, encode(&forecasts(3_000, 13))?)?;

    let mut sorter = ExternalSorter::new(by_timestamp)
        .with_config(SortConfig::default().with_block_size(8_192).with_workspace(workspace.path()));
    let stats = sorter.sort_files(&path, &path)?;

    assert_eq!(stats.records_written, 3_000);
    let sorted = decode(&fs::read(&path)?)?;
    assert_eq!(sorted.len(), 3_000);
    assert!(sorted.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(leftovers(workspace.path()), 0);
    assert_eq!(leftovers(data_dir.path()), 1);
    Ok(())
}

#[test]
fn test_failed_in_place_sort_keeps_input() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let data_dir = TempDir::new()?;
    let path = data_dir.path().join("timestamps.cereal");

    let plain = LimitedTimestamps {
        decoded: AtomicUsize::new(0),
        limit: 0,
    };
    let mut writer = CerealWriter::new(Vec::new());
    for t in (0..1_000i64).rev() {
        writer.write_with(&plain, &t)?;
    }
    let original = writer.into_inner();
    fs::write(&path, &original)?;

    // Every record decodes once while partitioning, so the merge runs dry
    // half way through.
    let codec = LimitedTimestamps {
        decoded: AtomicUsize::new(0),
        limit: 1_500,
    };
    let mut sorter = ExternalSorter::with_cerealizer(|a: &i64, b: &i64| a.cmp(b), codec)
        .with_config(SortConfig::default().with_block_size(1_024).with_workspace(workspace.path()));
    let err = sorter.sort_files(&path, &path).unwrap_err();

    assert!(matches!(err, CerealError::SortFailure { phase: "merge", .. }));
    assert!(matches!(err.root_cause(), CerealError::OutOfRange(_)));
    assert_eq!(sorter.state(), SortState::Failed);
    assert_eq!(fs::read(&path)?, original);
    assert_eq!(leftovers(data_dir.path()), 1);
    assert_eq!(leftovers(workspace.path()), 0);
    Ok(())
}

#[test]
fn test_external_cerealizer_sorts_strings() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let names = ["pear", "apple", "fig", "banana", "cherry", "date"];
    let mut writer = CerealWriter::new(Vec::new());
    for name in names.iter().cycle().take(600) {
        writer.write_with(&StringCerealizer, &Some((*name).to_owned()))?;
    }
    writer.write_with(&StringCerealizer, &None::<String>)?;
    let bytes = writer.into_inner();

    let mut sorter = ExternalSorter::with_cerealizer(
        |a: &Option<String>, b: &Option<String>| a.cmp(b),
        StringCerealizer,
    )
    .with_config(SortConfig::default().with_block_size(512).with_workspace(workspace.path()));
    let mut output = Vec::new();
    let stats = sorter.sort(Cursor::new(bytes), &mut output)?;
    assert!(stats.runs > 1);

    let mut reader = CerealReader::new(output.as_slice());
    let mut sorted = Vec::new();
    while let Some(name) = reader.read_with(&StringCerealizer)? {
        sorted.push(name);
    }
    assert_eq!(sorted.len(), 601);
    assert_eq!(sorted[0], None);
    assert_eq!(sorted[1].as_deref(), Some("apple"));
    assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
    Ok(())
}

#[test]
fn test_sort_into_existing_writer() -> cereal::Result<()> {
    let workspace = TempDir::new()?;
    let bytes = encode(&forecasts(300, 17))?;
    let mut reader = CerealReader::new(bytes.as_slice());
    let mut writer = CerealWriter::new(Vec::new());

    let mut sorter = ExternalSorter::new(|a: &Forecast, b: &Forecast| b.timestamp.cmp(&a.timestamp))
        .with_config(SortConfig::default().with_block_size(1_024).with_workspace(workspace.path()));
    sorter.sort_into(&mut reader, &mut writer)?;

    assert_eq!(writer.records_written(), 300);
    let sorted = decode(&writer.into_inner())?;
    assert!(sorted.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    Ok(())
}
