/// Integration tests: encode and decode real files through a shared pool.
///
/// Covers the archive invariants (exactly 64 records, fixed partition,
/// in-order output under skewed completion), rejection of bad inputs, damaged
/// archives, and the batch runner driving the codec.
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use aar_codecs::{DeflateCodec, PassThroughCodec};
use aar_core::format::{scan_records, NUM_BLOCKS};
use aar_core::{
    AarError, Codec, Decoder, Encoder, ErrorKind, ErrorPolicy, NoObserver, NoProgress,
    TaskRunner, TaskState, WorkerPool,
};

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn write_input(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

fn deflate_pair(pool: &WorkerPool) -> (Encoder, Decoder) {
    (
        Encoder::new(pool.clone(), Arc::new(DeflateCodec::default())),
        Decoder::new(pool.clone(), Arc::new(DeflateCodec::default())),
    )
}

fn passthrough_encoder(pool: &WorkerPool) -> Encoder {
    Encoder::new(pool.clone(), Arc::new(PassThroughCodec))
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn record_lengths(archive: &Path) -> Vec<u32> {
    let len = fs::metadata(archive).unwrap().len();
    scan_records(File::open(archive).unwrap(), len)
        .unwrap()
        .iter()
        .map(|r| r.compressed_len)
        .collect()
}

/// Encode, delete the source, decode in place, and return the restored bytes.
fn roundtrip(pool: &WorkerPool, dir: &Path, data: &[u8]) -> Vec<u8> {
    let (encoder, decoder) = deflate_pair(pool);
    let input = write_input(dir, "input.bin", data);

    let encoded = encoder.encode(&input).unwrap();
    assert_eq!(encoded.output, dir.join("input.bin.aar"));
    assert_eq!(encoded.source_len, data.len() as u64);
    fs::remove_file(&input).unwrap();

    let decoded = decoder.decode(&encoded.output).unwrap();
    assert_eq!(decoded.output, input);
    assert_eq!(decoded.restored_len, data.len() as u64);
    fs::read(&input).unwrap()
}

// ── round trips ────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_sizes() {
    let pool = WorkerPool::new(4);
    for (len, seed) in [(64usize, 1u64), (1000, 2), (63 * 100, 3), (63 * 100 + 62, 4)] {
        let dir = tempfile::tempdir().unwrap();
        let data = pseudo_random_bytes(len, seed);
        assert_eq!(roundtrip(&pool, dir.path(), &data), data, "len {len}");
    }
    pool.shutdown();
}

#[test]
fn test_roundtrip_compressible_megabyte() {
    let pool = WorkerPool::with_available_parallelism();
    let dir = tempfile::tempdir().unwrap();
    let data = compressible_bytes(1024 * 1024 + 17);

    let (encoder, _) = deflate_pair(&pool);
    let input = write_input(dir.path(), "log.txt", &data);
    let report = encoder.encode(&input).unwrap();
    assert!(
        report.archive_len < data.len() as u64 / 4,
        "deflate should compress repetitive text: archive={} raw={}",
        report.archive_len,
        data.len()
    );
    assert!(report.ratio() > 4.0);
    assert!(report.status_message().starts_with("Compression took: "));
    fs::remove_file(&input).unwrap();

    let (_, decoder) = deflate_pair(&pool);
    decoder.decode(&report.output).unwrap();
    assert_eq!(fs::read(&input).unwrap(), data);
    pool.shutdown();
}

#[test]
fn test_encode_leaves_input_untouched() {
    let pool = WorkerPool::new(2);
    let dir = tempfile::tempdir().unwrap();
    let data = pseudo_random_bytes(5000, 9);
    let input = write_input(dir.path(), "keep.bin", &data);

    passthrough_encoder(&pool).encode(&input).unwrap();
    assert_eq!(fs::read(&input).unwrap(), data);
    assert_eq!(file_names(dir.path()), vec!["keep.bin", "keep.bin.aar"]);
    pool.shutdown();
}

#[cfg(unix)]
#[test]
fn test_outputs_get_the_default_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let pool = WorkerPool::new(2);
    let dir = tempfile::tempdir().unwrap();
    let data = pseudo_random_bytes(2000, 12);
    let input = write_input(dir.path(), "shared.bin", &data);
    let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
    let default_mode = mode(&input);

    let (encoder, decoder) = deflate_pair(&pool);
    let archive = encoder.encode(&input).unwrap().output;
    assert_eq!(mode(&archive), default_mode);

    fs::remove_file(&input).unwrap();
    decoder.decode(&archive).unwrap();
    assert_eq!(mode(&input), default_mode);
    assert_eq!(fs::read(&input).unwrap(), data);
    pool.shutdown();
}

// ── layout invariants ──────────────────────────────────────────────────────

#[test]
fn test_always_64_records() {
    let pool = WorkerPool::new(4);
    let encoder = Encoder::new(pool.clone(), Arc::new(DeflateCodec::default()));
    for len in [64usize, 65, 126, 4096, 100_003] {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "f", &pseudo_random_bytes(len, len as u64));
        let report = encoder.encode(&input).unwrap();
        assert_eq!(record_lengths(&report.output).len(), NUM_BLOCKS, "len {len}");
    }
    pool.shutdown();
}

#[test]
fn test_partition_of_1000_bytes() {
    let pool = WorkerPool::new(4);
    let dir = tempfile::tempdir().unwrap();
    let data = pseudo_random_bytes(1000, 77);
    let input = write_input(dir.path(), "thousand", &data);

    let report = passthrough_encoder(&pool).encode(&input).unwrap();
    let lengths = record_lengths(&report.output);
    assert!(lengths[..63].iter().all(|&l| l == 15));
    assert_eq!(lengths[63], 55);

    // Passthrough archive = prefixes + the source, block by block.
    let archive = fs::read(&report.output).unwrap();
    assert_eq!(archive.len(), 1000 + 4 * NUM_BLOCKS);
    assert_eq!(&archive[0..4], &15u32.to_be_bytes());
    assert_eq!(&archive[4..19], &data[0..15]);
    assert_eq!(&archive[archive.len() - 55..], &data[945..]);
    pool.shutdown();
}

#[test]
fn test_minimum_size_is_64_bytes() {
    let pool = WorkerPool::new(2);
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "min", &pseudo_random_bytes(64, 5));

    let report = passthrough_encoder(&pool).encode(&input).unwrap();
    assert_eq!(record_lengths(&report.output), vec![1u32; NUM_BLOCKS]);
    pool.shutdown();
}

#[test]
fn test_exact_multiple_has_empty_last_block() {
    let pool = WorkerPool::new(2);
    let dir = tempfile::tempdir().unwrap();
    let data = pseudo_random_bytes(63 * 8, 6);
    let input = write_input(dir.path(), "even", &data);

    let report = passthrough_encoder(&pool).encode(&input).unwrap();
    let lengths = record_lengths(&report.output);
    assert_eq!(lengths[62], 8);
    assert_eq!(lengths[63], 0);

    fs::remove_file(&input).unwrap();
    Decoder::new(pool.clone(), Arc::new(PassThroughCodec))
        .decode(&report.output)
        .unwrap();
    assert_eq!(fs::read(&input).unwrap(), data);
    pool.shutdown();
}

#[test]
fn test_progress_reaches_all_blocks() {
    let pool = WorkerPool::new(3);
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "p", &pseudo_random_bytes(10_000, 8));

    let max_done = Arc::new(AtomicU64::new(0));
    let sink = {
        let max_done = Arc::clone(&max_done);
        move |done: u64, total: u64| {
            assert_eq!(total, NUM_BLOCKS as u64);
            max_done.fetch_max(done, Ordering::AcqRel);
        }
    };
    let encoder = Encoder::new(pool.clone(), Arc::new(DeflateCodec::default()));
    encoder
        .encode_to(&input, &dir.path().join("p.aar"), Arc::new(sink))
        .unwrap();
    assert_eq!(max_done.load(Ordering::Acquire), NUM_BLOCKS as u64);
    pool.shutdown();
}

// ── ordering under skew ────────────────────────────────────────────────────

/// Passthrough codec that stalls on the block whose bytes are all zero and
/// records the first byte of every block in completion order.
struct SkewedCodec {
    delay: Duration,
    completed: Mutex<Vec<u8>>,
}

impl SkewedCodec {
    fn new() -> Self {
        Self {
            delay: Duration::from_millis(300),
            completed: Mutex::new(Vec::new()),
        }
    }

    fn pass(&self, bytes: &[u8]) -> Vec<u8> {
        let tag = bytes.first().copied().unwrap_or(u8::MAX);
        if tag == 0 {
            thread::sleep(self.delay);
        }
        self.completed.lock().unwrap().push(tag);
        bytes.to_vec()
    }
}

impl Codec for SkewedCodec {
    fn name(&self) -> &'static str {
        "skewed"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.pass(raw))
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.pass(compressed))
    }
}

/// 100 bytes per block; every byte of block `i` is `i`, last block 50 bytes.
fn tagged_blocks() -> Vec<u8> {
    (0..NUM_BLOCKS)
        .flat_map(|i| {
            let len = if i == NUM_BLOCKS - 1 { 50 } else { 100 };
            std::iter::repeat(i as u8).take(len)
        })
        .collect()
}

#[test]
fn test_order_preserved_when_block_zero_finishes_last() {
    let pool = WorkerPool::new(4);
    let dir = tempfile::tempdir().unwrap();
    let data = tagged_blocks();
    assert_eq!(data.len(), 63 * 100 + 50);
    let input = write_input(dir.path(), "skew.bin", &data);

    let codec = Arc::new(SkewedCodec::new());
    let encoder = Encoder::new(pool.clone(), codec.clone());
    let report = encoder.encode(&input).unwrap();
    assert_eq!(codec.completed.lock().unwrap().last(), Some(&0));
    codec.completed.lock().unwrap().clear();

    let archive = fs::read(&report.output).unwrap();
    assert_eq!(&archive[4..104], &[0u8; 100][..]);

    fs::remove_file(&input).unwrap();
    let decoder = Decoder::new(pool.clone(), codec.clone());
    decoder.decode(&report.output).unwrap();
    assert_eq!(
        codec.completed.lock().unwrap().last(),
        Some(&0),
        "block 0 should have been the last to finish decoding"
    );
    assert_eq!(fs::read(&input).unwrap(), data);
    pool.shutdown();
}

// ── rejected inputs ────────────────────────────────────────────────────────

#[test]
fn test_too_small_writes_nothing() {
    let pool = WorkerPool::new(2);
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "tiny", &[7u8; 63]);

    let err = passthrough_encoder(&pool).encode(&input).unwrap_err();
    assert!(matches!(err, AarError::TooSmall { len: 63, .. }));
    assert!(err.to_string().contains("too small"));
    assert_eq!(file_names(dir.path()), vec!["tiny"]);
    assert_eq!(pool.stats().submitted, 0);
    pool.shutdown();
}

#[test]
fn test_directory_is_not_a_file() {
    let pool = WorkerPool::new(1);
    let dir = tempfile::tempdir().unwrap();
    let err = passthrough_encoder(&pool).encode(dir.path()).unwrap_err();
    assert!(matches!(err, AarError::NotAFile { .. }));
    assert!(err.is_precondition());

    let missing = dir.path().join("missing");
    assert!(matches!(
        passthrough_encoder(&pool).encode(&missing),
        Err(AarError::NotAFile { .. })
    ));
    pool.shutdown();
}

#[test]
fn test_decode_requires_aar_extension() {
    let pool = WorkerPool::new(1);
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "data.bin", &[0u8; 300]);
    let (_, decoder) = deflate_pair(&pool);

    let err = decoder.decode(&input).unwrap_err();
    assert!(matches!(err, AarError::NotAnArchive { .. }));
    assert!(err.to_string().starts_with("not an .aar file"));

    let missing = dir.path().join("gone.aar");
    assert!(matches!(decoder.decode(&missing), Err(AarError::NotAnArchive { .. })));
    pool.shutdown();
}

// ── damaged archives ───────────────────────────────────────────────────────

/// Encodes 4 KiB of data and returns `(dir, archive path)`.
fn encoded_archive(pool: &WorkerPool) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "src.bin", &compressible_bytes(4096));
    let report = deflate_pair(pool).0.encode(&input).unwrap();
    fs::remove_file(&input).unwrap();
    (dir, report.output)
}

fn assert_corrupt_without_output(result: aar_core::Result<aar_core::DecodeReport>, dir: &Path) {
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption, "unexpected error: {err}");
    assert_eq!(file_names(dir), vec!["src.bin.aar"]);
}

#[test]
fn test_truncated_archive_fails_cleanly() {
    let pool = WorkerPool::new(4);
    let (dir, archive) = encoded_archive(&pool);
    let len = fs::metadata(&archive).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&archive)
        .unwrap()
        .set_len(len - 10)
        .unwrap();

    let result = deflate_pair(&pool).1.decode(&archive);
    assert_corrupt_without_output(result, dir.path());
    pool.shutdown();
}

#[test]
fn test_truncated_inside_length_prefix() {
    let pool = WorkerPool::new(2);
    let (dir, archive) = encoded_archive(&pool);
    OpenOptions::new()
        .write(true)
        .open(&archive)
        .unwrap()
        .set_len(2)
        .unwrap();

    let result = deflate_pair(&pool).1.decode(&archive);
    assert!(matches!(result, Err(AarError::Truncated { index: 0 })));
    assert_eq!(file_names(dir.path()), vec!["src.bin.aar"]);
    pool.shutdown();
}

#[test]
fn test_oversized_length_prefix() {
    let pool = WorkerPool::new(2);
    let (dir, archive) = encoded_archive(&pool);
    let mut file = OpenOptions::new().write(true).open(&archive).unwrap();
    file.write_all(&0x7FFF_FFFFu32.to_be_bytes()).unwrap();
    drop(file);

    let result = deflate_pair(&pool).1.decode(&archive);
    assert!(matches!(result, Err(AarError::ImplausibleLength { index: 0, .. })));
    assert_eq!(file_names(dir.path()), vec!["src.bin.aar"]);
    pool.shutdown();
}

#[test]
fn test_trailing_bytes_rejected() {
    let pool = WorkerPool::new(2);
    let (dir, archive) = encoded_archive(&pool);
    let mut file = OpenOptions::new().append(true).open(&archive).unwrap();
    file.write_all(b"extra").unwrap();
    drop(file);

    let result = deflate_pair(&pool).1.decode(&archive);
    assert_corrupt_without_output(result, dir.path());
    pool.shutdown();
}

#[test]
fn test_corrupt_block_payload() {
    let pool = WorkerPool::new(4);
    let (dir, archive) = encoded_archive(&pool);

    // Break the zlib header of block 5.
    let lengths = record_lengths(&archive);
    let offset: u64 = lengths[..5].iter().map(|&l| 4 + l as u64).sum::<u64>() + 4;
    let mut file = OpenOptions::new().write(true).open(&archive).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    drop(file);

    let result = deflate_pair(&pool).1.decode(&archive);
    let err = result.unwrap_err();
    assert!(matches!(err, AarError::Codec { index: 5, .. }), "got {err}");
    assert_eq!(file_names(dir.path()), vec!["src.bin.aar"]);

    // The pool keeps working after the failed file.
    let (_dir2, fine) = encoded_archive(&pool);
    deflate_pair(&pool).1.decode(&fine).unwrap();
    pool.shutdown();
}

// ── pool sharing and shutdown ──────────────────────────────────────────────

#[test]
fn test_concurrent_encodes_share_one_pool() {
    let pool = WorkerPool::new(3);
    let handles: Vec<_> = (0..4u64)
        .map(|seed| {
            let pool = pool.clone();
            thread::spawn(move || {
                let dir = tempfile::tempdir().unwrap();
                let data = pseudo_random_bytes(20_000 + seed as usize * 333, seed);
                assert_eq!(roundtrip(&pool, dir.path(), &data), data);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.stats().submitted, 4 * 2 * NUM_BLOCKS);
    pool.shutdown();
}

#[test]
fn test_encode_after_shutdown_fails_without_output() {
    let pool = WorkerPool::new(2);
    pool.shutdown();
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "late", &[1u8; 500]);

    let err = passthrough_encoder(&pool).encode(&input).unwrap_err();
    assert!(matches!(err, AarError::PoolClosed));
    assert_eq!(file_names(dir.path()), vec!["late"]);
}

// ── batches ────────────────────────────────────────────────────────────────

#[test]
fn test_batch_skips_bad_inputs_and_continues() {
    let pool = WorkerPool::new(4);
    let dir = tempfile::tempdir().unwrap();
    let good = write_input(dir.path(), "good.bin", &pseudo_random_bytes(3000, 1));
    let tiny = write_input(dir.path(), "tiny.bin", b"short");
    let missing = dir.path().join("missing.bin");

    let runner = TaskRunner::new(Arc::new(NoObserver), ErrorPolicy::ContinueOnError);
    let step = Arc::new(Encoder::new(pool.clone(), Arc::new(DeflateCodec::default())));
    let summary = runner
        .start(vec![tiny, missing, good.clone()], step)
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(summary.skipped.len(), 2);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.completed, vec![(good, dir.path().join("good.bin.aar"))]);
    assert_eq!(runner.status().state, TaskState::Succeeded);
    assert!(runner.status().message.starts_with("Compression took: "));
    pool.shutdown();
}

#[test]
fn test_batch_failure_policies() {
    let pool = WorkerPool::new(4);
    let (dir, good) = encoded_archive(&pool);
    let bad = dir.path().join("bad.bin.aar");
    fs::write(&bad, [0u8, 0, 0]).unwrap();
    let decoder = Decoder::new(pool.clone(), Arc::new(DeflateCodec::default()));

    let abort = TaskRunner::new(Arc::new(NoObserver), ErrorPolicy::AbortOnError);
    let summary = abort.run(&[bad.clone(), good.clone()], &decoder).unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.completed.is_empty());
    assert!(!dir.path().join("src.bin").exists());
    assert_eq!(abort.status().state, TaskState::Failed);

    let keep_going = TaskRunner::new(Arc::new(NoObserver), ErrorPolicy::ContinueOnError);
    let summary = keep_going.run(&[bad, good], &decoder).unwrap();
    assert!(!summary.aborted);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(fs::read(dir.path().join("src.bin")).unwrap(), compressible_bytes(4096));
    assert_eq!(keep_going.status().state, TaskState::Failed);
    pool.shutdown();
}

#[test]
fn test_decode_to_explicit_path() {
    let pool = WorkerPool::new(2);
    let (dir, archive) = encoded_archive(&pool);
    let target = dir.path().join("elsewhere.out");
    let report = deflate_pair(&pool)
        .1
        .decode_to(&archive, &target, Arc::new(NoProgress))
        .unwrap();
    assert_eq!(report.output, target);
    assert!(report.status_message().starts_with("Decompression took: "));
    assert_eq!(fs::read(&target).unwrap(), compressible_bytes(4096));
    pool.shutdown();
}
