// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Framed-scan engine for the binary side-channels.
//!
//! Both streams share one record layout, little-endian, packed:
//! `magic[4] | len:u32 | frame_id:u64 | ts_ns:u64 | crc:u32 | payload[len]`
//! with CRC-32 (IEEE) computed over the payload only. Latents are strictly
//! contiguous fixed-width records with frame stride 1; residuals are sparse
//! variable-width records sorted by frame. The scanner operates on bounded
//! buffers (one header plus one payload) and never maps a stream whole.

use crate::context::{LocalPolicy, ScanLimits};
use crate::error::{FlashFreezeError, FlashFreezeResult};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

pub const LATENTS_FILE: &str = "cam_latents.bin";
pub const RESIDUALS_FILE: &str = "cam_residuals.bin";

pub const LATENT_MAGIC: [u8; 4] = *b"L1\0\0";
pub const RESIDUAL_MAGIC: [u8; 4] = *b"R1\0\0";

pub const RECORD_HEADER_LEN: usize = 28;

const RESYNC_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Latents,
    Residuals,
}

impl StreamKind {
    pub fn magic(self) -> [u8; 4] {
        match self {
            StreamKind::Latents => LATENT_MAGIC,
            StreamKind::Residuals => RESIDUAL_MAGIC,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            StreamKind::Latents => LATENTS_FILE,
            StreamKind::Residuals => RESIDUALS_FILE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Latents => "latents",
            StreamKind::Residuals => "residuals",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Ok,
    Resynced,
    Missing,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Ok => "ok",
            RecordStatus::Resynced => "resynced",
            RecordStatus::Missing => "missing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(RecordStatus::Ok),
            "resynced" => Some(RecordStatus::Resynced),
            "missing" => Some(RecordStatus::Missing),
            _ => None,
        }
    }

    pub fn is_present(self) -> bool {
        !matches!(self, RecordStatus::Missing)
    }
}

/// One discovered (or synthesized) record. `offset`/`length` cover the whole
/// record including its header; synthesized `missing` rows carry the offset
/// of the corruption site and length zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub offset: u64,
    pub length: u64,
    pub status: RecordStatus,
    pub content_hash: String,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub rows: Vec<ScannedRecord>,
    pub resyncs: u64,
    pub skipped_bytes: u64,
}

/// Encode one framed record; shared by the producer tooling and tests.
pub fn encode_record(kind: StreamKind, frame_id: u64, timestamp_ns: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    out.extend_from_slice(&kind.magic());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&frame_id.to_le_bytes());
    out.extend_from_slice(&timestamp_ns.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    magic: [u8; 4],
    len: u32,
    frame_id: u64,
    timestamp_ns: u64,
    crc: u32,
}

fn parse_header(buf: &[u8; RECORD_HEADER_LEN]) -> RecordHeader {
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&buf[0..4]);
    let mut u32buf = [0u8; 4];
    let mut u64buf = [0u8; 8];
    u32buf.copy_from_slice(&buf[4..8]);
    let len = u32::from_le_bytes(u32buf);
    u64buf.copy_from_slice(&buf[8..16]);
    let frame_id = u64::from_le_bytes(u64buf);
    u64buf.copy_from_slice(&buf[16..24]);
    let timestamp_ns = u64::from_le_bytes(u64buf);
    u32buf.copy_from_slice(&buf[24..28]);
    let crc = u32::from_le_bytes(u32buf);
    RecordHeader {
        magic,
        len,
        frame_id,
        timestamp_ns,
        crc,
    }
}

struct StreamReader {
    reader: BufReader<File>,
    len: u64,
    name: &'static str,
}

impl StreamReader {
    fn open(path: &Path, kind: StreamKind) -> FlashFreezeResult<Self> {
        let file = File::open(path).map_err(|e| FlashFreezeError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| FlashFreezeError::io(path, e))?
            .len();
        Ok(Self {
            reader: BufReader::new(file),
            len,
            name: kind.file_name(),
        })
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> FlashFreezeResult<()> {
        self.reader
            .seek(SeekFrom::Start(pos))
            .and_then(|_| self.reader.read_exact(buf))
            .map_err(|e| FlashFreezeError::io(self.name, e))
    }
}

#[derive(Debug)]
struct ValidRecord {
    frame_id: u64,
    timestamp_ns: u64,
    record_len: u64,
    content_hash: String,
}

#[derive(Debug, Clone, Copy)]
enum Corrupt {
    BadMagic,
    WrongWidth { length: u32 },
    Crc { frame_id: u64 },
}

enum Step {
    Valid(ValidRecord),
    Corrupt(Corrupt),
}

/// Parse one record at `pos` in normal (synced) mode. Framing violations
/// that can only be explained by corruption come back as `Step::Corrupt`;
/// conditions that are fatal regardless of mode (truncation, an oversize
/// declared length) are returned as errors.
fn read_record(
    stream: &mut StreamReader,
    kind: StreamKind,
    limits: &ScanLimits,
    pos: u64,
) -> FlashFreezeResult<Step> {
    if stream.len - pos < RECORD_HEADER_LEN as u64 {
        return Err(FlashFreezeError::Truncated {
            file: stream.name.to_string(),
            offset: pos,
        });
    }
    let mut header_buf = [0u8; RECORD_HEADER_LEN];
    stream.read_at(pos, &mut header_buf)?;
    let header = parse_header(&header_buf);

    if header.magic != kind.magic() {
        return Ok(Step::Corrupt(Corrupt::BadMagic));
    }
    match kind {
        StreamKind::Latents => {
            if header.len != limits.latent_payload_len {
                return Ok(Step::Corrupt(Corrupt::WrongWidth { length: header.len }));
            }
        }
        StreamKind::Residuals => {
            if header.len > limits.residual_max_len {
                return Err(FlashFreezeError::OversizeRecord {
                    file: stream.name.to_string(),
                    offset: pos,
                    length: u64::from(header.len),
                    bound: u64::from(limits.residual_max_len),
                });
            }
        }
    }

    let payload_end = pos + RECORD_HEADER_LEN as u64 + u64::from(header.len);
    if payload_end > stream.len {
        return Err(FlashFreezeError::Truncated {
            file: stream.name.to_string(),
            offset: pos,
        });
    }
    let mut payload = vec![0u8; header.len as usize];
    stream.read_at(pos + RECORD_HEADER_LEN as u64, &mut payload)?;

    if crc32fast::hash(&payload) != header.crc {
        return Ok(Step::Corrupt(Corrupt::Crc {
            frame_id: header.frame_id,
        }));
    }

    Ok(Step::Valid(ValidRecord {
        frame_id: header.frame_id,
        timestamp_ns: header.timestamp_ns,
        record_len: RECORD_HEADER_LEN as u64 + u64::from(header.len),
        content_hash: hex::encode(blake3::hash(&payload).as_bytes()),
    }))
}

/// Parse a resync candidate: any defect at all disqualifies it, only a
/// CRC-valid record confirms the sync point.
fn parse_candidate(
    stream: &mut StreamReader,
    kind: StreamKind,
    limits: &ScanLimits,
    pos: u64,
) -> FlashFreezeResult<Option<ValidRecord>> {
    if stream.len - pos < RECORD_HEADER_LEN as u64 {
        return Ok(None);
    }
    let mut header_buf = [0u8; RECORD_HEADER_LEN];
    stream.read_at(pos, &mut header_buf)?;
    let header = parse_header(&header_buf);

    if header.magic != kind.magic() {
        return Ok(None);
    }
    let width_ok = match kind {
        StreamKind::Latents => header.len == limits.latent_payload_len,
        StreamKind::Residuals => header.len <= limits.residual_max_len,
    };
    if !width_ok {
        return Ok(None);
    }
    let payload_end = pos + RECORD_HEADER_LEN as u64 + u64::from(header.len);
    if payload_end > stream.len {
        return Ok(None);
    }
    let mut payload = vec![0u8; header.len as usize];
    stream.read_at(pos + RECORD_HEADER_LEN as u64, &mut payload)?;
    if crc32fast::hash(&payload) != header.crc {
        return Ok(None);
    }
    Ok(Some(ValidRecord {
        frame_id: header.frame_id,
        timestamp_ns: header.timestamp_ns,
        record_len: RECORD_HEADER_LEN as u64 + u64::from(header.len),
        content_hash: hex::encode(blake3::hash(&payload).as_bytes()),
    }))
}

enum ResyncEnd {
    Found { at: u64 },
    Eof,
    Exhausted { scanned: u64 },
}

/// Advance byte-wise from the corruption site looking for the next magic,
/// confirming each candidate with a full record parse.
fn resync(
    stream: &mut StreamReader,
    kind: StreamKind,
    limits: &ScanLimits,
    corrupt_at: u64,
) -> FlashFreezeResult<ResyncEnd> {
    let magic = kind.magic();
    let start = corrupt_at + 1;
    let mut from = start;

    while from < stream.len {
        if from - start > limits.resync_window {
            return Ok(ResyncEnd::Exhausted {
                scanned: from - start,
            });
        }
        let want = RESYNC_CHUNK.min((stream.len - from) as usize);
        let mut buf = vec![0u8; want];
        stream.read_at(from, &mut buf)?;

        let mut idx = 0usize;
        while idx + magic.len() <= buf.len() {
            let Some(hit) = buf[idx..]
                .windows(magic.len())
                .position(|window| window == magic)
            else {
                break;
            };
            let candidate = from + (idx + hit) as u64;
            if candidate - start > limits.resync_window {
                return Ok(ResyncEnd::Exhausted {
                    scanned: candidate - start,
                });
            }
            if parse_candidate(stream, kind, limits, candidate)?.is_some() {
                return Ok(ResyncEnd::Found { at: candidate });
            }
            idx = idx + hit + 1;
        }

        if from + want as u64 >= stream.len {
            break;
        }
        // Keep a magic-sized overlap so a magic split across chunks is found.
        from += (want - (magic.len() - 1)).max(1) as u64;
    }
    Ok(ResyncEnd::Eof)
}

fn corrupt_error(corrupt: Corrupt, name: &str, pos: u64, fixed_width: u32) -> FlashFreezeError {
    match corrupt {
        Corrupt::BadMagic => FlashFreezeError::BadMagic {
            file: name.to_string(),
            offset: pos,
        },
        Corrupt::WrongWidth { length } => FlashFreezeError::OversizeRecord {
            file: name.to_string(),
            offset: pos,
            length: u64::from(length),
            bound: u64::from(fixed_width),
        },
        Corrupt::Crc { frame_id } => FlashFreezeError::CrcMismatch {
            file: name.to_string(),
            offset: pos,
            frame_id,
        },
    }
}

fn scan_stream(
    path: &Path,
    kind: StreamKind,
    limits: &ScanLimits,
    strict: bool,
) -> FlashFreezeResult<ScanOutcome> {
    let mut stream = StreamReader::open(path, kind)?;
    let name = stream.name;
    let mut outcome = ScanOutcome::default();
    let mut pos = 0u64;
    let mut pending_resync = false;
    let mut corrupt_at = 0u64;
    let mut expected_next: Option<u64> = None;
    let mut last_frame: Option<u64> = None;

    while pos < stream.len {
        match read_record(&mut stream, kind, limits, pos)? {
            Step::Valid(valid) => {
                match kind {
                    StreamKind::Latents => {
                        if let Some(expected) = expected_next {
                            if valid.frame_id != expected {
                                if pending_resync && valid.frame_id > expected {
                                    for missing in expected..valid.frame_id {
                                        outcome.rows.push(ScannedRecord {
                                            frame_id: missing,
                                            timestamp_ns: 0,
                                            offset: corrupt_at,
                                            length: 0,
                                            status: RecordStatus::Missing,
                                            content_hash: String::new(),
                                        });
                                    }
                                } else {
                                    return Err(FlashFreezeError::OutOfOrder {
                                        file: name.to_string(),
                                        offset: pos,
                                        expected,
                                        found: valid.frame_id,
                                    });
                                }
                            }
                        }
                        expected_next = Some(valid.frame_id + 1);
                    }
                    StreamKind::Residuals => {
                        if let Some(last) = last_frame {
                            if valid.frame_id < last {
                                return Err(FlashFreezeError::OutOfOrder {
                                    file: name.to_string(),
                                    offset: pos,
                                    expected: last,
                                    found: valid.frame_id,
                                });
                            }
                        }
                        last_frame = Some(valid.frame_id);
                    }
                }

                let status = if pending_resync {
                    RecordStatus::Resynced
                } else {
                    RecordStatus::Ok
                };
                pending_resync = false;
                outcome.rows.push(ScannedRecord {
                    frame_id: valid.frame_id,
                    timestamp_ns: valid.timestamp_ns,
                    offset: pos,
                    length: valid.record_len,
                    status,
                    content_hash: valid.content_hash,
                });
                pos += valid.record_len;
            }
            Step::Corrupt(corrupt) => {
                if strict {
                    return Err(corrupt_error(corrupt, name, pos, limits.latent_payload_len));
                }
                corrupt_at = pos;
                match resync(&mut stream, kind, limits, pos)? {
                    ResyncEnd::Found { at } => {
                        let skipped = at - pos;
                        tracing::warn!(
                            file = name,
                            offset = pos,
                            skipped,
                            "resynchronized after corrupt record"
                        );
                        outcome.resyncs += 1;
                        outcome.skipped_bytes += skipped;
                        pending_resync = true;
                        pos = at;
                    }
                    ResyncEnd::Eof => {
                        let skipped = stream.len - pos;
                        tracing::warn!(
                            file = name,
                            offset = pos,
                            skipped,
                            "stream tail unrecoverable, scan terminated"
                        );
                        outcome.resyncs += 1;
                        outcome.skipped_bytes += skipped;
                        break;
                    }
                    ResyncEnd::Exhausted { scanned } => {
                        return Err(FlashFreezeError::ResyncLimit {
                            file: name.to_string(),
                            offset: pos,
                            scanned,
                        });
                    }
                }
            }
        }
    }
    Ok(outcome)
}

/// Scan the latent stream. Strict under the default policy: any corruption
/// is fatal with its precise cause; with `strict_latents` off the scanner
/// resyncs and synthesizes `missing` rows for skipped frames.
pub fn scan_latents(
    path: &Path,
    limits: &ScanLimits,
    policy: &LocalPolicy,
) -> FlashFreezeResult<ScanOutcome> {
    scan_stream(path, StreamKind::Latents, limits, policy.strict_latents)
}

/// Scan the residual stream: sparse, strict framing, resync on corruption.
pub fn scan_residuals(path: &Path, limits: &ScanLimits) -> FlashFreezeResult<ScanOutcome> {
    scan_stream(path, StreamKind::Residuals, limits, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn limits() -> ScanLimits {
        ScanLimits {
            latent_payload_len: 16,
            residual_max_len: 1024,
            resync_window: 4096,
        }
    }

    fn strict() -> LocalPolicy {
        LocalPolicy::default()
    }

    fn lenient() -> LocalPolicy {
        LocalPolicy {
            strict_latents: false,
            ..LocalPolicy::default()
        }
    }

    fn payload(frame: u64, len: usize) -> Vec<u8> {
        (0..len).map(|i| (frame as u8).wrapping_add(i as u8)).collect()
    }

    fn write_latents(dir: &Path, frames: std::ops::Range<u64>) -> std::path::PathBuf {
        let path = dir.join(LATENTS_FILE);
        let mut file = File::create(&path).unwrap();
        for frame in frames {
            let record = encode_record(
                StreamKind::Latents,
                frame,
                frame * 100,
                &payload(frame, 16),
            );
            file.write_all(&record).unwrap();
        }
        path
    }

    #[test]
    fn clean_latent_stream_yields_contiguous_ok_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_latents(dir.path(), 0..5);
        let outcome = scan_latents(&path, &limits(), &strict()).unwrap();
        assert_eq!(outcome.rows.len(), 5);
        assert_eq!(outcome.resyncs, 0);
        for (i, row) in outcome.rows.iter().enumerate() {
            assert_eq!(row.frame_id, i as u64);
            assert_eq!(row.status, RecordStatus::Ok);
            assert_eq!(row.offset, (i * (RECORD_HEADER_LEN + 16)) as u64);
            assert_eq!(row.length, (RECORD_HEADER_LEN + 16) as u64);
            assert_eq!(
                row.content_hash,
                hex::encode(blake3::hash(&payload(i as u64, 16)).as_bytes())
            );
        }
    }

    #[test]
    fn strict_latents_fail_fast_on_payload_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_latents(dir.path(), 0..4);
        let record_len = RECORD_HEADER_LEN + 16;
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[2 * record_len + RECORD_HEADER_LEN + 3] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let err = scan_latents(&path, &limits(), &strict()).unwrap_err();
        match err {
            FlashFreezeError::CrcMismatch {
                offset, frame_id, ..
            } => {
                assert_eq!(offset, (2 * record_len) as u64);
                assert_eq!(frame_id, 2);
            }
            other => panic!("expected CrcMismatch, got {other:?}"),
        }
    }

    #[test]
    fn lenient_latents_resync_and_synthesize_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_latents(dir.path(), 0..4);
        let record_len = RECORD_HEADER_LEN + 16;
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[record_len + RECORD_HEADER_LEN + 1] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let outcome = scan_latents(&path, &limits(), &lenient()).unwrap();
        assert_eq!(outcome.resyncs, 1);
        let statuses: Vec<(u64, RecordStatus)> = outcome
            .rows
            .iter()
            .map(|r| (r.frame_id, r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (0, RecordStatus::Ok),
                (1, RecordStatus::Missing),
                (2, RecordStatus::Resynced),
                (3, RecordStatus::Ok),
            ]
        );
    }

    #[test]
    fn strict_latents_report_bad_magic_and_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_latents(dir.path(), 0..2);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();
        let err = scan_latents(&path, &limits(), &strict()).unwrap_err();
        assert_eq!(err.code(), "E_BAD_MAGIC");

        let path = write_latents(dir.path(), 0..2);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 17; // declared length no longer matches the fixed width
        std::fs::write(&path, &bytes).unwrap();
        let err = scan_latents(&path, &limits(), &strict()).unwrap_err();
        assert_eq!(err.code(), "E_OVERSIZE_RECORD");
    }

    #[test]
    fn latent_gap_without_resync_is_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LATENTS_FILE);
        let mut file = File::create(&path).unwrap();
        for frame in [0u64, 1, 3] {
            file.write_all(&encode_record(
                StreamKind::Latents,
                frame,
                0,
                &payload(frame, 16),
            ))
            .unwrap();
        }
        drop(file);
        let err = scan_latents(&path, &limits(), &strict()).unwrap_err();
        match err {
            FlashFreezeError::OutOfOrder {
                expected, found, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected OutOfOrder, got {other:?}"),
        }
    }

    #[test]
    fn truncated_latent_tail_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_latents(dir.path(), 0..2);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        let err = scan_latents(&path, &limits(), &strict()).unwrap_err();
        assert_eq!(err.code(), "E_TRUNCATED");
    }

    #[test]
    fn residual_garbage_between_records_is_resynced_without_data_loss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESIDUALS_FILE);
        let mut file = File::create(&path).unwrap();
        file.write_all(&encode_record(StreamKind::Residuals, 10, 0, &payload(10, 40)))
            .unwrap();
        file.write_all(&[0xAAu8; 33]).unwrap();
        file.write_all(&encode_record(StreamKind::Residuals, 11, 0, &payload(11, 40)))
            .unwrap();
        file.write_all(&encode_record(StreamKind::Residuals, 13, 0, &payload(13, 40)))
            .unwrap();
        drop(file);

        let outcome = scan_residuals(&path, &limits()).unwrap();
        assert_eq!(outcome.resyncs, 1);
        assert_eq!(outcome.skipped_bytes, 33);
        let statuses: Vec<(u64, RecordStatus)> = outcome
            .rows
            .iter()
            .map(|r| (r.frame_id, r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (10, RecordStatus::Ok),
                (11, RecordStatus::Resynced),
                (13, RecordStatus::Ok),
            ]
        );
    }

    #[test]
    fn one_byte_residual_corruption_yields_exactly_one_resynced_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESIDUALS_FILE);
        let mut file = File::create(&path).unwrap();
        for frame in [5u64, 6, 7] {
            file.write_all(&encode_record(StreamKind::Residuals, frame, 0, &payload(frame, 64)))
                .unwrap();
        }
        drop(file);

        let record_len = RECORD_HEADER_LEN + 64;
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[RECORD_HEADER_LEN + record_len / 2] ^= 0x40; // inside frame 5's payload
        std::fs::write(&path, &bytes).unwrap();

        let outcome = scan_residuals(&path, &limits()).unwrap();
        let resynced: Vec<u64> = outcome
            .rows
            .iter()
            .filter(|r| r.status == RecordStatus::Resynced)
            .map(|r| r.frame_id)
            .collect();
        assert_eq!(outcome.resyncs, 1);
        assert_eq!(resynced.len(), 1);
        // Subsequent valid records all survive.
        assert!(outcome.rows.iter().any(|r| r.frame_id == 7));
    }

    #[test]
    fn oversize_residual_declaration_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESIDUALS_FILE);
        let mut record = encode_record(StreamKind::Residuals, 0, 0, &payload(0, 8));
        let oversize = limits().residual_max_len + 1;
        record[4..8].copy_from_slice(&oversize.to_le_bytes());
        std::fs::write(&path, &record).unwrap();

        let err = scan_residuals(&path, &limits()).unwrap_err();
        match err {
            FlashFreezeError::OversizeRecord { length, bound, .. } => {
                assert_eq!(length, u64::from(oversize));
                assert_eq!(bound, u64::from(limits().residual_max_len));
            }
            other => panic!("expected OversizeRecord, got {other:?}"),
        }
    }

    #[test]
    fn decreasing_residual_frames_are_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESIDUALS_FILE);
        let mut file = File::create(&path).unwrap();
        file.write_all(&encode_record(StreamKind::Residuals, 9, 0, &payload(9, 8)))
            .unwrap();
        file.write_all(&encode_record(StreamKind::Residuals, 8, 0, &payload(8, 8)))
            .unwrap();
        drop(file);
        let err = scan_residuals(&path, &limits()).unwrap_err();
        assert_eq!(err.code(), "E_OUT_OF_ORDER");
    }

    #[test]
    fn resync_window_exhaustion_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESIDUALS_FILE);
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0x55u8; 8192]).unwrap();
        file.write_all(&encode_record(StreamKind::Residuals, 0, 0, &payload(0, 8)))
            .unwrap();
        drop(file);

        let mut small = limits();
        small.resync_window = 1024;
        let err = scan_residuals(&path, &small).unwrap_err();
        assert_eq!(err.code(), "E_RESYNC_LIMIT");
    }

    #[test]
    fn unrecoverable_tail_ends_the_scan_with_skip_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESIDUALS_FILE);
        let mut file = File::create(&path).unwrap();
        file.write_all(&encode_record(StreamKind::Residuals, 1, 0, &payload(1, 8)))
            .unwrap();
        file.write_all(&[0x77u8; 100]).unwrap();
        drop(file);

        let outcome = scan_residuals(&path, &limits()).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.skipped_bytes, 100);
    }

    #[test]
    fn empty_stream_scans_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESIDUALS_FILE);
        std::fs::write(&path, b"").unwrap();
        let outcome = scan_residuals(&path, &limits()).unwrap();
        assert!(outcome.rows.is_empty());
    }

    proptest! {
        #[test]
        fn scanners_never_panic_on_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..2048)) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("stream.bin");
            std::fs::write(&path, &data).unwrap();
            let _ = scan_latents(&path, &limits(), &strict());
            let _ = scan_latents(&path, &limits(), &lenient());
            let _ = scan_residuals(&path, &limits());
        }

        #[test]
        fn residual_single_byte_flip_never_loses_later_records(
            flip_at in 0usize..(3 * (RECORD_HEADER_LEN + 32)),
            flip_bit in 0u8..8,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(RESIDUALS_FILE);
            let mut bytes = Vec::new();
            for frame in [2u64, 4, 6, 8] {
                bytes.extend_from_slice(&encode_record(StreamKind::Residuals, frame, 0, &payload(frame, 32)));
            }
            bytes[flip_at] ^= 1 << flip_bit;
            std::fs::write(&path, &bytes).unwrap();

            // A flip may corrupt at most the record it lands in; the final
            // record must survive whenever the flip landed before it.
            if let Ok(outcome) = scan_residuals(&path, &limits()) {
                if flip_at < 3 * (RECORD_HEADER_LEN + 32) {
                    prop_assert!(outcome.rows.iter().any(|r| r.frame_id == 8 && r.status.is_present()));
                }
            }
        }
    }
}
