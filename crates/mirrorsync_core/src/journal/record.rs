//! Journal batch types and framing.

use crate::error::{CoreError, CoreResult};
use mirrorsync_protocol::{Entity, EntityId, PendingOperation};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"MSJL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub(crate) const HEADER_SIZE: usize = 10;

pub(crate) const CRC_SIZE: usize = 4;

/// A single change to the mirrored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert or replace an entity row.
    PutEntity(Entity),
    /// Remove an entity row.
    DeleteEntity(EntityId),
    /// Insert or replace a queued operation.
    PutOperation(PendingOperation),
    /// Remove a queued operation by id.
    RemoveOperation(u64),
}

/// Allocation counters carried by every batch so ids are never reused after
/// the operations that consumed them are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Next pending-operation id.
    pub next_operation_id: u64,
    /// Next pending-operation sequence.
    pub next_sequence: u64,
}

/// One atomic journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Commit sequence of this batch.
    pub sequence: u64,
    /// Counters after this batch is applied.
    pub counters: Counters,
    /// Mutations, applied in order.
    pub mutations: Vec<Mutation>,
}

impl Batch {
    /// Encodes the batch into a framed record.
    ///
    /// # Errors
    ///
    /// Returns an error if CBOR encoding fails or the payload exceeds
    /// `u32::MAX` bytes.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| CoreError::codec(format!("failed to encode batch: {e}")))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("journal batch too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    fn decode_payload(payload: &[u8], offset: u64) -> CoreResult<Self> {
        ciborium::from_reader(payload).map_err(|e| {
            CoreError::journal_corruption(offset, format!("undecodable batch: {e}"))
        })
    }
}

/// Damage found at the end of the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailDamage {
    /// The final record is shorter than its header claims.
    Truncated,
    /// The final record is complete but its checksum does not match.
    Checksum,
}

/// Result of walking a journal image.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalScan {
    /// Complete batches with their offsets.
    pub batches: Vec<(u64, Batch)>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Total bytes inspected.
    pub total_len: u64,
    /// Damage after the valid prefix, if any.
    pub tail: Option<TailDamage>,
}

/// Walks a journal image and returns every complete batch.
///
/// A partial or checksum-failing *final* record is reported as tail damage
/// and excluded; it is what a crash in the middle of an append leaves
/// behind. The same damage followed by more data is an error.
///
/// # Errors
///
/// Returns an error for bad magic, an unsupported version, a checksum
/// mismatch before the last record, or an undecodable payload.
pub fn scan(data: &[u8]) -> CoreResult<JournalScan> {
    let total_len = data.len() as u64;
    let mut batches = Vec::new();
    let mut pos = 0usize;
    let mut tail = None;

    while pos < data.len() {
        let offset = pos as u64;
        let remaining = data.len() - pos;
        if remaining < HEADER_SIZE {
            tail = Some(TailDamage::Truncated);
            break;
        }

        let header = &data[pos..pos + HEADER_SIZE];
        if header[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption(offset, "invalid magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(
                offset,
                format!("unsupported format version {version}"),
            ));
        }
        let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let record_len = HEADER_SIZE + len + CRC_SIZE;
        if remaining < record_len {
            tail = Some(TailDamage::Truncated);
            break;
        }

        let body_end = pos + HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let actual = compute_crc32(&data[pos..body_end]);
        if stored != actual {
            if pos + record_len == data.len() {
                tail = Some(TailDamage::Checksum);
                break;
            }
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected: stored,
                actual,
            });
        }

        let batch = Batch::decode_payload(&data[pos + HEADER_SIZE..body_end], offset)?;
        batches.push((offset, batch));
        pos += record_len;
    }

    Ok(JournalScan {
        batches,
        valid_len: pos as u64,
        total_len,
        tail,
    })
}

/// Computes a CRC32 checksum (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_protocol::OperationKind;

    fn batch(sequence: u64) -> Batch {
        Batch {
            sequence,
            counters: Counters {
                next_operation_id: sequence + 1,
                next_sequence: sequence + 1,
            },
            mutations: vec![
                Mutation::PutEntity(Entity::synced("g1", sequence, Default::default())),
                Mutation::PutOperation(PendingOperation {
                    id: sequence,
                    entity_id: EntityId::new("g1"),
                    kind: OperationKind::Update,
                    sequence,
                    enqueued_at: 0,
                }),
            ],
        }
    }

    fn image(batches: &[Batch]) -> Vec<u8> {
        batches
            .iter()
            .flat_map(|b| b.encode_frame().unwrap())
            .collect()
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frame_layout() {
        let frame = batch(1).encode_frame().unwrap();
        assert_eq!(&frame[0..4], b"MSJL");
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), JOURNAL_VERSION);
        let len = u32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]) as usize;
        assert_eq!(frame.len(), HEADER_SIZE + len + CRC_SIZE);
    }

    #[test]
    fn scan_reads_all_batches() {
        let data = image(&[batch(1), batch(2), batch(3)]);
        let scan = scan(&data).unwrap();
        assert_eq!(scan.batches.len(), 3);
        assert_eq!(scan.batches[2].1, batch(3));
        assert_eq!(scan.valid_len, data.len() as u64);
        assert_eq!(scan.tail, None);
    }

    #[test]
    fn partial_final_record_is_tail_damage() {
        let mut data = image(&[batch(1), batch(2)]);
        let first_len = batch(1).encode_frame().unwrap().len();
        data.truncate(data.len() - 3);

        let scan = scan(&data).unwrap();
        assert_eq!(scan.batches.len(), 1);
        assert_eq!(scan.valid_len, first_len as u64);
        assert_eq!(scan.tail, Some(TailDamage::Truncated));
    }

    #[test]
    fn partial_header_is_tail_damage() {
        let mut data = image(&[batch(1)]);
        data.extend_from_slice(b"MSJ");
        let scan = scan(&data).unwrap();
        assert_eq!(scan.batches.len(), 1);
        assert_eq!(scan.tail, Some(TailDamage::Truncated));
    }

    #[test]
    fn checksum_failure_on_last_record_is_tail_damage() {
        let mut data = image(&[batch(1), batch(2)]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let scan = scan(&data).unwrap();
        assert_eq!(scan.batches.len(), 1);
        assert_eq!(scan.tail, Some(TailDamage::Checksum));
    }

    #[test]
    fn checksum_failure_before_last_record_is_fatal() {
        let mut data = image(&[batch(1), batch(2)]);
        data[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            scan(&data),
            Err(CoreError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut data = image(&[batch(1)]);
        data[0] = b'X';
        assert!(matches!(
            scan(&data),
            Err(CoreError::JournalCorruption { .. })
        ));
    }
}
