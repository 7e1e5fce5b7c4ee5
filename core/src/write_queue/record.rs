//! Replay record framing
//!
//! ```text
//! [kind u8][step i32 BE][len u32 BE][payload; len]
//! ```
//!
//! `Inputs` payloads are `[local_len u16 BE][local][remote]`. `Checkpoint`
//! payloads are the opaque diff bytes. `Metadata` payloads are JSON and only
//! appear as the last record of a file.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::metadata::ReplayMetadata;
use crate::step::StepIndex;

/// File magic written by the replay sink before the first record
pub const REPLAY_MAGIC: &[u8; 4] = b"RSRP";

/// Replay format version
pub const REPLAY_VERSION: u16 = 1;

const KIND_INPUTS: u8 = 0x01;
const KIND_CHECKPOINT: u8 = 0x02;
const KIND_METADATA: u8 = 0x03;

/// One entry of a replay file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayRecord {
    /// Both players' inputs for a confirmed step
    Inputs {
        step: StepIndex,
        local: Vec<u8>,
        remote: Vec<u8>,
    },
    /// Diff of the state at `step` against the session's reference state
    Checkpoint { step: StepIndex, diff: Vec<u8> },
    /// Session summary, written on close
    Metadata(ReplayMetadata),
}

impl ReplayRecord {
    pub fn step(&self) -> StepIndex {
        match self {
            Self::Inputs { step, .. } | Self::Checkpoint { step, .. } => *step,
            Self::Metadata(metadata) => metadata.last_step.unwrap_or(0),
        }
    }

    /// Encode to a framed record.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let (kind, payload) = match self {
            Self::Inputs { local, remote, .. } => {
                let local_len = u16::try_from(local.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "local input too large")
                })?;
                let mut payload = Vec::with_capacity(2 + local.len() + remote.len());
                payload.write_u16::<BigEndian>(local_len)?;
                payload.extend_from_slice(local);
                payload.extend_from_slice(remote);
                (KIND_INPUTS, payload)
            }
            Self::Checkpoint { diff, .. } => (KIND_CHECKPOINT, diff.clone()),
            Self::Metadata(metadata) => (
                KIND_METADATA,
                serde_json::to_vec(metadata)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            ),
        };
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large"))?;

        writer.write_u8(kind)?;
        writer.write_i32::<BigEndian>(self.step())?;
        writer.write_u32::<BigEndian>(len)?;
        writer.write_all(&payload)
    }

    /// Read one record. `Ok(None)` at a clean end of input.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let kind = match reader.read_u8() {
            Ok(kind) => kind,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let step = reader.read_i32::<BigEndian>()?;
        let len = reader.read_u32::<BigEndian>()?;
        // The length is untrusted: grow the buffer only as bytes arrive
        let mut payload = Vec::new();
        reader.by_ref().take(u64::from(len)).read_to_end(&mut payload)?;
        if payload.len() != len as usize {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("record payload cut short: {} of {len} bytes", payload.len()),
            ));
        }

        let record = match kind {
            KIND_INPUTS => {
                let mut cursor = payload.as_slice();
                let local_len = cursor.read_u16::<BigEndian>()? as usize;
                if local_len > cursor.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "local input length exceeds record",
                    ));
                }
                let (local, remote) = cursor.split_at(local_len);
                Self::Inputs {
                    step,
                    local: local.to_vec(),
                    remote: remote.to_vec(),
                }
            }
            KIND_CHECKPOINT => Self::Checkpoint {
                step,
                diff: payload,
            },
            KIND_METADATA => Self::Metadata(
                serde_json::from_slice(&payload)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            ),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown record kind 0x{other:02X}"),
                ));
            }
        };
        Ok(Some(record))
    }
}

/// Write the file header.
pub fn write_header<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(REPLAY_MAGIC)?;
    writer.write_u16::<BigEndian>(REPLAY_VERSION)
}

/// Read a whole replay file: header, then records until the end.
pub fn read_replay<R: Read>(reader: &mut R) -> io::Result<Vec<ReplayRecord>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != REPLAY_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a replay file"));
    }
    let version = reader.read_u16::<BigEndian>()?;
    if version != REPLAY_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported replay version {version}"),
        ));
    }

    let mut records = Vec::new();
    while let Some(record) = ReplayRecord::read_from(reader)? {
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_layout() {
        let record = ReplayRecord::Inputs {
            step: -123,
            local: vec![1, 2],
            remote: vec![3],
        };
        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes[0], KIND_INPUTS);
        assert_eq!(&bytes[1..5], &(-123i32).to_be_bytes());
        assert_eq!(&bytes[5..9], &5u32.to_be_bytes());
        assert_eq!(&bytes[9..], &[0, 2, 1, 2, 3]);

        let decoded = ReplayRecord::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, Some(record));
    }

    #[test]
    fn test_read_replay() {
        let mut file = Vec::new();
        write_header(&mut file).unwrap();
        let records = vec![
            ReplayRecord::Inputs {
                step: 0,
                local: vec![1],
                remote: vec![2],
            },
            ReplayRecord::Checkpoint {
                step: 60,
                diff: vec![9; 16],
            },
        ];
        for record in &records {
            record.write_to(&mut file).unwrap();
        }
        assert_eq!(read_replay(&mut file.as_slice()).unwrap(), records);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(read_replay(&mut &b"NOPE\x00\x01"[..]).is_err());

        let mut truncated = ReplayRecord::Checkpoint {
            step: 1,
            diff: vec![0; 8],
        }
        .to_bytes()
        .unwrap();
        truncated.truncate(12);
        assert!(ReplayRecord::read_from(&mut truncated.as_slice()).is_err());

        let unknown = [0x7F, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(ReplayRecord::read_from(&mut &unknown[..]).is_err());
    }

    #[test]
    fn test_huge_length_on_short_input() {
        let mut bytes = vec![KIND_CHECKPOINT];
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);

        let err = ReplayRecord::read_from(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
