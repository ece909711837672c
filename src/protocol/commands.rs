/*!
 * Typed request/response payloads for the seven protocol operations,
 * encoded over the frame kinds in [`Kind`].
 */

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::compress::delta::{BlockSignature, Signature};
use crate::error::{Error, Result};
use crate::fs::FileInfo;

use super::frame::{PayloadReader, PayloadWriter};

/// Frame kind tags. Request and response share a kind per operation; which
/// one a given frame is, is implied by which side reads it, since a
/// connection never has two operations in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Version = 1,
    WriteFile = 2,
    ReadFile = 3,
    CreateDirectory = 4,
    DeleteAllFiles = 5,
    FindFiles = 6,
    FindFilesEntry = 7,
    FindFilesEnd = 8,
    GetFileAttributes = 9,
    ServerStatus = 10,
    FileDataChunk = 11,
    FileDataEnd = 12,
    DeltaOpChunk = 13,
    DeltaEnd = 14,
    Ack = 15,
    ErrorResponse = 16,
}

impl Kind {
    pub fn from_u8(v: u8) -> Result<Self> {
        use Kind::*;
        Ok(match v {
            1 => Version,
            2 => WriteFile,
            3 => ReadFile,
            4 => CreateDirectory,
            5 => DeleteAllFiles,
            6 => FindFiles,
            7 => FindFilesEntry,
            8 => FindFilesEnd,
            9 => GetFileAttributes,
            10 => ServerStatus,
            11 => FileDataChunk,
            12 => FileDataEnd,
            13 => DeltaOpChunk,
            14 => DeltaEnd,
            15 => Ack,
            16 => ErrorResponse,
            other => return Err(Error::ProtocolError(format!("unknown frame kind {}", other))),
        })
    }
}

/// Feature bits negotiated in the `Version` exchange.
pub mod features {
    pub const COMPRESSION: u32 = 1 << 0;
    pub const DELTA: u32 = 1 << 1;
    pub const HARDLINK_REUSE: u32 = 1 << 2;
}

/// Protocol version this client implements; bumped on any incompatible
/// wire-format change.
pub const CLIENT_VERSION: u32 = 1;

fn to_epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn from_epoch_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

// ---------------------------------------------------------------- Version

pub struct VersionRequest {
    pub client_version: u32,
    pub features: u32,
}

impl VersionRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.u32(self.client_version).u32(self.features);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { client_version: r.u32()?, features: r.u32()? })
    }
}

pub struct VersionResponse {
    pub server_version: u32,
    pub accepted_features: u32,
}

impl VersionResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.u32(self.server_version).u32(self.accepted_features);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { server_version: r.u32()?, accepted_features: r.u32()? })
    }
}

// --------------------------------------------------------------- WriteFile

pub struct WriteFileRequest {
    pub relative_dst: String,
    pub size: u64,
    pub last_write: SystemTime,
    pub flags: u32,
}

impl WriteFileRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.string(&self.relative_dst)
            .u64(self.size)
            .u64(to_epoch_millis(self.last_write))
            .u32(self.flags);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            relative_dst: r.string()?,
            size: r.u64()?,
            last_write: from_epoch_millis(r.u64()?),
            flags: r.u32()?,
        })
    }
}

pub enum WriteFileResponse {
    AlreadyExists,
    SendWhole,
    SendDelta(Signature),
    ServerBusy,
}

impl WriteFileResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        match self {
            WriteFileResponse::AlreadyExists => {
                w.u8(0);
            }
            WriteFileResponse::SendWhole => {
                w.u8(1);
            }
            WriteFileResponse::SendDelta(sig) => {
                w.u8(2).u32(sig.block_size).u32(sig.blocks.len() as u32);
                for block in &sig.blocks {
                    w.u32(block.block_index).u32(block.weak).bytes32(&block.strong);
                }
            }
            WriteFileResponse::ServerBusy => {
                w.u8(3);
            }
        }
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(match r.u8()? {
            0 => WriteFileResponse::AlreadyExists,
            1 => WriteFileResponse::SendWhole,
            2 => {
                let block_size = r.u32()?;
                let count = r.u32()?;
                let mut blocks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let block_index = r.u32()?;
                    let weak = r.u32()?;
                    let strong = r.bytes32()?;
                    blocks.push(BlockSignature { block_index, weak, strong });
                }
                WriteFileResponse::SendDelta(Signature { block_size, blocks })
            }
            3 => WriteFileResponse::ServerBusy,
            other => return Err(Error::ProtocolError(format!("invalid WriteFile response tag {}", other))),
        })
    }
}

// ---------------------------------------------------------------- ReadFile

pub struct ReadFileRequest {
    pub relative_src: String,
}

impl ReadFileRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.string(&self.relative_src);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { relative_src: r.string()? })
    }
}

pub enum ReadFileResponse {
    NotFound,
    Stream { size: u64, last_write: SystemTime },
    ServerBusy,
}

impl ReadFileResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        match self {
            ReadFileResponse::NotFound => {
                w.u8(0);
            }
            ReadFileResponse::Stream { size, last_write } => {
                w.u8(1).u64(*size).u64(to_epoch_millis(*last_write));
            }
            ReadFileResponse::ServerBusy => {
                w.u8(2);
            }
        }
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(match r.u8()? {
            0 => ReadFileResponse::NotFound,
            1 => ReadFileResponse::Stream { size: r.u64()?, last_write: from_epoch_millis(r.u64()?) },
            2 => ReadFileResponse::ServerBusy,
            other => return Err(Error::ProtocolError(format!("invalid ReadFile response tag {}", other))),
        })
    }
}

// ----------------------------------------------------------- CreateDirectory

pub struct CreateDirectoryRequest {
    pub relative_dir: String,
    pub flags: u32,
}

impl CreateDirectoryRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.string(&self.relative_dir).u32(self.flags);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { relative_dir: r.string()?, flags: r.u32()? })
    }
}

pub struct CreateDirectoryResponse {
    pub created: Vec<String>,
}

impl CreateDirectoryResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.u32(self.created.len() as u32);
        for path in &self.created {
            w.string(path);
        }
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let count = r.u32()?;
        let mut created = Vec::with_capacity(count as usize);
        for _ in 0..count {
            created.push(r.string()?);
        }
        Ok(Self { created })
    }
}

// ------------------------------------------------------------ DeleteAllFiles

pub struct DeleteAllFilesRequest {
    pub relative_dir: String,
}

impl DeleteAllFilesRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.string(&self.relative_dir);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { relative_dir: r.string()? })
    }
}

// ----------------------------------------------------------------- FindFiles

pub struct FindFilesRequest {
    pub relative_dir_and_wildcard: String,
}

impl FindFilesRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.string(&self.relative_dir_and_wildcard);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { relative_dir_and_wildcard: r.string()? })
    }
}

pub struct FindFilesEntry {
    pub name: String,
    pub info: FileInfo,
    pub attributes: u32,
}

impl FindFilesEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.string(&self.name)
            .u64(to_epoch_millis(self.info.creation_time))
            .u64(to_epoch_millis(self.info.last_write_time))
            .u64(self.info.size)
            .u32(self.attributes);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let name = r.string()?;
        let creation_time = from_epoch_millis(r.u64()?);
        let last_write_time = from_epoch_millis(r.u64()?);
        let size = r.u64()?;
        let attributes = r.u32()?;
        Ok(Self { name, info: FileInfo { creation_time, last_write_time, size }, attributes })
    }
}

// ------------------------------------------------------------ GetFileAttributes

pub struct GetFileAttributesRequest {
    pub relative_path: String,
}

impl GetFileAttributesRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.string(&self.relative_path);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { relative_path: r.string()? })
    }
}

pub struct GetFileAttributesResponse {
    pub info: FileInfo,
    pub attributes: u32,
    pub error_code: i32,
}

impl GetFileAttributesResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.u64(to_epoch_millis(self.info.creation_time))
            .u64(to_epoch_millis(self.info.last_write_time))
            .u64(self.info.size)
            .u32(self.attributes)
            .i32(self.error_code);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let creation_time = from_epoch_millis(r.u64()?);
        let last_write_time = from_epoch_millis(r.u64()?);
        let size = r.u64()?;
        let attributes = r.u32()?;
        let error_code = r.i32()?;
        Ok(Self { info: FileInfo { creation_time, last_write_time, size }, attributes, error_code })
    }
}

// ----------------------------------------------------------------- Ack

pub struct Ack {
    pub bytes_written: u64,
    /// Set when the server satisfied the write via a hardlink against its
    /// content history instead of receiving a byte stream.
    pub hardlinked: bool,
}

impl Ack {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.u64(self.bytes_written).u8(self.hardlinked as u8);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let bytes_written = r.u64()?;
        let hardlinked = if r.remaining() > 0 { r.u8()? != 0 } else { false };
        Ok(Self { bytes_written, hardlinked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn version_round_trips() {
        let req = VersionRequest { client_version: 1, features: features::COMPRESSION };
        let decoded = VersionRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded.client_version, 1);
        assert_eq!(decoded.features, features::COMPRESSION);
    }

    #[test]
    fn write_file_response_send_delta_round_trips() {
        let sig = Signature {
            block_size: 1024,
            blocks: vec![BlockSignature { block_index: 0, weak: 42, strong: [7u8; 32] }],
        };
        let resp = WriteFileResponse::SendDelta(sig);
        let decoded = WriteFileResponse::decode(&resp.encode()).unwrap();
        match decoded {
            WriteFileResponse::SendDelta(sig) => {
                assert_eq!(sig.block_size, 1024);
                assert_eq!(sig.blocks[0].weak, 42);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn read_file_response_stream_round_trips() {
        let now = SystemTime::now();
        let resp = ReadFileResponse::Stream { size: 99, last_write: now };
        let decoded = ReadFileResponse::decode(&resp.encode()).unwrap();
        match decoded {
            ReadFileResponse::Stream { size, .. } => assert_eq!(size, 99),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn create_directory_response_round_trips() {
        let resp = CreateDirectoryResponse { created: vec!["a".into(), "a/b".into()] };
        let decoded = CreateDirectoryResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded.created, vec!["a".to_string(), "a/b".to_string()]);
    }

    #[test]
    fn find_files_entry_round_trips() {
        let entry = FindFilesEntry {
            name: "file.txt".into(),
            info: FileInfo { creation_time: UNIX_EPOCH, last_write_time: UNIX_EPOCH, size: 123 },
            attributes: 0,
        };
        let decoded = FindFilesEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded.name, "file.txt");
        assert_eq!(decoded.info.size, 123);
    }
}
