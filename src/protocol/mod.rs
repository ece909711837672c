/*!
 * Protocol engine: connection lifecycle, per-connection compression state,
 * and the seven typed operations spoken with the acceleration service.
 * Generic over the transport so tests can drive a real loopback
 * `TcpStream` without standing up the actual service binary; the peer is
 * assumed to conform to the wire format.
 */

pub mod commands;
pub mod frame;

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::compress::delta::{DeltaOp, DeltaScript, Signature};
use crate::error::{Error, Result};
use crate::stats::StatsDelta;

use commands::*;
use frame::{read_frame, write_frame, Frame, PayloadReader, PayloadWriter};

/// A connection's compression handshake happens at most once; this tracks
/// whether it has happened yet and what was agreed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionState {
    pub negotiated: bool,
    pub enabled: bool,
    pub level: i32,
}

/// One worker's connection to the acceleration service. Owned exclusively
/// by its worker for the worker's lifetime; never shared.
#[derive(Debug)]
pub struct Connection<S: Read + Write> {
    stream: S,
    pub compression: CompressionState,
    server_version: u32,
    accepted_features: u32,
}

/// Connect to `addr` with a bounded timeout and perform the mandatory
/// `Version` handshake. A version mismatch is always fatal to the
/// connection; the caller decides whether it is fatal to the job based on
/// `ServerPolicy`.
pub fn connect(addr: &str, port: u16, connect_timeout: Duration) -> Result<Connection<TcpStream>> {
    let target = format!("{}:{}", addr, port);
    let socket_addr = target
        .to_socket_addrs()
        .map_err(|e| Error::ServerUnavailable(format!("{}: {}", target, e)))?
        .next()
        .ok_or_else(|| Error::ServerUnavailable(format!("{}: no addresses resolved", target)))?;

    let stream = TcpStream::connect_timeout(&socket_addr, connect_timeout)
        .map_err(|e| Error::ServerUnavailable(format!("{}: {}", target, e)))?;
    stream.set_nodelay(true).ok();

    Connection::handshake(stream, CLIENT_VERSION, features::COMPRESSION | features::DELTA | features::HARDLINK_REUSE)
}

impl<S: Read + Write> Connection<S> {
    /// Wrap an already-open stream and perform the mandatory `Version`
    /// exchange. Exposed directly (not just via [`connect`]) so tests can
    /// drive an in-process loopback pair.
    pub fn handshake(mut stream: S, client_version: u32, requested_features: u32) -> Result<Self> {
        let req = VersionRequest { client_version, features: requested_features };
        write_frame(&mut stream, Kind::Version as u8, &req.encode())?;

        let frame = read_frame(&mut stream)?;
        expect_kind(&frame, Kind::Version)?;
        let resp = VersionResponse::decode(&frame.payload)?;

        if resp.server_version != client_version {
            return Err(Error::VersionMismatch { client: client_version, server: resp.server_version });
        }

        Ok(Self {
            stream,
            compression: CompressionState::default(),
            server_version: resp.server_version,
            accepted_features: resp.accepted_features,
        })
    }

    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    pub fn supports(&self, feature: u32) -> bool {
        self.accepted_features & feature != 0
    }

    /// Record the compression terms for this connection. Idempotent but
    /// expected to be called at most once per connection.
    pub fn negotiate_compression(&mut self, enabled: bool, level: i32) {
        self.compression = CompressionState { negotiated: true, enabled, level };
    }

    pub fn write_file(&mut self, req: &WriteFileRequest) -> Result<WriteFileResponse> {
        write_frame(&mut self.stream, Kind::WriteFile as u8, &req.encode())?;
        let frame = read_frame(&mut self.stream)?;
        expect_kind(&frame, Kind::WriteFile)?;
        WriteFileResponse::decode(&frame.payload)
    }

    /// Stream `data` (already compressed by the caller if negotiated) as
    /// one or more `FileDataChunk` frames bounded by `chunk_size`, followed
    /// by `FileDataEnd`, then wait for the `Ack`.
    pub fn send_whole_file(&mut self, data: &[u8], chunk_size: usize, stats: &mut StatsDelta) -> Result<Ack> {
        let started = Instant::now();
        for chunk in data.chunks(chunk_size.max(1)) {
            write_frame(&mut self.stream, Kind::FileDataChunk as u8, chunk)?;
            stats.bytes_sent += chunk.len() as u64;
        }
        write_frame(&mut self.stream, Kind::FileDataEnd as u8, &[])?;
        stats.timers.send_ms += started.elapsed().as_millis() as u64;

        let frame = read_frame(&mut self.stream)?;
        self.decode_ack_or_error(frame)
    }

    /// Emit a delta script as `DeltaOpChunk` frames terminated by `DeltaEnd`,
    /// then wait for the `Ack`.
    pub fn send_delta_script(&mut self, script: &DeltaScript, stats: &mut StatsDelta) -> Result<Ack> {
        let started = Instant::now();
        for op in &script.ops {
            let payload = encode_delta_op(op);
            write_frame(&mut self.stream, Kind::DeltaOpChunk as u8, &payload)?;
            if let DeltaOp::Literal(bytes) = op {
                stats.bytes_sent += bytes.len() as u64;
            }
        }
        write_frame(&mut self.stream, Kind::DeltaEnd as u8, &[])?;
        stats.timers.delta_ms += started.elapsed().as_millis() as u64;

        let frame = read_frame(&mut self.stream)?;
        self.decode_ack_or_error(frame)
    }

    pub fn read_file(&mut self, req: &ReadFileRequest) -> Result<ReadFileResponse> {
        write_frame(&mut self.stream, Kind::ReadFile as u8, &req.encode())?;
        let frame = read_frame(&mut self.stream)?;
        expect_kind(&frame, Kind::ReadFile)?;
        ReadFileResponse::decode(&frame.payload)
    }

    /// Read chunks of a `ReadFile` stream until `FileDataEnd`, then consume
    /// the trailing `Ack`. Returns the concatenated bytes.
    pub fn recv_whole_file(&mut self, stats: &mut StatsDelta) -> Result<Vec<u8>> {
        let started = Instant::now();
        let mut out = Vec::new();
        loop {
            let frame = read_frame(&mut self.stream)?;
            match Kind::from_u8(frame.kind)? {
                Kind::FileDataChunk => {
                    stats.bytes_recv += frame.payload.len() as u64;
                    out.extend_from_slice(&frame.payload);
                }
                Kind::FileDataEnd => break,
                _ => return Err(Error::ProtocolError("expected FileDataChunk or FileDataEnd".into())),
            }
        }
        let frame = read_frame(&mut self.stream)?;
        self.decode_ack_or_error(frame)?;
        stats.timers.recv_ms += started.elapsed().as_millis() as u64;
        Ok(out)
    }

    pub fn create_directory(&mut self, req: &CreateDirectoryRequest) -> Result<CreateDirectoryResponse> {
        write_frame(&mut self.stream, Kind::CreateDirectory as u8, &req.encode())?;
        let frame = read_frame(&mut self.stream)?;
        expect_kind(&frame, Kind::CreateDirectory)?;
        CreateDirectoryResponse::decode(&frame.payload)
    }

    pub fn delete_all_files(&mut self, req: &DeleteAllFilesRequest) -> Result<()> {
        write_frame(&mut self.stream, Kind::DeleteAllFiles as u8, &req.encode())?;
        let frame = read_frame(&mut self.stream)?;
        self.decode_ack_or_error(frame).map(|_| ())
    }

    pub fn find_files(&mut self, req: &FindFilesRequest) -> Result<Vec<FindFilesEntry>> {
        write_frame(&mut self.stream, Kind::FindFiles as u8, &req.encode())?;
        let mut entries = Vec::new();
        loop {
            let frame = read_frame(&mut self.stream)?;
            match Kind::from_u8(frame.kind)? {
                Kind::FindFilesEntry => entries.push(FindFilesEntry::decode(&frame.payload)?),
                Kind::FindFilesEnd => break,
                _ => return Err(Error::ProtocolError("expected FindFilesEntry or FindFilesEnd".into())),
            }
        }
        Ok(entries)
    }

    pub fn get_file_attributes(&mut self, req: &GetFileAttributesRequest) -> Result<GetFileAttributesResponse> {
        write_frame(&mut self.stream, Kind::GetFileAttributes as u8, &req.encode())?;
        let frame = read_frame(&mut self.stream)?;
        expect_kind(&frame, Kind::GetFileAttributes)?;
        GetFileAttributesResponse::decode(&frame.payload)
    }

    pub fn server_status(&mut self) -> Result<String> {
        write_frame(&mut self.stream, Kind::ServerStatus as u8, &[])?;
        let frame = read_frame(&mut self.stream)?;
        expect_kind(&frame, Kind::ServerStatus)?;
        let mut r = PayloadReader::new(&frame.payload);
        r.string()
    }

    fn decode_ack_or_error(&self, frame: Frame) -> Result<Ack> {
        match Kind::from_u8(frame.kind)? {
            Kind::Ack => Ack::decode(&frame.payload),
            Kind::ErrorResponse => {
                let mut r = PayloadReader::new(&frame.payload);
                Err(Error::ProtocolError(r.string().unwrap_or_else(|_| "server error".into())))
            }
            _ => Err(Error::ProtocolError("expected Ack or ErrorResponse".into())),
        }
    }
}

fn expect_kind(frame: &Frame, expected: Kind) -> Result<()> {
    if frame.kind != expected as u8 {
        return Err(Error::ProtocolError(format!(
            "expected frame kind {} but got {}",
            expected as u8, frame.kind
        )));
    }
    Ok(())
}

fn encode_delta_op(op: &DeltaOp) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    match op {
        DeltaOp::CopyFromOld { offset, len } => {
            w.u8(0).u64(*offset).u32(*len);
        }
        DeltaOp::Literal(bytes) => {
            w.u8(1).bytes(bytes);
        }
    }
    w.into_vec()
}

fn decode_delta_op(payload: &[u8]) -> Result<DeltaOp> {
    let mut r = PayloadReader::new(payload);
    Ok(match r.u8()? {
        0 => DeltaOp::CopyFromOld { offset: r.u64()?, len: r.u32()? },
        1 => DeltaOp::Literal(r.bytes()?),
        other => return Err(Error::ProtocolError(format!("invalid delta op tag {}", other))),
    })
}

/// Receive a delta script sent via `DeltaOpChunk`/`DeltaEnd`, for use on the
/// client's receive path (a `ReadFile` from a server that decided to send a
/// delta, or in protocol-engine tests emulating the server role).
pub fn recv_delta_script<S: Read + Write>(conn: &mut Connection<S>) -> Result<DeltaScript> {
    let mut ops = Vec::new();
    loop {
        let frame = read_frame(&mut conn.stream)?;
        match Kind::from_u8(frame.kind)? {
            Kind::DeltaOpChunk => ops.push(decode_delta_op(&frame.payload)?),
            Kind::DeltaEnd => break,
            _ => return Err(Error::ProtocolError("expected DeltaOpChunk or DeltaEnd".into())),
        }
    }
    Ok(DeltaScript { ops })
}

/// Used only by tests to assert a `Signature` survived a round trip through
/// the wire encoding used in [`WriteFileResponse::SendDelta`].
pub fn signature_blocks_equal(a: &Signature, b: &Signature) -> bool {
    a.block_size == b.block_size
        && a.blocks.len() == b.blocks.len()
        && a.blocks.iter().zip(&b.blocks).all(|(x, y)| x.block_index == y.block_index && x.weak == y.weak && x.strong == y.strong)
}
