//! Implementation of the S98 v3 sound log format.
//!
//! An S98 file starts with a 32-byte header
//! followed by a table of 16-byte device descriptors.
//! The command stream addresses devices by their position in that table,
//! two IDs per device (one per port).
//! An optional `[S98]` tag block of UTF-8 `key=value` lines
//! follows the command stream.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use snafu::{ensure, OptionExt as _, ResultExt, Snafu};
use tracing::debug;

use crate::data_types::{Ascii, VarInt};
use crate::device::DeviceKind;
use crate::gd3::Tags;

/// An error writing or reading an S98 file
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Failed to create an S98 file
    #[snafu(display("Failed to create {}", path.display()))]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read an S98 file
    #[snafu(display("Failed to read {}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write S98 data
    WriteS98 { source: std::io::Error },
    /// Failed to parse S98 data
    ParseS98 { source: ParseError },
    /// The writer was already closed
    WriterClosed,
    /// The {context} offset {offset:#x} does not fit in a 32-bit header field
    OffsetTooLarge { context: &'static str, offset: u64 },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Error parsing an S98 file or S98 file component
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseError {
    /// Insufficient bytes to parse {context}
    InsufficientBytes { context: &'static str },
    /// Invalid S98 identifier
    InvalidIdent,
    /// {context} offset {offset:#x} lies outside of the file
    OffsetOutOfBounds { context: &'static str, offset: u32 },
    /// Invalid n-sync length
    InvalidSyncLength {
        source: crate::data_types::ParseError,
    },
}

/// "S98" followed by the version digit
pub const MAGIC: [u8; 4] = *b"S983";
/// Size of the fixed part of the header
pub const HEADER_SIZE: usize = 0x20;
/// Size of one device descriptor
pub const DEVICE_INFO_SIZE: usize = 16;
/// Device descriptors reserved by the writer,
/// one for every device type
pub const RESERVED_DEVICES: usize = DeviceKind::ALL.len();
/// Offset of the command stream in files produced by [`S98Writer`]
pub const DATA_OFFSET: u32 = (HEADER_SIZE + DEVICE_INFO_SIZE * RESERVED_DEVICES) as u32;

/// Ticks are samples at 44100 Hz
pub const TIMER_NUMERATOR: u32 = 1;
pub const TIMER_DENOMINATOR: u32 = 44_100;

/// Wait one tick
pub const CMD_SYNC: u8 = 0xFF;
/// Wait n ticks, n encoded as a variable-length integer biased by 2
pub const CMD_NSYNC: u8 = 0xFE;
/// End of the command stream (or loop back)
pub const CMD_END: u8 = 0xFD;

/// Identifier of the tag block
pub const TAG_IDENT: [u8; 5] = *b"[S98]";
/// Byte order mark following the tag block identifier
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Descriptor written when no device was ever added
pub const DEFAULT_DEVICE: DeviceInfo = DeviceInfo {
    kind: DeviceKind::Opna,
    clock: 7_987_200,
    pan: 0,
};

/// An entry of the device table
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub clock: u32,
    pub pan: u32,
}

impl DeviceInfo {
    fn encoded(&self) -> [u8; DEVICE_INFO_SIZE] {
        let mut out = [0; DEVICE_INFO_SIZE];
        out[0..4].copy_from_slice(&self.kind.to_u32().to_le_bytes());
        out[4..8].copy_from_slice(&self.clock.to_le_bytes());
        out[8..12].copy_from_slice(&self.pan.to_le_bytes());
        // bytes 12..16 are reserved
        out
    }

    pub(crate) fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        ensure!(
            bytes.len() >= DEVICE_INFO_SIZE,
            InsufficientBytesSnafu {
                context: "DeviceInfo"
            }
        );
        let (bytes, rest) = bytes.split_at(DEVICE_INFO_SIZE);
        let kind = u32_at(bytes, 0);
        let info = DeviceInfo {
            kind: DeviceKind::from_u32(kind).unwrap_or(DeviceKind::None),
            clock: u32_at(bytes, 4),
            pan: u32_at(bytes, 8),
        };
        Ok((info, rest))
    }
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Incremental S98 encoder over a seekable sink.
///
/// A placeholder header is written on creation
/// and patched in place by [`finalize`](S98Writer::finalize)
/// once the devices, loop point and tag block are known.
/// Room is reserved for a descriptor of every device type,
/// so devices may be added at any point before finalizing.
///
/// Once closed, every write is silently ignored.
/// Dropping an open writer closes it.
pub struct S98Writer<W: Write + Seek> {
    sink: Option<W>,
    devices: Vec<DeviceInfo>,
    /// absolute offset of the end of the written data
    pos: u64,
    loop_offset: Option<u64>,
    tag_offset: Option<u64>,
    finalized: bool,
}

impl<W: Write + Seek> core::fmt::Debug for S98Writer<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("S98Writer")
            .field("open", &self.sink.is_some())
            .field("devices", &self.devices)
            .field("pos", &self.pos)
            .field("loop_offset", &self.loop_offset)
            .field("tag_offset", &self.tag_offset)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl S98Writer<BufWriter<File>> {
    /// Create an S98 file on disk
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).context(CreateFileSnafu { path })?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write + Seek> S98Writer<W> {
    /// Start writing S98 data to the given sink,
    /// from its start
    pub fn new(mut sink: W) -> Result<Self> {
        let mut writer = S98Writer {
            sink: None,
            devices: Vec::new(),
            pos: 0,
            loop_offset: None,
            tag_offset: None,
            finalized: false,
        };
        sink.seek(SeekFrom::Start(0)).context(WriteS98Snafu)?;
        sink.write_all(&writer.encoded_header()?)
            .context(WriteS98Snafu)?;
        writer.sink = Some(sink);
        writer.pos = u64::from(DATA_OFFSET);
        Ok(writer)
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Absolute offset of the command stream
    pub fn data_offset(&self) -> u32 {
        DATA_OFFSET
    }

    /// The devices added so far, in device ID order
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// The base device ID of a device type, if it was added
    pub fn device_id(&self, kind: DeviceKind) -> Option<u8> {
        self.devices
            .iter()
            .position(|device| device.kind == kind)
            .map(|index| (index * 2) as u8)
    }

    /// Add a device to the device table,
    /// returning its base device ID.
    ///
    /// IDs are handed out in steps of two,
    /// the second one addressing the device's second port.
    /// Adding a device type again keeps the first descriptor and its ID.
    /// Returns `None` for [`DeviceKind::None`].
    pub fn add_device(&mut self, kind: DeviceKind, clock: u32, pan: u32) -> Option<u8> {
        if kind == DeviceKind::None {
            return None;
        }
        if let Some(id) = self.device_id(kind) {
            return Some(id);
        }
        self.devices.push(DeviceInfo { kind, clock, pan });
        self.finalized = false;
        Some(((self.devices.len() - 1) * 2) as u8)
    }

    /// Wait a number of ticks (samples).
    pub fn write_wait(&mut self, ticks: u32) -> Result<()> {
        match ticks {
            0 => Ok(()),
            1 => self.emit(&[CMD_SYNC]),
            n => {
                let mut buf = Vec::with_capacity(1 + VarInt::MAX_LEN);
                buf.push(CMD_NSYNC);
                VarInt::new(n - 2)
                    .write_to(&mut buf)
                    .context(WriteS98Snafu)?;
                self.emit(&buf)
            }
        }
    }

    /// Write to a register of the device with the given ID
    /// (base ID plus port).
    pub fn write_register(&mut self, device_id: u8, register: u8, value: u8) -> Result<()> {
        self.emit(&[device_id, register, value])
    }

    /// Terminate the command stream
    pub fn write_end(&mut self) -> Result<()> {
        self.emit(&[CMD_END])
    }

    /// Mark the current position of the command stream as the loop point.
    ///
    /// Only the first call has an effect.
    pub fn set_loop_point(&mut self) {
        if self.sink.is_none() || self.loop_offset.is_some() {
            return;
        }
        self.loop_offset = Some(self.pos);
        self.finalized = false;
    }

    /// The absolute offset of the loop point, if set
    pub fn loop_offset(&self) -> Option<u64> {
        self.loop_offset
    }

    /// Append the tag block.
    ///
    /// Line breaks inside values are replaced by spaces
    /// so that every tag stays on its own line.
    pub fn write_tags(&mut self, tags: &Tags) -> Result<()> {
        if self.sink.is_none() {
            return Ok(());
        }
        let mut block = Vec::new();
        block.extend_from_slice(&TAG_IDENT);
        block.extend_from_slice(&UTF8_BOM);
        for (key, value) in tags.iter() {
            block.extend_from_slice(key.as_bytes());
            block.push(b'=');
            block.extend_from_slice(value.replace(['\r', '\n'], " ").as_bytes());
            block.push(b'\n');
        }
        block.push(0);

        self.tag_offset = Some(self.pos);
        self.emit(&block)
    }

    /// Patch the header with the final device table and offsets,
    /// leaving the sink positioned at its end.
    pub fn finalize(&mut self) -> Result<()> {
        let header = self.encoded_header()?;
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        sink.seek(SeekFrom::Start(0)).context(WriteS98Snafu)?;
        sink.write_all(&header).context(WriteS98Snafu)?;
        sink.seek(SeekFrom::End(0)).context(WriteS98Snafu)?;
        sink.flush().context(WriteS98Snafu)?;
        self.finalized = true;
        debug!(
            "Finalized S98 header: {} devices, {} bytes",
            self.devices.len(),
            self.pos
        );
        Ok(())
    }

    /// Finalize if needed and release the sink.
    ///
    /// Calling this on a closed writer does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.sink.is_none() {
            return Ok(());
        }
        let result = if self.finalized {
            Ok(())
        } else {
            self.finalize()
        };
        self.sink = None;
        result
    }

    /// Finalize if needed and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        if !self.finalized {
            self.finalize()?;
        }
        self.sink.take().context(WriterClosedSnafu)
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        sink.write_all(bytes).context(WriteS98Snafu)?;
        self.pos += bytes.len() as u64;
        self.finalized = false;
        Ok(())
    }

    fn encoded_header(&self) -> Result<Vec<u8>> {
        let mut header = vec![0u8; DATA_OFFSET as usize];

        let devices: &[DeviceInfo] = if self.devices.is_empty() {
            // players of older revisions expect at least one device
            &[DEFAULT_DEVICE]
        } else {
            &self.devices
        };

        header[0..4].copy_from_slice(&MAGIC);
        header[0x04..0x08].copy_from_slice(&TIMER_NUMERATOR.to_le_bytes());
        header[0x08..0x0C].copy_from_slice(&TIMER_DENOMINATOR.to_le_bytes());
        // 0x0C: compression, always 0
        header[0x10..0x14].copy_from_slice(&header_offset("tag", self.tag_offset)?.to_le_bytes());
        header[0x14..0x18].copy_from_slice(&DATA_OFFSET.to_le_bytes());
        header[0x18..0x1C].copy_from_slice(&header_offset("loop", self.loop_offset)?.to_le_bytes());
        header[0x1C..0x20].copy_from_slice(&(devices.len() as u32).to_le_bytes());

        for (i, device) in devices.iter().take(RESERVED_DEVICES).enumerate() {
            let start = HEADER_SIZE + i * DEVICE_INFO_SIZE;
            header[start..start + DEVICE_INFO_SIZE].copy_from_slice(&device.encoded());
        }
        Ok(header)
    }
}

/// Narrow an absolute file offset to a header field, 0 meaning absent
fn header_offset(context: &'static str, offset: Option<u64>) -> Result<u32> {
    match offset {
        None => Ok(0),
        Some(offset) => u32::try_from(offset)
            .ok()
            .context(OffsetTooLargeSnafu { context, offset }),
    }
}

impl<W: Write + Seek> Drop for S98Writer<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close S98 writer: {}", e);
        }
    }
}

/// The fixed part of an S98 header
#[derive(Clone, PartialEq)]
pub struct S98Header {
    /// "S98" followed by the version digit
    pub magic: [u8; 4],
    pub timer_numerator: u32,
    pub timer_denominator: u32,
    pub compression: u32,
    /// Absolute offset to the tag block, 0 if there is none
    pub tag_offset: u32,
    /// Absolute offset to the command stream
    pub data_offset: u32,
    /// Absolute offset to the loop point, 0 if there is no loop
    pub loop_offset: u32,
    pub device_count: u32,
}

impl core::fmt::Debug for S98Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("S98Header")
            .field("magic", &Ascii(&self.magic))
            .field("timer_numerator", &self.timer_numerator)
            .field("timer_denominator", &self.timer_denominator)
            .field("compression", &self.compression)
            .field("tag_offset", &format_args!("{:#x}", self.tag_offset))
            .field("data_offset", &format_args!("{:#x}", self.data_offset))
            .field("loop_offset", &format_args!("{:#x}", self.loop_offset))
            .field("device_count", &self.device_count)
            .finish()
    }
}

impl S98Header {
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        ensure!(
            bytes.len() >= HEADER_SIZE,
            InsufficientBytesSnafu {
                context: "S98 header"
            }
        );
        ensure!(bytes[..3] == MAGIC[..3], InvalidIdentSnafu);

        let (bytes, rest) = bytes.split_at(HEADER_SIZE);
        let header = S98Header {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            timer_numerator: u32_at(bytes, 0x04),
            timer_denominator: u32_at(bytes, 0x08),
            compression: u32_at(bytes, 0x0C),
            tag_offset: u32_at(bytes, 0x10),
            data_offset: u32_at(bytes, 0x14),
            loop_offset: u32_at(bytes, 0x18),
            device_count: u32_at(bytes, 0x1C),
        };
        Ok((header, rest))
    }
}

/// A command of the S98 command stream
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum S98Command {
    /// Write to a device register (`0x00..=0xFC`)
    Write { device: u8, register: u8, value: u8 },
    /// Wait one tick (`0xFF`)
    Sync,
    /// Wait `ticks` ticks (`0xFE`), at least 2
    NSync { ticks: u32 },
    /// End of data (`0xFD`)
    End,
}

impl S98Command {
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        let (&code, rest) = bytes.split_first().context(InsufficientBytesSnafu {
            context: "S98 command",
        })?;
        match code {
            CMD_SYNC => Ok((S98Command::Sync, rest)),
            CMD_END => Ok((S98Command::End, rest)),
            CMD_NSYNC => {
                let (n, rest) = VarInt::parse(rest).context(InvalidSyncLengthSnafu)?;
                let ticks = n.to_u32().saturating_add(2);
                Ok((S98Command::NSync { ticks }, rest))
            }
            device => {
                ensure!(
                    rest.len() >= 2,
                    InsufficientBytesSnafu {
                        context: "S98 register write"
                    }
                );
                Ok((
                    S98Command::Write {
                        device,
                        register: rest[0],
                        value: rest[1],
                    },
                    &rest[2..],
                ))
            }
        }
    }

    /// The number of ticks waited by this command
    pub fn ticks(&self) -> u32 {
        match self {
            S98Command::Sync => 1,
            S98Command::NSync { ticks } => *ticks,
            _ => 0,
        }
    }
}

/// A complete in-memory representation of an S98 file.
#[derive(Debug)]
pub struct S98File {
    pub header: S98Header,
    pub devices: Vec<DeviceInfo>,
    /// Commands up to and including the end command,
    /// each with its absolute offset
    pub commands: Vec<(u32, S98Command)>,
    pub tags: Option<Tags>,
}

impl S98File {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).context(ReadFileSnafu { path })?;
        Self::parse(&bytes).context(ParseS98Snafu)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let (header, mut rest) = S98Header::parse(bytes)?;

        let mut devices = Vec::new();
        for _ in 0..header.device_count {
            let (device, next) = DeviceInfo::parse(rest)?;
            devices.push(device);
            rest = next;
        }

        let data_offset = header.data_offset;
        ensure!(
            (data_offset as usize) <= bytes.len(),
            OffsetOutOfBoundsSnafu {
                context: "data",
                offset: data_offset
            }
        );
        let mut commands = Vec::new();
        let mut rest = &bytes[data_offset as usize..];
        while !rest.is_empty() {
            let offset = (bytes.len() - rest.len()) as u32;
            let (command, next) = S98Command::parse(rest)?;
            commands.push((offset, command));
            rest = next;
            if command == S98Command::End {
                break;
            }
        }

        let tags = match header.tag_offset {
            0 => None,
            offset => {
                let block = bytes
                    .get(offset as usize..)
                    .context(OffsetOutOfBoundsSnafu {
                        context: "tag",
                        offset,
                    })?;
                Some(parse_tag_block(block)?)
            }
        };

        Ok(S98File {
            header,
            devices,
            commands,
            tags,
        })
    }

    /// Index of the command the loop point refers to
    pub fn loop_index(&self) -> Option<usize> {
        if self.header.loop_offset == 0 {
            return None;
        }
        self.commands
            .iter()
            .position(|(offset, _)| *offset == self.header.loop_offset)
    }

    /// Total number of ticks in the command stream
    pub fn total_ticks(&self) -> u64 {
        self.commands
            .iter()
            .map(|(_, command)| u64::from(command.ticks()))
            .sum()
    }
}

fn parse_tag_block(block: &[u8]) -> Result<Tags, ParseError> {
    ensure!(
        block.len() >= TAG_IDENT.len(),
        InsufficientBytesSnafu {
            context: "tag block"
        }
    );
    ensure!(block[..TAG_IDENT.len()] == TAG_IDENT, InvalidIdentSnafu);
    let text = &block[TAG_IDENT.len()..];
    let text = text.strip_prefix(&UTF8_BOM[..]).unwrap_or(text);
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    let text = String::from_utf8_lossy(&text[..end]);

    let mut tags = Tags::new();
    for line in text.split('\n') {
        if let Some((key, value)) = line.split_once('=') {
            tags.insert(key, value);
        }
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn new_writer() -> S98Writer<Cursor<Vec<u8>>> {
        S98Writer::new(Cursor::new(Vec::new())).unwrap()
    }

    /// Write only the given waits and return the command bytes
    fn wait_bytes(ticks: u32) -> Vec<u8> {
        let mut writer = new_writer();
        writer.write_wait(ticks).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        bytes[DATA_OFFSET as usize..].to_vec()
    }

    #[test]
    fn waits_are_encoded_with_bias() {
        assert_eq!(wait_bytes(0), Vec::<u8>::new());
        assert_eq!(wait_bytes(1), vec![0xFF]);
        assert_eq!(wait_bytes(2), vec![0xFE, 0x00]);
        assert_eq!(wait_bytes(17), vec![0xFE, 0x0F]);
        assert_eq!(wait_bytes(130), vec![0xFE, 0x80, 0x01]);
    }

    #[test]
    fn waits_decode_to_the_same_tick_count() {
        for ticks in [0, 1, 2, 17, 255, 65535, 2_000_000] {
            let bytes = wait_bytes(ticks);
            let mut rest = &bytes[..];
            let mut decoded = 0;
            while !rest.is_empty() {
                let (command, next) = S98Command::parse(rest).unwrap();
                decoded += command.ticks();
                rest = next;
            }
            assert_eq!(decoded, ticks);
        }
    }

    #[test]
    fn offsets_past_4_gib_are_rejected() {
        assert_eq!(header_offset("loop", None).unwrap(), 0);
        assert_eq!(header_offset("loop", Some(0xD3)).unwrap(), 0xD3);
        assert_eq!(
            header_offset("tag", Some(u64::from(u32::MAX))).unwrap(),
            u32::MAX
        );
        assert!(matches!(
            header_offset("tag", Some(1 << 32)),
            Err(Error::OffsetTooLarge {
                context: "tag",
                offset: 0x1_0000_0000
            })
        ));
    }

    #[test]
    fn dropped_writer_patches_header() {
        let mut sink = Cursor::new(Vec::new());
        {
            let mut writer = S98Writer::new(&mut sink).unwrap();
            writer.add_device(DeviceKind::Opm, 3_579_545, 0);
            writer.write_register(0, 0x08, 0x00).unwrap();
            writer.set_loop_point();
            writer.write_wait(10).unwrap();
            // no close: leaving the scope has to finalize
        }

        let file = S98File::parse(sink.get_ref()).unwrap();
        assert_eq!(file.header.device_count, 1);
        assert_eq!(
            file.devices,
            vec![DeviceInfo {
                kind: DeviceKind::Opm,
                clock: 3_579_545,
                pan: 0
            }]
        );
        assert_eq!(file.header.loop_offset, DATA_OFFSET + 3);
        assert_eq!(file.loop_index(), Some(1));
        assert_eq!(file.total_ticks(), 10);
    }

    #[test]
    fn device_ids_go_in_steps_of_two() {
        let mut writer = new_writer();
        let ids = [
            writer.add_device(DeviceKind::Opna, 7_987_200, 0),
            writer.add_device(DeviceKind::Opm, 4_000_000, 0),
            writer.add_device(DeviceKind::Opna, 8_000_000, 1),
            writer.add_device(DeviceKind::Dcsg, 3_579_545, 0),
        ];
        assert_eq!(ids, [Some(0), Some(2), Some(0), Some(4)]);
        assert_eq!(writer.add_device(DeviceKind::None, 1, 0), None);

        // the repeated device keeps its first descriptor
        assert_eq!(writer.devices().len(), 3);
        assert_eq!(writer.devices()[0].clock, 7_987_200);
        assert_eq!(writer.device_id(DeviceKind::Dcsg), Some(4));
        assert_eq!(writer.device_id(DeviceKind::Opll), None);
    }

    #[test]
    fn finalize_writes_header() {
        let mut writer = new_writer();
        writer.add_device(DeviceKind::Opna, 7_987_200, 0);
        writer.write_register(0, 0x07, 0x38).unwrap();
        writer.write_wait(1).unwrap();
        writer.set_loop_point();
        writer.write_register(1, 0x10, 0x1F).unwrap();
        writer.write_wait(100).unwrap();
        // only the first loop point counts
        writer.set_loop_point();
        writer.write_end().unwrap();
        let mut tags = Tags::new();
        tags.insert("title", "Song");
        tags.insert("artist", "Someone");
        writer.write_tags(&tags).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let file = S98File::parse(&bytes).unwrap();
        assert_eq!(file.header.magic, MAGIC);
        assert_eq!(file.header.timer_numerator, 1);
        assert_eq!(file.header.timer_denominator, 44_100);
        assert_eq!(file.header.compression, 0);
        assert_eq!(file.header.data_offset, DATA_OFFSET);
        assert_eq!(file.header.loop_offset, DATA_OFFSET + 4);
        assert_eq!(file.header.device_count, 1);
        assert_eq!(
            file.devices,
            vec![DeviceInfo {
                kind: DeviceKind::Opna,
                clock: 7_987_200,
                pan: 0
            }]
        );
        assert_eq!(
            file.commands
                .iter()
                .map(|(_, c)| *c)
                .collect::<Vec<_>>(),
            vec![
                S98Command::Write {
                    device: 0,
                    register: 0x07,
                    value: 0x38
                },
                S98Command::Sync,
                S98Command::Write {
                    device: 1,
                    register: 0x10,
                    value: 0x1F
                },
                S98Command::NSync { ticks: 100 },
                S98Command::End,
            ]
        );
        assert_eq!(file.loop_index(), Some(2));
        assert_eq!(file.total_ticks(), 101);

        // tag block right after the end command
        let tag_offset = file.header.tag_offset as usize;
        assert_eq!(tag_offset, DATA_OFFSET as usize + 3 + 1 + 3 + 2 + 1);
        assert_eq!(
            &bytes[tag_offset..],
            b"[S98]\xEF\xBB\xBFtitle=Song\nartist=Someone\n\0"
        );
        assert_eq!(file.tags, Some(tags));
    }

    #[test]
    fn empty_device_table_gets_default_device() {
        let bytes = new_writer().finish().unwrap().into_inner();
        assert_eq!(bytes.len(), DATA_OFFSET as usize);
        let file = S98File::parse(&bytes).unwrap();
        assert_eq!(file.header.device_count, 1);
        assert_eq!(file.devices, vec![DEFAULT_DEVICE]);
        assert_eq!(file.header.loop_offset, 0);
        assert_eq!(file.header.tag_offset, 0);
        assert!(file.commands.is_empty());
        assert_eq!(file.tags, None);
    }

    #[test]
    fn devices_added_late_do_not_clobber_data() {
        let mut writer = new_writer();
        writer.write_wait(3).unwrap();
        for (i, kind) in DeviceKind::ALL.into_iter().enumerate() {
            assert_eq!(writer.add_device(kind, 1_000 + i as u32, 0), Some(2 * i as u8));
            writer.write_register(2 * i as u8, 0x00, i as u8).unwrap();
        }
        writer.write_end().unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let file = S98File::parse(&bytes).unwrap();
        assert_eq!(file.devices.len(), DeviceKind::ALL.len());
        assert_eq!(file.commands.len(), 1 + DeviceKind::ALL.len() + 1);
        assert_eq!(file.commands[0].1, S98Command::NSync { ticks: 3 });
        assert_eq!(file.devices[10].kind, DeviceKind::Dcsg);
    }

    #[test]
    fn tag_values_stay_on_one_line() {
        let mut writer = new_writer();
        let mut tags = Tags::new();
        tags.insert("comment", "line one\r\nline two");
        writer.write_tags(&tags).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let file = S98File::parse(&bytes).unwrap();
        assert_eq!(
            file.tags.unwrap().get("comment"),
            Some("line one  line two")
        );
    }

    #[test]
    fn closed_writer_ignores_writes() {
        let mut writer = new_writer();
        writer.close().unwrap();
        assert!(!writer.is_open());
        writer.write_wait(10).unwrap();
        writer.write_register(0, 1, 2).unwrap();
        writer.write_end().unwrap();
        writer.set_loop_point();
        writer.write_tags(&Tags::new()).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();
        assert_eq!(writer.loop_offset(), None);
        assert!(matches!(writer.finish(), Err(Error::WriterClosed)));
    }

    #[test]
    fn rejects_bad_files() {
        assert_eq!(
            S98File::parse(b"S98").unwrap_err(),
            ParseError::InsufficientBytes {
                context: "S98 header"
            }
        );
        let mut bytes = new_writer().finish().unwrap().into_inner();
        bytes[0] = b'X';
        assert_eq!(S98File::parse(&bytes).unwrap_err(), ParseError::InvalidIdent);
    }
}
