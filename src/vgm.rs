//! Streaming reader for VGM files
//!
//! The reader decodes the VGM command stream one event at a time
//! from any seekable byte source.
//! Only the chip commands which have an S98 counterpart are interpreted;
//! everything else is surfaced as an uninterpreted event.

use core::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use snafu::{ensure, ResultExt, Snafu};
use tracing::warn;

use crate::data_types::Ascii;
use crate::device::command_port;

/// Minimum size of a VGM header (version 1.00)
pub const MIN_HEADER_SIZE: usize = 0x40;

/// Number of header bytes inspected by [`VgmHeader::parse`]
pub const MAX_HEADER_SIZE: usize = 0x100;

/// Version from which the volume modifier field is honored (1.50)
pub const VOLUME_MODIFIER_VERSION: u32 = 0x0150;

/// Sample rate of every VGM wait command
pub const SAMPLE_RATE: u32 = 44_100;

/// An error reading a VGM file
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Failed to open a VGM file
    #[snafu(display("Failed to open {}", path.display()))]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read VGM data
    ReadVgm { source: std::io::Error },
    /// Not a valid VGM file
    InvalidVgm,
    /// Failed to parse VGM header
    ParseHeader { source: ParseError },
    /// Data offset {offset:#x} does not fit a file of {file_len} bytes
    DataOffsetOutOfBounds { offset: u32, file_len: u64 },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Error parsing a VGM file component
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseError {
    /// Insufficient bytes to parse {context}
    InsufficientBytes { context: &'static str },
    /// Invalid VGM identifier
    InvalidIdent,
}

/// The parts of a VGM header relevant to conversion.
///
/// All offsets are absolute positions in the file,
/// with 0 standing for an absent section.
/// Clock fields are 0 when the chip is not used.
#[derive(Default, Clone, PartialEq)]
pub struct VgmHeader {
    /// "Vgm " ident
    pub ident: [u8; 4],
    /// Relative offset to end of file (i.e. file length - 4)
    ///
    /// Address: `0x04`
    pub eof_offset: u32,
    /// Version number in BCD-Code,
    /// e.g. Version 1.71 is stored as 0x00000171.
    ///
    /// Address: `0x08`
    pub version: u32,
    /// Address: `0x0C`
    pub sn76489_clock: u32,
    /// Address: `0x10`
    pub ym2413_clock: u32,
    /// Absolute offset to the GD3 tag, 0 if there is none.
    ///
    /// Stored relative to `0x14`.
    pub gd3_offset: u32,
    /// Total of all wait values in the file.
    ///
    /// Address: `0x18`
    pub total_samples: u32,
    /// Absolute offset to the loop point, 0 if there is no loop.
    ///
    /// Stored relative to `0x1C`.
    pub loop_offset: u32,
    /// Number of samples in one loop, or 0 if there is no loop.
    ///
    /// Address: `0x20`
    pub loop_samples: u32,
    /// Recording rate (50 or 60 Hz), informative only
    ///
    /// Address: `0x24`
    pub rate: u32,
    /// Address: `0x2C`
    pub ym2612_clock: u32,
    /// Address: `0x30`
    pub ym2151_clock: u32,
    /// Absolute offset to the first command.
    ///
    /// Stored relative to `0x34`, with 0 meaning `0x40`.
    pub data_offset: u32,
    /// Address: `0x40`
    pub ym2203_clock: u32,
    /// Address: `0x44`
    pub ym2608_clock: u32,
    /// Address: `0x48`
    pub ym2610_clock: u32,
    /// Address: `0x50`
    pub ym3812_clock: u32,
    /// Address: `0x54`
    pub ym3526_clock: u32,
    /// Address: `0x74`
    pub ay8910_clock: u32,
    /// Volume modifier, `volume = 2 ^ (volume_modifier / 32)`.
    ///
    /// Address: `0x7C`, honored from version 1.50 on.
    pub volume_modifier: i8,
}

impl fmt::Debug for VgmHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VgmHeader")
            .field("ident", &Ascii(&self.ident))
            .field("eof_offset", &self.eof_offset)
            .field("version", &format_args!("{:#06x}", self.version))
            .field("sn76489_clock", &self.sn76489_clock)
            .field("ym2413_clock", &self.ym2413_clock)
            .field("gd3_offset", &format_args!("{:#x}", self.gd3_offset))
            .field("total_samples", &self.total_samples)
            .field("loop_offset", &format_args!("{:#x}", self.loop_offset))
            .field("loop_samples", &self.loop_samples)
            .field("rate", &self.rate)
            .field("ym2612_clock", &self.ym2612_clock)
            .field("ym2151_clock", &self.ym2151_clock)
            .field("data_offset", &format_args!("{:#x}", self.data_offset))
            .field("ym2203_clock", &self.ym2203_clock)
            .field("ym2608_clock", &self.ym2608_clock)
            .field("ym2610_clock", &self.ym2610_clock)
            .field("ym3812_clock", &self.ym3812_clock)
            .field("ym3526_clock", &self.ym3526_clock)
            .field("ay8910_clock", &self.ay8910_clock)
            .field("volume_modifier", &self.volume_modifier)
            .finish()
    }
}

impl VgmHeader {
    /// Parse the header from the first bytes of a VGM file.
    ///
    /// `input` should hold the first [`MAX_HEADER_SIZE`] bytes of the file,
    /// or the whole file if it is shorter.
    /// Fields lying past the end of the input,
    /// or at or after the start of the command data,
    /// are read as zero.
    pub fn parse(input: &[u8]) -> Result<Self, ParseError> {
        ensure!(
            input.len() >= 4,
            InsufficientBytesSnafu {
                context: "VGM identifier"
            }
        );
        ensure!(input[..4] == *b"Vgm ", InvalidIdentSnafu);
        ensure!(
            input.len() >= MIN_HEADER_SIZE,
            InsufficientBytesSnafu {
                context: "VGM header"
            }
        );

        let raw = |offset: usize| -> u32 {
            input
                .get(offset..offset + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(0)
        };

        let version = raw(0x08);
        let data_offset = match raw(0x34) {
            0 => MIN_HEADER_SIZE as u32,
            rel => rel.saturating_add(0x34),
        };

        // header bytes overlapping the command data are treated as zero
        let field = |offset: usize| -> u32 {
            if offset + 4 > data_offset as usize {
                0
            } else {
                raw(offset)
            }
        };
        let clock = |offset: usize| field(offset) & 0x3FFF_FFFF;
        let relative = |offset: usize| match field(offset) {
            0 => 0,
            rel => rel.saturating_add(offset as u32),
        };

        let ym2413_clock = clock(0x10);
        let mut ym2612_clock = clock(0x2C);
        let mut ym2151_clock = clock(0x30);
        if version <= 0x0101 {
            // in early files the YM2413 clock stood for every FM chip
            if ym2612_clock == 0 {
                ym2612_clock = ym2413_clock;
            }
            if ym2151_clock == 0 {
                ym2151_clock = ym2413_clock;
            }
        }

        let volume_modifier = if version >= VOLUME_MODIFIER_VERSION
            && input.len() > 0x7C
            && 0x7C < data_offset as usize
        {
            input[0x7C] as i8
        } else {
            0
        };

        Ok(Self {
            ident: *b"Vgm ",
            eof_offset: raw(0x04),
            version,
            sn76489_clock: clock(0x0C),
            ym2413_clock,
            gd3_offset: relative(0x14),
            total_samples: raw(0x18),
            loop_offset: relative(0x1C),
            loop_samples: raw(0x20),
            rate: field(0x24),
            ym2612_clock,
            ym2151_clock,
            data_offset,
            ym2203_clock: clock(0x40),
            ym2608_clock: clock(0x44),
            ym2610_clock: clock(0x48),
            ym3812_clock: clock(0x50),
            ym3526_clock: clock(0x54),
            ay8910_clock: clock(0x74),
            volume_modifier,
        })
    }

    /// The gain factor described by the volume modifier
    pub fn volume_gain(&self) -> f64 {
        2f64.powf(f64::from(self.volume_modifier) / 32.0)
    }

    /// The version as a `major.minor` string
    pub fn version_string(&self) -> String {
        format!(
            "{:x}.{:02x}",
            (self.version >> 8) & 0xFF,
            self.version & 0xFF
        )
    }
}

/// A single decoded VGM command.
#[derive(Clone, PartialEq)]
pub enum VgmEvent {
    /// Wait a number of samples (`0x61`, `0x62`, `0x63`, `0x70..=0x7F`)
    Wait {
        /// The number of samples to wait
        samples: u32,
    },
    /// Write to a chip register (`0x50..=0x5B`, `0xA0`)
    RegisterWrite {
        /// The command code, identifying the chip
        command: u8,
        /// The port addressed (0 or 1)
        port: u8,
        /// The register to write to
        register: u8,
        /// The data to write to the register
        value: u8,
    },
    /// Data block (`0x67`), payload skipped
    DataBlock {
        /// The data type of the block
        block_type: u8,
        /// The declared size of the block in bytes
        size: u32,
    },
    /// Seek to an offset in the PCM data bank (`0xE0`)
    PcmSeek {
        /// The offset in the data bank
        offset: u32,
    },
    /// End of sound data (`0x66`)
    End,
    /// Any other command.
    ///
    /// Only the command code is consumed,
    /// so the following bytes are decoded as new commands.
    Unknown {
        /// The command code
        opcode: u8,
    },
}

impl fmt::Debug for VgmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VgmEvent::Wait { samples } => write!(f, "Wait {} samples", samples),
            VgmEvent::RegisterWrite {
                command,
                port,
                register,
                value,
            } => write!(
                f,
                "Write {{ command: {:#04x}, port: {}, register: {:#04x}, value: {:#04x} }}",
                command, port, register, value
            ),
            VgmEvent::DataBlock { block_type, size } => write!(
                f,
                "DataBlock {{ type: {:#04x}, size: {} }}",
                block_type, size
            ),
            VgmEvent::PcmSeek { offset } => write!(f, "PcmSeek {{ offset: {:#x} }}", offset),
            VgmEvent::End => write!(f, "End"),
            VgmEvent::Unknown { opcode } => write!(f, "Unknown {{ opcode: {:#04x} }}", opcode),
        }
    }
}

/// Sequential decoder of the VGM command stream.
///
/// Call [`read_header`](VgmReader::read_header) first,
/// then pull events with [`next_event`](VgmReader::next_event)
/// or by iterating over the reader.
#[derive(Debug)]
pub struct VgmReader<R> {
    inner: R,
    file_len: u64,
    /// absolute offset of the first command, known after reading the header
    data_start: Option<u64>,
    /// absolute offset of the next command
    pos: u64,
    finished: bool,
}

impl VgmReader<BufReader<File>> {
    /// Open a VGM file on disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).context(OpenFileSnafu { path })?;
        Self::new(BufReader::new(file))
    }
}

impl<R> VgmReader<R>
where
    R: Read + Seek,
{
    /// Create a reader over a seekable byte source
    pub fn new(mut inner: R) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0)).context(ReadVgmSnafu)?;
        inner.seek(SeekFrom::Start(0)).context(ReadVgmSnafu)?;
        Ok(VgmReader {
            inner,
            file_len,
            data_start: None,
            pos: 0,
            finished: true,
        })
    }

    /// The total length of the source in bytes
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// The absolute offset of the next command to decode
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read and validate the header,
    /// then position the reader at the first command.
    pub fn read_header(&mut self) -> Result<VgmHeader> {
        self.inner
            .seek(SeekFrom::Start(0))
            .context(ReadVgmSnafu)?;
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE);
        (&mut self.inner)
            .take(MAX_HEADER_SIZE as u64)
            .read_to_end(&mut buf)
            .context(ReadVgmSnafu)?;

        let header = VgmHeader::parse(&buf).map_err(|e| match e {
            ParseError::InvalidIdent => Error::InvalidVgm,
            source => Error::ParseHeader { source },
        })?;

        ensure!(
            header.data_offset as usize >= MIN_HEADER_SIZE
                && u64::from(header.data_offset) <= self.file_len,
            DataOffsetOutOfBoundsSnafu {
                offset: header.data_offset,
                file_len: self.file_len,
            }
        );

        self.data_start = Some(u64::from(header.data_offset));
        self.reset();
        Ok(header)
    }

    /// Rewind to the first command.
    ///
    /// Has no effect before the header was read.
    pub fn reset(&mut self) {
        let Some(data_start) = self.data_start else {
            return;
        };
        match self.inner.seek(SeekFrom::Start(data_start)) {
            Ok(_) => {
                self.pos = data_start;
                self.finished = false;
            }
            Err(e) => {
                warn!("Failed to seek to VGM data at {:#x}: {}", data_start, e);
                self.finished = true;
            }
        }
    }

    /// Decode the next command.
    ///
    /// Returns `None` once the end of sound data command was returned,
    /// the end of the file was reached,
    /// or a previous command was cut short by the end of the file.
    pub fn next_event(&mut self) -> Option<VgmEvent> {
        if self.finished || self.pos >= self.file_len {
            self.finished = true;
            return None;
        }

        let mut code = [0u8; 1];
        if self.read_operands(&mut code) < 1 {
            self.finished = true;
            return None;
        }
        let code = code[0];

        let event = match code {
            0x66 => {
                self.finished = true;
                VgmEvent::End
            }
            0x61 => {
                let mut operands = [0u8; 2];
                self.read_operands(&mut operands);
                VgmEvent::Wait {
                    samples: u16::from_le_bytes(operands) as u32,
                }
            }
            0x62 => VgmEvent::Wait { samples: 735 },
            0x63 => VgmEvent::Wait { samples: 882 },
            0x70..=0x7F => VgmEvent::Wait {
                samples: (code - 0x70) as u32 + 1,
            },
            0x67 => self.read_data_block(),
            0xE0 => {
                let mut operands = [0u8; 4];
                self.read_operands(&mut operands);
                VgmEvent::PcmSeek {
                    offset: u32::from_le_bytes(operands),
                }
            }
            0x50..=0x5B | 0xA0 => {
                let mut operands = [0u8; 2];
                self.read_operands(&mut operands);
                VgmEvent::RegisterWrite {
                    command: code,
                    port: command_port(code),
                    register: operands[0],
                    value: operands[1],
                }
            }
            opcode => VgmEvent::Unknown { opcode },
        };
        Some(event)
    }

    /// `0x67 0x66 tt ss ss ss ss [data]`
    fn read_data_block(&mut self) -> VgmEvent {
        let mut marker = [0u8; 1];
        if self.read_operands(&mut marker) < 1 || marker[0] != 0x66 {
            warn!(
                "Malformed data block at {:#x} (marker {:#04x})",
                self.pos.saturating_sub(2),
                marker[0]
            );
            return VgmEvent::Unknown { opcode: 0x67 };
        }

        let mut block_type = [0u8; 1];
        self.read_operands(&mut block_type);
        let mut size = [0u8; 4];
        self.read_operands(&mut size);
        let size = u32::from_le_bytes(size);

        // skip the payload to stay in sync with the command stream
        if !self.finished {
            match std::io::copy(
                &mut (&mut self.inner).take(u64::from(size)),
                &mut std::io::sink(),
            ) {
                Ok(skipped) => {
                    self.pos += skipped;
                    if skipped < u64::from(size) {
                        warn!(
                            "Data block truncated: {} of {} bytes available",
                            skipped, size
                        );
                        self.finished = true;
                    }
                }
                Err(e) => {
                    warn!("Failed to read data block: {}", e);
                    self.finished = true;
                }
            }
        }

        VgmEvent::DataBlock {
            block_type: block_type[0],
            size,
        }
    }

    /// Fill `buf` as far as the source allows,
    /// returning the number of bytes read.
    ///
    /// A short read ends the stream.
    /// Unfilled bytes are left untouched.
    fn read_operands(&mut self, buf: &mut [u8]) -> usize {
        if self.finished {
            return 0;
        }
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to read VGM data at {:#x}: {}", self.pos, e);
                    break;
                }
            }
        }
        self.pos += filled as u64;
        if filled < buf.len() {
            self.finished = true;
        }
        filled
    }
}

impl<R> Iterator for VgmReader<R>
where
    R: Read + Seek,
{
    type Item = VgmEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event()
    }
}
