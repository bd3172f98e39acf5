//! VGM to S98 conversion.
//!
//! Events are pulled from a [`VgmReader`] one at a time
//! and re-encoded through an [`S98Writer`]:
//! waits pass through unchanged (both formats tick at 44100 Hz),
//! chip writes are routed to the S98 device standing for the chip,
//! and everything S98 cannot express is counted and skipped.

use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

use crate::device::{self, Chip};
use crate::gd3::{self, Gd3, Tags};
use crate::s98::{self, S98Writer};
use crate::vgm::{self, VgmEvent, VgmHeader, VgmReader};

/// Unknown commands reported individually before going quiet
const UNKNOWN_LOG_LIMIT: u32 = 10;

/// An error converting a VGM file
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read VGM input
    ReadVgm { source: vgm::Error },
    /// Failed to write S98 output
    WriteS98 { source: s98::Error },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Where playback loops back to, in samples from the start.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoopStart {
    /// The song does not loop
    None,
    /// The whole song loops
    FromStart,
    /// The song loops back to this sample, after an intro
    At(u32),
}

impl LoopStart {
    pub fn new(total_samples: u32, loop_samples: u32) -> Self {
        if loop_samples == 0 {
            LoopStart::None
        } else if loop_samples >= total_samples {
            LoopStart::FromStart
        } else {
            LoopStart::At(total_samples - loop_samples)
        }
    }

    pub fn from_header(header: &VgmHeader) -> Self {
        Self::new(header.total_samples, header.loop_samples)
    }
}

/// Counters gathered over one conversion
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConversionStats {
    /// Sum of all waits written
    pub total_samples: u64,
    pub waits: u32,
    pub register_writes: u32,
    /// Chip writes with no S98 device to go to
    pub dropped_writes: u32,
    pub data_blocks: u32,
    pub pcm_seeks: u32,
    pub unknown_commands: u32,
    /// Running sample count at which the loop point was set
    pub loop_sample: Option<u64>,
}

/// Drives the conversion of one VGM stream.
#[derive(Debug)]
pub struct Converter<'h> {
    header: &'h VgmHeader,
    loop_start: LoopStart,
    loop_armed: bool,
    absent_chips: Vec<Chip>,
    stats: ConversionStats,
}

impl<'h> Converter<'h> {
    pub fn new(header: &'h VgmHeader) -> Self {
        Converter {
            header,
            loop_start: LoopStart::from_header(header),
            loop_armed: false,
            absent_chips: Vec::new(),
            stats: ConversionStats::default(),
        }
    }

    pub fn loop_start(&self) -> LoopStart {
        self.loop_start
    }

    pub fn stats(&self) -> &ConversionStats {
        &self.stats
    }

    /// Add a device for every chip with a clock in the header,
    /// so that device IDs do not depend on command order.
    pub fn register_devices<W: Write + Seek>(&self, writer: &mut S98Writer<W>) {
        for chip in device::REGISTRATION_ORDER {
            let clock = chip.clock(self.header);
            if clock == 0 {
                continue;
            }
            let kind = chip.device_kind();
            if let Some(id) = writer.add_device(kind, clock, 0) {
                info!(
                    "Added {} ({:?}) device #{}, clock: {} Hz",
                    chip.name(),
                    kind,
                    id,
                    clock
                );
            }
        }
    }

    /// Convert every event of the stream, ending the S98 command stream.
    pub fn run<R, W>(
        mut self,
        reader: &mut VgmReader<R>,
        writer: &mut S98Writer<W>,
    ) -> Result<ConversionStats>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        if let LoopStart::At(sample) = self.loop_start {
            info!(
                "Loop will start at {} samples (loop length: {} samples)",
                sample, self.header.loop_samples
            );
        }

        let mut ended = false;
        while let Some(event) = reader.next_event() {
            if !self.process(event, writer)? {
                ended = true;
                break;
            }
        }
        if !ended {
            warn!("VGM data ended without an end command");
            writer.write_end().context(WriteS98Snafu)?;
        }

        if self.stats.unknown_commands > UNKNOWN_LOG_LIMIT {
            debug!(
                "{} unknown commands in total",
                self.stats.unknown_commands
            );
        }
        info!(
            "Conversion complete. Total samples: {}",
            self.stats.total_samples
        );
        info!(
            "Register writes: {}, Wait commands: {}",
            self.stats.register_writes, self.stats.waits
        );
        Ok(self.stats)
    }

    /// Handle one event.
    ///
    /// Returns `false` once the end of the stream was written.
    pub fn process<W: Write + Seek>(
        &mut self,
        event: VgmEvent,
        writer: &mut S98Writer<W>,
    ) -> Result<bool> {
        match event {
            VgmEvent::Wait { samples } => self.wait(samples, writer)?,
            VgmEvent::RegisterWrite {
                command,
                port,
                register,
                value,
            } => self.register_write(command, port, register, value, writer)?,
            VgmEvent::DataBlock { block_type, size } => {
                self.stats.data_blocks += 1;
                warn!(
                    "Skipping data block type {:#04x} ({} bytes)",
                    block_type, size
                );
            }
            VgmEvent::PcmSeek { offset } => {
                self.stats.pcm_seeks += 1;
                warn!("Skipping PCM seek to offset {:#x}", offset);
            }
            VgmEvent::Unknown { opcode } => {
                self.stats.unknown_commands += 1;
                if self.stats.unknown_commands <= UNKNOWN_LOG_LIMIT {
                    debug!("Unhandled command {:#04x}", opcode);
                }
            }
            VgmEvent::End => {
                writer.write_end().context(WriteS98Snafu)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn wait<W: Write + Seek>(&mut self, samples: u32, writer: &mut S98Writer<W>) -> Result<()> {
        self.stats.waits += 1;
        if self.loop_start == LoopStart::FromStart {
            self.arm_loop(writer);
        }

        writer.write_wait(samples).context(WriteS98Snafu)?;
        self.stats.total_samples += u64::from(samples);

        if let LoopStart::At(sample) = self.loop_start {
            if self.stats.total_samples >= u64::from(sample) {
                self.arm_loop(writer);
            }
        }
        Ok(())
    }

    fn arm_loop<W: Write + Seek>(&mut self, writer: &mut S98Writer<W>) {
        if self.loop_armed {
            return;
        }
        writer.set_loop_point();
        self.loop_armed = true;
        self.stats.loop_sample = Some(self.stats.total_samples);
        info!("Loop point set at {} samples", self.stats.total_samples);
    }

    fn register_write<W: Write + Seek>(
        &mut self,
        command: u8,
        port: u8,
        register: u8,
        value: u8,
        writer: &mut S98Writer<W>,
    ) -> Result<()> {
        let Some(mapping) = device::map_command(command) else {
            self.stats.dropped_writes += 1;
            return Ok(());
        };

        let base_id = match writer.device_id(mapping.kind) {
            Some(id) => Some(id),
            None => {
                let clock = mapping.chip.clock(self.header);
                match mapping.kind.resolve_clock(clock) {
                    Some(clock) => {
                        let id = writer.add_device(mapping.kind, clock, 0);
                        if let Some(id) = id {
                            info!(
                                "Added {} ({:?}) device #{} on first use, clock: {} Hz",
                                mapping.chip.name(),
                                mapping.kind,
                                id,
                                clock
                            );
                        }
                        id
                    }
                    None => None,
                }
            }
        };

        let Some(base_id) = base_id else {
            self.stats.dropped_writes += 1;
            if !self.absent_chips.contains(&mapping.chip) {
                self.absent_chips.push(mapping.chip);
                warn!(
                    "Dropping writes to {}: no S98 device available",
                    mapping.chip.name()
                );
            }
            return Ok(());
        };

        writer
            .write_register(base_id + port, register, value)
            .context(WriteS98Snafu)?;
        self.stats.register_writes += 1;
        Ok(())
    }
}

/// Combine the GD3 tags with the tags synthesized from the header.
pub fn merge_tags(header: &VgmHeader, gd3_tags: Option<Tags>) -> Tags {
    let mut tags = gd3_tags.unwrap_or_default();
    if header.volume_modifier != 0 {
        tags.insert(
            gd3::VOLUME_MODIFIER_KEY,
            header.volume_modifier.to_string(),
        );
    }
    tags
}

fn log_header(header: &VgmHeader) {
    info!("VGM Version: {}", header.version_string());
    info!("Total samples: {}", header.total_samples);
    info!("Loop samples: {}", header.loop_samples);
    if header.volume_modifier != 0 {
        info!(
            "Volume modifier: {} (gain factor: {:.4})",
            header.volume_modifier,
            header.volume_gain()
        );
    }
}

/// Convert a VGM stream whose header was already read,
/// writing the command stream and tag block.
///
/// The writer is left open for the caller to close.
pub fn convert_stream<R, W>(
    reader: &mut VgmReader<R>,
    header: &VgmHeader,
    writer: &mut S98Writer<W>,
    gd3_tags: Option<Tags>,
) -> Result<ConversionStats>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let converter = Converter::new(header);
    converter.register_devices(writer);
    let stats = converter.run(reader, writer)?;

    let tags = merge_tags(header, gd3_tags);
    if !tags.is_empty() {
        writer.write_tags(&tags).context(WriteS98Snafu)?;
        info!("{} tags written", tags.len());
    }
    Ok(stats)
}

/// Convert a VGM file into an S98 file.
pub fn convert_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<ConversionStats> {
    let input = input.as_ref();
    let output = output.as_ref();

    let mut reader = VgmReader::open(input).context(ReadVgmSnafu)?;
    let header = reader.read_header().context(ReadVgmSnafu)?;
    log_header(&header);

    let mut writer = S98Writer::create(output).context(WriteS98Snafu)?;
    let stats = convert_stream(&mut reader, &header, &mut writer, gd3::read_tags(input))?;
    writer.close().context(WriteS98Snafu)?;

    info!("S98 file written: {}", output.display());
    Ok(stats)
}

/// Convert a complete VGM file held in memory into S98 bytes.
pub fn convert_bytes(vgm: &[u8]) -> Result<(Vec<u8>, ConversionStats)> {
    let mut reader = VgmReader::new(Cursor::new(vgm)).context(ReadVgmSnafu)?;
    let header = reader.read_header().context(ReadVgmSnafu)?;
    log_header(&header);

    let gd3_tags = Gd3::from_vgm_bytes(vgm).ok().map(|gd3| gd3.to_tags());
    let mut writer = S98Writer::new(Cursor::new(Vec::new())).context(WriteS98Snafu)?;
    let stats = convert_stream(&mut reader, &header, &mut writer, gd3_tags)?;
    let output = writer.finish().context(WriteS98Snafu)?.into_inner();
    Ok((output, stats))
}
