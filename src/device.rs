//! Mapping between VGM chip commands and S98 devices.
//!
//! VGM identifies a chip by the command code used to write to it
//! and by the header field holding its clock.
//! S98 identifies a chip by a device type in its device table.

use crate::vgm::VgmHeader;

/// Clock assumed for a YM2608 whose header clock is missing (PC-98 boards)
pub const OPNA_FALLBACK_CLOCK: u32 = 8_000_000;

/// A sound chip as known to the VGM format.
///
/// Each chip selects one clock field of the VGM header.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum Chip {
    Sn76489,
    Ym2413,
    Ym2612,
    Ym2151,
    Ym2203,
    Ym2608,
    Ym2610,
    Ym3812,
    Ym3526,
    Ay8910,
}

impl Chip {
    /// The chip written to by the given VGM command code, if any
    pub fn from_command(code: u8) -> Option<Self> {
        Some(match code {
            0x50 => Chip::Sn76489,
            0x51 => Chip::Ym2413,
            0x52 | 0x53 => Chip::Ym2612,
            0x54 => Chip::Ym2151,
            0x55 => Chip::Ym2203,
            0x56 | 0x57 => Chip::Ym2608,
            0x58 | 0x59 => Chip::Ym2610,
            0x5A => Chip::Ym3812,
            0x5B => Chip::Ym3526,
            0xA0 => Chip::Ay8910,
            _ => return None,
        })
    }

    /// The clock of this chip as declared in the VGM header (0 if absent)
    pub fn clock(self, header: &VgmHeader) -> u32 {
        match self {
            Chip::Sn76489 => header.sn76489_clock,
            Chip::Ym2413 => header.ym2413_clock,
            Chip::Ym2612 => header.ym2612_clock,
            Chip::Ym2151 => header.ym2151_clock,
            Chip::Ym2203 => header.ym2203_clock,
            Chip::Ym2608 => header.ym2608_clock,
            Chip::Ym2610 => header.ym2610_clock,
            Chip::Ym3812 => header.ym3812_clock,
            Chip::Ym3526 => header.ym3526_clock,
            Chip::Ay8910 => header.ay8910_clock,
        }
    }

    /// The S98 device type emulating this chip
    pub fn device_kind(self) -> DeviceKind {
        match self {
            Chip::Sn76489 => DeviceKind::Dcsg,
            Chip::Ym2413 => DeviceKind::Opll,
            Chip::Ym2612 => DeviceKind::Opn2,
            Chip::Ym2151 => DeviceKind::Opm,
            Chip::Ym2203 => DeviceKind::Opn,
            Chip::Ym2608 => DeviceKind::Opna,
            Chip::Ym2610 => DeviceKind::None,
            Chip::Ym3812 => DeviceKind::Opl2,
            Chip::Ym3526 => DeviceKind::Opl,
            Chip::Ay8910 => DeviceKind::Ay8910,
        }
    }

    /// Human readable chip name, for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Chip::Sn76489 => "SN76489",
            Chip::Ym2413 => "YM2413",
            Chip::Ym2612 => "YM2612",
            Chip::Ym2151 => "YM2151",
            Chip::Ym2203 => "YM2203",
            Chip::Ym2608 => "YM2608",
            Chip::Ym2610 => "YM2610",
            Chip::Ym3812 => "YM3812",
            Chip::Ym3526 => "YM3526",
            Chip::Ay8910 => "AY8910",
        }
    }
}

/// Chips registered ahead of conversion when their header clock is set,
/// in device table order.
pub const REGISTRATION_ORDER: [Chip; 9] = [
    Chip::Ym2608,
    Chip::Ym2612,
    Chip::Ym2203,
    Chip::Ym2151,
    Chip::Ym2413,
    Chip::Ym3812,
    Chip::Ym3526,
    Chip::Ay8910,
    Chip::Sn76489,
];

/// S98 device type, as stored in the device table.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
#[repr(u32)]
pub enum DeviceKind {
    None = 0,
    /// YM2149
    Psg = 1,
    /// YM2203
    Opn = 2,
    /// YM2612
    Opn2 = 3,
    /// YM2608
    Opna = 4,
    /// YM2151
    Opm = 5,
    /// YM2413
    Opll = 6,
    /// YM3526
    Opl = 7,
    /// YM3812
    Opl2 = 8,
    /// YMF262
    Opl3 = 9,
    Ay8910 = 15,
    /// SN76489
    Dcsg = 16,
}

impl DeviceKind {
    /// Every device type which may appear in a device table
    pub const ALL: [DeviceKind; 11] = [
        DeviceKind::Psg,
        DeviceKind::Opn,
        DeviceKind::Opn2,
        DeviceKind::Opna,
        DeviceKind::Opm,
        DeviceKind::Opll,
        DeviceKind::Opl,
        DeviceKind::Opl2,
        DeviceKind::Opl3,
        DeviceKind::Ay8910,
        DeviceKind::Dcsg,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => DeviceKind::None,
            1 => DeviceKind::Psg,
            2 => DeviceKind::Opn,
            3 => DeviceKind::Opn2,
            4 => DeviceKind::Opna,
            5 => DeviceKind::Opm,
            6 => DeviceKind::Opll,
            7 => DeviceKind::Opl,
            8 => DeviceKind::Opl2,
            9 => DeviceKind::Opl3,
            15 => DeviceKind::Ay8910,
            16 => DeviceKind::Dcsg,
            _ => return None,
        })
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Apply the fallback rule for a chip without a declared clock.
    ///
    /// Returns the clock to register the device with,
    /// or `None` if the device should be treated as absent.
    pub fn resolve_clock(self, clock: u32) -> Option<u32> {
        match (self, clock) {
            (DeviceKind::None, _) => None,
            (DeviceKind::Opna, 0) => Some(OPNA_FALLBACK_CLOCK),
            (_, 0) => None,
            (_, clock) => Some(clock),
        }
    }
}

/// The outcome of mapping a VGM chip command to the S98 side.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CommandMapping {
    /// The VGM chip, selecting the header clock field
    pub chip: Chip,
    /// The S98 device type (`DeviceKind::None` if the chip has no S98 counterpart)
    pub kind: DeviceKind,
    /// The port addressed by the command (0 or 1)
    pub port: u8,
}

/// Map a VGM chip command code to its S98 device, clock field and port.
///
/// Returns `None` for codes which are not chip writes.
pub fn map_command(code: u8) -> Option<CommandMapping> {
    let chip = Chip::from_command(code)?;
    Some(CommandMapping {
        chip,
        kind: chip.device_kind(),
        port: command_port(code),
    })
}

/// The port selected by a chip command code.
pub fn command_port(code: u8) -> u8 {
    match code {
        0x53 | 0x57 | 0x59 => 1,
        _ => 0,
    }
}
