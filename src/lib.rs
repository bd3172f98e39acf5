//! Conversion of VGM sound logs into S98 sound logs.
//!
//! This crate reads chip register logs in the VGM format
//! and re-encodes them for S98 players.
//! A quick overview of the modules:
//!
//! - `vgm`: streaming [Video Game Music][vgm] reader
//! - `gd3`: GD3 tag decoding into S98 tags
//! - `device`: mapping of VGM chip commands to S98 devices
//! - `s98`: S98 v3 file writer and parser
//! - `convert`: the conversion driver
//!
//! [vgm]: https://vgmrips.net/wiki/VGM_Specification

pub mod convert;
pub(crate) mod data_types;
pub mod device;
pub mod gd3;
pub mod s98;
pub mod vgm;

pub use crate::convert::{convert_bytes, convert_file, ConversionStats, Error as ConvertError};
pub use crate::data_types::VarInt;
pub use crate::device::{Chip, DeviceKind};
pub use crate::gd3::{Gd3, Tags};
pub use crate::s98::{Error as S98Error, S98File, S98Writer};
pub use crate::vgm::{Error as VgmError, VgmEvent, VgmHeader, VgmReader};
