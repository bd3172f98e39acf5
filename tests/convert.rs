use s98kit::s98::{S98Command, DATA_OFFSET};
use s98kit::{convert_file, ConvertError, DeviceKind, S98File, VgmError};

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// A VGM 1.51 song for a YM2612 and an SN76489,
/// with an intro, a loop and a GD3 tag.
fn sample_vgm() -> Vec<u8> {
    let mut data = vec![0u8; 0x100];
    data[..4].copy_from_slice(b"Vgm ");
    put_u32(&mut data, 0x08, 0x0151);
    put_u32(&mut data, 0x0C, 3_579_545);
    put_u32(&mut data, 0x2C, 7_670_453);
    put_u32(&mut data, 0x18, 735 * 3);
    put_u32(&mut data, 0x20, 735 * 2);
    put_u32(&mut data, 0x34, 0x100 - 0x34);
    data[0x7C] = 0xF0u8; // -16

    data.extend_from_slice(&[
        0x52, 0x22, 0x00, // LFO off
        0x50, 0x00, 0x9F, // PSG channel 0 silent
        0x62, // intro
        0x53, 0xB4, 0xC0, // loop starts here, port 1
        0x62, 0x62, //
        0x66,
    ]);

    let loop_offset = 0x100 + 6 + 1;
    put_u32(&mut data, 0x1C, loop_offset - 0x1C);

    let gd3_start = data.len() as u32;
    put_u32(&mut data, 0x14, gd3_start - 0x14);
    let fields = [
        "Stage 1",
        "",
        "Ｓｏｍｅ Ｇａｍｅ",
        "",
        "Sega Mega Drive",
        "",
        "",
        "作曲者",
        "1992",
        "",
        "",
    ];
    let strings: Vec<u8> = fields.iter().flat_map(|f| utf16z(f)).collect();
    data.extend_from_slice(b"Gd3 ");
    data.extend_from_slice(&0x0100u32.to_le_bytes());
    data.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    data.extend_from_slice(&strings);

    let eof = data.len() as u32 - 4;
    put_u32(&mut data, 0x04, eof);
    data
}

#[test]
fn converts_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.vgm");
    let output = dir.path().join("song.s98");
    std::fs::write(&input, sample_vgm()).unwrap();

    let stats = convert_file(&input, &output).unwrap();
    assert_eq!(stats.register_writes, 3);
    assert_eq!(stats.dropped_writes, 0);
    assert_eq!(stats.total_samples, 735 * 3);
    assert_eq!(stats.loop_sample, Some(735));

    let file = S98File::from_file(&output).unwrap();
    assert_eq!(&file.header.magic, b"S983");
    assert_eq!(file.header.timer_numerator, 1);
    assert_eq!(file.header.timer_denominator, 44_100);
    assert_eq!(file.header.data_offset, DATA_OFFSET);

    let devices: Vec<_> = file.devices.iter().map(|d| (d.kind, d.clock)).collect();
    assert_eq!(
        devices,
        vec![
            (DeviceKind::Opn2, 7_670_453),
            (DeviceKind::Dcsg, 3_579_545)
        ]
    );

    let commands: Vec<_> = file.commands.iter().map(|(_, c)| *c).collect();
    assert_eq!(
        commands,
        vec![
            S98Command::Write {
                device: 0,
                register: 0x22,
                value: 0x00
            },
            S98Command::Write {
                device: 2,
                register: 0x00,
                value: 0x9F
            },
            S98Command::NSync { ticks: 735 },
            S98Command::Write {
                device: 1,
                register: 0xB4,
                value: 0xC0
            },
            S98Command::NSync { ticks: 735 },
            S98Command::NSync { ticks: 735 },
            S98Command::End,
        ]
    );
    assert_eq!(file.loop_index(), Some(3));
    assert_eq!(file.total_ticks(), 735 * 3);

    let tags = file.tags.unwrap();
    assert_eq!(tags.get("title"), Some("Stage 1"));
    assert_eq!(tags.get("game"), Some("Some Game"));
    assert_eq!(tags.get("system"), Some("Sega Mega Drive"));
    assert_eq!(tags.get("artist"), Some("作曲者"));
    assert_eq!(tags.get("year"), Some("1992"));
    assert_eq!(tags.get("s98by"), None);
    assert_eq!(tags.get("vgm_volume_modifier"), Some("-16"));
}

#[test]
fn tag_block_is_utf8_with_bom() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.vgm");
    let output = dir.path().join("song.s98");
    std::fs::write(&input, sample_vgm()).unwrap();
    convert_file(&input, &output).unwrap();

    let bytes = std::fs::read(&output).unwrap();
    let tag_offset = u32::from_le_bytes([bytes[0x10], bytes[0x11], bytes[0x12], bytes[0x13]]);
    let block = &bytes[tag_offset as usize..];
    assert!(block.starts_with(b"[S98]\xEF\xBB\xBFtitle=Stage 1\n"));
    assert_eq!(block.last(), Some(&0));
}

#[test]
fn missing_input_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.vgm");
    let output = dir.path().join("out.s98");

    let err = convert_file(&input, &output).unwrap_err();
    assert!(matches!(
        err,
        ConvertError::ReadVgm {
            source: VgmError::OpenFile { .. }
        }
    ));
    assert!(!output.exists());
}

#[test]
fn non_vgm_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("noise.vgm");
    let output = dir.path().join("out.s98");
    std::fs::write(&input, vec![0x55u8; 0x80]).unwrap();

    let err = convert_file(&input, &output).unwrap_err();
    assert!(matches!(
        err,
        ConvertError::ReadVgm {
            source: VgmError::InvalidVgm
        }
    ));
}
