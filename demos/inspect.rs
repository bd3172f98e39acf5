//! Inspect a VGM or S98 file
//!
use s98kit::{gd3, S98File, VgmReader};

use snafu::{prelude::*, report, Whatever};

#[report]
fn main() -> Result<(), Whatever> {
    let Some(file) = std::env::args().nth(1) else {
        whatever!("Usage: inspect <file.vgm|file.s98>");
    };

    if file.ends_with(".s98") {
        let music = S98File::from_file(&file).whatever_context("Failed to read S98 file")?;
        println!("{:#?}", music);
    } else if file.ends_with(".vgm") {
        let mut reader = VgmReader::open(&file).whatever_context("Failed to open VGM file")?;
        let header = reader
            .read_header()
            .whatever_context("Failed to read VGM header")?;
        println!("{:#?}", header);
        if let Some(tags) = gd3::read_tags(&file) {
            println!("{:#?}", tags);
        }
        for event in reader {
            println!("{:?}", event);
        }
    } else {
        whatever!("Unknown file type: {}", file);
    }

    Ok(())
}
