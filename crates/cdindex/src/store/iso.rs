//! ISO9660 volume descriptor capture.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{Local, NaiveDateTime, TimeZone};
use log::{debug, warn};

use super::header::IndexHeader;
use crate::types::clamp_time;

const DESCRIPTORS_START: u64 = 0x8000;
const SECTOR_SIZE: usize = 2048;

const BOOT_RECORD: u8 = 0;
const PRIMARY_VOLUME: u8 = 1;
const TERMINATOR: u8 = 255;

/// Reads the header fields of `device`, or a blank header when it can't be opened.
pub fn capture_header(device: &Path) -> IndexHeader {
    let file = match File::open(device) {
        Ok(file) => file,
        Err(err) => {
            warn!("cannot open device {}: {err}", device.display());
            return IndexHeader::default();
        }
    };
    match read_volume_descriptors(file) {
        Ok(header) => header,
        Err(err) => {
            warn!("cannot read volume descriptors of {}: {err}", device.display());
            IndexHeader::default()
        }
    }
}

/// Walks the descriptor set until the terminator or end of input.
pub fn read_volume_descriptors<R: Read + Seek>(mut reader: R) -> std::io::Result<IndexHeader> {
    let mut header = IndexHeader::default();
    reader.seek(SeekFrom::Start(DESCRIPTORS_START))?;

    let mut sector = vec![0u8; SECTOR_SIZE];
    loop {
        match reader.read_exact(&mut sector) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
        match sector[0] {
            BOOT_RECORD => {
                if sector[7] == b'E' {
                    header.bootable = true;
                }
            }
            PRIMARY_VOLUME => read_primary(&sector, &mut header),
            TERMINATOR => break,
            other => debug!("skipping volume descriptor type {other}"),
        }
    }
    Ok(header)
}

fn read_primary(sector: &[u8], header: &mut IndexHeader) {
    header.volume_id = trimmed(&sector[40..72]);
    let sectors = u32::from_le_bytes([sector[80], sector[81], sector[82], sector[83]]);
    header.size = u64::from(sectors) * SECTOR_SIZE as u64;
    header.publisher = trimmed(&sector[318..446]);
    header.preparer = trimmed(&sector[446..574]);
    header.generator = trimmed(&sector[574..702]);
    header.ctime = parse_volume_date(&sector[813..827]);
    header.mtime = parse_volume_date(&sector[830..844]);
}

fn trimmed(field: &[u8]) -> String {
    String::from_utf8_lossy(field)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

/// Parses the leading `YYYYMMDDHHMMSS` digits of a volume date as local time.
fn parse_volume_date(field: &[u8]) -> u32 {
    let Ok(text) = std::str::from_utf8(field) else {
        return 0;
    };
    NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(|dt| clamp_time(dt.timestamp()))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn put(sector: &mut [u8], at: usize, value: &[u8]) {
        sector[at..at + value.len()].copy_from_slice(value);
    }

    fn padded(value: &str, width: usize) -> Vec<u8> {
        let mut out = value.as_bytes().to_vec();
        out.resize(width, b' ');
        out
    }

    fn image() -> Vec<u8> {
        let mut data = vec![0u8; DESCRIPTORS_START as usize];

        let mut boot = vec![0u8; SECTOR_SIZE];
        boot[0] = BOOT_RECORD;
        put(&mut boot, 1, b"CD001");
        put(&mut boot, 7, b"EL TORITO SPECIFICATION");
        data.extend_from_slice(&boot);

        let mut primary = vec![0u8; SECTOR_SIZE];
        primary[0] = PRIMARY_VOLUME;
        put(&mut primary, 40, &padded("HOLIDAY_PHOTOS", 32));
        put(&mut primary, 80, &1000u32.to_le_bytes());
        put(&mut primary, 318, &padded("ACME", 128));
        put(&mut primary, 446, &padded("", 128));
        put(&mut primary, 574, &padded("GENISOIMAGE", 128));
        put(&mut primary, 813, b"2009021320313000");
        put(&mut primary, 830, b"0000000000000000");
        data.extend_from_slice(&primary);

        let mut end = vec![0u8; SECTOR_SIZE];
        end[0] = TERMINATOR;
        data.extend_from_slice(&end);
        data
    }

    #[test]
    fn primary_descriptor_fields_are_captured() {
        let header = read_volume_descriptors(Cursor::new(image())).expect("read");
        assert!(header.bootable);
        assert_eq!(header.volume_id, "HOLIDAY_PHOTOS");
        assert_eq!(header.size, 1000 * 2048);
        assert_eq!(header.publisher, "ACME");
        assert_eq!(header.preparer, "");
        assert_eq!(header.generator, "GENISOIMAGE");
        assert!(header.ctime > 1_234_000_000);
        assert_eq!(header.mtime, 0);
    }

    #[test]
    fn short_input_yields_blank_header() {
        let header = read_volume_descriptors(Cursor::new(vec![0u8; 100])).expect("read");
        assert_eq!(header, IndexHeader::default());
    }

    #[test]
    fn missing_device_yields_blank_header() {
        let header = capture_header(Path::new("/nonexistent/cdindex-device"));
        assert_eq!(header, IndexHeader::default());
    }
}
