//! MP3 metadata: ID3 tags, the first MPEG frame header, and its report.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::{debug, warn};

use super::{report_trailer, write_field, yes_no, DumpContext, MetadataDumper, MetadataExtractor};
use crate::error::Result;
use crate::store::{FieldReader, FieldWriter, SideKind, SideReader, SideStores};
use crate::types::Entry;

pub const PATTERN: &str = r"\.mp3$";

pub const RECORD_LEN: usize = 304;
const TITLE_LEN: usize = 128;
const ARTIST_LEN: usize = 64;
const ALBUM_LEN: usize = 96;
const NO_GENRE: u8 = 0xFF;

// ---------------------------------------------------------------------------
// Genres
// ---------------------------------------------------------------------------

/// ID3v1 genre names indexed by code.
pub const GENRES: [&str; 128] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop",
    "Jazz", "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap",
    "Reggae", "Rock", "Techno", "Industrial", "Alternative", "Ska", "Death Metal", "Pranks",
    "Soundtrack", "Euro-Techno", "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance",
    "Classical", "Instrumental", "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise",
    "AlternRock", "Bass", "Soul", "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock",
    "Ethnic", "Gothic", "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle",
    "Native American", "Cabaret", "New Wave", "Psychadelic", "Rave", "Showtunes", "Trailer", "Lo-Fi",
    "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll", "Hard Rock",
    "Folk", "Folk-Rock", "National Folk", "Swing", "Fast Fusion", "Bebob", "Latin", "Revival",
    "Celtic", "Bluegrass", "Avantgarde", "Gothic Rock", "Progressive Rock", "Psychedelic Rock", "Symphonic Rock", "Slow Rock",
    "Big Band", "Chorus", "Easy Listening", "Acoustic", "Humour", "Speech", "Chanson", "Opera",
    "Chamber Music", "Sonata", "Symphony", "Booty Bass", "Primus", "Porn Groove", "Satire", "Slow Jam",
    "Club", "Tango", "Samba", "Folklore", "Ballad", "Power Ballad", "Rhythmic Soul", "Freestyle",
    "Duet", "Punk Rock", "Drum Solo", "A capella", "Euro-House", "Dance Hall", "Heavy Metal", "Black Metal",
];

const GENRE_ALIASES: [(&str, u8); 5] = [
    ("Alt. Rock", 40),
    ("Alternative Rock", 40),
    ("Alternative-Rock", 40),
    ("Alt Rock", 40),
    ("R & B", 14),
];

/// Resolves a `TCON` value: `(n)`, `n`, or a genre name.
pub fn parse_genre(value: &str) -> Option<u8> {
    let value = value.trim();
    let numeric = value
        .strip_prefix('(')
        .and_then(|rest| rest.split(')').next())
        .unwrap_or(value);
    if let Ok(code) = numeric.parse::<u8>() {
        return (usize::from(code) < GENRES.len()).then_some(code);
    }
    GENRES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .map(|index| index as u8)
        .or_else(|| {
            GENRE_ALIASES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(value))
                .map(|(_, code)| *code)
        })
}

pub fn genre_name(code: Option<u8>) -> &'static str {
    code.and_then(|code| GENRES.get(usize::from(code)).copied())
        .unwrap_or("")
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: u16,
    pub genre: Option<u8>,
    pub track: u8,
    /// ISO 639-2 code, up to three ASCII letters.
    pub language: String,
}

const ID3V2_FOOTER: u8 = 0x10;
const ID3V2_EXTENDED: u8 = 0x40;

fn syncsafe(bytes: [u8; 4]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, byte| (acc << 7) | u32::from(byte & 0x7F))
}

/// Reads an ID3v2.3/2.4 tag; returns the tags and where the audio starts.
fn read_id3v2(file: &File) -> std::io::Result<Option<(AudioTags, u64)>> {
    let mut header = [0u8; 10];
    if file.read_exact_at(&mut header, 0).is_err() || &header[..3] != b"ID3" {
        return Ok(None);
    }
    let major = header[3];
    let flags = header[5];
    let size = syncsafe([header[6], header[7], header[8], header[9]]) as usize;
    let mut audio_start = 10 + size as u64;
    if flags & ID3V2_FOOTER != 0 {
        audio_start += 10;
    }
    if major != 3 && major != 4 {
        debug!("unsupported ID3v2.{major} tag");
        return Ok(Some((AudioTags::default(), audio_start)));
    }

    let available = file.metadata()?.len().saturating_sub(10);
    let body_len = (size as u64).min(available) as usize;
    if body_len < size {
        debug!("ID3v2 tag claims {size} bytes, only {body_len} follow");
    }
    let mut body = vec![0u8; body_len];
    file.read_exact_at(&mut body, 10)?;
    let mut pos = 0usize;
    if flags & ID3V2_EXTENDED != 0 && body.len() >= 4 {
        let raw = [body[0], body[1], body[2], body[3]];
        pos = if major == 4 {
            syncsafe(raw) as usize
        } else {
            u32::from_be_bytes(raw) as usize + 4
        };
    }

    let mut tags = AudioTags::default();
    while pos + 10 <= body.len() && body[pos] != 0 {
        let id = &body[pos..pos + 4];
        let raw = [body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]];
        let frame_len = match major {
            4 => syncsafe(raw),
            _ => u32::from_be_bytes(raw),
        };
        let start = pos + 10;
        let end = start.saturating_add(frame_len as usize).min(body.len());
        let data = &body[start..end];
        apply_frame(&mut tags, id, data);
        pos = end;
    }
    Ok(Some((tags, audio_start)))
}

fn apply_frame(tags: &mut AudioTags, id: &[u8], data: &[u8]) {
    let Some((&encoding, text)) = data.split_first() else {
        return;
    };
    if id[0] != b'T' {
        return;
    }
    let value = decode_text(encoding, text);
    match id {
        b"TIT2" => tags.title = value,
        b"TPE1" => tags.artist = value,
        b"TALB" => tags.album = value,
        b"TRCK" => tags.track = leading_number(&value).unwrap_or(0) as u8,
        b"TYER" | b"TDRC" => tags.year = leading_number(&value).unwrap_or(0) as u16,
        b"TCON" => tags.genre = parse_genre(&value),
        b"TLAN" => tags.language = value.chars().filter(char::is_ascii).take(3).collect(),
        _ => {}
    }
}

fn leading_number(value: &str) -> Option<u32> {
    let digits: String = value.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Decodes an ID3v2 text payload in the given encoding.
pub fn decode_text(encoding: u8, bytes: &[u8]) -> String {
    let text = match encoding {
        1 => match bytes {
            [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
            [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
            _ => decode_utf16(bytes, u16::from_le_bytes),
        },
        2 => decode_utf16(bytes, u16::from_be_bytes),
        3 => {
            let end = memchr::memchr(0, bytes).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        _ => decode_latin1(bytes),
    };
    text.trim_end().to_string()
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .take_while(|&u| u != 0);
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

const ID3V1_LEN: u64 = 128;
const LYRICS_FOOTER_LEN: u64 = 15;

/// Reads an ID3v1/1.1 trailer, letting Lyrics3 v2 fields override.
fn read_id3v1(file: &File, len: u64) -> std::io::Result<Option<AudioTags>> {
    if len < ID3V1_LEN {
        return Ok(None);
    }
    let mut tag = [0u8; ID3V1_LEN as usize];
    file.read_exact_at(&mut tag, len - ID3V1_LEN)?;
    if &tag[..3] != b"TAG" {
        return Ok(None);
    }

    let field = |range: std::ops::Range<usize>| decode_latin1(&tag[range]).trim_end().to_string();
    let mut tags = AudioTags {
        title: field(3..33),
        artist: field(33..63),
        album: field(63..93),
        year: leading_number(&field(93..97)).unwrap_or(0) as u16,
        genre: (tag[127] != NO_GENRE && usize::from(tag[127]) < GENRES.len()).then_some(tag[127]),
        track: if tag[125] == 0 { tag[126] } else { 0 },
        language: String::new(),
    };

    if len >= ID3V1_LEN + LYRICS_FOOTER_LEN {
        let mut footer = [0u8; LYRICS_FOOTER_LEN as usize];
        file.read_exact_at(&mut footer, len - ID3V1_LEN - LYRICS_FOOTER_LEN)?;
        if &footer[6..] == b"LYRICS200" {
            let block_len = std::str::from_utf8(&footer[..6])
                .ok()
                .and_then(|digits| digits.parse::<u64>().ok())
                .unwrap_or(0);
            let footer_at = len - ID3V1_LEN - LYRICS_FOOTER_LEN;
            if block_len > 0 && block_len <= footer_at {
                let mut block = vec![0u8; block_len as usize];
                file.read_exact_at(&mut block, footer_at - block_len)?;
                apply_lyrics3(&mut tags, &block);
            }
        }
    }
    Ok(Some(tags))
}

fn apply_lyrics3(tags: &mut AudioTags, block: &[u8]) {
    let Some(mut rest) = block.strip_prefix(b"LYRICSBEGIN".as_slice()) else {
        return;
    };
    while rest.len() >= 8 {
        let id = &rest[..3];
        let Some(len) = std::str::from_utf8(&rest[3..8])
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
        else {
            return;
        };
        let end = (8 + len).min(rest.len());
        let value = decode_latin1(&rest[8..end]).trim_end().to_string();
        if !value.is_empty() {
            match id {
                b"ETT" => tags.title = value,
                b"EAR" => tags.artist = value,
                b"EAL" => tags.album = value,
                _ => {}
            }
        }
        rest = &rest[end..];
    }
}

// ---------------------------------------------------------------------------
// MPEG frame header
// ---------------------------------------------------------------------------

/// Packed version codes stored in the record.
pub const MPEG_1: u8 = 1;
pub const MPEG_2: u8 = 2;
pub const MPEG_25: u8 = 3;

const BITRATES_V1: [[u16; 14]; 3] = [
    [32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const BITRATES_V2_L1: [u16; 14] = [32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATES_V2_L23: [u16; 14] = [8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    /// 1, 2 or 3 for Layer I, II, III.
    pub layer: u8,
    /// kbps; 0 for free or invalid bitrate indices.
    pub bitrate: u16,
    pub frequency: u16,
    pub mode: u8,
    pub copyright: bool,
    pub original: bool,
}

impl FrameHeader {
    pub fn parse(raw: [u8; 4]) -> Option<Self> {
        if raw[0] != 0xFF || raw[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (raw[1] & 0x18) >> 3 {
            3 => MPEG_1,
            2 => MPEG_2,
            0 => MPEG_25,
            _ => return None,
        };
        let layer = match (raw[1] & 0x06) >> 1 {
            3 => 1,
            2 => 2,
            1 => 3,
            _ => return None,
        };
        let bitrate_index = usize::from((raw[2] & 0xF0) >> 4);
        let table = match (version, layer) {
            (MPEG_1, layer) => &BITRATES_V1[usize::from(layer - 1)],
            (_, 1) => &BITRATES_V2_L1,
            _ => &BITRATES_V2_L23,
        };
        let bitrate = match bitrate_index {
            1..=14 => table[bitrate_index - 1],
            _ => 0,
        };
        let base: u32 = match (raw[2] & 0x0C) >> 2 {
            0 => 44100,
            1 => 48000,
            2 => 32000,
            _ => return None,
        };
        let divisor = match version {
            MPEG_1 => 1,
            MPEG_2 => 2,
            _ => 4,
        };
        let frequency = (base / divisor) as u16;

        Some(Self {
            version,
            layer,
            bitrate,
            frequency,
            mode: (raw[3] & 0xC0) >> 6,
            copyright: (raw[3] & 0x08) != 0,
            original: (raw[3] & 0x04) != 0,
        })
    }

    fn packed(&self) -> u8 {
        self.version
            | (self.layer << 2)
            | (self.mode << 4)
            | (u8::from(self.copyright) << 6)
            | (u8::from(self.original) << 7)
    }

    fn unpack(bitrate: u16, frequency: u16, packed: u8) -> Self {
        Self {
            version: packed & 0x03,
            layer: (packed >> 2) & 0x03,
            bitrate,
            frequency,
            mode: (packed >> 4) & 0x03,
            copyright: packed & 0x40 != 0,
            original: packed & 0x80 != 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRecord {
    pub id: u32,
    pub frame: FrameHeader,
    pub tags: AudioTags,
}

impl AudioRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut language = [0u8; 3];
        for (slot, byte) in language.iter_mut().zip(self.tags.language.bytes()) {
            *slot = byte;
        }
        let mut writer = FieldWriter::with_capacity(RECORD_LEN);
        writer
            .u32(self.id)
            .u16(self.frame.bitrate)
            .u16(self.frame.frequency)
            .u8(self.frame.packed())
            .bytes(&language)
            .text(&self.tags.title, TITLE_LEN)
            .text(&self.tags.artist, ARTIST_LEN)
            .text(&self.tags.album, ALBUM_LEN)
            .u16(self.tags.year)
            .u8(self.tags.genre.unwrap_or(NO_GENRE))
            .u8(self.tags.track);
        writer.finish()
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut reader = FieldReader::new(buf);
        let id = reader.u32();
        let bitrate = reader.u16();
        let frequency = reader.u16();
        let packed = reader.u8();
        let language: [u8; 3] = reader.array();
        let title = reader.text(TITLE_LEN);
        let artist = reader.text(ARTIST_LEN);
        let album = reader.text(ALBUM_LEN);
        let year = reader.u16();
        let genre = reader.u8();
        let track = reader.u8();
        Self {
            id,
            frame: FrameHeader::unpack(bitrate, frequency, packed),
            tags: AudioTags {
                title,
                artist,
                album,
                year,
                genre: (genre != NO_GENRE).then_some(genre),
                track,
                language: language
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| char::from(b))
                    .collect(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub struct AudioExtractor;

impl MetadataExtractor for AudioExtractor {
    fn extract(&self, source: &Path, entry: &Entry, sides: &mut SideStores) -> Result<Option<u32>> {
        let file = File::open(source)?;
        let len = file.metadata()?.len();
        let (tags, audio_start) = match read_id3v2(&file)? {
            Some(found) => found,
            None => (read_id3v1(&file, len)?.unwrap_or_default(), 0),
        };

        let mut raw = [0u8; 4];
        let frame = match file.read_exact_at(&mut raw, audio_start) {
            Ok(()) => FrameHeader::parse(raw),
            Err(_) => None,
        };
        let Some(frame) = frame else {
            warn!("{}: no MPEG frame header found", source.display());
            return Ok(None);
        };

        let record = AudioRecord {
            id: entry.id,
            frame,
            tags,
        };
        let offset = sides.append(SideKind::Audio, &record.encode())?;
        Ok(Some(offset))
    }
}

pub struct AudioDumper;

fn version_label(frame: &FrameHeader) -> String {
    let version = match frame.version {
        MPEG_1 => "1.0",
        MPEG_2 => "2.0",
        MPEG_25 => "2.5",
        _ => "?",
    };
    let layer = match frame.layer {
        1 => "I",
        2 => "II",
        3 => "III",
        _ => "?",
    };
    format!("MPEG {version} Layer {layer}")
}

fn mode_label(mode: u8) -> &'static str {
    match mode {
        0 => "stereo",
        1 => "joint stereo",
        2 => "mono (dual channel)",
        _ => "mono (single channel)",
    }
}

fn number_or_blank(value: u32) -> String {
    if value == 0 {
        String::new()
    } else {
        value.to_string()
    }
}

impl MetadataDumper for AudioDumper {
    fn dump(&self, ctx: &DumpContext<'_>, out: &mut dyn Write) -> Result<()> {
        let reader = SideReader::open(&ctx.paths.side(SideKind::Audio), SideKind::Audio)?;
        let record = AudioRecord::decode(&reader.read_at(ctx.entry.info, RECORD_LEN)?);
        let frame = &record.frame;
        let tags = &record.tags;

        let duration = if frame.bitrate > 0 {
            let secs = ctx.entry.size * 8 / (u64::from(frame.bitrate) * 1000);
            format!("{:02}:{:02}", secs / 60, secs % 60)
        } else {
            String::new()
        };

        write_field(out, "File", &ctx.entry.display_name())?;
        write_field(out, "Version", &version_label(frame))?;
        write_field(out, "Duration", &duration)?;
        write_field(out, "Bitrate", &format!("{} kbps", frame.bitrate))?;
        write_field(out, "Sampling rate", &format!("{} Hz", frame.frequency))?;
        write_field(out, "Mode", mode_label(frame.mode))?;
        write_field(out, "Copyright", yes_no(frame.copyright))?;
        write_field(out, "Original", yes_no(frame.original))?;
        writeln!(out)?;
        write_field(out, "Artist", &tags.artist)?;
        write_field(out, "Title", &tags.title)?;
        write_field(out, "Album", &tags.album)?;
        write_field(out, "Year", &number_or_blank(u32::from(tags.year)))?;
        write_field(out, "Genre", genre_name(tags.genre))?;
        write_field(out, "Language", &tags.language)?;
        write_field(out, "Track number", &number_or_blank(u32::from(tags.track)))?;
        report_trailer(out)?;
        Ok(())
    }
}
