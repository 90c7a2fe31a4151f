//! Reports for video metadata stored in `.cdv` and `.cdva` side files.

use std::io::Write;

use super::{
    asctime, report_trailer, write_field, write_thumbnails, yes_no, DumpContext, MetadataDumper,
};
use crate::error::Result;
use crate::store::{FieldReader, FieldWriter, SideKind, SideReader};

pub const PATTERN: &str = r"\.(mpe?g|vob|mov|mp4|mkv|avi|3gp|wmv|flv)$";

pub const RECORD_LEN: usize = 190;
pub const STREAM_RECORD_LEN: usize = 35;
const CODEC_LEN: usize = 18;
const TAG_LEN: usize = 4;
const TITLE_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Translation {
    #[default]
    Unknown = 0,
    Original = 1,
    Dubbed = 2,
    TwoVoice = 3,
    OneVoice = 4,
}

impl Translation {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Original,
            2 => Self::Dubbed,
            3 => Self::TwoVoice,
            4 => Self::OneVoice,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Unknown => None,
            Self::Original => Some("original"),
            Self::Dubbed => Some("dubbed"),
            Self::TwoVoice => Some("2-voice"),
            Self::OneVoice => Some("1-voice"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoRecord {
    pub offset: u32,
    pub seconds: u16,
    pub width: u16,
    pub height: u16,
    pub codec: String,
    pub codec_tag: String,
    /// Video only, kb/s.
    pub bitrate: u16,
    pub framerate: f32,
    pub interlaced: bool,
    /// Offset of the first audio stream in the streams store.
    pub audio: u32,
    pub vstreams: u8,
    pub astreams: u8,
    pub subtitles: u8,
    pub title: String,
    pub imdb: u32,
    pub ctime: u32,
    pub latitude: f32,
    pub longitude: f32,
}

impl VideoRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::with_capacity(RECORD_LEN);
        writer
            .u32(self.offset)
            .u16(self.seconds)
            .u16(self.width)
            .u16(self.height)
            .text(&self.codec, CODEC_LEN)
            .text(&self.codec_tag, TAG_LEN)
            .u16(self.bitrate)
            .f32(self.framerate)
            .u8(u8::from(self.interlaced))
            .u32(self.audio)
            .u8(self.vstreams)
            .u8(self.astreams)
            .u8(self.subtitles)
            .text(&self.title, TITLE_LEN)
            .u32(self.imdb)
            .u32(self.ctime)
            .f32(self.latitude)
            .f32(self.longitude);
        writer.finish()
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut reader = FieldReader::new(buf);
        Self {
            offset: reader.u32(),
            seconds: reader.u16(),
            width: reader.u16(),
            height: reader.u16(),
            codec: reader.text(CODEC_LEN),
            codec_tag: reader.text(TAG_LEN),
            bitrate: reader.u16(),
            framerate: reader.f32(),
            interlaced: reader.u8() != 0,
            audio: reader.u32(),
            vstreams: reader.u8(),
            astreams: reader.u8(),
            subtitles: reader.u8(),
            title: reader.text(TITLE_LEN),
            imdb: reader.u32(),
            ctime: reader.u32(),
            latitude: reader.f32(),
            longitude: reader.f32(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRecord {
    pub offset: u32,
    pub language: String,
    pub translation: Translation,
    pub codec: String,
    pub codec_tag: String,
    pub channels: u8,
    pub bitrate: u16,
    pub frequency: u16,
}

impl StreamRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::with_capacity(STREAM_RECORD_LEN);
        writer
            .u32(self.offset)
            .text(&self.language, 3)
            .u8(self.translation as u8)
            .text(&self.codec, CODEC_LEN)
            .text(&self.codec_tag, TAG_LEN)
            .u8(self.channels)
            .u16(self.bitrate)
            .u16(self.frequency);
        writer.finish()
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut reader = FieldReader::new(buf);
        Self {
            offset: reader.u32(),
            language: reader.text(3),
            translation: Translation::from_u8(reader.u8()),
            codec: reader.text(CODEC_LEN),
            codec_tag: reader.text(TAG_LEN),
            channels: reader.u8(),
            bitrate: reader.u16(),
            frequency: reader.u16(),
        }
    }
}

/// `h:mm:ss` past an hour, `m:ss` past a minute, else `0:ss`.
pub fn format_duration(seconds: u16) -> String {
    let seconds = u32::from(seconds);
    if seconds > 3600 {
        format!("{}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
    } else if seconds > 60 {
        format!("{}:{:02}", seconds / 60, seconds % 60)
    } else {
        format!("0:{seconds:02}")
    }
}

/// Prints as many decimals as the rate carries, at most two.
pub fn format_framerate(rate: f32) -> String {
    let centi = (rate * 100.0) as i64;
    if centi % 10 > 0 {
        format!("{rate:.2} fps")
    } else if centi % 100 > 0 {
        format!("{rate:.1} fps")
    } else {
        format!("{rate:.0} fps")
    }
}

fn codec_label(codec: &str, tag: &str) -> String {
    if tag.is_empty() {
        codec.to_string()
    } else {
        format!("{codec} [{tag}]")
    }
}

pub struct VideoDumper;

impl VideoDumper {
    fn dump_streams(
        &self,
        ctx: &DumpContext<'_>,
        record: &VideoRecord,
        out: &mut dyn Write,
    ) -> Result<()> {
        let reader = SideReader::open(&ctx.paths.side(SideKind::Streams), SideKind::Streams)?;
        let buf = reader.read_at(
            record.audio,
            STREAM_RECORD_LEN * usize::from(record.astreams),
        )?;

        writeln!(out)?;
        writeln!(out, "Audio:")?;
        for (index, chunk) in buf.chunks(STREAM_RECORD_LEN).enumerate() {
            let stream = StreamRecord::decode(chunk);
            match stream.translation.label() {
                Some(label) => writeln!(out, "  Stream #{}({label})", index + 1)?,
                None => writeln!(out, "  Stream #{}", index + 1)?,
            }
            let language = if stream.language.is_empty() { "-" } else { &stream.language };
            writeln!(out, "    Language:  {language}")?;
            writeln!(out, "    Codec:     {}", codec_label(&stream.codec, &stream.codec_tag))?;
            writeln!(out, "    Channels:  {}", stream.channels)?;
            writeln!(out, "    Bitrate:   {} kbps", stream.bitrate)?;
            writeln!(out, "    Samp.rate: {} Hz", stream.frequency)?;
        }
        Ok(())
    }
}

impl MetadataDumper for VideoDumper {
    fn dump(&self, ctx: &DumpContext<'_>, out: &mut dyn Write) -> Result<()> {
        let reader = SideReader::open(&ctx.paths.side(SideKind::Videos), SideKind::Videos)?;
        let record = VideoRecord::decode(&reader.read_at(ctx.entry.info, RECORD_LEN)?);

        let location = if record.latitude != 0.0 || record.longitude != 0.0 {
            format!("{:.6} {:.6}", record.latitude, record.longitude)
        } else {
            String::new()
        };

        write_field(out, "File", &ctx.entry.display_name())?;
        write_field(out, "Title", &record.title)?;
        write_field(out, "Duration", &format_duration(record.seconds))?;
        write_field(out, "Created", &asctime(record.ctime))?;
        write_field(out, "Video streams", &record.vstreams.to_string())?;
        write_field(out, "Audio streams", &record.astreams.to_string())?;
        write_field(out, "Subtitles", &record.subtitles.to_string())?;
        write_field(out, "Location", &location)?;
        if record.imdb != 0 {
            write_field(out, "IMDB", &format!("tt{}", record.imdb))?;
        }
        writeln!(out)?;
        writeln!(out, "Video:")?;
        writeln!(out, "  Dimensions:  {}x{}", record.width, record.height)?;
        writeln!(out, "  Codec:       {}", codec_label(&record.codec, &record.codec_tag))?;
        writeln!(out, "  Bitrate:     {} kbps", record.bitrate)?;
        writeln!(out, "  Framerate:   {}", format_framerate(record.framerate))?;
        writeln!(out, "  Interlaced:  {}", yes_no(record.interlaced))?;
        if record.astreams > 0 {
            self.dump_streams(ctx, &record, out)?;
        }
        write_thumbnails(out, ctx.paths, ctx.entry.id)?;
        report_trailer(out)?;
        Ok(())
    }
}
