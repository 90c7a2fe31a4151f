//! Store header report.

use std::io::Write;

use crate::capability::{asctime, report_trailer, write_field, yes_no};
use crate::error::Result;
use crate::store::IndexReader;

pub fn write_info(reader: &IndexReader, out: &mut dyn Write) -> Result<()> {
    let header = reader.header();
    write_field(out, "File", &reader.paths().index().display().to_string())?;
    write_field(out, "Volume ID", &header.volume_id)?;
    write_field(out, "Bootable", yes_no(header.bootable))?;
    write_field(out, "Size", &header.size.to_string())?;
    write_field(out, "Files", &reader.record_count().to_string())?;
    write_field(out, "Created", &asctime(header.ctime))?;
    write_field(out, "Modified", &asctime(header.mtime))?;
    writeln!(out)?;
    write_field(out, "Publisher", &header.publisher)?;
    write_field(out, "Preparer", &header.preparer)?;
    write_field(out, "Generator", &header.generator)?;
    report_trailer(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_index;
    use crate::capability::Registry;
    use crate::store::{IndexHeader, StorePaths};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn header_fields_are_reported() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("source");
        fs::create_dir(&source).expect("mkdir");
        fs::write(source.join("one"), b"1").expect("write");
        fs::write(source.join("two"), b"2").expect("write");

        let header = IndexHeader {
            bootable: true,
            volume_id: "HOLIDAY_2009".to_string(),
            size: 4096,
            publisher: "ACME".to_string(),
            ..IndexHeader::default()
        };
        let paths = StorePaths::new(dir.path().join("disc"));
        build_index(&paths, &source, &header, &Registry::new()).expect("build");
        let reader = IndexReader::open(paths.clone()).expect("open");

        let mut out = Vec::new();
        write_info(&reader, &mut out).expect("info");
        let text = String::from_utf8(out).expect("utf8");
        let expected = format!(
            "File:          {}\n\
             Volume ID:     HOLIDAY_2009\n\
             Bootable:      yes\n\
             Size:          4096\n\
             Files:         2\n\
             Created:       -\n\
             Modified:      -\n\
             \n\
             Publisher:     ACME\n\
             Preparer:      -\n\
             Generator:     -\n\
             \n---\n\n",
            paths.index().display()
        );
        assert_eq!(text, expected);
    }
}
