//! The OS package archive.
//!
//! A ZIP container holding the raw kernel, the optional initramfs and the
//! kernel command line. Entry timestamps are pinned to the ZIP epoch so that
//! identical inputs produce identical archives.

use crate::error::{Result, StmgrError};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

pub const KERNEL_ENTRY: &str = "boot/kernel";
pub const INITRAMFS_ENTRY: &str = "boot/initramfs";
pub const CMDLINE_ENTRY: &str = "boot/cmdline";

/// Largest entry accepted when reading an archive.
pub const MAX_ENTRY_SIZE: u64 = 1 << 30;

/// Preallocation cap; sizes in the archive header are untrusted.
const READ_CAPACITY_HINT: u64 = 64 << 20;

/// Files stored in an OS package archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveContents {
    pub kernel: Vec<u8>,
    pub initramfs: Option<Vec<u8>>,
    pub cmdline: String,
}

/// Name and uncompressed size of an archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
}

/// Serialize the contents into a ZIP archive.
pub fn write_archive(contents: &ArchiveContents) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    writer.start_file(KERNEL_ENTRY, options)?;
    writer.write_all(&contents.kernel)?;

    if let Some(initramfs) = &contents.initramfs {
        writer.start_file(INITRAMFS_ENTRY, options)?;
        writer.write_all(initramfs)?;
    }

    writer.start_file(CMDLINE_ENTRY, options)?;
    writer.write_all(contents.cmdline.as_bytes())?;

    Ok(writer.finish()?.into_inner())
}

/// Extract the contents of an OS package archive.
///
/// Unknown entries are rejected so nothing unhashed rides along.
pub fn read_archive(data: &[u8]) -> Result<ArchiveContents> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let mut kernel = None;
    let mut initramfs = None;
    let mut cmdline = None;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let declared = file.size();
        if declared > MAX_ENTRY_SIZE {
            return Err(StmgrError::ArchiveMismatch(format!(
                "entry {} declares {} bytes, limit is {}",
                file.name(),
                declared,
                MAX_ENTRY_SIZE
            )));
        }

        let mut bytes = Vec::with_capacity(declared.min(READ_CAPACITY_HINT) as usize);
        (&mut file).take(MAX_ENTRY_SIZE + 1).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != declared {
            return Err(StmgrError::ArchiveMismatch(format!(
                "entry {} holds {} bytes but declares {}",
                file.name(),
                bytes.len(),
                declared
            )));
        }

        match file.name() {
            KERNEL_ENTRY => kernel = Some(bytes),
            INITRAMFS_ENTRY => initramfs = Some(bytes),
            CMDLINE_ENTRY => {
                let text = String::from_utf8(bytes).map_err(|_| {
                    StmgrError::ArchiveMismatch("command line is not valid UTF-8".to_string())
                })?;
                cmdline = Some(text);
            }
            other => {
                return Err(StmgrError::ArchiveMismatch(format!(
                    "unexpected archive entry {}",
                    other
                )))
            }
        }
    }

    let kernel = kernel.ok_or_else(|| {
        StmgrError::ArchiveMismatch(format!("archive has no {} entry", KERNEL_ENTRY))
    })?;

    Ok(ArchiveContents {
        kernel,
        initramfs,
        cmdline: cmdline.unwrap_or_default(),
    })
}

/// List the entries of an archive without extracting them.
pub fn list_entries(data: &[u8]) -> Result<Vec<EntryInfo>> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        entries.push(EntryInfo {
            name: file.name().to_string(),
            size: file.size(),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(initramfs: Option<&[u8]>) -> ArchiveContents {
        ArchiveContents {
            kernel: b"0123456789".to_vec(),
            initramfs: initramfs.map(<[u8]>::to_vec),
            cmdline: "console=ttyS0".to_string(),
        }
    }

    #[test]
    fn test_archive_with_initramfs() {
        let original = contents(Some(b"initramfs image"));
        let archive = write_archive(&original).unwrap();

        assert_eq!(read_archive(&archive).unwrap(), original);

        let names: Vec<_> = list_entries(&archive)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![KERNEL_ENTRY, INITRAMFS_ENTRY, CMDLINE_ENTRY]);
    }

    #[test]
    fn test_archive_without_initramfs() {
        let archive = write_archive(&contents(None)).unwrap();
        let read = read_archive(&archive).unwrap();

        assert!(read.initramfs.is_none());
        assert_eq!(list_entries(&archive).unwrap().len(), 2);
    }

    #[test]
    fn test_archive_is_deterministic() {
        let a = write_archive(&contents(Some(b"init"))).unwrap();
        let b = write_archive(&contents(Some(b"init"))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unexpected_entry_rejected() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file(KERNEL_ENTRY, options).unwrap();
        writer.write_all(b"kernel").unwrap();
        writer.start_file("boot/extra", options).unwrap();
        writer.write_all(b"payload").unwrap();
        let archive = writer.finish().unwrap().into_inner();

        assert!(matches!(
            read_archive(&archive),
            Err(StmgrError::ArchiveMismatch(_))
        ));
    }

    #[test]
    fn test_oversized_entry_header_rejected() {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(KERNEL_ENTRY, options).unwrap();
        writer.write_all(b"kernel").unwrap();
        let mut archive = writer.finish().unwrap().into_inner();

        // Uncompressed size field of the central directory record
        let central = archive
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .unwrap();
        archive[central + 24..central + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

        assert!(matches!(
            read_archive(&archive),
            Err(StmgrError::ArchiveMismatch(_)) | Err(StmgrError::ArchiveError(_))
        ));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(
            read_archive(b"definitely not a zip"),
            Err(StmgrError::ArchiveError(_))
        ));
    }
}
