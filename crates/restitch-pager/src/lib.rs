//! Read-only page access over a damaged database file.
//!
//! The pager here is the salvage counterpart of a normal database pager: it
//! opens the source once, trusts the file header only for the page geometry,
//! and serves whole-page reads with explicit errors instead of assumptions.
//! The page count always comes from the file size. The stored count is
//! unreliable even in healthy files (it goes stale whenever
//! `version_valid_for` drifts from the change counter) and is plain garbage
//! in the files this crate exists for. Rounding up keeps a torn tail page
//! addressable; reading it reports a short page rather than pretending the
//! bytes were there.

use std::fs::File;
use std::path::{Path, PathBuf};

use restitch_error::{RepairError, Result};
use restitch_types::{DATABASE_HEADER_SIZE, DatabaseHeader, PageNumber, PageSize};
use tracing::debug;

/// Read-only page store over a single source database file.
#[derive(Debug)]
pub struct Pager {
    path: PathBuf,
    file: File,
    header: DatabaseHeader,
    file_size: u64,
    page_count: u32,
}

impl Pager {
    /// Size of the file at `path`, without opening it.
    ///
    /// Used to decide whether a source is worth opening at all; a failed
    /// stat here is an I/O failure, not corruption.
    pub fn file_size_of(path: &Path) -> Result<u64> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(source) => Err(RepairError::Stat {
                path: path.to_owned(),
                source,
            }),
        }
    }

    /// Open the source file and parse its header.
    ///
    /// Succeeds whenever the header yields a usable page geometry. All other
    /// header fields may be damaged; that is for the crawl to find out.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| RepairError::Open {
            path: path.to_owned(),
            source,
        })?;
        let file_size = file
            .metadata()
            .map_err(|source| RepairError::Stat {
                path: path.to_owned(),
                source,
            })?
            .len();

        if file_size < DATABASE_HEADER_SIZE as u64 {
            return Err(RepairError::bad_header(format!(
                "file is only {file_size} bytes, smaller than the header"
            )));
        }

        let mut buf = [0u8; DATABASE_HEADER_SIZE];
        let got = read_fill(&file, &mut buf, 0).map_err(|source| RepairError::Read {
            page: 1,
            source,
        })?;
        if got < DATABASE_HEADER_SIZE {
            return Err(RepairError::bad_header(format!(
                "header truncated at {got} bytes"
            )));
        }

        let header =
            DatabaseHeader::parse(&buf).map_err(|err| RepairError::bad_header(err.to_string()))?;
        let page_count = header.derived_page_count(file_size);

        debug!(
            path = %path.display(),
            page_size = header.page_size.get(),
            page_count,
            file_size,
            "source database opened"
        );

        Ok(Self {
            path: path.to_owned(),
            file,
            header,
            file_size,
            page_count,
        })
    }

    /// Read one full page.
    ///
    /// The buffer is always exactly one page long on success. A page that
    /// exists but ends early (the torn tail page) is corruption; an OS-level
    /// read failure is an I/O failure.
    pub fn read_page(&self, page: PageNumber) -> Result<Vec<u8>> {
        let n = page.get();
        if n > self.page_count {
            return Err(RepairError::PageOutOfRange {
                page: n,
                page_count: self.page_count,
            });
        }

        let page_len = self.header.page_size.as_usize();
        let offset = u64::from(n - 1) * u64::from(self.header.page_size.get());
        let mut buf = vec![0u8; page_len];
        let got = read_fill(&self.file, &mut buf, offset)
            .map_err(|source| RepairError::Read { page: n, source })?;
        if got < page_len {
            return Err(RepairError::ShortPage {
                page: n,
                expected: page_len,
                actual: got,
            });
        }
        Ok(buf)
    }

    /// The source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed file header.
    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    /// Page size of the source.
    pub fn page_size(&self) -> PageSize {
        self.header.page_size
    }

    /// Usable bytes per page (page size minus reserved bytes).
    pub fn usable_size(&self) -> u32 {
        self.header.usable_size()
    }

    /// Number of addressable pages, derived from the file size.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Size of the source file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

/// Positional read that keeps going until the buffer is full or the file
/// ends. Returns the number of bytes actually read; the tail of `buf` past
/// that point is untouched.
#[cfg(unix)]
fn read_fill(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    let mut total = 0;
    while total < buf.len() {
        let n = file.read_at(&mut buf[total..], offset + total as u64)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(windows)]
fn read_fill(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let mut total = 0;
    while total < buf.len() {
        let n = file.seek_read(&mut buf[total..], offset + total as u64)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use restitch_error::ErrorKind;
    use restitch_types::DATABASE_MAGIC;
    use std::io::Write;

    const PAGE: usize = 512;

    fn header_bytes() -> [u8; DATABASE_HEADER_SIZE] {
        let mut buf = [0u8; DATABASE_HEADER_SIZE];
        buf[..16].copy_from_slice(DATABASE_MAGIC);
        buf[16..18].copy_from_slice(&(PAGE as u16).to_be_bytes());
        buf[18] = 1;
        buf[19] = 1;
        buf[21] = 64;
        buf[22] = 32;
        buf[23] = 32;
        buf[56..60].copy_from_slice(&1u32.to_be_bytes());
        buf
    }

    fn write_db(pages: &[Vec<u8>]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for page in pages {
            f.write_all(page).unwrap();
        }
        f.flush().unwrap();
        f
    }

    fn page_one() -> Vec<u8> {
        let mut page = vec![0u8; PAGE];
        page[..DATABASE_HEADER_SIZE].copy_from_slice(&header_bytes());
        page
    }

    #[test]
    fn open_reads_geometry_from_header() {
        let f = write_db(&[page_one(), vec![0xAB; PAGE]]);
        let pager = Pager::open(f.path()).unwrap();
        assert_eq!(pager.page_size().get(), PAGE as u32);
        assert_eq!(pager.usable_size(), PAGE as u32);
        assert_eq!(pager.page_count(), 2);
        assert_eq!(pager.file_size(), (2 * PAGE) as u64);
    }

    #[test]
    fn page_count_comes_from_file_size_not_header() {
        let mut first = page_one();
        // Stored page count claims 1000 pages; the file has 3.
        first[28..32].copy_from_slice(&1000u32.to_be_bytes());
        let f = write_db(&[first, vec![0; PAGE], vec![0; PAGE]]);
        let pager = Pager::open(f.path()).unwrap();
        assert_eq!(pager.page_count(), 3);
        assert_eq!(pager.header().stored_page_count, 1000);
    }

    #[test]
    fn read_page_returns_the_right_bytes() {
        let f = write_db(&[page_one(), vec![0xAB; PAGE], vec![0xCD; PAGE]]);
        let pager = Pager::open(f.path()).unwrap();

        let two = pager.read_page(PageNumber::new(2).unwrap()).unwrap();
        assert_eq!(two.len(), PAGE);
        assert!(two.iter().all(|&b| b == 0xAB));

        let three = pager.read_page(PageNumber::new(3).unwrap()).unwrap();
        assert!(three.iter().all(|&b| b == 0xCD));
    }

    #[test]
    fn out_of_range_page_is_rejected() {
        let f = write_db(&[page_one()]);
        let pager = Pager::open(f.path()).unwrap();
        let err = pager.read_page(PageNumber::new(2).unwrap()).unwrap_err();
        assert!(matches!(err, RepairError::PageOutOfRange { page: 2, page_count: 1 }));
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn torn_tail_page_is_addressable_but_short() {
        // 1 full page plus half a page of trailing bytes.
        let f = write_db(&[page_one(), vec![0xEE; PAGE / 2]]);
        let pager = Pager::open(f.path()).unwrap();
        assert_eq!(pager.page_count(), 2);

        let err = pager.read_page(PageNumber::new(2).unwrap()).unwrap_err();
        match err {
            RepairError::ShortPage {
                page,
                expected,
                actual,
            } => {
                assert_eq!(page, 2);
                assert_eq!(expected, PAGE);
                assert_eq!(actual, PAGE / 2);
            }
            other => panic!("expected ShortPage, got {other:?}"),
        }
    }

    #[test]
    fn tiny_file_is_a_header_fault() {
        let f = write_db(&[vec![0x42; 50]]);
        let err = Pager::open(f.path()).unwrap_err();
        assert!(matches!(err, RepairError::BadHeader { .. }));
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn bad_magic_is_a_header_fault() {
        let mut first = page_one();
        first[0] = b'Z';
        let f = write_db(&[first]);
        let err = Pager::open(f.path()).unwrap_err();
        assert!(matches!(err, RepairError::BadHeader { .. }));
    }

    #[test]
    fn missing_file_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.db");
        let err = Pager::file_size_of(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);

        let err = Pager::open(&path).unwrap_err();
        assert!(matches!(err, RepairError::Open { .. }));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn file_size_of_reports_zero_for_empty() {
        let f = write_db(&[]);
        assert_eq!(Pager::file_size_of(f.path()).unwrap(), 0);
    }
}
