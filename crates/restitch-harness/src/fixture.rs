//! Byte-level construction of SQLite database images.
//!
//! A [`FixtureDb`] is a growable array of pages. Tests allocate pages,
//! fill them with table b-tree content, register schema rows, and then
//! `build()` the full image. Page 1 (file header plus the schema table
//! leaf) is composed last, from the registered entries.
//!
//! Cells are packed from the tail of each page exactly as the real file
//! format does, including payload spill into overflow chains, so the
//! images exercise the same offsets and formulas the crawler reads back.

use std::path::Path;

use restitch_types::btree::{
    self, BTREE_INTERIOR_HEADER_SIZE, BTREE_LEAF_HEADER_SIZE, CELL_POINTER_SIZE,
};
use restitch_types::varint::write_varint;
use restitch_types::{DATABASE_MAGIC, PageNumber, PageSize, Value, serialize_record};
use tracing::debug;

/// Flag byte of a table leaf page.
const LEAF_TABLE_FLAG: u8 = 0x0D;
/// Flag byte of a table interior page.
const INTERIOR_TABLE_FLAG: u8 = 0x05;

/// One row of the schema table, pending until `build()`.
#[derive(Debug)]
struct MasterEntry {
    kind: String,
    name: String,
    tbl_name: String,
    root_page: i64,
    sql: String,
}

/// In-memory database image builder.
#[derive(Debug)]
pub struct FixtureDb {
    page_size: PageSize,
    reserved: u8,
    pages: Vec<Vec<u8>>,
    master: Vec<MasterEntry>,
}

impl Default for FixtureDb {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureDb {
    /// A fixture with the default 4096-byte page size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(PageSize::DEFAULT)
    }

    #[must_use]
    pub fn with_page_size(page_size: PageSize) -> Self {
        Self {
            page_size,
            reserved: 0,
            // Page 1 exists from the start; its content is composed at
            // build time.
            pages: vec![vec![0u8; page_size.as_usize()]],
            master: Vec::new(),
        }
    }

    /// Reserve bytes at the end of every page, shrinking the usable size.
    /// Must be called before any page content is written.
    pub fn set_reserved_bytes(&mut self, reserved: u8) {
        assert!(
            self.pages.len() == 1 && self.master.is_empty(),
            "reserved bytes must be set before pages are filled"
        );
        assert!(
            self.page_size.usable(reserved) >= 480,
            "usable page size would drop below the format minimum"
        );
        self.reserved = reserved;
    }

    #[must_use]
    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn usable(&self) -> usize {
        self.page_size.usable(self.reserved) as usize
    }

    /// Append a zeroed page and return its number.
    pub fn allocate(&mut self) -> PageNumber {
        self.pages.push(vec![0u8; self.page_size.as_usize()]);
        let number = self.pages.len() as u32;
        PageNumber::new(number).expect("allocation count starts at page 2")
    }

    /// Raw bytes of an allocated page, for targeted hand-damage that the
    /// corruption patterns are too coarse for.
    pub fn page_mut(&mut self, page: PageNumber) -> &mut [u8] {
        let index = page.get() as usize - 1;
        assert!(index < self.pages.len(), "page {page} was never allocated");
        &mut self.pages[index]
    }

    /// Register a user table rooted at `root` in the schema.
    pub fn add_table(&mut self, name: &str, sql: &str, root: PageNumber) {
        self.add_master_entry("table", name, name, Some(root), sql);
    }

    /// Register an arbitrary schema row. `root` of `None` is stored as 0,
    /// the way views, triggers, and virtual tables are.
    pub fn add_master_entry(
        &mut self,
        kind: &str,
        name: &str,
        tbl_name: &str,
        root: Option<PageNumber>,
        sql: &str,
    ) {
        self.master.push(MasterEntry {
            kind: kind.to_owned(),
            name: name.to_owned(),
            tbl_name: tbl_name.to_owned(),
            root_page: root.map_or(0, |p| i64::from(p.get())),
            sql: sql.to_owned(),
        });
    }

    /// Fill `page` as a table leaf holding `rows`. Payloads beyond the
    /// local limit spill into freshly allocated overflow pages.
    pub fn put_leaf_table(&mut self, page: PageNumber, rows: &[(i64, Vec<Value>)]) {
        assert_ne!(page.get(), 1, "page 1 is reserved for the schema table");
        let records: Vec<(i64, Vec<u8>)> = rows
            .iter()
            .map(|(rowid, values)| (*rowid, serialize_record(values)))
            .collect();
        self.put_leaf_records(page, &records);
    }

    /// Fill `page` as a table interior node: `entries` are (child, key)
    /// pairs, `right_child` takes everything above the last key.
    pub fn put_interior_table(
        &mut self,
        page: PageNumber,
        entries: &[(PageNumber, i64)],
        right_child: PageNumber,
    ) {
        assert_ne!(page.get(), 1, "page 1 is reserved for the schema table");
        let header_at = btree::header_offset(page);
        let mut buf = vec![0u8; self.page_size.as_usize()];
        let mut content_end = self.usable();
        let mut pointers = Vec::with_capacity(entries.len());

        let mut tmp = [0u8; 9];
        for (child, key) in entries {
            let mut cell = Vec::with_capacity(13);
            cell.extend_from_slice(&child.get().to_be_bytes());
            let n = write_varint(&mut tmp, *key as u64);
            cell.extend_from_slice(&tmp[..n]);

            let pointer_end = header_at
                + BTREE_INTERIOR_HEADER_SIZE
                + CELL_POINTER_SIZE * (pointers.len() + 1);
            assert!(
                content_end >= pointer_end + cell.len(),
                "interior entries do not fit on one page"
            );
            content_end -= cell.len();
            buf[content_end..content_end + cell.len()].copy_from_slice(&cell);
            pointers.push(content_end as u16);
        }

        buf[header_at] = INTERIOR_TABLE_FLAG;
        buf[header_at + 3..header_at + 5].copy_from_slice(&(entries.len() as u16).to_be_bytes());
        buf[header_at + 5..header_at + 7]
            .copy_from_slice(&((content_end % 65_536) as u16).to_be_bytes());
        buf[header_at + 8..header_at + 12].copy_from_slice(&right_child.get().to_be_bytes());
        let mut offset = header_at + BTREE_INTERIOR_HEADER_SIZE;
        for pointer in &pointers {
            buf[offset..offset + CELL_POINTER_SIZE].copy_from_slice(&pointer.to_be_bytes());
            offset += CELL_POINTER_SIZE;
        }
        self.store(page, buf);
    }

    /// Compose the final image: page 1 is built from the registered
    /// schema entries, then all pages are concatenated.
    pub fn build(&mut self) -> Vec<u8> {
        self.compose_master_page();
        let mut image = Vec::with_capacity(self.page_size.as_usize() * self.pages.len());
        for page in &self.pages {
            image.extend_from_slice(page);
        }
        debug!(
            pages = self.pages.len(),
            bytes = image.len(),
            "fixture image composed"
        );
        image
    }

    /// Build and write the image to `path`.
    pub fn write_to(&mut self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }

    fn put_leaf_records(&mut self, page: PageNumber, records: &[(i64, Vec<u8>)]) {
        let usable = self.usable() as u32;
        let header_at = btree::header_offset(page);
        let mut buf = vec![0u8; self.page_size.as_usize()];
        let mut content_end = self.usable();
        let mut pointers = Vec::with_capacity(records.len());

        let mut tmp = [0u8; 9];
        for (rowid, record) in records {
            let payload_len = record.len() as u32;
            let local = btree::local_payload_len(payload_len, usable) as usize;

            let mut cell = Vec::with_capacity(local + 22);
            let n = write_varint(&mut tmp, u64::from(payload_len));
            cell.extend_from_slice(&tmp[..n]);
            let n = write_varint(&mut tmp, *rowid as u64);
            cell.extend_from_slice(&tmp[..n]);
            cell.extend_from_slice(&record[..local]);
            if btree::has_overflow(payload_len, usable) {
                let first = self.build_overflow_chain(&record[local..]);
                cell.extend_from_slice(&first.get().to_be_bytes());
            }

            let pointer_end =
                header_at + BTREE_LEAF_HEADER_SIZE + CELL_POINTER_SIZE * (pointers.len() + 1);
            assert!(
                content_end >= pointer_end + cell.len(),
                "rows do not fit on one leaf page"
            );
            content_end -= cell.len();
            buf[content_end..content_end + cell.len()].copy_from_slice(&cell);
            pointers.push(content_end as u16);
        }

        buf[header_at] = LEAF_TABLE_FLAG;
        buf[header_at + 3..header_at + 5].copy_from_slice(&(records.len() as u16).to_be_bytes());
        buf[header_at + 5..header_at + 7]
            .copy_from_slice(&((content_end % 65_536) as u16).to_be_bytes());
        let mut offset = header_at + BTREE_LEAF_HEADER_SIZE;
        for pointer in &pointers {
            buf[offset..offset + CELL_POINTER_SIZE].copy_from_slice(&pointer.to_be_bytes());
            offset += CELL_POINTER_SIZE;
        }
        self.store(page, buf);
    }

    /// Allocate and link the overflow pages for one spilled payload,
    /// returning the head of the chain.
    fn build_overflow_chain(&mut self, rest: &[u8]) -> PageNumber {
        let per_page = self.usable() - 4;
        let chunks: Vec<&[u8]> = rest.chunks(per_page).collect();
        let numbers: Vec<PageNumber> = chunks.iter().map(|_| self.allocate()).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let mut buf = vec![0u8; self.page_size.as_usize()];
            let next = numbers.get(i + 1).map_or(0, |p| p.get());
            buf[..4].copy_from_slice(&next.to_be_bytes());
            buf[4..4 + chunk.len()].copy_from_slice(chunk);
            self.store(numbers[i], buf);
        }
        numbers[0]
    }

    fn compose_master_page(&mut self) {
        let records: Vec<(i64, Vec<u8>)> = self
            .master
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let values = vec![
                    Value::Text(entry.kind.clone()),
                    Value::Text(entry.name.clone()),
                    Value::Text(entry.tbl_name.clone()),
                    Value::Integer(entry.root_page),
                    Value::Text(entry.sql.clone()),
                ];
                (i as i64 + 1, serialize_record(&values))
            })
            .collect();
        let usable = self.usable() as u32;
        for (_, record) in &records {
            assert!(
                !btree::has_overflow(record.len() as u32, usable),
                "schema rows must stay local; shorten the SQL text"
            );
        }
        self.put_leaf_records(PageNumber::ONE, &records);
        self.stamp_header();
    }

    fn stamp_header(&mut self) {
        let page_count = self.pages.len() as u32;
        let raw_page_size: u16 = if self.page_size.get() == 65_536 {
            1
        } else {
            self.page_size.get() as u16
        };
        let reserved = self.reserved;

        let buf = &mut self.pages[0];
        buf[..16].copy_from_slice(DATABASE_MAGIC);
        buf[16..18].copy_from_slice(&raw_page_size.to_be_bytes());
        buf[18] = 1; // legacy write version
        buf[19] = 1; // legacy read version
        buf[20] = reserved;
        buf[21] = 64;
        buf[22] = 32;
        buf[23] = 32;
        buf[24..28].copy_from_slice(&1u32.to_be_bytes()); // change counter
        buf[28..32].copy_from_slice(&page_count.to_be_bytes());
        buf[44..48].copy_from_slice(&4u32.to_be_bytes()); // schema format
        buf[56..60].copy_from_slice(&1u32.to_be_bytes()); // utf-8
        buf[92..96].copy_from_slice(&1u32.to_be_bytes()); // version valid for
        buf[96..100].copy_from_slice(&3_046_000u32.to_be_bytes());
    }

    fn store(&mut self, page: PageNumber, buf: Vec<u8>) {
        let index = page.get() as usize - 1;
        assert!(index < self.pages.len(), "page {page} was never allocated");
        self.pages[index] = buf;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restitch_types::varint::read_varint;
    use restitch_types::{DATABASE_HEADER_SIZE, DatabaseHeader, parse_record};

    fn header_of(image: &[u8]) -> DatabaseHeader {
        let bytes: &[u8; DATABASE_HEADER_SIZE] =
            image[..DATABASE_HEADER_SIZE].try_into().unwrap();
        DatabaseHeader::parse(bytes).unwrap()
    }

    #[test]
    fn empty_fixture_is_one_well_formed_header_page() {
        let mut db = FixtureDb::new();
        let image = db.build();
        assert_eq!(image.len(), 4096);

        let header = header_of(&image);
        assert_eq!(header.page_size.get(), 4096);
        assert_eq!(header.derived_page_count(image.len() as u64), 1);

        // The schema leaf sits right behind the file header, empty.
        assert_eq!(image[100], LEAF_TABLE_FLAG);
        assert_eq!(u16::from_be_bytes([image[103], image[104]]), 0);
    }

    #[test]
    fn master_rows_decode_back_from_page_one() {
        let mut db = FixtureDb::new();
        let root = db.allocate();
        db.put_leaf_table(root, &[]);
        db.add_table("people", "CREATE TABLE people(name TEXT)", root);
        let image = db.build();

        assert_eq!(u16::from_be_bytes([image[103], image[104]]), 1);
        let pointer = usize::from(u16::from_be_bytes([image[108], image[109]]));
        let (payload_len, n) = read_varint(&image[pointer..]).unwrap();
        let (rowid, m) = read_varint(&image[pointer + n..]).unwrap();
        assert_eq!(rowid, 1);

        let payload = &image[pointer + n + m..pointer + n + m + payload_len as usize];
        let values = parse_record(payload).unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], Value::Text("table".to_owned()));
        assert_eq!(values[1], Value::Text("people".to_owned()));
        assert_eq!(values[3], Value::Integer(i64::from(root.get())));
    }

    #[test]
    fn oversized_payload_spills_into_one_overflow_page() {
        let mut db = FixtureDb::with_page_size(PageSize::MIN);
        let root = db.allocate();
        // A 577-byte record at usable size 512 keeps 69 bytes local and
        // spills 508, exactly one overflow page's capacity.
        let blob = vec![0xABu8; 574];
        let record = serialize_record(&[Value::Blob(blob)]);
        assert_eq!(record.len(), 577);

        let before = db.page_count();
        db.put_leaf_table(root, &[(1, vec![Value::Blob(vec![0xABu8; 574])])]);
        assert_eq!(db.page_count(), before + 1);

        db.add_table("blobs", "CREATE TABLE blobs(b BLOB)", root);
        let image = db.build();
        let chain_start = (db.page_count() as usize - 1) * 512;
        // Last page is the chain tail: next pointer 0, then the payload rest.
        assert_eq!(&image[chain_start..chain_start + 4], &[0, 0, 0, 0]);
        assert_eq!(image[chain_start + 4], 0xAB);
        assert_eq!(image[chain_start + 4 + 507], 0xAB);
    }

    #[test]
    fn interior_page_points_at_its_children() {
        let mut db = FixtureDb::new();
        let left = db.allocate();
        let right = db.allocate();
        let root = db.allocate();
        db.put_leaf_table(left, &[(1, vec![Value::Integer(1)])]);
        db.put_leaf_table(right, &[(2, vec![Value::Integer(2)])]);
        db.put_interior_table(root, &[(left, 1)], right);
        db.add_table("t", "CREATE TABLE t(x)", root);
        let image = db.build();

        let base = (root.get() as usize - 1) * 4096;
        assert_eq!(image[base], INTERIOR_TABLE_FLAG);
        assert_eq!(u16::from_be_bytes([image[base + 3], image[base + 4]]), 1);
        let right_child =
            u32::from_be_bytes(image[base + 8..base + 12].try_into().unwrap());
        assert_eq!(right_child, right.get());

        let pointer = usize::from(u16::from_be_bytes([image[base + 12], image[base + 13]]));
        let child = u32::from_be_bytes(
            image[base + pointer..base + pointer + 4].try_into().unwrap(),
        );
        assert_eq!(child, left.get());
    }

    #[test]
    fn reserved_bytes_show_up_in_the_header() {
        let mut db = FixtureDb::with_page_size(PageSize::MIN);
        db.set_reserved_bytes(32);
        let image = db.build();
        let header = header_of(&image);
        assert_eq!(header.reserved_per_page, 32);
        assert_eq!(header.usable_size(), 480);
    }

    #[test]
    #[should_panic(expected = "rows do not fit")]
    fn overfull_leaf_page_panics() {
        let mut db = FixtureDb::with_page_size(PageSize::MIN);
        let root = db.allocate();
        // Each row stays local (below the spill threshold) but together
        // they exceed the page.
        let rows: Vec<(i64, Vec<Value>)> = (0..3)
            .map(|i| (i, vec![Value::Blob(vec![0u8; 400])]))
            .collect();
        db.put_leaf_table(root, &rows);
    }
}
