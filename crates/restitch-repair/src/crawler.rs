//! Corruption-tolerant traversal of table b-trees.
//!
//! The crawler walks a tree iteratively (explicit stack, no recursion, so
//! a corrupt pointer chain can never blow the call stack) and reports
//! through a [`CrawlVisitor`]: decoded rows, raw faults, and a hook per
//! leaf page. It deliberately knows nothing about severity. Deciding
//! whether a fault is survivable is the orchestrator's job; the crawler's
//! job is to keep going unless the visitor tells it to stop.
//!
//! Containment is per-subtree: a page that cannot be read or parsed costs
//! exactly that page (already-queued siblings still run), a cell whose
//! structure is garbage abandons the rest of that page's cell array, and a
//! cell whose record or overflow chain is broken costs only itself.
//!
//! One crawler instance carries one visited-page set across every root it
//! is asked to walk, so a session-wide pointer cycle (two trees claiming
//! the same page, a chain pointing back into a tree) surfaces as a
//! [`RepairError::PageRevisited`] fault instead of duplicated rows or an
//! endless walk.

use std::ops::ControlFlow;

use hashbrown::HashSet;
use restitch_error::{RepairError, Result};
use restitch_pager::Pager;
use restitch_types::{PageNumber, parse_record};
use tracing::debug;

use crate::cell::{Cell, CellRef};
use crate::overflow::read_overflow_chain;
use crate::page::{BtreePageHeader, read_cell_pointers};

/// Receiver for everything a crawl discovers.
///
/// The returned [`ControlFlow`] steers the crawl: `Break` abandons the
/// traversal (typically because a write-side failure made further
/// discovery pointless), `Continue` keeps it going. Faults arrive raw,
/// unclassified.
pub trait CrawlVisitor {
    /// One decoded row, handed over by value.
    fn on_row_discovered(&mut self, cell: Cell) -> ControlFlow<()>;

    /// One contained fault. Traversal resumes with the next sibling unless
    /// the visitor breaks.
    fn on_fault(&mut self, fault: RepairError) -> ControlFlow<()>;

    /// Called when a leaf page is entered, before any of its cells are
    /// decoded. Lets the consumer derive per-cell weights from the page's
    /// declared cell count.
    fn on_leaf_page(&mut self, page: PageNumber, cell_count: u16) {
        let _ = (page, cell_count);
    }
}

/// Iterative depth-first crawler over the table b-trees of one source.
pub struct Crawler<'p> {
    pager: &'p Pager,
    visited: HashSet<u32>,
}

impl<'p> Crawler<'p> {
    #[must_use]
    pub fn new(pager: &'p Pager) -> Self {
        Self {
            pager,
            visited: HashSet::new(),
        }
    }

    /// Number of distinct pages visited so far, overflow pages included.
    #[must_use]
    pub fn visited_pages(&self) -> usize {
        self.visited.len()
    }

    /// Walk the table b-tree rooted at `root`, reporting to `visitor`.
    ///
    /// Returns `Continue` when the tree was exhausted and `Break` when the
    /// visitor stopped the crawl early.
    pub fn crawl<V: CrawlVisitor>(
        &mut self,
        root: PageNumber,
        visitor: &mut V,
    ) -> ControlFlow<()> {
        let mut stack = vec![root];
        while let Some(page) = stack.pop() {
            if !self.visited.insert(page.get()) {
                visitor.on_fault(RepairError::PageRevisited { page: page.get() })?;
                continue;
            }

            let buf = match self.pager.read_page(page) {
                Ok(buf) => buf,
                Err(error) => {
                    visitor.on_fault(error)?;
                    continue;
                }
            };

            let header = match BtreePageHeader::parse(page, &buf) {
                Ok(header) => header,
                Err(error) => {
                    visitor.on_fault(error)?;
                    continue;
                }
            };
            if !header.page_type.is_table() {
                visitor.on_fault(RepairError::WrongPageType {
                    page: page.get(),
                    flag: header.page_type as u8,
                })?;
                continue;
            }

            let pointers = match read_cell_pointers(page, &buf, &header) {
                Ok(pointers) => pointers,
                Err(error) => {
                    visitor.on_fault(error)?;
                    continue;
                }
            };

            debug!(
                page = page.get(),
                kind = ?header.page_type,
                cells = header.cell_count,
                "page crawled"
            );

            if header.page_type.is_interior() {
                self.walk_interior(page, &buf, &header, &pointers, &mut stack, visitor)?;
            } else {
                self.walk_leaf(page, &buf, &header, &pointers, visitor)?;
            }
        }
        ControlFlow::Continue(())
    }

    fn walk_interior<V: CrawlVisitor>(
        &mut self,
        page: PageNumber,
        buf: &[u8],
        header: &BtreePageHeader,
        pointers: &[u16],
        stack: &mut Vec<PageNumber>,
        visitor: &mut V,
    ) -> ControlFlow<()> {
        if let Some(right) = header.right_child {
            stack.push(right);
        }
        let usable = self.pager.usable_size();
        for (index, &pointer) in pointers.iter().enumerate() {
            match CellRef::parse(
                buf,
                usize::from(pointer),
                header.page_type,
                usable,
                page,
                index as u16,
            ) {
                Ok(cell) => {
                    if let Some(child) = cell.left_child {
                        stack.push(child);
                    }
                }
                Err(error) => {
                    // The rest of the pointer array is as suspect as this
                    // entry; children already on the stack survive.
                    visitor.on_fault(error)?;
                    break;
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn walk_leaf<V: CrawlVisitor>(
        &mut self,
        page: PageNumber,
        buf: &[u8],
        header: &BtreePageHeader,
        pointers: &[u16],
        visitor: &mut V,
    ) -> ControlFlow<()> {
        visitor.on_leaf_page(page, header.cell_count);
        let usable = self.pager.usable_size();
        for (index, &pointer) in pointers.iter().enumerate() {
            let raw = match CellRef::parse(
                buf,
                usize::from(pointer),
                header.page_type,
                usable,
                page,
                index as u16,
            ) {
                Ok(raw) => raw,
                Err(error) => {
                    visitor.on_fault(error)?;
                    break;
                }
            };
            match self.decode_row(page, &raw, buf) {
                Ok(cell) => visitor.on_row_discovered(cell)?,
                Err(error) => visitor.on_fault(error)?,
            }
        }
        ControlFlow::Continue(())
    }

    /// Decode one leaf cell's record, chasing its overflow chain if any.
    fn decode_row(&mut self, page: PageNumber, raw: &CellRef, buf: &[u8]) -> Result<Cell> {
        let usable = self.pager.usable_size();
        let local = raw.local_payload(buf);
        let values = if let Some(first) = raw.overflow {
            let payload =
                read_overflow_chain(local, first, raw.payload_len, usable, &mut |chain_page| {
                    self.chain_page(chain_page)
                })?;
            parse_record(&payload)
        } else {
            parse_record(local)
        }
        .ok_or_else(|| {
            RepairError::bad_record(page.get(), raw.rowid, "undecodable record payload")
        })?;

        Ok(Cell {
            rowid: raw.rowid,
            values,
            page,
        })
    }

    /// Fetch one overflow-chain page, subject to the same visited guard as
    /// tree pages.
    fn chain_page(&mut self, page: PageNumber) -> Result<Vec<u8>> {
        if !self.visited.insert(page.get()) {
            return Err(RepairError::PageRevisited { page: page.get() });
        }
        self.pager.read_page(page)
    }
}
