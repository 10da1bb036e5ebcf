//! Overflow-chain payload reassembly.
//!
//! Each overflow page is `[next page: u32 BE][payload bytes]`; a zero next
//! pointer ends the chain. The walk stops as soon as the declared payload
//! length is satisfied, so a well-formed chain is never over-read.

use restitch_error::{RepairError, Result};
use restitch_types::PageNumber;
use tracing::warn;

/// Hard cap on chain length. The page reader is expected to reject
/// revisited and out-of-range pages, which already bounds the walk; this
/// guards callers whose reader does not.
pub const MAX_CHAIN_PAGES: usize = 1_000_000;

/// Reassemble a payload from its local bytes plus an overflow chain.
///
/// `read_page` fetches one chain page by number and is also the hook for
/// the session's visited-page guard: a reader that fails the page (cycle,
/// out of range, I/O) fails the chain with that same error. A chain that
/// ends before `payload_len` bytes arrive is a broken-chain fault.
pub fn read_overflow_chain<F>(
    local: &[u8],
    first: PageNumber,
    payload_len: u32,
    usable_size: u32,
    read_page: &mut F,
) -> Result<Vec<u8>>
where
    F: FnMut(PageNumber) -> Result<Vec<u8>>,
{
    if usable_size <= 4 {
        return Err(RepairError::overflow(
            first.get(),
            "usable page size leaves no room for chain data",
        ));
    }

    // The declared length is attacker-controlled up to the 1 GB format
    // limit; grow into it instead of pre-allocating on its word.
    let total = payload_len as usize;
    let mut payload = Vec::with_capacity(total.min(1 << 20));
    payload.extend_from_slice(local);

    let bytes_per_page = (usable_size - 4) as usize;
    let mut next = Some(first);
    let mut last_read = first;
    let mut pages_read = 0usize;

    while payload.len() < total {
        let Some(page) = next else {
            warn!(
                page = last_read.get(),
                got = payload.len(),
                expected = total,
                "overflow chain ended prematurely"
            );
            return Err(RepairError::overflow(
                last_read.get(),
                format!("chain ended after {} of {total} bytes", payload.len()),
            ));
        };

        pages_read += 1;
        if pages_read > MAX_CHAIN_PAGES {
            return Err(RepairError::overflow(
                page.get(),
                format!("chain exceeds {MAX_CHAIN_PAGES} pages"),
            ));
        }

        let buf = read_page(page)?;
        let Some(pointer) = buf.get(..4) else {
            return Err(RepairError::overflow(page.get(), "chain page shorter than its pointer"));
        };
        next = PageNumber::new(u32::from_be_bytes([
            pointer[0], pointer[1], pointer[2], pointer[3],
        ]));
        last_read = page;

        let wanted = total - payload.len();
        let available = buf.len().saturating_sub(4).min(bytes_per_page);
        let take = wanted.min(available);
        payload.extend_from_slice(&buf[4..4 + take]);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    const USABLE: u32 = 32; // 28 payload bytes per chain page

    fn chain_page(next: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; USABLE as usize];
        buf[..4].copy_from_slice(&next.to_be_bytes());
        buf[4..4 + data.len()].copy_from_slice(data);
        buf
    }

    fn reader(pages: HashMap<u32, Vec<u8>>) -> impl FnMut(PageNumber) -> Result<Vec<u8>> {
        move |page| {
            pages
                .get(&page.get())
                .cloned()
                .ok_or(RepairError::PageOutOfRange {
                    page: page.get(),
                    page_count: 0,
                })
        }
    }

    fn page(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    #[test]
    fn single_chain_page_completes_the_payload() {
        let mut pages = HashMap::new();
        pages.insert(5, chain_page(0, b"overflowed"));
        let payload =
            read_overflow_chain(b"local ", page(5), 16, USABLE, &mut reader(pages)).unwrap();
        assert_eq!(payload, b"local overflowed");
    }

    #[test]
    fn multi_page_chain_reassembles_in_order() {
        let body: Vec<u8> = (0u8..=59).collect(); // 60 bytes -> 28 + 28 + 4
        let mut pages = HashMap::new();
        pages.insert(10, chain_page(11, &body[..28]));
        pages.insert(11, chain_page(12, &body[28..56]));
        pages.insert(12, chain_page(0, &body[56..]));

        let payload = read_overflow_chain(b"", page(10), 60, USABLE, &mut reader(pages)).unwrap();
        assert_eq!(payload, body);
    }

    #[test]
    fn chain_stops_reading_once_satisfied() {
        let mut calls = 0u32;
        let mut read = |p: PageNumber| {
            calls += 1;
            assert_eq!(p.get(), 7);
            Ok(chain_page(8, &[1; 28]))
        };
        // 20 bytes wanted, one page provides 28; page 8 must never be read.
        let payload = read_overflow_chain(b"", page(7), 20, USABLE, &mut read).unwrap();
        assert_eq!(payload.len(), 20);
        assert_eq!(calls, 1);
    }

    #[test]
    fn premature_end_is_a_broken_chain() {
        let mut pages = HashMap::new();
        pages.insert(5, chain_page(0, &[7; 28]));
        let err = read_overflow_chain(b"", page(5), 100, USABLE, &mut reader(pages)).unwrap_err();
        assert!(matches!(err, RepairError::OverflowChain { page: 5, .. }));
        assert!(err.to_string().contains("28 of 100"));
    }

    #[test]
    fn reader_errors_fail_the_chain_unchanged() {
        let err = read_overflow_chain(
            b"",
            page(9),
            50,
            USABLE,
            &mut |p| Err(RepairError::PageRevisited { page: p.get() }),
        )
        .unwrap_err();
        assert!(matches!(err, RepairError::PageRevisited { page: 9 }));
    }

    #[test]
    fn chain_length_cap_catches_degenerate_readers() {
        // Pages that carry a pointer but zero data never make progress.
        let mut read = |_p: PageNumber| Ok(vec![0, 0, 0, 99]);
        let err = read_overflow_chain(b"", page(1), 10, 5, &mut read).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
