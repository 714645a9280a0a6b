//! Bulk query planning.
//!
//! Property retrieval for datastores and VMs is batched, but vCenter caps
//! the number of objects per request. [`chunk_references`] splits a list of
//! references into bounded pages.

use crate::error::{Error, Result};

/// Split `items` into contiguous chunks of at most `chunk_size` elements.
///
/// Order is preserved and only the last chunk may be shorter. An empty
/// input yields no chunks. A zero `chunk_size` is rejected with
/// [`Error::InvalidChunkSize`].
pub fn chunk_references<T>(items: &[T], chunk_size: usize) -> Result<Vec<&[T]>> {
    if chunk_size == 0 {
        return Err(Error::InvalidChunkSize(chunk_size));
    }
    Ok(items.chunks(chunk_size).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunks_of_two() {
        let refs = ["a", "b", "c", "d", "e"];
        let chunks = chunk_references(&refs, 2).unwrap();
        assert_eq!(chunks, vec![&["a", "b"][..], &["c", "d"][..], &["e"][..]]);
    }

    #[test]
    fn test_empty_input() {
        let refs: [u32; 0] = [];
        assert!(chunk_references(&refs, 100).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = chunk_references(&[1, 2, 3], 0).unwrap_err();
        assert!(matches!(err, Error::InvalidChunkSize(0)));
    }

    proptest! {
        #[test]
        fn prop_chunks_reassemble(items in proptest::collection::vec(any::<u16>(), 0..500), size in 1usize..64) {
            let chunks = chunk_references(&items, size).unwrap();

            prop_assert_eq!(chunks.len(), items.len().div_ceil(size));
            prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= size));
            let joined: Vec<u16> = chunks.concat();
            prop_assert_eq!(joined, items);
        }
    }
}
