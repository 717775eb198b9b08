//! Gap buffer for inbound audio (spec §4.3): chunks are ordered by their
//! in-payload `chunk_index`, independent of the envelope `seq` they rode
//! in on. `stt_partial` is only worth emitting when the monotone prefix
//! starting at index 0 has grown since the last check.

use ocn_domain::model::AudioChunk;

#[derive(Debug, Default)]
pub struct AudioBuffer {
    chunks: Vec<AudioChunk>,
    contiguous_len: usize,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a session row's persisted `pending_audio_chunks`.
    pub fn from_pending(mut chunks: Vec<AudioChunk>) -> Self {
        chunks.sort_by_key(|c| c.chunk_index);
        chunks.dedup_by_key(|c| c.chunk_index);
        let contiguous_len = contiguous_prefix_len(&chunks);
        Self { chunks, contiguous_len }
    }

    /// Insert `chunk`, keeping the buffer sorted and deduplicated by
    /// `chunk_index`. Returns `true` if the contiguous prefix grew, which
    /// is the signal to emit a fresh `stt_partial`.
    pub fn insert(&mut self, chunk: AudioChunk) -> bool {
        match self.chunks.binary_search_by_key(&chunk.chunk_index, |c| c.chunk_index) {
            Ok(i) => self.chunks[i] = chunk,
            Err(i) => self.chunks.insert(i, chunk),
        }
        let new_len = contiguous_prefix_len(&self.chunks);
        let grew = new_len > self.contiguous_len;
        self.contiguous_len = new_len;
        grew
    }

    pub fn contiguous_len(&self) -> usize {
        self.contiguous_len
    }

    pub fn pending(&self) -> &[AudioChunk] {
        &self.chunks
    }

    /// Concatenate the contiguous prefix's text fragments, the best
    /// effort transcript for a `stt_partial`/`stt_final` emission.
    pub fn transcript_so_far(&self) -> String {
        self.chunks[..self.contiguous_len]
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Drain and return all buffered chunks, in order, for persistence or
    /// final transcript assembly at `listen_stop`.
    pub fn finalize(self) -> Vec<AudioChunk> {
        self.chunks
    }
}

fn contiguous_prefix_len(sorted_chunks: &[AudioChunk]) -> usize {
    let mut n = 0;
    for chunk in sorted_chunks {
        if chunk.chunk_index == n as u64 {
            n += 1;
        } else if chunk.chunk_index > n as u64 {
            break;
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(i: u64, text: &str) -> AudioChunk {
        AudioChunk { chunk_index: i, text: Some(text.into()), audio_b64: None }
    }

    #[test]
    fn contiguous_prefix_grows_in_order() {
        let mut buf = AudioBuffer::new();
        assert!(buf.insert(chunk(0, "hel")));
        assert_eq!(buf.contiguous_len(), 1);
        assert!(buf.insert(chunk(1, "lo")));
        assert_eq!(buf.contiguous_len(), 2);
        assert_eq!(buf.transcript_so_far(), "hello");
    }

    #[test]
    fn out_of_order_chunk_does_not_grow_prefix_until_gap_fills() {
        let mut buf = AudioBuffer::new();
        assert!(buf.insert(chunk(0, "a")));
        assert!(!buf.insert(chunk(2, "c"))); // gap at index 1, prefix still len 1
        assert_eq!(buf.contiguous_len(), 1);
        assert!(buf.insert(chunk(1, "b"))); // fills gap, prefix jumps to 3
        assert_eq!(buf.contiguous_len(), 3);
    }

    #[test]
    fn duplicate_chunk_index_overwrites_in_place() {
        let mut buf = AudioBuffer::new();
        buf.insert(chunk(0, "a"));
        buf.insert(chunk(0, "a-replaced"));
        assert_eq!(buf.pending().len(), 1);
        assert_eq!(buf.pending()[0].text.as_deref(), Some("a-replaced"));
    }

    #[test]
    fn from_pending_recomputes_contiguous_len() {
        let buf = AudioBuffer::from_pending(vec![chunk(1, "b"), chunk(0, "a")]);
        assert_eq!(buf.contiguous_len(), 2);
    }
}
