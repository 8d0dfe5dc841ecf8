//! Reassembly of delimited objects from chunked response fragments.
//!
//! Riak streams key listings as a run of JSON objects, `{"keys":[...]}` after
//! `{"keys":[...]}`, with chunk boundaries that may fall anywhere inside an
//! object. [`StreamAssembler`] looks only at the edges of each fragment: it never
//! parses JSON, so it assumes the server does not end a partial fragment on a
//! stop delimiter that belongs to a nested value.

use bytes::{Bytes, BytesMut};

#[derive(Debug)]
pub struct StreamAssembler {
    start: Vec<u8>,
    stop: Vec<u8>,
    cache: BytesMut,
}

impl StreamAssembler {
    pub fn new(start: impl AsRef<[u8]>, stop: impl AsRef<[u8]>) -> Self {
        Self {
            start: start.as_ref().to_vec(),
            stop: stop.as_ref().to_vec(),
            cache: BytesMut::new(),
        }
    }

    /// `{` ... `}` delimited objects.
    pub fn json_objects() -> Self {
        Self::new("{", "}")
    }

    /// Feed one fragment; returns a complete object when one closes.
    ///
    /// - starts with `start` and ends with `stop`: returned as-is.
    /// - ends with `stop`: returned appended to everything cached so far; the cache
    ///   is cleared.
    /// - otherwise: cached.
    pub fn push(&mut self, fragment: &[u8]) -> Option<Bytes> {
        let closes = fragment.ends_with(&self.stop);

        if closes && fragment.starts_with(&self.start) {
            return Some(Bytes::copy_from_slice(fragment));
        }

        self.cache.extend_from_slice(fragment);
        if closes {
            return Some(self.cache.split().freeze());
        }
        None
    }

    /// Bytes held back waiting for a closing fragment.
    pub fn pending(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_split_across_fragments_emits_once() {
        let mut assembler = StreamAssembler::json_objects();

        assert_eq!(assembler.push(br#"{"keys":["#), None);
        assert_eq!(
            assembler.push(br#""a","b"]}"#),
            Some(Bytes::from_static(br#"{"keys":["a","b"]}"#))
        );
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn whole_fragments_pass_through() {
        let mut assembler = StreamAssembler::json_objects();
        assert_eq!(
            assembler.push(br#"{"keys":[]}"#),
            Some(Bytes::from_static(br#"{"keys":[]}"#))
        );
        assert_eq!(
            assembler.push(br#"{"keys":["k1"]}"#),
            Some(Bytes::from_static(br#"{"keys":["k1"]}"#))
        );
    }

    #[test]
    fn three_way_split_accumulates_middle() {
        let mut assembler = StreamAssembler::json_objects();
        assert_eq!(assembler.push(br#"{"keys":["al"#), None);
        assert_eq!(assembler.push(br#"pha","be"#), None);
        assert_eq!(assembler.pending(), 20);
        assert_eq!(
            assembler.push(br#"ta"]}"#),
            Some(Bytes::from_static(br#"{"keys":["alpha","beta"]}"#))
        );
        assert_eq!(assembler.push(br#"{"keys":[]}"#).as_deref(), Some(&br#"{"keys":[]}"#[..]));
    }

    #[test]
    fn empty_fragment_is_ignored() {
        let mut assembler = StreamAssembler::json_objects();
        assert_eq!(assembler.push(b""), None);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn multi_byte_delimiters() {
        let mut assembler = StreamAssembler::new("<<", ">>");
        assert_eq!(assembler.push(b"<<a"), None);
        assert_eq!(assembler.push(b"b>"), None);
        assert_eq!(
            assembler.push(b">>"),
            Some(Bytes::from_static(b"<<ab>>>"))
        );
    }
}
