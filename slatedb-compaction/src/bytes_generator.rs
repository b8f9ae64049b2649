use bytes::{BufMut, Bytes, BytesMut};

/// Produces byte strings in strictly increasing order by counting in base
/// `max - min + 1`, starting from `start`.
#[derive(Clone)]
pub(crate) struct OrderedBytesGenerator {
    suffix: Bytes,
    bytes: Vec<u8>,
    min: u8,
    max: u8,
}

impl OrderedBytesGenerator {
    pub(crate) fn new_with_byte_range(start: &[u8], min: u8, max: u8) -> Self {
        Self::new_with_suffix(&[], start, min, max)
    }

    pub(crate) fn new_with_suffix(suffix: &[u8], start: &[u8], min: u8, max: u8) -> Self {
        Self {
            suffix: Bytes::copy_from_slice(suffix),
            bytes: start.to_vec(),
            min,
            max,
        }
    }

    pub(crate) fn next(&mut self) -> Bytes {
        let mut result = BytesMut::with_capacity(self.bytes.len() + self.suffix.len());
        result.put_slice(&self.bytes);
        result.put_slice(&self.suffix);
        self.increment();
        result.freeze()
    }

    fn increment(&mut self) {
        for byte in self.bytes.iter_mut().rev() {
            if *byte < self.max {
                *byte += 1;
                return;
            }
            *byte = self.min;
        }
        panic!("ordered bytes generator exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::OrderedBytesGenerator;
    use bytes::{BufMut, Bytes};

    #[test]
    fn test_should_generate_ordered_bytes() {
        let mut suffix = Vec::<u8>::new();
        suffix.put_u32(0xdeadbeef);
        let mut gen = OrderedBytesGenerator::new_with_suffix(&suffix, &[0u8, 0u8], 0, 2);

        let expected = [[0u8, 0u8], [0, 1], [0, 2], [1, 0], [1, 1], [1, 2], [2, 0]];
        for e in expected.iter() {
            let mut full = e.to_vec();
            full.extend_from_slice(&suffix);
            assert_eq!(gen.next(), Bytes::from(full));
        }
    }

    #[test]
    fn test_generated_keys_strictly_increase() {
        let mut gen = OrderedBytesGenerator::new_with_byte_range(&[b'a'; 4], b'a', b'z');
        let mut prev = gen.next();
        for _ in 0..1000 {
            let next = gen.next();
            assert!(next > prev);
            prev = next;
        }
    }
}
