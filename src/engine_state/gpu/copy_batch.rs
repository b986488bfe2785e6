use super::backend::CommandRecorder;

/// One buffer-to-buffer copy range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRange {
    /// Byte offset in the source buffer.
    pub source_offset: u64,
    /// Byte offset in the destination buffer.
    pub destination_offset: u64,
    /// Bytes to copy.
    pub size: u64,
}

/// Accumulates copies between one source and one destination buffer, merging a
/// range into its predecessor when both sides are contiguous.
#[derive(Debug, Default)]
pub struct CopyBatch {
    ranges: Vec<CopyRange>,
}

impl CopyBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a copy, extending the previous one when it continues it exactly.
    pub fn push(&mut self, source_offset: u64, destination_offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        if let Some(last) = self.ranges.last_mut() {
            if last.source_offset + last.size == source_offset
                && last.destination_offset + last.size == destination_offset
            {
                last.size += size;
                return;
            }
        }
        self.ranges.push(CopyRange {
            source_offset,
            destination_offset,
            size,
        });
    }

    /// The merged ranges.
    pub fn ranges(&self) -> &[CopyRange] {
        &self.ranges
    }

    /// Total bytes covered.
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|range| range.size).sum()
    }

    /// True when nothing was pushed.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Records one copy command per merged range.
    ///
    /// # Returns
    /// The number of copy commands recorded
    pub fn record<B, R: CommandRecorder<B>>(
        &self,
        recorder: &mut R,
        source: &B,
        destination: &B,
    ) -> usize {
        for range in &self.ranges {
            recorder.copy_buffer_to_buffer(
                source,
                range.source_offset,
                destination,
                range.destination_offset,
                range.size,
            );
        }
        self.ranges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_ranges_merge() {
        let mut batch = CopyBatch::new();
        batch.push(0, 100, 16);
        batch.push(16, 116, 8);
        batch.push(24, 200, 8);
        batch.push(32, 208, 0);

        assert_eq!(
            batch.ranges(),
            &[
                CopyRange {
                    source_offset: 0,
                    destination_offset: 100,
                    size: 24
                },
                CopyRange {
                    source_offset: 24,
                    destination_offset: 200,
                    size: 8
                },
            ]
        );
        assert_eq!(batch.total_bytes(), 32);
    }
}
