// -------------------------------------------------------------------------------------------------

/// Copy the source into the destination buffer. Both buffers must have the same length.
#[inline]
pub fn copy_buffers<T: Copy>(dest: &mut [T], source: &[T]) {
    debug_assert_eq!(dest.len(), source.len(), "Buffer lengths must match");
    dest.copy_from_slice(source);
}

// -------------------------------------------------------------------------------------------------

/// Fill the given buffer with silence.
#[inline]
pub fn clear_buffer<T: Copy + Default>(buffer: &mut [T]) {
    buffer.fill(T::default());
}

// -------------------------------------------------------------------------------------------------

/// A fixed capacity FIFO of interleaved samples, which never allocates after construction.
///
/// When pushing more samples than there's space left, the oldest samples get dropped.
pub struct SampleFifo {
    buffer: Vec<f32>,
    start: usize,
    end: usize,
}

impl SampleFifo {
    /// Create a new FIFO which can hold up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            start: 0,
            end: 0,
        }
    }

    /// Max number of samples the FIFO can hold.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of samples currently queued.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Drop all queued samples.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Append the given samples. Returns the number of samples which got dropped to make room.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let capacity = self.capacity();
        let truncated = samples.len().saturating_sub(capacity);
        let samples = &samples[truncated..];

        // drop oldest samples when we're running out of space
        let overflow = (self.len() + samples.len()).saturating_sub(capacity);
        self.start += overflow;

        // move pending samples to the front when the tail doesn't fit
        if self.end + samples.len() > capacity {
            self.buffer.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        self.buffer[self.end..self.end + samples.len()].copy_from_slice(samples);
        self.end += samples.len();

        truncated + overflow
    }

    /// Move as many queued samples as possible into the given output buffer.
    /// Returns the number of samples written.
    pub fn pop_into(&mut self, output: &mut [f32]) -> usize {
        let count = self.len().min(output.len());
        copy_buffers(
            &mut output[..count],
            &self.buffer[self.start..self.start + count],
        );
        self.start += count;
        if self.start == self.end {
            self.clear();
        }
        count
    }
}

// -------------------------------------------------------------------------------------------------
