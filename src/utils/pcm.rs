//! Conversion between signed 16-bit PCM and normalized `f32` samples.

// -------------------------------------------------------------------------------------------------

const I16_SCALE: f32 = 32768.0;

// -------------------------------------------------------------------------------------------------

/// Convert a signed 16-bit PCM sample into a normalized float sample in range `[-1.0, 1.0)`.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}

/// Convert a normalized float sample into a signed 16-bit PCM sample.
///
/// Values outside of the unit range saturate at `i16::MIN` and `i16::MAX`. NaNs map to zero.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    // saturate, never wrap
    (sample * I16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

// -------------------------------------------------------------------------------------------------

/// Convert interleaved PCM samples into the given float buffer.
/// Converts `min(src.len(), dst.len())` samples.
pub fn pcm16_to_float(src: &[i16], dst: &mut [f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = i16_to_f32(*s);
    }
}

/// Convert interleaved float samples into the given PCM buffer with saturation.
/// Converts `min(src.len(), dst.len())` samples.
pub fn float_to_pcm16(src: &[f32], dst: &mut [i16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = f32_to_i16(*s);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_to_float() {
        assert_eq!(i16_to_f32(0), 0.0);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert_eq!(i16_to_f32(16384), 0.5);
        assert_eq!(i16_to_f32(-16384), -0.5);
        assert_eq!(i16_to_f32(8192), 0.25);
        let max = i16_to_f32(i16::MAX);
        assert!(max > 0.999 && max < 1.0);
    }

    #[test]
    fn float_to_pcm() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(0.5), 16384);
        assert_eq!(f32_to_i16(-0.5), -16384);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), i16::MIN);
        assert_eq!(f32_to_i16(f32::NAN), 0);
    }

    #[test]
    fn saturation() {
        for value in [1.000_1, 1.1, 2.0, 10.0, 1e6, f32::MAX, f32::INFINITY] {
            assert_eq!(f32_to_i16(value), i16::MAX, "{value} should saturate");
            assert_eq!(f32_to_i16(-value), i16::MIN, "{} should saturate", -value);
        }
    }

    #[test]
    fn round_trip_all_values() {
        for value in i16::MIN..=i16::MAX {
            let restored = f32_to_i16(i16_to_f32(value));
            assert!(
                (restored as i32 - value as i32).abs() <= 1,
                "{value} round-tripped to {restored}"
            );
        }
    }

    #[test]
    fn monotonic() {
        let mut last = i16_to_f32(i16::MIN);
        for value in (i16::MIN + 1)..=i16::MAX {
            let current = i16_to_f32(value);
            assert!(current > last);
            last = current;
        }
    }

    #[test]
    fn slices() {
        let pcm = [i16::MIN, -16384, 0, 16384, i16::MAX];
        let mut float = [0.0; 5];
        pcm16_to_float(&pcm, &mut float);
        assert_eq!(&float[..4], &[-1.0, -0.5, 0.0, 0.5]);

        let mut restored = [0; 5];
        float_to_pcm16(&[-3.0, -0.5, 0.0, 0.5, 3.0], &mut restored);
        assert_eq!(restored, [i16::MIN, -16384, 0, 16384, i16::MAX]);
    }
}
