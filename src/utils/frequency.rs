//! Dominant frequency detection, used to verify the pitch of processed test signals.

use std::f32::consts::PI;

use rustfft::{num_complex::Complex, FftPlanner};

// -------------------------------------------------------------------------------------------------

/// Estimate the dominant frequency of a mono signal in Hz.
///
/// Applies a Hann window, picks the FFT magnitude peak between DC and Nyquist and refines it via
/// three-point quadratic interpolation of the neighbouring bins. Accuracy is well below 1 Hz for
/// pure tones with 16k samples at 48 kHz.
///
/// Returns 0 for silence and for signals which are too short to have a peak.
pub fn dominant_frequency(signal: &[f32], sample_rate: u32) -> f32 {
    let len = signal.len();
    if len < 4 {
        return 0.0;
    }

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .zip(hann_window(len))
        .map(|(s, w)| Complex::new(s * w, 0.0))
        .collect();
    let fft = FftPlanner::new().plan_fft_forward(len);
    fft.process(&mut buffer);

    let magnitudes: Vec<f32> = buffer[..len / 2 + 1].iter().map(|c| c.norm()).collect();
    let Some((peak, peak_magnitude)) = magnitudes[1..magnitudes.len() - 1]
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, magnitude)| (index + 1, *magnitude))
    else {
        return 0.0;
    };
    if peak_magnitude < 1e-9 {
        return 0.0;
    }

    let (alpha, beta, gamma) = (
        magnitudes[peak - 1],
        magnitudes[peak],
        magnitudes[peak + 1],
    );
    let denominator = alpha - 2.0 * beta + gamma;
    let delta = if denominator != 0.0 {
        0.5 * (alpha - gamma) / denominator
    } else {
        0.0
    };
    (peak as f32 + delta) * sample_rate as f32 / len as f32
}

fn hann_window(len: usize) -> impl Iterator<Item = f32> {
    let scale = 2.0 * PI / (len - 1) as f32;
    (0..len).map(move |i| 0.5 - 0.5 * (scale * i as f32).cos())
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn tone(frequency: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / 48000.0).sin())
            .collect()
    }

    #[test]
    fn detects_pure_tones() {
        for frequency in [100.0, 432.0, 440.0, 880.0, 1000.0] {
            let detected = dominant_frequency(&tone(frequency, 16384, 0.5), 48000);
            assert_abs_diff_eq!(detected, frequency, epsilon = 0.5);
        }
        // amplitude independent
        for amplitude in [0.001, 0.1, 1.0] {
            let detected = dominant_frequency(&tone(432.0, 16384, amplitude), 48000);
            assert_abs_diff_eq!(detected, 432.0, epsilon = 0.5);
        }
    }

    #[test]
    fn tells_432_from_440_hz() {
        assert!(dominant_frequency(&tone(432.0, 8192, 0.5), 48000) < 436.0);
        assert!(dominant_frequency(&tone(440.0, 8192, 0.5), 48000) > 436.0);
    }

    #[test]
    fn silence() {
        assert_eq!(dominant_frequency(&[0.0; 8192], 48000), 0.0);
        assert_eq!(dominant_frequency(&[0.5, -0.5], 48000), 0.0);
    }
}
