//! Downsampling kernels for 2x mip reduction.
//!
//! All kernels are separable and expressed as integer taps around the
//! destination texel's footprint in the source level. For destination index
//! `d`, tap `k` reads source index `2*d + k`; the footprint center sits at
//! `2*d + 0.5`, so tap `k` is at distance `k - 0.5` from the center.

use crate::texture::PixelBuffer;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Reconstruction filter used when resampling a mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterKind {
    /// Plain 2x2 average. Fast, slightly soft.
    #[default]
    Box,
    /// Kaiser-windowed sinc. Sharper, mild ringing. The usual choice for
    /// albedo pyramids.
    Kaiser,
    /// Gaussian. Softest, no ringing. Good for data maps that must not ring.
    Gaussian,
}

/// A separable 1D downsampling kernel. `weights[i]` applies to source index
/// `2*d + first_tap + i`.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub weights: Vec<f32>,
    pub first_tap: i64,
}

impl Kernel {
    /// Build the kernel for a filter at the given blur scale. `blur = 1.0`
    /// is the nominal footprint; larger values widen it.
    pub fn new(filter: FilterKind, blur: f32) -> Kernel {
        let blur = blur.max(0.01);
        match filter {
            FilterKind::Box => Kernel {
                weights: vec![0.5, 0.5],
                first_tap: 0,
            },
            FilterKind::Kaiser => kaiser_kernel(3.0 * blur, 4.0),
            FilterKind::Gaussian => gaussian_kernel(blur),
        }
    }
}

/// Kaiser-windowed sinc with cutoff at half the source rate.
fn kaiser_kernel(radius: f32, beta: f32) -> Kernel {
    let taps = sample_taps(radius, |d| {
        let t = d / radius;
        if t.abs() >= 1.0 {
            0.0
        } else {
            sinc(0.5 * d) * bessel_i0(beta * (1.0 - t * t).sqrt()) / bessel_i0(beta)
        }
    });
    normalized(taps)
}

fn gaussian_kernel(blur: f32) -> Kernel {
    let sigma = 0.75 * blur;
    let radius = (3.0 * sigma).max(1.0);
    let taps = sample_taps(radius, |d| (-d * d / (2.0 * sigma * sigma)).exp());
    normalized(taps)
}

/// Evaluate a continuous filter at every integer tap whose distance from the
/// footprint center is within `radius`.
fn sample_taps(radius: f32, f: impl Fn(f32) -> f32) -> Kernel {
    // Tap k sits at distance k - 0.5; cover [-radius, radius].
    let first = (0.5 - radius).floor() as i64;
    let last = (0.5 + radius).ceil() as i64;
    let weights = (first..=last).map(|k| f(k as f32 - 0.5)).collect();
    Kernel {
        weights,
        first_tap: first,
    }
}

fn normalized(mut kernel: Kernel) -> Kernel {
    let sum: f32 = kernel.weights.iter().sum();
    if sum.abs() > f32::EPSILON {
        for w in &mut kernel.weights {
            *w /= sum;
        }
    }
    kernel
}

fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-6 {
        1.0
    } else {
        let px = std::f32::consts::PI * x;
        px.sin() / px
    }
}

/// Zeroth-order modified Bessel function of the first kind (series form).
fn bessel_i0(x: f32) -> f32 {
    let mut sum = 1.0f32;
    let mut term = 1.0f32;
    let half_x = x / 2.0;
    for k in 1..32 {
        term *= (half_x / k as f32) * (half_x / k as f32);
        sum += term;
        if term < 1e-8 * sum {
            break;
        }
    }
    sum
}

/// Downsample a buffer to `target_w` x `target_h` with the given kernel,
/// separably (horizontal then vertical).
///
/// `energy_preserving` controls border handling: when set, out-of-bounds taps
/// are dropped and the remaining weights renormalized so the kernel always
/// sums to exactly 1; otherwise samples clamp to the edge texel.
pub fn downsample(
    src: &PixelBuffer,
    target_w: u32,
    target_h: u32,
    kernel: &Kernel,
    energy_preserving: bool,
) -> PixelBuffer {
    let horizontal = pass(src, target_w, src.height(), kernel, energy_preserving, Axis::X);
    pass(
        &horizontal,
        target_w,
        target_h,
        kernel,
        energy_preserving,
        Axis::Y,
    )
}

#[derive(Clone, Copy, PartialEq)]
enum Axis {
    X,
    Y,
}

fn pass(
    src: &PixelBuffer,
    out_w: u32,
    out_h: u32,
    kernel: &Kernel,
    energy_preserving: bool,
    axis: Axis,
) -> PixelBuffer {
    let src_extent = match axis {
        Axis::X => src.width() as i64,
        Axis::Y => src.height() as i64,
    };

    let data: Vec<[f32; 4]> = (0..out_h as i64)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..out_w as i64).map(move |x| {
                let d = if axis == Axis::X { x } else { y };
                let mut acc = [0.0f32; 4];
                let mut weight_sum = 0.0f32;
                for (i, &w) in kernel.weights.iter().enumerate() {
                    let tap = 2 * d + kernel.first_tap + i as i64;
                    if energy_preserving && (tap < 0 || tap >= src_extent) {
                        continue;
                    }
                    let texel = match axis {
                        Axis::X => src.get(tap, y),
                        Axis::Y => src.get(x, tap),
                    };
                    for c in 0..4 {
                        acc[c] += texel[c] * w;
                    }
                    weight_sum += w;
                }
                if energy_preserving && weight_sum.abs() > f32::EPSILON {
                    for c in &mut acc {
                        *c /= weight_sum;
                    }
                }
                acc
            })
        })
        .collect();

    PixelBuffer::from_raw(out_w, out_h, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit_sum(kernel: &Kernel) {
        let sum: f32 = kernel.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "kernel sum {sum}");
    }

    #[test]
    fn test_kernels_sum_to_one() {
        assert_unit_sum(&Kernel::new(FilterKind::Box, 1.0));
        assert_unit_sum(&Kernel::new(FilterKind::Kaiser, 1.0));
        assert_unit_sum(&Kernel::new(FilterKind::Gaussian, 1.0));
        assert_unit_sum(&Kernel::new(FilterKind::Kaiser, 2.5));
    }

    #[test]
    fn test_box_kernel_taps() {
        let kernel = Kernel::new(FilterKind::Box, 1.0);
        assert_eq!(kernel.weights, vec![0.5, 0.5]);
        assert_eq!(kernel.first_tap, 0);
    }

    #[test]
    fn test_bessel_i0_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-6);
        // I0(1) = 1.2660658...
        assert!((bessel_i0(1.0) - 1.266_065_9).abs() < 1e-4);
    }

    #[test]
    fn test_downsample_box_averages_2x2() {
        let mut src = PixelBuffer::filled(2, 2, [0.0, 0.0, 0.0, 1.0]);
        src.set(0, 0, [1.0, 0.0, 0.0, 1.0]);
        src.set(1, 1, [0.0, 1.0, 0.0, 1.0]);

        let kernel = Kernel::new(FilterKind::Box, 1.0);
        let out = downsample(&src, 1, 1, &kernel, false);
        let t = out.get(0, 0);
        assert!((t[0] - 0.25).abs() < 1e-6);
        assert!((t[1] - 0.25).abs() < 1e-6);
        assert!((t[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_downsample_constant_invariant_all_filters() {
        let src = PixelBuffer::filled(16, 16, [0.6, 0.3, 0.9, 1.0]);
        for filter in [FilterKind::Box, FilterKind::Kaiser, FilterKind::Gaussian] {
            for energy in [false, true] {
                let kernel = Kernel::new(filter, 1.0);
                let out = downsample(&src, 8, 8, &kernel, energy);
                for t in out.texels() {
                    for c in 0..4 {
                        assert!(
                            (t[c] - [0.6, 0.3, 0.9, 1.0][c]).abs() < 1e-4,
                            "{filter:?} energy={energy} drifted to {t:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_energy_preserving_border_no_gain() {
        // A bright border column must not leak extra energy when taps fall
        // outside the image.
        let mut src = PixelBuffer::filled(4, 4, [0.0, 0.0, 0.0, 1.0]);
        for y in 0..4 {
            src.set(0, y, [1.0, 1.0, 1.0, 1.0]);
        }
        let kernel = Kernel::new(FilterKind::Kaiser, 1.0);
        let out = downsample(&src, 2, 2, &kernel, true);
        for t in out.texels() {
            assert!(t[0] <= 1.0 + 1e-5);
            assert!(t[0] >= -1e-5);
        }
    }
}
