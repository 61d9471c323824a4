//! Specular X-ray reflectivity of a layered medium.
//!
//! Parratt recursion with Névot-Croce interfacial roughness. Media are listed
//! from the vacuum (index 0) down to the substrate (last index); the
//! thickness of the first and last medium is ignored.
//!
//! Media are given as `n` and `k` with `k >= 0` absorbing. The recursion uses
//! the attenuating convention: complex index `n + i k`, normal wavevector
//! `kz_j = k0 sqrt((n_j + i k_j)^2 - cos^2 theta)` on the branch with
//! `Im kz >= 0`, and propagation factor `exp(2 i kz_j d_j)`, whose modulus
//! never exceeds 1 inside an absorbing layer. Writing the index as `n - i k`
//! with the same `exp(2 i kz d)` factor would instead amplify the field in
//! thick absorbing layers, so results differ from that form whenever `k > 0`.
//!
//! The Névot-Croce factor `exp(-2 sigma^2 kz_j kz_{j+1})` can grow past 1
//! below the critical angle of a rough interface. Its modulus is capped at 1
//! (phase kept), which keeps the Fresnel coefficients bounded; the uncapped
//! factor is the textbook form.

use ndarray::Array1;
use num_complex::Complex64;
use std::f64::consts::PI;

use crate::stack::ExpandedStack;

/// Convert f64 to Complex64 (real part only).
#[inline]
fn c(re: f64) -> Complex64 {
    Complex64::new(re, 0.0)
}

/// Normal wavevector component on the decaying branch.
#[inline]
fn kz(index: Complex64, cos2: f64, k0: f64) -> Complex64 {
    let q = (index * index - c(cos2)).sqrt() * k0;
    if q.im < 0.0 || (q.im == 0.0 && q.re < 0.0) {
        -q
    } else {
        q
    }
}

/// Reflectivity `R(theta)` of the media `(n, k, d, sigma)` at `wavelength_nm`.
///
/// Angles are grazing angles in degrees; thickness, roughness and wavelength
/// share one length unit (nm). The kernel never fails: non-finite values
/// propagate to the output and the caller decides how to clamp them. Finite
/// results are limited to `[0, 1]`.
///
/// # Panics
///
/// Panics if the four media slices differ in length.
pub fn simulate(
    n: &[f64],
    k: &[f64],
    d: &[f64],
    sigma: &[f64],
    wavelength_nm: f64,
    theta_deg: &[f64],
) -> Array1<f64> {
    let media = n.len();
    assert!(
        k.len() == media && d.len() == media && sigma.len() == media,
        "media arrays differ in length"
    );

    let k0 = 2.0 * PI / wavelength_nm;
    let index: Vec<Complex64> = n
        .iter()
        .zip(k.iter())
        .map(|(&n, &k)| Complex64::new(n, k))
        .collect();
    // Mean roughness squared of each interface j / j+1.
    let sigma2: Vec<f64> = sigma
        .windows(2)
        .map(|w| {
            let s = 0.5 * (w[0] + w[1]);
            s * s
        })
        .collect();

    let one = c(1.0);
    let two_i = Complex64::new(0.0, 2.0);
    let mut q = vec![Complex64::default(); media];

    theta_deg
        .iter()
        .map(|&theta| {
            if media < 2 {
                return 0.0;
            }
            let cos_t = theta.to_radians().cos();
            let cos2 = cos_t * cos_t;
            for (qj, &nj) in q.iter_mut().zip(index.iter()) {
                *qj = kz(nj, cos2, k0);
            }

            let mut r = Complex64::default();
            for j in (0..media - 1).rev() {
                let mut rj = (q[j] - q[j + 1]) / (q[j] + q[j + 1]);
                if sigma2[j] > 0.0 {
                    let mut damping = (c(-2.0 * sigma2[j]) * q[j] * q[j + 1]).exp();
                    let modulus = damping.norm();
                    if modulus > 1.0 {
                        damping /= modulus;
                    }
                    rj *= damping;
                }
                let phase = (two_i * q[j + 1] * d[j + 1]).exp();
                let rp = r * phase;
                r = (rj + rp) / (one + rj * rp);
            }

            let reflectivity = r.norm_sqr();
            if reflectivity.is_finite() {
                reflectivity.clamp(0.0, 1.0)
            } else {
                reflectivity
            }
        })
        .collect()
}

/// [`simulate`] on an expanded stack.
pub fn simulate_stack(stack: &ExpandedStack, wavelength_nm: f64, theta_deg: &[f64]) -> Array1<f64> {
    simulate(
        &stack.n,
        &stack.k,
        &stack.d,
        &stack.sigma,
        wavelength_nm,
        theta_deg,
    )
}
