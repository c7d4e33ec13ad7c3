//! Unpolarized Fresnel optics for slide/slab stacks.
//!
//! Everything here works with the cosine of the polar angle rather than the
//! angle itself, which keeps normal incidence well-conditioned and makes
//! total internal reflection a simple test against zero. The multi-layer
//! routines sum the geometric series of internal reflections in closed form.

use crate::INFINITE_B;

/// Cosine of the critical angle for light inside `n_i` meeting `n_t`.
///
/// Returns 0 (grazing) when there is no critical angle, i.e. `n_i <= n_t`.
pub fn cos_critical(n_i: f64, n_t: f64) -> f64 {
    let t = 1.0 - (n_t / n_i) * (n_t / n_i);
    if t > 0.0 {
        t.sqrt()
    } else {
        0.0
    }
}

/// Cosine of the Snell-refracted angle; 0 past the critical angle.
pub fn cos_snell(n_i: f64, nu: f64, n_t: f64) -> f64 {
    let t = 1.0 - (n_i / n_t) * (n_i / n_t) * (1.0 - nu * nu);
    if t > 0.0 {
        t.sqrt()
    } else {
        0.0
    }
}

/// Unpolarized Fresnel reflectance for light incident at cosine `nu_i`.
///
/// Written in terms of cosines, `R = ½[(ν_i - m ν_t)/(ν_i + m ν_t)]² +
/// ½[(ν_t - m ν_i)/(ν_t + m ν_i)]²` with `m = n_i/n_t`, which avoids the
/// ill-conditioned tangent form near normal incidence. Total internal
/// reflection returns exactly 1.
pub fn reflectance(n_i: f64, nu_i: f64, n_t: f64) -> f64 {
    let nu_t = cos_snell(n_i, nu_i, n_t);
    if nu_t == 0.0 && n_i > n_t {
        return 1.0;
    }
    if nu_i == 0.0 {
        return 1.0;
    }
    let m = n_i / n_t;
    let perp = (nu_i - m * nu_t) / (nu_i + m * nu_t);
    let par = (nu_t - m * nu_i) / (nu_t + m * nu_i);
    0.5 * (perp * perp + par * par)
}

/// Specular reflectance of a non-absorbing slide between `n_i` and `n_t`,
/// including all multiple internal reflections:
/// `r = (r1 + r2 - 2 r1 r2) / (1 - r1 r2)`.
pub fn glass_r(n_i: f64, n_g: f64, n_t: f64, nu_i: f64) -> f64 {
    if n_i == n_g || n_g == n_t {
        return reflectance(n_i, nu_i, n_t);
    }
    let r1 = reflectance(n_i, nu_i, n_g);
    if r1 >= 1.0 {
        return 1.0;
    }
    let nu_g = cos_snell(n_i, nu_i, n_g);
    let r2 = reflectance(n_g, nu_g, n_t);
    (r1 + r2 - 2.0 * r1 * r2) / (1.0 - r1 * r2)
}

/// Specular reflectance and transmittance of an absorbing slide with
/// internal optical thickness `b`, measured normal to the slide.
pub fn absorbing_glass_rt(n_i: f64, n_g: f64, n_t: f64, nu_i: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        let r = glass_r(n_i, n_g, n_t, nu_i);
        return (r, 1.0 - r);
    }
    let r1 = reflectance(n_i, nu_i, n_g);
    let nu_g = cos_snell(n_i, nu_i, n_g);
    if b > INFINITE_B || nu_g == 0.0 {
        return (r1, 0.0);
    }
    let r2 = reflectance(n_g, nu_g, n_t);
    let expo = (-b / nu_g).exp();
    let denom = 1.0 - r1 * r2 * expo * expo;
    let r = (r1 + (1.0 - 2.0 * r1) * r2 * expo * expo) / denom;
    let t = (1.0 - r1) * (1.0 - r2) * expo / denom;
    (r, t)
}

/// Unscattered reflectance and transmittance of the full
/// air-slide-slab-slide-air stack for light incident from air at cosine
/// `nu`.
///
/// The slab attenuates by `exp(-b_slab/ν_slab)`; both slides may absorb.
/// Multiple reflections between the top and bottom interfaces are summed
/// geometrically.
pub fn specular_rt(
    n_top: f64,
    n_slab: f64,
    n_bot: f64,
    b_slab: f64,
    nu: f64,
    b_top: f64,
    b_bot: f64,
) -> (f64, f64) {
    let (r_top, t_top) = absorbing_glass_rt(1.0, n_top, n_slab, nu, b_top);
    let nu_slab = cos_snell(1.0, nu, n_slab);
    if b_slab > INFINITE_B || nu_slab == 0.0 {
        return (r_top, 0.0);
    }
    let (r_bot, t_bot) = absorbing_glass_rt(n_slab, n_bot, 1.0, nu_slab, b_bot);
    let expo = (-b_slab / nu_slab).exp();
    let denom = 1.0 - r_top * r_bot * expo * expo;
    let r = r_top + r_bot * t_top * t_top * expo * expo / denom;
    let t = t_bot * t_top * expo / denom;
    (r, t)
}

/// As [`specular_rt`], but for a sample that was flipped between the
/// reflection and transmission measurements: reflectance from the original
/// top, transmittance through the flipped stack.
pub fn specular_rt_flipped(
    flip: bool,
    n_top: f64,
    n_slab: f64,
    n_bot: f64,
    b_slab: f64,
    nu: f64,
    b_top: f64,
    b_bot: f64,
) -> (f64, f64) {
    let (r, t) = specular_rt(n_top, n_slab, n_bot, b_slab, nu, b_top, b_bot);
    if !flip || (n_top == n_bot && b_top == b_bot) {
        return (r, t);
    }
    let (_, t_flipped) = specular_rt(n_bot, n_slab, n_top, b_slab, nu, b_bot, b_top);
    (r, t_flipped)
}

/// First moment of the Fresnel reflectance (Walsh's analytic solution):
/// the reflectance for isotropic diffuse irradiance.
///
/// Walsh's series is valid for `n_i < n_t`; the reciprocal case follows
/// from `1 - R(1/m) = (1 - R(m)) / m²`.
pub fn diffuse_reflectance(n_i: f64, n_t: f64) -> f64 {
    if n_i == n_t {
        return 0.0;
    }
    let m = if n_i < n_t { n_t / n_i } else { n_i / n_t };
    let m2 = m * m;
    let m4 = m2 * m2;
    let mm1 = m - 1.0;
    let mp1 = m + 1.0;
    let temp = (m2 - 1.0) / (m2 + 1.0);

    let mut r = 0.5 + mm1 * (3.0 * m + 1.0) / (6.0 * mp1 * mp1);
    r += m2 * temp * temp / (m2 + 1.0) * (mm1 / mp1).ln();
    r -= 2.0 * m * m2 * (m2 + 2.0 * m - 1.0) / ((m2 + 1.0) * (m4 - 1.0));
    r += 8.0 * m4 * (m4 + 1.0) / ((m2 + 1.0) * (m4 - 1.0) * (m4 - 1.0)) * m.ln();

    if n_i < n_t {
        r
    } else {
        1.0 - (1.0 - r) / m2
    }
}

/// Total diffuse reflectance of an air-slide-slab stack.
pub fn diffuse_glass_r(n_air: f64, n_slide: f64, n_slab: f64) -> f64 {
    let r1 = diffuse_reflectance(n_air, n_slide);
    let r2 = diffuse_reflectance(n_slide, n_slab);
    let r12 = r1 * r2;
    if r12 >= 1.0 {
        return 1.0;
    }
    (r1 + r2 - 2.0 * r12) / (1.0 - r12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normal_incidence() {
        // ((n-1)/(n+1))^2 at nu = 1
        assert_abs_diff_eq!(reflectance(1.0, 1.0, 1.5), 0.04, epsilon = 1e-12);
        assert_abs_diff_eq!(reflectance(1.5, 1.0, 1.0), 0.04, epsilon = 1e-12);
    }

    #[test]
    fn oblique_reflectance() {
        assert_abs_diff_eq!(reflectance(1.0, 0.5, 1.5), 0.08918671, epsilon = 1e-8);
    }

    #[test]
    fn total_internal_reflection() {
        let nu_c = cos_critical(1.5, 1.0);
        assert_abs_diff_eq!(nu_c, (1.0 - (1.0 / 1.5_f64).powi(2)).sqrt(), epsilon = 1e-14);
        assert_abs_diff_eq!(reflectance(1.5, 0.5 * nu_c, 1.0), 1.0);
        assert_abs_diff_eq!(cos_snell(1.5, 0.5 * nu_c, 1.0), 0.0);
    }

    #[test]
    fn snell_roundtrip() {
        let nu = 0.77;
        let inside = cos_snell(1.0, nu, 1.4);
        assert_abs_diff_eq!(cos_snell(1.4, inside, 1.0), nu, epsilon = 1e-12);
    }

    #[test]
    fn matched_glass_is_plain_interface() {
        assert_abs_diff_eq!(
            glass_r(1.0, 1.0, 1.4, 0.9),
            reflectance(1.0, 0.9, 1.4),
            epsilon = 1e-14
        );
        assert_abs_diff_eq!(glass_r(1.0, 1.5, 1.4, 1.0), 0.04109589, epsilon = 1e-8);
    }

    #[test]
    fn absorbing_glass_values() {
        let (r, t) = absorbing_glass_rt(1.0, 1.5, 1.4, 0.96, 0.1);
        assert_abs_diff_eq!(r, 0.04100774, epsilon = 1e-8);
        assert_abs_diff_eq!(t, 0.86599082, epsilon = 1e-8);
        // zero-thickness slide conserves energy
        let (r, t) = absorbing_glass_rt(1.0, 1.5, 1.4, 0.7, 0.0);
        assert_abs_diff_eq!(r + t, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn specular_stack() {
        let nu_inside = cos_snell(1.0, 1.0, 1.4);
        assert_abs_diff_eq!(nu_inside, 1.0, epsilon = 1e-14);
        let (r, t) = specular_rt(1.5, 1.4, 1.5, 1.0, 1.0, 0.0, 0.0);
        assert_abs_diff_eq!(r, 0.04621105, epsilon = 1e-8);
        assert_abs_diff_eq!(t, 0.33834141, epsilon = 1e-8);
        // infinitely thick slab transmits nothing
        let (_, t) = specular_rt(1.5, 1.4, 1.5, 2.0 * INFINITE_B, 1.0, 0.0, 0.0);
        assert_abs_diff_eq!(t, 0.0);
    }

    #[test]
    fn walsh_diffuse_moment() {
        assert_abs_diff_eq!(diffuse_reflectance(1.0, 1.5), 0.09177796, epsilon = 1e-8);
        assert_abs_diff_eq!(diffuse_reflectance(1.5, 1.0), 0.59634576, epsilon = 1e-8);
        assert_abs_diff_eq!(diffuse_reflectance(1.0, 1.4), 0.07681155, epsilon = 1e-8);
        assert_abs_diff_eq!(diffuse_glass_r(1.0, 1.5, 1.4), 0.21331562, epsilon = 1e-8);
    }
}
