//! Saturating u64 math. Clamp at `u64::MAX`, floor at zero, never wrap.
//!
//! Hyper cells multiply a displayed capacity (up to 2^30 bytes) by a multiplier
//! around 2^31, so naive products blow past 64 bits. Everything here stays in
//! range by construction.

/// `a * b`, clamped.
#[inline(always)]
pub const fn mul(a: u64, b: u64) -> u64 {
    a.saturating_mul(b)
}

/// `a + b`, clamped.
#[inline(always)]
pub const fn add(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

/// `a - b`, or zero when `b >= a`.
#[inline(always)]
pub const fn sub(a: u64, b: u64) -> u64 {
    a.saturating_sub(b)
}

/// `floor(a * b * c / d)` without overflowing the intermediate product.
///
/// Divides early through whichever of `a`, `b`, `c` is a multiple of `d`.
/// Otherwise splits `a = q*d + r`: the `q` term is exact (`q*b*c`), the `r`
/// term is `r*b*c / d` with `r < d`. Both are summed with saturation.
/// `d == 0` saturates.
pub fn mul_div(a: u64, b: u64, c: u64, d: u64) -> u64 {
    if d == 0 {
        return if a == 0 || b == 0 || c == 0 { 0 } else { u64::MAX };
    }
    if a == 0 || b == 0 || c == 0 {
        return 0;
    }

    if a % d == 0 {
        return mul(mul(a / d, b), c);
    }
    if b % d == 0 {
        return mul(mul(a, b / d), c);
    }
    if c % d == 0 {
        return mul(mul(a, b), c / d);
    }

    let q = a / d;
    let r = a % d;
    let whole = mul(mul(q, b), c);
    add(whole, remainder_term(r, b, c, d))
}

/// `floor(r * b * c / d)` for `r < d`. Exact in 128 bits while it fits;
/// the 192-bit worst case is reduced through `b*c / d` first.
fn remainder_term(r: u64, b: u64, c: u64, d: u64) -> u64 {
    let bc = b as u128 * c as u128;
    let d = d as u128;
    let r = r as u128;

    match bc.checked_mul(r) {
        Some(product) => clamp_u128(product / d),
        None => {
            // r < d, so r*bc/d < bc. Split bc = bq*d + br and recurse on the
            // pieces: r*bq exactly, r*br/d with br < d fitting in 128 bits.
            let bq = bc / d;
            let br = bc % d;
            let head = r.checked_mul(bq).unwrap_or(u128::MAX);
            let tail = r * br / d;
            clamp_u128(head.saturating_add(tail))
        }
    }
}

#[inline(always)]
fn clamp_u128(value: u128) -> u64 {
    if value > u64::MAX as u128 {
        u64::MAX
    } else {
        value as u64
    }
}

/// Multiplier applied by hyper-density cells to their displayed capacity.
pub const HYPER_MULTIPLIER: u64 = 1 << 31;

/// Base units a cell can hold: `bytes * units_per_byte * multiplier`, clamped.
#[inline]
pub fn capacity_units(bytes: u64, units_per_byte: u64, multiplier: u64) -> u64 {
    mul(mul(bytes, units_per_byte), multiplier)
}

/// Displayed bytes in use for `stored` units out of `capacity` units backed by
/// `bytes` displayed bytes. Any non-zero fill shows at least one byte.
pub fn bytes_used(stored: u64, bytes: u64, capacity: u64) -> u64 {
    if stored == 0 || capacity == 0 {
        return 0;
    }
    let used = mul_div(stored, bytes, 1, capacity);
    if used == 0 {
        1
    } else {
        used.min(bytes)
    }
}

/// Equal share of `total` split `parts` ways. Zero parts means no split.
#[inline]
pub fn equal_share(total: u64, parts: u64) -> u64 {
    if parts == 0 {
        total
    } else {
        mul_div(total, 1, 1, parts)
    }
}
