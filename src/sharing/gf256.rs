//! GF(2^8) arithmetic with the AES reduction polynomial x^8 + x^4 + x^3 + x + 1.
//!
//! Multiplication and division go through exp/log tables generated at
//! compile time from the generator 0x03.

const POLY_LOW: u8 = 0x1B;

struct Tables {
    exp: [u8; 512],
    log: [u8; 256],
}

const fn xtime(x: u8) -> u8 {
    let shifted = x << 1;
    if x & 0x80 != 0 {
        shifted ^ POLY_LOW
    } else {
        shifted
    }
}

const fn build_tables() -> Tables {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u8 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x;
        log[x as usize] = i as u8;
        // x *= 3
        x ^= xtime(x);
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    Tables { exp, log }
}

static TABLES: Tables = build_tables();

pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    TABLES.exp[TABLES.log[a as usize] as usize + TABLES.log[b as usize] as usize]
}

/// `a / b`. Callers guarantee `b != 0`.
pub fn div(a: u8, b: u8) -> u8 {
    debug_assert!(b != 0, "division by zero in GF(256)");
    if a == 0 || b == 0 {
        return 0;
    }
    TABLES.exp[TABLES.log[a as usize] as usize + 255 - TABLES.log[b as usize] as usize]
}

/// Horner evaluation; `coeffs[0]` is the constant term.
pub fn eval_poly(coeffs: &[u8], x: u8) -> u8 {
    coeffs.iter().rev().fold(0u8, |acc, &c| mul(acc, x) ^ c)
}
