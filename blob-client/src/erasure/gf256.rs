//! GF(2^8) arithmetic over the AES/CCITT reduction polynomial `0x11D`,
//! memoised into exp/log tables the way the original `liberasurecode`
//! backend this crate replaces precomputes its Galois tables once at
//! startup.

use lazy_static::lazy_static;

const POLY: u16 = 0x11D;

struct Tables {
    exp: [u8; 510],
    log: [u8; 256],
}

impl Tables {
    fn build() -> Self {
        let mut exp = [0u8; 510];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255usize {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= POLY;
            }
        }
        for i in 255..510usize {
            exp[i] = exp[i - 255];
        }
        Self { exp, log }
    }
}

lazy_static! {
    static ref TABLES: Tables = Tables::build();
}

/// Field addition (and subtraction: GF(2^8) is its own additive inverse).
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Field multiplication via the log/exp tables. `0 * x == 0` for any `x`.
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let log_a = TABLES.log[a as usize] as usize;
    let log_b = TABLES.log[b as usize] as usize;
    TABLES.exp[log_a + log_b]
}

/// Multiplicative inverse. Panics on zero, which has none.
pub fn inv(a: u8) -> u8 {
    assert_ne!(a, 0, "zero has no multiplicative inverse in GF(2^8)");
    let log_a = TABLES.log[a as usize] as usize;
    TABLES.exp[510 - 255 - log_a]
}

/// Field division `a / b`.
pub fn div(a: u8, b: u8) -> u8 {
    mul(a, inv(b))
}

/// `base` raised to `exp` in GF(2^8).
pub fn pow(base: u8, exp: u32) -> u8 {
    let mut result = 1u8;
    for _ in 0..exp {
        result = mul(result, base);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplication_by_one_is_identity() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, 1), a);
        }
    }

    #[test]
    fn multiplication_by_zero_is_zero() {
        assert_eq!(mul(37, 0), 0);
        assert_eq!(mul(0, 200), 0);
    }

    #[test]
    fn inverse_round_trips() {
        for a in 1..=255u8 {
            let inv_a = inv(a);
            assert_eq!(mul(a, inv_a), 1, "a={}", a);
        }
    }

    #[test]
    fn division_undoes_multiplication() {
        for a in 1..=255u8 {
            for b in [1u8, 2, 3, 200, 255] {
                assert_eq!(div(mul(a, b), b), a);
            }
        }
    }

    #[test]
    fn pow_zero_is_one() {
        assert_eq!(pow(42, 0), 1);
    }
}
