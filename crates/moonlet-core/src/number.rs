//! Numeric semantics shared by the constant folder and the interpreter.
//!
//! All numbers are doubles. A number is an *integer* when it is finite and has
//! no fractional part; bitwise operators only accept integers.

/// Arithmetic and bitwise operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    /// Returns true for operators that need integer operands.
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }

    /// Returns true for the unary operators.
    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }

    /// Returns true if the right operand is used as a divisor.
    pub fn is_division(self) -> bool {
        matches!(self, ArithOp::Div | ArithOp::IDiv | ArithOp::Mod)
    }
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// The integer predicate.
#[inline]
pub fn is_integer(x: f64) -> bool {
    x.is_finite() && x % 1.0 == 0.0
}

/// Convert an integral number in `i64` range to `i64`.
#[inline]
pub fn to_integer(x: f64) -> Option<i64> {
    if is_integer(x) && x >= -TWO_POW_63 && x < TWO_POW_63 {
        Some(x as i64)
    } else {
        None
    }
}

/// Apply `op` to two numbers. Unary operators ignore `b`.
///
/// Returns `None` only when a bitwise operator gets a non-integer operand.
pub fn arith(op: ArithOp, a: f64, b: f64) -> Option<f64> {
    let r = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => lua_mod(a, b),
        ArithOp::Pow => a.powf(b),
        ArithOp::IDiv => (a / b).floor(),
        ArithOp::Unm => -a,
        ArithOp::BNot => !to_integer(a)? as f64,
        ArithOp::BAnd => (to_integer(a)? & to_integer(b)?) as f64,
        ArithOp::BOr => (to_integer(a)? | to_integer(b)?) as f64,
        ArithOp::BXor => (to_integer(a)? ^ to_integer(b)?) as f64,
        ArithOp::Shl => shift_left(to_integer(a)?, to_integer(b)?) as f64,
        ArithOp::Shr => shift_right(to_integer(a)?, to_integer(b)?) as f64,
    };
    Some(r)
}

/// Modulo whose result takes the sign of the divisor.
pub fn lua_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r > 0.0) != (b > 0.0)) {
        r + b
    } else {
        r
    }
}

/// Logical left shift; negative counts shift right.
pub fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n < 0 {
        ((a as u64) >> (-n) as u32) as i64
    } else {
        ((a as u64) << n as u32) as i64
    }
}

/// Logical right shift; negative counts shift left.
pub fn shift_right(a: i64, n: i64) -> i64 {
    if n == i64::MIN {
        return 0;
    }
    shift_left(a, -n)
}

/// Format a number the way `tostring` does.
pub fn fmt_number(x: f64) -> String {
    if x.is_nan() {
        return if x.is_sign_negative() { "-nan".into() } else { "nan".into() };
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if is_integer(x) && x.abs() < TWO_POW_63 {
        if x == 0.0 && x.is_sign_negative() {
            return "-0".into();
        }
        return format!("{}", x as i64);
    }
    format_g(x, 14, false)
}

/// C `%.<precision>g` formatting. `alt` keeps trailing zeros (the `#` flag).
pub fn format_g(x: f64, precision: usize, alt: bool) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let p = precision.max(1);
    if x == 0.0 {
        let mut s = String::from(if x.is_sign_negative() { "-0" } else { "0" });
        if alt && p > 1 {
            s.push('.');
            s.push_str(&"0".repeat(p - 1));
        }
        return s;
    }
    let sci = format!("{:.*e}", p - 1, x);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= p as i32 {
        let m = if alt { mantissa.to_string() } else { strip_zeros(mantissa) };
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{m}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, x);
        if alt {
            fixed
        } else {
            strip_zeros(&fixed)
        }
    }
}

fn strip_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let t = s.trim_end_matches('0');
    t.trim_end_matches('.').to_string()
}

/// Parse a numeral as the language reads it: decimal or hexadecimal, with
/// optional fraction and exponent, surrounded by optional whitespace.
pub fn str_to_number(s: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(s).ok()?;
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    let (neg, body) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let v = if body.len() > 1 && (body.starts_with("0x") || body.starts_with("0X")) {
        parse_hex(&body[2..])?
    } else {
        parse_decimal(body)?
    };
    Some(if neg { -v } else { v })
}

fn parse_decimal(s: &str) -> Option<f64> {
    let b = s.as_bytes();
    let mut i = 0;
    let mut digits = 0;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < b.len() && b[i] == b'.' {
        i += 1;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        let start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return None;
        }
    }
    if i != b.len() {
        return None;
    }
    s.parse::<f64>().ok()
}

fn parse_hex(s: &str) -> Option<f64> {
    let b = s.as_bytes();
    let mut i = 0;
    let mut mantissa = 0.0f64;
    let mut wrapped: u64 = 0;
    let mut exp: i32 = 0;
    let mut any = false;
    let mut is_float = false;
    while i < b.len() && b[i].is_ascii_hexdigit() {
        let d = (b[i] as char).to_digit(16)?;
        mantissa = mantissa * 16.0 + d as f64;
        wrapped = wrapped.wrapping_mul(16).wrapping_add(d as u64);
        any = true;
        i += 1;
    }
    if i < b.len() && b[i] == b'.' {
        is_float = true;
        i += 1;
        while i < b.len() && b[i].is_ascii_hexdigit() {
            let d = (b[i] as char).to_digit(16)?;
            mantissa = mantissa * 16.0 + d as f64;
            exp -= 4;
            any = true;
            i += 1;
        }
    }
    if !any {
        return None;
    }
    if i < b.len() && (b[i] == b'p' || b[i] == b'P') {
        is_float = true;
        i += 1;
        let mut neg = false;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            neg = b[i] == b'-';
            i += 1;
        }
        let start = i;
        let mut e: i32 = 0;
        while i < b.len() && b[i].is_ascii_digit() {
            e = e.saturating_mul(10).saturating_add((b[i] - b'0') as i32);
            i += 1;
        }
        if i == start {
            return None;
        }
        exp = exp.saturating_add(if neg { -e } else { e });
    }
    if i != b.len() {
        return None;
    }
    if is_float {
        Some(mantissa * 2f64.powi(exp))
    } else {
        // Integer hex numerals wrap around modulo 2^64.
        Some(wrapped as i64 as f64)
    }
}
