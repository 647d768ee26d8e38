//! String library. Strings are byte strings; `upper`/`lower` only touch
//! ASCII letters.

use moonlet_core::api::CallContext;
use moonlet_core::error::LuaError;
use moonlet_core::number;
use moonlet_core::string::LuaString;
use moonlet_core::table::{Table, TableRef};
use moonlet_core::value::Value;

use crate::register_lib;

/// Largest string `rep` will build.
const MAX_STRING_SIZE: usize = 1 << 31;

/// Register the library and return the metatable shared by every string.
pub fn register(globals: &TableRef) -> TableRef {
    let lib = register_lib(
        globals,
        "string",
        &[
            ("len", string_len),
            ("sub", string_sub),
            ("upper", string_upper),
            ("lower", string_lower),
            ("rep", string_rep),
            ("reverse", string_reverse),
            ("byte", string_byte),
            ("char", string_char),
            ("format", string_format),
            ("dump", string_dump),
        ],
    );
    let mt = Table::new_ref();
    mt.borrow_mut().set_field("__index", Value::Table(lib));
    mt
}

/// Resolve a possibly negative 1-based position against a length.
fn pos_relative(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if pos.unsigned_abs() as usize > len {
        0
    } else {
        len as i64 + pos + 1
    }
}

/// Clamp `[i, j]` (after [`pos_relative`]) to a byte range of `len`.
fn byte_range(i: i64, j: i64, len: usize) -> Option<std::ops::Range<usize>> {
    let i = pos_relative(i, len).max(1);
    let j = pos_relative(j, len).min(len as i64);
    (i <= j).then(|| (i - 1) as usize..j as usize)
}

fn string_len(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let s = ctx.expect_string(1)?;
    Ok(ctx.return_one(s.len()))
}

fn string_sub(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let s = ctx.expect_string(1)?;
    let i = ctx.opt_integer(2, 1)?;
    let j = ctx.opt_integer(3, -1)?;
    let sub = match byte_range(i, j, s.len()) {
        Some(r) => LuaString::from(&s.as_bytes()[r]),
        None => LuaString::from(""),
    };
    Ok(ctx.return_one(sub))
}

fn string_upper(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let s = ctx.expect_string(1)?;
    Ok(ctx.return_one(LuaString::from(s.as_bytes().to_ascii_uppercase())))
}

fn string_lower(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let s = ctx.expect_string(1)?;
    Ok(ctx.return_one(LuaString::from(s.as_bytes().to_ascii_lowercase())))
}

/// string.rep(s, n [, sep])
fn string_rep(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let s = ctx.expect_string(1)?;
    let n = ctx.expect_integer(2)?;
    let sep = match ctx.arg(3) {
        Value::Nil => LuaString::from(""),
        _ => ctx.expect_string(3)?,
    };
    if n <= 0 {
        return Ok(ctx.return_one(""));
    }
    let n = n as usize;
    let total = (s.len() + sep.len()).checked_mul(n);
    if total.map_or(true, |t| t >= MAX_STRING_SIZE) {
        return Err(ctx.error("resulting string too large"));
    }
    let mut out = Vec::with_capacity(total.unwrap_or(0));
    for k in 0..n {
        if k > 0 {
            out.extend_from_slice(sep.as_bytes());
        }
        out.extend_from_slice(s.as_bytes());
    }
    Ok(ctx.return_one(LuaString::from(out)))
}

fn string_reverse(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let s = ctx.expect_string(1)?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    Ok(ctx.return_one(LuaString::from(bytes)))
}

/// string.byte(s [, i [, j]])
fn string_byte(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let s = ctx.expect_string(1)?;
    let i = ctx.opt_integer(2, 1)?;
    let j = ctx.opt_integer(3, i)?;
    let values: Vec<Value> = match byte_range(i, j, s.len()) {
        Some(r) => s.as_bytes()[r].iter().map(|&b| Value::from(b as f64)).collect(),
        None => Vec::new(),
    };
    Ok(ctx.returns(values))
}

fn string_char(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let mut out = Vec::with_capacity(ctx.arg_count());
    for i in 1..=ctx.arg_count() {
        let c = ctx.expect_integer(i)?;
        let b = u8::try_from(c).map_err(|_| ctx.arg_error(i, "value out of range"))?;
        out.push(b);
    }
    Ok(ctx.return_one(LuaString::from(out)))
}

/// string.dump(f [, strip])
fn string_dump(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let f = ctx.expect_function(1)?;
    let strip = ctx.arg(2).is_truthy();
    match ctx.rt.dump(&f, strip) {
        Some(bytes) => Ok(ctx.return_one(LuaString::from(bytes))),
        None => Err(ctx.error("unable to dump given function")),
    }
}

// ---- format ----

/// One parsed `%` directive.
#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    conv: u8,
}

/// Parse the directive after a `%` starting at `fmt[*i]`, advancing `i` past it.
fn parse_spec(fmt: &[u8], i: &mut usize) -> Result<FormatSpec, String> {
    let mut spec = FormatSpec::default();
    while let Some(&c) = fmt.get(*i) {
        match c {
            b'-' => spec.left = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'0' => spec.zero = true,
            b'#' => spec.alt = true,
            _ => break,
        }
        *i += 1;
    }
    let digits = |i: &mut usize| {
        let start = *i;
        while fmt.get(*i).is_some_and(u8::is_ascii_digit) {
            *i += 1;
        }
        let text = std::str::from_utf8(&fmt[start..*i]).unwrap_or("");
        (*i - start, text.parse::<usize>().unwrap_or(0))
    };
    let (nwidth, width) = digits(i);
    spec.width = width;
    if fmt.get(*i) == Some(&b'.') {
        *i += 1;
        let (nprec, prec) = digits(i);
        if nprec > 2 {
            return Err("invalid format (width or precision too long)".into());
        }
        spec.precision = Some(prec);
    }
    if nwidth > 2 {
        return Err("invalid format (width or precision too long)".into());
    }
    let Some(&conv) = fmt.get(*i) else {
        return Err("invalid conversion '%' to 'format'".into());
    };
    *i += 1;
    spec.conv = conv;
    Ok(spec)
}

impl FormatSpec {
    /// Sign prefix for a non-negative number.
    fn positive_sign(&self) -> &'static str {
        if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }

    /// Pad a numeric `body` to the field width. Zero padding goes after any sign.
    fn pad(&self, body: String) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        if self.left {
            body + &" ".repeat(fill)
        } else if self.zero {
            let split = if body.starts_with(['-', '+', ' ']) { 1 } else { 0 };
            let (sign, digits) = body.split_at(split);
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            " ".repeat(fill) + &body
        }
    }
}

/// Space-pad raw bytes to the field width.
fn pad_bytes(spec: &FormatSpec, bytes: &[u8], out: &mut Vec<u8>) {
    let fill = spec.width.saturating_sub(bytes.len());
    if !spec.left {
        out.resize(out.len() + fill, b' ');
    }
    out.extend_from_slice(bytes);
    if spec.left {
        out.resize(out.len() + fill, b' ');
    }
}

/// C-style `%e`: mantissa with `prec` decimals and a signed two-digit exponent.
fn format_exp(x: f64, prec: usize, upper: bool) -> String {
    if !x.is_finite() {
        return number::fmt_number(x);
    }
    let s = format!("{:.*e}", prec, x);
    let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let out = format!("{mantissa}e{sign}{:02}", exp.abs());
    if upper {
        out.to_uppercase()
    } else {
        out
    }
}

fn format_float(spec: &FormatSpec, x: f64) -> String {
    let prec = spec.precision.unwrap_or(6);
    let body = match spec.conv {
        b'f' | b'F' if x.is_finite() => format!("{:.*}", prec, x),
        b'e' | b'E' => format_exp(x, prec, spec.conv == b'E'),
        b'g' | b'G' => {
            let g = number::format_g(x, if prec == 0 { 1 } else { prec }, spec.alt);
            if spec.conv == b'G' {
                g.to_uppercase()
            } else {
                g
            }
        }
        _ => number::fmt_number(x),
    };
    if x >= 0.0 && !body.starts_with('-') {
        format!("{}{body}", spec.positive_sign())
    } else {
        body
    }
}

fn format_int(spec: &FormatSpec, n: i64) -> String {
    let digits = match spec.conv {
        b'x' => format!("{:x}", n as u64),
        b'X' => format!("{:X}", n as u64),
        b'o' => format!("{:o}", n as u64),
        _ => n.unsigned_abs().to_string(),
    };
    let digits = match spec.precision {
        Some(p) if digits.len() < p => "0".repeat(p - digits.len()) + &digits,
        _ => digits,
    };
    let prefix = match spec.conv {
        b'x' if spec.alt && n != 0 => "0x",
        b'X' if spec.alt && n != 0 => "0X",
        b'd' | b'i' if n < 0 => "-",
        b'd' | b'i' => spec.positive_sign(),
        _ => "",
    };
    format!("{prefix}{digits}")
}

/// `%q`: a string literal that reads back as the same bytes.
fn quote_string(s: &[u8], out: &mut Vec<u8>) {
    out.push(b'"');
    for (k, &b) in s.iter().enumerate() {
        match b {
            // A newline stays a real newline behind a backslash.
            b'"' | b'\\' | b'\n' => out.extend_from_slice(&[b'\\', b]),
            b if b.is_ascii_control() => {
                let next_digit = s.get(k + 1).is_some_and(u8::is_ascii_digit);
                let esc = if next_digit { format!("\\{b:03}") } else { format!("\\{b}") };
                out.extend_from_slice(esc.as_bytes());
            }
            b => out.push(b),
        }
    }
    out.push(b'"');
}

fn string_format(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let fmt = ctx.expect_string(1)?;
    let fmt = fmt.as_bytes();
    let mut out = Vec::with_capacity(fmt.len());
    let mut argi = 1;
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        let spec = parse_spec(fmt, &mut i).map_err(|msg| ctx.error(msg))?;
        argi += 1;
        if argi > ctx.arg_count() {
            return Err(ctx.arg_error(argi, "no value"));
        }
        match spec.conv {
            b'd' | b'i' | b'x' | b'X' | b'o' => {
                let n = ctx.expect_integer(argi)?;
                out.extend_from_slice(spec.pad(format_int(&spec, n)).as_bytes());
            }
            b'c' => {
                let n = ctx.expect_integer(argi)?;
                pad_bytes(&spec, &[n as u8], &mut out);
            }
            b'e' | b'E' | b'f' | b'F' | b'g' | b'G' => {
                let x = ctx.expect_number(argi)?;
                out.extend_from_slice(spec.pad(format_float(&spec, x)).as_bytes());
            }
            b's' => {
                let v = ctx.arg(argi);
                let s = ctx.tostring(&v)?;
                let bytes = match spec.precision {
                    Some(p) if p < s.len() => &s.as_bytes()[..p],
                    _ => s.as_bytes(),
                };
                pad_bytes(&spec, bytes, &mut out);
            }
            b'q' => match ctx.arg(argi) {
                Value::String(s) => quote_string(s.as_bytes(), &mut out),
                Value::Number(x) => out.extend_from_slice(number::fmt_number(x).as_bytes()),
                v @ (Value::Nil | Value::Boolean(_)) => out.extend_from_slice(v.to_display_string().as_bytes()),
                _ => return Err(ctx.arg_error(argi, "value has no literal form")),
            },
            other => {
                let msg = format!("invalid conversion '%{}' to 'format'", other as char);
                return Err(ctx.error(msg));
            }
        }
    }
    Ok(ctx.return_one(LuaString::from(out)))
}
