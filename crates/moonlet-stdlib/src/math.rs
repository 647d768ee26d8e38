//! Math library. All numbers are doubles; "integer" means a double with an
//! integral value in `i64` range.

use std::cell::Cell;

use moonlet_core::api::CallContext;
use moonlet_core::error::LuaError;
use moonlet_core::number;
use moonlet_core::table::TableRef;
use moonlet_core::value::Value;

use crate::register_lib;

/// Largest integer a double holds exactly on both sides of the conversion.
const MAX_INTEGER: f64 = 9_007_199_254_740_991.0;

thread_local! {
    static RNG_STATE: Cell<u64> = const { Cell::new(0x1234_5678_9abc_def0) };
}

/// SplitMix64 step.
fn prng_next() -> u64 {
    RNG_STATE.with(|state| {
        let s = state.get().wrapping_add(0x9e37_79b9_7f4a_7c15);
        state.set(s);
        let mut z = s;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    })
}

pub fn register(globals: &TableRef) {
    let lib = register_lib(
        globals,
        "math",
        &[
            ("floor", math_floor),
            ("ceil", math_ceil),
            ("abs", math_abs),
            ("sqrt", math_sqrt),
            ("sin", math_sin),
            ("cos", math_cos),
            ("tan", math_tan),
            ("exp", math_exp),
            ("log", math_log),
            ("fmod", math_fmod),
            ("modf", math_modf),
            ("max", math_max),
            ("min", math_min),
            ("tointeger", math_tointeger),
            ("type", math_type),
            ("random", math_random),
            ("randomseed", math_randomseed),
        ],
    );
    let mut lib = lib.borrow_mut();
    lib.set_field("pi", Value::from(std::f64::consts::PI));
    lib.set_field("huge", Value::from(f64::INFINITY));
    lib.set_field("maxinteger", Value::from(MAX_INTEGER));
    lib.set_field("mininteger", Value::from(-MAX_INTEGER));
}

macro_rules! unary_math {
    ($name:ident, $f:expr) => {
        fn $name(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
            let x = ctx.expect_number(1)?;
            let f: fn(f64) -> f64 = $f;
            Ok(ctx.return_one(f(x)))
        }
    };
}

unary_math!(math_floor, f64::floor);
unary_math!(math_ceil, f64::ceil);
unary_math!(math_abs, f64::abs);
unary_math!(math_sqrt, f64::sqrt);
unary_math!(math_sin, f64::sin);
unary_math!(math_cos, f64::cos);
unary_math!(math_tan, f64::tan);
unary_math!(math_exp, f64::exp);

fn math_log(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let x = ctx.expect_number(1)?;
    let r = match ctx.arg(2) {
        Value::Nil => x.ln(),
        _ => match ctx.expect_number(2)? {
            b if b == 2.0 => x.log2(),
            b if b == 10.0 => x.log10(),
            b => x.ln() / b.ln(),
        },
    };
    Ok(ctx.return_one(r))
}

fn math_fmod(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let x = ctx.expect_number(1)?;
    let y = ctx.expect_number(2)?;
    if y == 0.0 && number::is_integer(x) {
        return Err(ctx.arg_error(2, "zero"));
    }
    // Truncated remainder: the sign follows the dividend.
    Ok(ctx.return_one(x % y))
}

fn math_modf(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let x = ctx.expect_number(1)?;
    let int_part = if x.is_infinite() { x } else { x.trunc() };
    let frac = if x.is_infinite() { 0.0 } else { x - int_part };
    Ok(ctx.returns([Value::from(int_part), Value::from(frac)]))
}

fn pick(ctx: &mut CallContext<'_>, better: fn(f64, f64) -> bool) -> Result<usize, LuaError> {
    let mut best = ctx.expect_number(1)?;
    for i in 2..=ctx.arg_count() {
        let x = ctx.expect_number(i)?;
        if better(x, best) {
            best = x;
        }
    }
    Ok(ctx.return_one(best))
}

fn math_max(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    pick(ctx, |x, best| x > best)
}

fn math_min(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    pick(ctx, |x, best| x < best)
}

fn math_tointeger(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let r = match ctx.arg(1) {
        Value::Number(x) if number::to_integer(x).is_some() => Value::Number(x),
        _ => Value::Nil,
    };
    Ok(ctx.return_one(r))
}

fn math_type(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let v = ctx.check_any(1)?;
    let r = match v {
        Value::Number(x) if number::is_integer(x) => Value::from("integer"),
        Value::Number(_) => Value::from("float"),
        _ => Value::Nil,
    };
    Ok(ctx.return_one(r))
}

/// math.random([m [, n]])
fn math_random(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let r = (prng_next() >> 11) as f64 / (1u64 << 53) as f64;
    let (lo, hi) = match ctx.arg_count() {
        0 => return Ok(ctx.return_one(r)),
        1 => (1, ctx.expect_integer(1)?),
        2 => (ctx.expect_integer(1)?, ctx.expect_integer(2)?),
        _ => return Err(ctx.error("wrong number of arguments")),
    };
    if lo > hi {
        let i = if ctx.arg_count() == 1 { 1 } else { 2 };
        return Err(ctx.arg_error(i, "interval is empty"));
    }
    let span = (hi - lo) as f64 + 1.0;
    Ok(ctx.return_one((r * span).floor() + lo as f64))
}

fn math_randomseed(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let seed = ctx.expect_number(1)?;
    RNG_STATE.with(|state| state.set(seed.to_bits()));
    Ok(0)
}
