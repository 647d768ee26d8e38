//! Base library: the global functions.

use std::io::Write;

use moonlet_core::api::CallContext;
use moonlet_core::error::LuaError;
use moonlet_core::number;
use moonlet_core::string::LuaString;
use moonlet_core::table::TableRef;
use moonlet_core::value::Value;

use crate::{native, register_fn, table_lib, VERSION};

pub fn register(globals: &TableRef) {
    register_fn(globals, "print", base_print);
    register_fn(globals, "type", base_type);
    register_fn(globals, "tostring", base_tostring);
    register_fn(globals, "tonumber", base_tonumber);
    register_fn(globals, "pairs", base_pairs);
    register_fn(globals, "ipairs", base_ipairs);
    register_fn(globals, "next", base_next);
    register_fn(globals, "select", base_select);
    register_fn(globals, "rawget", base_rawget);
    register_fn(globals, "rawset", base_rawset);
    register_fn(globals, "rawequal", base_rawequal);
    register_fn(globals, "rawlen", base_rawlen);
    register_fn(globals, "setmetatable", base_setmetatable);
    register_fn(globals, "getmetatable", base_getmetatable);
    register_fn(globals, "assert", base_assert);
    register_fn(globals, "error", base_error);
    register_fn(globals, "pcall", base_pcall);
    register_fn(globals, "xpcall", base_xpcall);
    register_fn(globals, "load", base_load);
    register_fn(globals, "unpack", table_lib::table_unpack);

    let mut g = globals.borrow_mut();
    g.set_field("_G", Value::Table(globals.clone()));
    g.set_field("_VERSION", Value::from(VERSION));
}

fn base_print(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let mut line = Vec::new();
    for i in 1..=ctx.arg_count() {
        if i > 1 {
            line.push(b'\t');
        }
        let v = ctx.arg(i);
        let s = ctx.tostring(&v)?;
        line.extend_from_slice(s.as_bytes());
    }
    line.push(b'\n');
    let mut out = std::io::stdout().lock();
    out.write_all(&line)
        .and_then(|_| out.flush())
        .map_err(|e| ctx.error(format!("print: {e}")))?;
    Ok(0)
}

fn base_type(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let v = ctx.check_any(1)?;
    Ok(ctx.return_one(v.type_name()))
}

fn base_tostring(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let v = ctx.check_any(1)?;
    let s = ctx.tostring(&v)?;
    Ok(ctx.return_one(s))
}

/// Parse an integer numeral in `base` (2..=36), surrounding whitespace allowed.
fn parse_in_base(s: &[u8], base: u32) -> Option<f64> {
    let s = std::str::from_utf8(s).ok()?.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: f64 = 0.0;
    for c in digits.chars() {
        let d = c.to_digit(base)?;
        n = n * base as f64 + d as f64;
    }
    Some(if neg { -n } else { n })
}

fn base_tonumber(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    if ctx.arg(2).is_nil() {
        let v = ctx.check_any(1)?;
        let n = match &v {
            Value::Number(_) => v.clone(),
            Value::String(s) => number::str_to_number(s.as_bytes()).map_or(Value::Nil, Value::Number),
            _ => Value::Nil,
        };
        return Ok(ctx.return_one(n));
    }
    let base = ctx.expect_integer(2)?;
    if !(2..=36).contains(&base) {
        return Err(ctx.arg_error(2, "base out of range"));
    }
    let Value::String(s) = ctx.arg(1) else {
        return Err(ctx.arg_error(1, format!("string expected, got {}", ctx.arg(1).type_name())));
    };
    let n = parse_in_base(s.as_bytes(), base as u32).map_or(Value::Nil, Value::Number);
    Ok(ctx.return_one(n))
}

fn base_next(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let entry = t.borrow().next(&ctx.arg(2));
    match entry {
        Ok(Some((k, v))) => Ok(ctx.returns([k, v])),
        Ok(None) => Ok(ctx.return_one(Value::Nil)),
        Err(msg) => Err(ctx.error(msg)),
    }
}

fn base_pairs(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let v = ctx.check_any(1)?;
    if let Some(mt) = ctx.rt.metatable_of(&v) {
        let mm = mt.borrow().get_field("__pairs");
        if !mm.is_nil() {
            let mut results = ctx.call(mm, vec![v])?;
            results.resize(3, Value::Nil);
            return Ok(ctx.returns(results));
        }
    }
    let t = ctx.expect_table(1)?;
    Ok(ctx.returns([native("next", base_next), Value::Table(t), Value::Nil]))
}

fn ipairs_step(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.arg(1);
    let i = ctx.expect_integer(2)? + 1;
    let v = ctx.index(&t, &Value::from(i))?;
    if v.is_nil() {
        Ok(ctx.return_one(Value::Nil))
    } else {
        Ok(ctx.returns([Value::from(i), v]))
    }
}

fn base_ipairs(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.check_any(1)?;
    Ok(ctx.returns([native("ipairs_step", ipairs_step), t, Value::from(0.0)]))
}

fn base_select(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let n = ctx.arg_count() as i64;
    if let Value::String(s) = ctx.arg(1) {
        if s.as_bytes() == b"#" {
            return Ok(ctx.return_one(Value::from(n - 1)));
        }
    }
    let i = ctx.expect_integer(1)?;
    let start = if i < 0 {
        n + i
    } else if i == 0 {
        return Err(ctx.arg_error(1, "index out of range"));
    } else {
        i.min(n)
    };
    if start < 1 {
        return Err(ctx.arg_error(1, "index out of range"));
    }
    let rest = ctx.args_from(start as usize + 1);
    Ok(ctx.returns(rest))
}

fn base_rawget(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let k = ctx.check_any(2)?;
    let v = t.borrow().get(&k);
    Ok(ctx.return_one(v))
}

fn base_rawset(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let k = ctx.check_any(2)?;
    let v = ctx.check_any(3)?;
    t.borrow_mut().set(k, v).map_err(|msg| ctx.error(msg))?;
    Ok(ctx.return_one(Value::Table(t)))
}

fn base_rawequal(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let a = ctx.check_any(1)?;
    let b = ctx.check_any(2)?;
    Ok(ctx.return_one(a == b))
}

fn base_rawlen(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let n = match ctx.arg(1) {
        Value::Table(t) => t.borrow().len(),
        Value::String(s) => s.len(),
        _ => return Err(ctx.arg_error(1, "table or string expected")),
    };
    Ok(ctx.return_one(n))
}

fn base_setmetatable(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let mt = match ctx.arg(2) {
        Value::Nil => None,
        Value::Table(mt) => Some(mt),
        other => {
            return Err(ctx.arg_error(2, format!("nil or table expected, got {}", other.type_name())));
        }
    };
    let protected = t
        .borrow()
        .metatable
        .as_ref()
        .is_some_and(|old| !old.borrow().get_field("__metatable").is_nil());
    if protected {
        return Err(ctx.error("cannot change a protected metatable"));
    }
    t.borrow_mut().metatable = mt;
    Ok(ctx.return_one(Value::Table(t)))
}

fn base_getmetatable(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let v = ctx.check_any(1)?;
    let result = match ctx.rt.metatable_of(&v) {
        Some(mt) => {
            let guard = mt.borrow().get_field("__metatable");
            if guard.is_nil() {
                Value::Table(mt)
            } else {
                guard
            }
        }
        None => Value::Nil,
    };
    Ok(ctx.return_one(result))
}

fn base_assert(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let v = ctx.check_any(1)?;
    if v.is_truthy() {
        return Ok(ctx.arg_count());
    }
    if ctx.arg_count() >= 2 {
        return Err(LuaError::Runtime(ctx.arg(2)));
    }
    Err(ctx.error("assertion failed!"))
}

fn base_error(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let msg = ctx.arg(1);
    let level = ctx.opt_integer(2, 1)?;
    if let (Value::String(s), true) = (&msg, level > 0) {
        let loc = ctx.thread.location(level as usize);
        if !loc.is_empty() {
            let text = LuaString::from(format!("{loc} {}", s.to_str_lossy()));
            return Err(LuaError::Runtime(Value::String(text)));
        }
    }
    Err(LuaError::Runtime(msg))
}

// `pcall` and `xpcall` are recognised by the interpreter's call protocol,
// which runs the callee in the caller's loop so it can yield. These bodies
// only run if something bypasses that protocol.
fn base_pcall(_ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    Err(LuaError::Bytecode("pcall must be dispatched by the interpreter".into()))
}

fn base_xpcall(_ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    Err(LuaError::Bytecode("xpcall must be dispatched by the interpreter".into()))
}

/// Concatenate the pieces returned by a reader function until it returns
/// nil or an empty string.
fn read_pieces(ctx: &mut CallContext<'_>, reader: Value) -> Result<Vec<u8>, LuaError> {
    let mut chunk = Vec::new();
    loop {
        let piece = ctx.call(reader.clone(), Vec::new())?.into_iter().next().unwrap_or_default();
        match piece {
            Value::Nil => break,
            Value::String(s) if s.is_empty() => break,
            Value::String(s) => chunk.extend_from_slice(s.as_bytes()),
            _ => return Err(ctx.error("reader function must return a string")),
        }
    }
    Ok(chunk)
}

fn base_load(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let (chunk, default_name) = match ctx.arg(1) {
        Value::String(s) => (s.as_bytes().to_vec(), s.to_str_lossy().into_owned()),
        f if f.is_function() => (read_pieces(ctx, f)?, "=(load)".to_string()),
        other => {
            return Err(ctx.arg_error(1, format!("string expected, got {}", other.type_name())));
        }
    };
    let chunkname = match ctx.arg(2) {
        Value::Nil => default_name,
        _ => ctx.expect_string(2)?.to_str_lossy().into_owned(),
    };
    let mode = match ctx.arg(3) {
        Value::Nil => "bt".to_string(),
        _ => ctx.expect_string(3)?.to_str_lossy().into_owned(),
    };
    let binary = chunk.first() == Some(&0x1b);
    let (kind, allowed) = if binary { ("binary", 'b') } else { ("text", 't') };
    if !mode.contains(allowed) {
        let msg = format!("attempt to load a {kind} chunk (mode is '{mode}')");
        return Ok(ctx.returns([Value::Nil, Value::from(msg)]));
    }
    let env = (ctx.arg_count() >= 4).then(|| ctx.arg(4));
    match ctx.rt.load(&chunk, &chunkname, env) {
        Ok(f) => Ok(ctx.return_one(f)),
        Err(msg) => Ok(ctx.returns([Value::Nil, Value::from(msg)])),
    }
}
