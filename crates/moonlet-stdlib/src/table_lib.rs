//! Table library.

use std::cell::RefCell;
use std::rc::Rc;

use moonlet_core::api::CallContext;
use moonlet_core::error::LuaError;
use moonlet_core::table::{Table, TableRef};
use moonlet_core::value::Value;

use crate::register_lib;

/// Largest number of values `unpack` will push.
const MAX_UNPACK: i64 = 1_000_000;

pub fn register(globals: &TableRef) {
    register_lib(
        globals,
        "table",
        &[
            ("insert", table_insert),
            ("remove", table_remove),
            ("concat", table_concat),
            ("pack", table_pack),
            ("unpack", table_unpack),
            ("sort", table_sort),
        ],
    );
}

/// table.insert(t, [pos,] value)
fn table_insert(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let n = t.borrow().len();
    match ctx.arg_count() {
        2 => {
            let v = ctx.arg(2);
            t.borrow_mut().insert(n + 1, v);
        }
        3 => {
            let pos = ctx.expect_integer(2)?;
            if pos < 1 || pos > n as i64 + 1 {
                return Err(ctx.arg_error(2, "position out of bounds"));
            }
            let v = ctx.arg(3);
            t.borrow_mut().insert(pos as usize, v);
        }
        _ => return Err(ctx.error("wrong number of arguments to 'insert'")),
    }
    Ok(0)
}

/// table.remove(t [, pos])
fn table_remove(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let n = t.borrow().len() as i64;
    let pos = ctx.opt_integer(2, n)?;
    if ctx.arg_count() >= 2 && pos != n && (pos < 1 || pos > n + 1) {
        return Err(ctx.arg_error(2, "position out of bounds"));
    }
    if pos < 0 {
        return Ok(ctx.return_one(Value::Nil));
    }
    let v = t.borrow_mut().remove(pos as usize);
    Ok(ctx.return_one(v))
}

/// table.concat(t [, sep [, i [, j]]])
fn table_concat(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let sep = match ctx.arg(2) {
        Value::Nil => Vec::new(),
        _ => ctx.expect_string(2)?.as_bytes().to_vec(),
    };
    let i = ctx.opt_integer(3, 1)?;
    let j = match ctx.arg(4) {
        Value::Nil => t.borrow().len() as i64,
        _ => ctx.expect_integer(4)?,
    };
    let mut out = Vec::new();
    let tb = t.borrow();
    let mut k = i;
    while k <= j {
        match tb.get_int(k).to_lua_string() {
            Some(s) => out.extend_from_slice(s.as_bytes()),
            None => {
                let msg = format!("invalid value (at index {k}) in table for 'concat'");
                return Err(ctx.error(msg));
            }
        }
        if k < j {
            out.extend_from_slice(&sep);
        }
        k += 1;
    }
    drop(tb);
    Ok(ctx.return_one(Value::String(out.into())))
}

/// table.pack(...)
fn table_pack(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let n = ctx.arg_count();
    let mut t = Table::with_capacity(n);
    for (i, v) in ctx.args_from(1).into_iter().enumerate() {
        t.set_int(i as i64 + 1, v);
    }
    t.set_field("n", Value::from(n));
    Ok(ctx.return_one(Value::Table(Rc::new(RefCell::new(t)))))
}

/// table.unpack(t [, i [, j]]), also exposed as the global `unpack`.
pub fn table_unpack(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let i = ctx.opt_integer(2, 1)?;
    let j = match ctx.arg(3) {
        Value::Nil => t.borrow().len() as i64,
        _ => ctx.expect_integer(3)?,
    };
    if i > j {
        return Ok(0);
    }
    if j.saturating_sub(i) >= MAX_UNPACK {
        return Err(ctx.error("too many results to unpack"));
    }
    let values: Vec<Value> = {
        let tb = t.borrow();
        (i..=j).map(|k| tb.get_int(k)).collect()
    };
    Ok(ctx.returns(values))
}

/// Stable merge sort driven by a fallible `less` predicate, so comparator
/// errors abort the sort instead of being swallowed.
fn merge_sort<F>(items: &mut Vec<Value>, less: &mut F) -> Result<(), LuaError>
where
    F: FnMut(&Value, &Value) -> Result<bool, LuaError>,
{
    let n = items.len();
    if n < 2 {
        return Ok(());
    }
    if n <= 8 {
        for i in 1..n {
            let mut j = i;
            while j > 0 && less(&items[j], &items[j - 1])? {
                items.swap(j, j - 1);
                j -= 1;
            }
        }
        return Ok(());
    }
    let mut right = items.split_off(n / 2);
    merge_sort(items, less)?;
    merge_sort(&mut right, less)?;
    let left = std::mem::take(items);
    let mut merged = Vec::with_capacity(n);
    let (mut l, mut r) = (left.into_iter().peekable(), right.into_iter().peekable());
    while let (Some(a), Some(b)) = (l.peek(), r.peek()) {
        // Take from the right only when strictly smaller, keeping equal items in order.
        let next = if less(b, a)? { r.next() } else { l.next() };
        merged.extend(next);
    }
    merged.extend(l);
    merged.extend(r);
    *items = merged;
    Ok(())
}

/// table.sort(t [, comp])
fn table_sort(ctx: &mut CallContext<'_>) -> Result<usize, LuaError> {
    let t = ctx.expect_table(1)?;
    let comp = match ctx.arg(2) {
        Value::Nil => None,
        _ => Some(ctx.expect_function(2)?),
    };
    let mut items: Vec<Value> = {
        let tb = t.borrow();
        (1..=tb.len() as i64).map(|k| tb.get_int(k)).collect()
    };
    let mut less = |a: &Value, b: &Value| -> Result<bool, LuaError> {
        match &comp {
            Some(f) => {
                let r = ctx.call(f.clone(), vec![a.clone(), b.clone()])?;
                Ok(r.first().is_some_and(Value::is_truthy))
            }
            None => ctx.less_than(a, b),
        }
    };
    merge_sort(&mut items, &mut less)?;
    let mut tb = t.borrow_mut();
    for (k, v) in items.into_iter().enumerate() {
        tb.set_int(k as i64 + 1, v);
    }
    Ok(0)
}
