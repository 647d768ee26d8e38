//! Tables: an array part for keys `1..n` plus an ordered tree for everything else.
//!
//! The array part is always the maximal gap-free prefix of positive integer
//! keys, so `#t` is simply its length. Every other key lives in an LLRB tree
//! ordered by key hash; positive integral numbers hash to their own value so
//! they sort numerically ahead of all other keys, which keeps stateless `next`
//! correct even when the array part is truncated during a traversal.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::llrb::LlrbMap;
use crate::string::LuaString;
use crate::value::Value;

/// Shared, mutable table handle.
pub type TableRef = Rc<RefCell<Table>>;

/// Largest integer that is represented exactly and hashes to itself.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;
const MIXED: u64 = 1 << 63;

/// A key in the map part of a table.
#[derive(Clone)]
pub struct TableKey {
    hash: u64,
    value: Value,
}

impl TableKey {
    /// Build a key. The caller has already rejected nil and NaN.
    fn new(value: Value) -> Self {
        let value = match value {
            Value::Number(n) if n == 0.0 => Value::Number(0.0),
            v => v,
        };
        TableKey {
            hash: key_hash(&value),
            value,
        }
    }

    fn int(i: usize) -> Self {
        TableKey::new(Value::Number(i as f64))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn key_hash(v: &Value) -> u64 {
    match v {
        Value::Number(n) if *n >= 1.0 && *n <= MAX_SAFE_INTEGER && n.fract() == 0.0 => *n as u64,
        Value::Number(n) => splitmix64(n.to_bits()) | MIXED,
        Value::String(s) => splitmix64(u64::from(s.hash_code()) ^ 0x5354_5200) | MIXED,
        Value::Boolean(b) => splitmix64(u64::from(*b) ^ 0x424f_4f4c) | MIXED,
        other => splitmix64(other.ptr_addr().unwrap_or(0) as u64) | MIXED,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Nil => 0,
        Value::Boolean(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Table(_) => 4,
        Value::Closure(_) => 5,
        Value::Native(_) => 6,
        Value::Thread(_) => 7,
        Value::Userdata(_) => 8,
    }
}

impl Ord for TableKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| type_rank(&self.value).cmp(&type_rank(&other.value)))
            .then_with(|| match (&self.value, &other.value) {
                (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
                (Value::String(a), Value::String(b)) => a.cmp(b),
                (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
                (a, b) => a.ptr_addr().cmp(&b.ptr_addr()),
            })
    }
}

impl PartialOrd for TableKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TableKey {}

/// Array index for a number key, if it is a positive integer.
fn as_index(n: f64) -> Option<usize> {
    if n >= 1.0 && n <= MAX_SAFE_INTEGER && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

/// A table: array part plus ordered map.
#[derive(Default)]
pub struct Table {
    /// Array part (array[0] holds key 1). Never contains nil.
    array: Vec<Value>,
    /// Every key that is not in the array part.
    map: LlrbMap<TableKey, Value>,
    /// Metatable (if any).
    pub metatable: Option<TableRef>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with room for `narray` sequence items.
    pub fn with_capacity(narray: usize) -> Self {
        Table {
            array: Vec::with_capacity(narray),
            ..Default::default()
        }
    }

    /// Create a shared empty table.
    pub fn new_ref() -> TableRef {
        Rc::new(RefCell::new(Table::new()))
    }

    /// Raw get.
    pub fn get(&self, key: &Value) -> Value {
        match key {
            Value::Nil => Value::Nil,
            Value::Number(n) if n.is_nan() => Value::Nil,
            Value::Number(n) => match as_index(*n) {
                Some(i) if i <= self.array.len() => self.array[i - 1].clone(),
                _ => self.get_map(key),
            },
            _ => self.get_map(key),
        }
    }

    fn get_map(&self, key: &Value) -> Value {
        if self.map.is_empty() {
            return Value::Nil;
        }
        self.map
            .get(&TableKey::new(key.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Raw get with an integer key.
    pub fn get_int(&self, i: i64) -> Value {
        if i >= 1 && (i as usize) <= self.array.len() {
            self.array[i as usize - 1].clone()
        } else {
            self.get_map(&Value::Number(i as f64))
        }
    }

    /// Raw get with a string key.
    pub fn get_str(&self, key: &LuaString) -> Value {
        if self.map.is_empty() {
            return Value::Nil;
        }
        self.get_map(&Value::String(key.clone()))
    }

    /// Raw get with a string key given as text.
    pub fn get_field(&self, key: &str) -> Value {
        self.get_str(&LuaString::from(key))
    }

    /// Raw set. Rejects nil and NaN keys.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), &'static str> {
        match key {
            Value::Nil => Err("table index is nil"),
            Value::Number(n) if n.is_nan() => Err("table index is NaN"),
            Value::Number(n) => {
                match as_index(n) {
                    Some(i) => self.set_index(i, value),
                    None => self.set_map(TableKey::new(key), value),
                }
                Ok(())
            }
            _ => {
                self.set_map(TableKey::new(key), value);
                Ok(())
            }
        }
    }

    /// Raw set with an integer key.
    pub fn set_int(&mut self, i: i64, value: Value) {
        if i >= 1 {
            self.set_index(i as usize, value);
        } else {
            self.set_map(TableKey::new(Value::Number(i as f64)), value);
        }
    }

    /// Raw set with a string key given as text.
    pub fn set_field(&mut self, key: &str, value: Value) {
        self.set_map(TableKey::new(Value::from(key)), value);
    }

    fn set_map(&mut self, key: TableKey, value: Value) {
        if value.is_nil() {
            self.map.remove(&key);
        } else {
            self.map.insert(key, value);
        }
    }

    fn set_index(&mut self, i: usize, value: Value) {
        let n = self.array.len();
        if i <= n {
            if value.is_nil() {
                // A hole: everything after it moves to the map.
                let tail = self.array.split_off(i - 1);
                for (offset, v) in tail.into_iter().enumerate().skip(1) {
                    self.map.insert(TableKey::int(i + offset), v);
                }
            } else {
                self.array[i - 1] = value;
            }
        } else if i == n + 1 && !value.is_nil() {
            self.array.push(value);
            self.migrate_from_map();
        } else {
            self.set_map(TableKey::int(i), value);
        }
    }

    /// Pull keys `n+1, n+2, ...` out of the map after the array part grew.
    fn migrate_from_map(&mut self) {
        if self.map.is_empty() {
            return;
        }
        while let Some(v) = self.map.remove(&TableKey::int(self.array.len() + 1)) {
            self.array.push(v);
        }
    }

    /// Length of the array part, which is always a border.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.map.is_empty()
    }

    /// The array part.
    pub fn array(&self) -> &[Value] {
        &self.array
    }

    /// Number of keys in the map part.
    pub fn map_len(&self) -> usize {
        self.map.len()
    }

    /// Stateless traversal: the entry after `key` (nil starts). Keys that were
    /// removed during the traversal still yield their successor.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, &'static str> {
        let after = match key {
            Value::Nil => {
                if let Some(v) = self.array.first() {
                    return Ok(Some((Value::Number(1.0), v.clone())));
                }
                None
            }
            Value::Number(n) if n.is_nan() => return Err("invalid key to 'next'"),
            Value::Number(n) => match as_index(*n) {
                Some(i) if i <= self.array.len() => {
                    if let Some(v) = self.array.get(i) {
                        return Ok(Some((Value::Number((i + 1) as f64), v.clone())));
                    }
                    None
                }
                _ => Some(TableKey::new(key.clone())),
            },
            _ => Some(TableKey::new(key.clone())),
        };
        let entry = match &after {
            None => self.map.first(),
            Some(k) => self.map.successor(k),
        };
        Ok(entry.map(|(k, v)| (k.value.clone(), v.clone())))
    }

    /// Insert `value` at `pos`, shifting `pos..=n` up (`table.insert`).
    pub fn insert(&mut self, pos: usize, value: Value) {
        let n = self.array.len();
        if pos >= 1 && pos <= n + 1 && !value.is_nil() {
            self.array.insert(pos - 1, value);
            self.migrate_from_map();
        } else {
            let mut i = n;
            while i >= pos && i >= 1 {
                let v = self.get_int(i as i64);
                self.set_int(i as i64 + 1, v);
                i -= 1;
            }
            self.set_int(pos as i64, value);
        }
    }

    /// Remove the item at `pos`, shifting the rest down (`table.remove`).
    pub fn remove(&mut self, pos: usize) -> Value {
        if pos >= 1 && pos <= self.array.len() {
            self.array.remove(pos - 1)
        } else {
            let v = self.get_int(pos as i64);
            self.set_int(pos as i64, Value::Nil);
            v
        }
    }

    /// Iterate over every entry, array part first.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.array
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Number((i + 1) as f64), v.clone()))
            .chain(self.map.iter().map(|(k, v)| (k.value.clone(), v.clone())))
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Table {{ array: {}, map: {}, metatable: {} }}",
            self.array.len(),
            self.map.len(),
            self.metatable.is_some()
        )
    }
}
