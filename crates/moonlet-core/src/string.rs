/// Immutable, reference-counted byte strings.
///
/// Strings are compared by content. The Lua-style hash is computed once at
/// construction so table lookups never rehash the bytes.
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

struct StringInner {
    hash: u32,
    bytes: Box<[u8]>,
}

/// A shared immutable byte string.
#[derive(Clone)]
pub struct LuaString(Rc<StringInner>);

impl LuaString {
    /// Create a string from raw bytes.
    pub fn new(bytes: &[u8]) -> Self {
        LuaString(Rc::new(StringInner {
            hash: lua_hash(bytes),
            bytes: bytes.into(),
        }))
    }

    /// Get the bytes of this string.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    /// Get the length in bytes.
    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    /// Returns true if the string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }

    /// Get the precomputed hash.
    pub fn hash_code(&self) -> u32 {
        self.0.hash
    }

    /// Returns true if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &LuaString) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Lossy UTF-8 view, for messages and display.
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0.bytes)
    }

    /// Concatenate two strings into a new one.
    pub fn concat(&self, other: &[u8]) -> LuaString {
        let mut buf = Vec::with_capacity(self.len() + other.len());
        buf.extend_from_slice(self.as_bytes());
        buf.extend_from_slice(other);
        LuaString::from(buf)
    }
}

impl PartialEq for LuaString {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.0.hash == other.0.hash && self.0.bytes == other.0.bytes)
    }
}

impl Eq for LuaString {}

impl PartialOrd for LuaString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LuaString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for LuaString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.bytes.hash(state);
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        LuaString::new(s.as_bytes())
    }
}

impl From<&[u8]> for LuaString {
    fn from(b: &[u8]) -> Self {
        LuaString::new(b)
    }
}

impl From<String> for LuaString {
    fn from(s: String) -> Self {
        LuaString::from(s.into_bytes())
    }
}

impl From<Vec<u8>> for LuaString {
    fn from(v: Vec<u8>) -> Self {
        let hash = lua_hash(&v);
        LuaString(Rc::new(StringInner {
            hash,
            bytes: v.into_boxed_slice(),
        }))
    }
}

impl fmt::Display for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = std::str::from_utf8(self.as_bytes()) {
            write!(f, "\"{}\"", s)
        } else {
            write!(f, "<binary string len={}>", self.len())
        }
    }
}

/// PUC Lua compatible hash function (luaS_hash algorithm).
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    // Long strings only sample every `step`-th byte.
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}
