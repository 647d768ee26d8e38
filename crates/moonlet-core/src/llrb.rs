//! Left-leaning red-black tree (Sedgewick, 2008).
//!
//! An ordered map used for the non-array part of tables. Besides the usual map
//! operations it answers `successor(key)` for keys that are no longer present,
//! which is what stateless table traversal needs.

use std::cmp::Ordering;
use std::mem;

type Link<K, V> = Option<Box<Node<K, V>>>;

struct Node<K, V> {
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
    red: bool,
}

impl<K, V> Node<K, V> {
    fn new(key: K, value: V) -> Box<Self> {
        Box::new(Node {
            key,
            value,
            left: None,
            right: None,
            red: true,
        })
    }
}

/// An ordered map backed by a left-leaning red-black tree.
pub struct LlrbMap<K, V> {
    root: Link<K, V>,
    len: usize,
}

impl<K: Ord, V> Default for LlrbMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> LlrbMap<K, V> {
    pub fn new() -> Self {
        LlrbMap { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut cur = self.root.as_deref();
        while let Some(n) = cur {
            match key.cmp(&n.key) {
                Ordering::Less => cur = n.left.as_deref(),
                Ordering::Greater => cur = n.right.as_deref(),
                Ordering::Equal => return Some(&n.value),
            }
        }
        None
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let mut cur = self.root.as_deref_mut();
        while let Some(n) = cur {
            match key.cmp(&n.key) {
                Ordering::Less => cur = n.left.as_deref_mut(),
                Ordering::Greater => cur = n.right.as_deref_mut(),
                Ordering::Equal => return Some(&mut n.value),
            }
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut old = None;
        let mut root = put(self.root.take(), key, value, &mut old);
        root.red = false;
        self.root = Some(root);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Remove a key; returns its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.contains_key(key) {
            return None;
        }
        let mut root = self.root.take()?;
        if !is_red(&root.left) && !is_red(&root.right) {
            root.red = true;
        }
        let mut removed = None;
        self.root = delete(root, key, &mut removed);
        if let Some(r) = self.root.as_mut() {
            r.red = false;
        }
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<(&K, &V)> {
        let mut cur = self.root.as_deref()?;
        while let Some(l) = cur.left.as_deref() {
            cur = l;
        }
        Some((&cur.key, &cur.value))
    }

    /// Smallest entry whose key is strictly greater than `key`. `key` need not
    /// be present.
    pub fn successor(&self, key: &K) -> Option<(&K, &V)> {
        let mut cur = self.root.as_deref();
        let mut best = None;
        while let Some(n) = cur {
            if *key < n.key {
                best = Some((&n.key, &n.value));
                cur = n.left.as_deref();
            } else {
                cur = n.right.as_deref();
            }
        }
        best
    }

    /// In-order iterator.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut it = Iter { stack: Vec::new() };
        it.push_left(self.root.as_deref());
        it
    }

    #[cfg(test)]
    fn check(&self) {
        fn walk<K: Ord, V>(n: Option<&Node<K, V>>, lo: Option<&K>, hi: Option<&K>) -> usize {
            let Some(n) = n else { return 1 };
            assert!(lo.map_or(true, |lo| *lo < n.key), "order");
            assert!(hi.map_or(true, |hi| n.key < *hi), "order");
            assert!(!is_red(&n.right), "right-leaning red link");
            if n.red {
                assert!(!is_red(&n.left), "two reds in a row");
            }
            let bl = walk(n.left.as_deref(), lo, Some(&n.key));
            let br = walk(n.right.as_deref(), Some(&n.key), hi);
            assert_eq!(bl, br, "black height");
            bl + usize::from(!n.red)
        }
        if let Some(r) = self.root.as_deref() {
            assert!(!r.red, "red root");
        }
        walk(self.root.as_deref(), None, None);
    }
}

/// In-order iterator over an [`LlrbMap`].
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut cur: Option<&'a Node<K, V>>) {
        while let Some(n) = cur {
            self.stack.push(n);
            cur = n.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.stack.pop()?;
        self.push_left(n.right.as_deref());
        Some((&n.key, &n.value))
    }
}

fn is_red<K, V>(link: &Link<K, V>) -> bool {
    link.as_ref().map_or(false, |n| n.red)
}

fn left_left_red<K, V>(h: &Node<K, V>) -> bool {
    h.left.as_ref().map_or(false, |l| is_red(&l.left))
}

fn right_left_red<K, V>(h: &Node<K, V>) -> bool {
    h.right.as_ref().map_or(false, |r| is_red(&r.left))
}

fn rotate_left<K, V>(mut h: Box<Node<K, V>>) -> Box<Node<K, V>> {
    let Some(mut x) = h.right.take() else {
        return h;
    };
    h.right = x.left.take();
    x.red = h.red;
    h.red = true;
    x.left = Some(h);
    x
}

fn rotate_right<K, V>(mut h: Box<Node<K, V>>) -> Box<Node<K, V>> {
    let Some(mut x) = h.left.take() else {
        return h;
    };
    h.left = x.right.take();
    x.red = h.red;
    h.red = true;
    x.right = Some(h);
    x
}

fn flip_colors<K, V>(h: &mut Node<K, V>) {
    h.red = !h.red;
    if let Some(l) = h.left.as_mut() {
        l.red = !l.red;
    }
    if let Some(r) = h.right.as_mut() {
        r.red = !r.red;
    }
}

fn balance<K, V>(mut h: Box<Node<K, V>>) -> Box<Node<K, V>> {
    if is_red(&h.right) && !is_red(&h.left) {
        h = rotate_left(h);
    }
    if is_red(&h.left) && left_left_red(&h) {
        h = rotate_right(h);
    }
    if is_red(&h.left) && is_red(&h.right) {
        flip_colors(&mut h);
    }
    h
}

fn move_red_left<K, V>(mut h: Box<Node<K, V>>) -> Box<Node<K, V>> {
    flip_colors(&mut h);
    if right_left_red(&h) {
        if let Some(r) = h.right.take() {
            h.right = Some(rotate_right(r));
        }
        h = rotate_left(h);
        flip_colors(&mut h);
    }
    h
}

fn move_red_right<K, V>(mut h: Box<Node<K, V>>) -> Box<Node<K, V>> {
    flip_colors(&mut h);
    if left_left_red(&h) {
        h = rotate_right(h);
        flip_colors(&mut h);
    }
    h
}

fn put<K: Ord, V>(h: Link<K, V>, key: K, value: V, old: &mut Option<V>) -> Box<Node<K, V>> {
    let Some(mut h) = h else {
        return Node::new(key, value);
    };
    match key.cmp(&h.key) {
        Ordering::Less => h.left = Some(put(h.left.take(), key, value, old)),
        Ordering::Greater => h.right = Some(put(h.right.take(), key, value, old)),
        Ordering::Equal => *old = Some(mem::replace(&mut h.value, value)),
    }
    balance(h)
}

/// Detach the minimum node of the subtree rooted at `h`.
fn delete_min<K, V>(mut h: Box<Node<K, V>>) -> (Link<K, V>, Box<Node<K, V>>) {
    if h.left.is_none() {
        return (h.right.take(), h);
    }
    if !is_red(&h.left) && !left_left_red(&h) {
        h = move_red_left(h);
    }
    match h.left.take() {
        Some(left) => {
            let (rest, min) = delete_min(left);
            h.left = rest;
            (Some(balance(h)), min)
        }
        None => (h.right.take(), h),
    }
}

fn delete<K: Ord, V>(mut h: Box<Node<K, V>>, key: &K, removed: &mut Option<V>) -> Link<K, V> {
    if *key < h.key {
        if !is_red(&h.left) && !left_left_red(&h) {
            h = move_red_left(h);
        }
        if let Some(left) = h.left.take() {
            h.left = delete(left, key, removed);
        }
    } else {
        if is_red(&h.left) {
            h = rotate_right(h);
        }
        if *key == h.key && h.right.is_none() {
            let node = *h;
            *removed = Some(node.value);
            return node.left;
        }
        if !is_red(&h.right) && !right_left_red(&h) {
            h = move_red_right(h);
        }
        if *key == h.key {
            if let Some(right) = h.right.take() {
                let (rest, min) = delete_min(right);
                h.right = rest;
                let min = *min;
                h.key = min.key;
                *removed = Some(mem::replace(&mut h.value, min.value));
            }
        } else if let Some(right) = h.right.take() {
            h.right = delete(right, key, removed);
        }
    }
    Some(balance(h))
}
