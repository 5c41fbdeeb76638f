//! Open-addressed hash map with linear probing (spec §4.8).
//!
//! Capacity is always a power of two, at least [`MAP_MIN_CAPACITY`];
//! load factor is kept at or below [`MAP_LOAD_PERCENT`]/100. Iteration
//! is driven by raw bucket index, not an abstract cursor -- Open
//! Question (b) calls this out as observable, load-bearing behavior
//! that must survive reimplementation, so `iterate`/`iterator_value`
//! below hand back bucket indices directly.

use std::cell::RefCell;

use djuru_core::limits::{MAP_GROW_FACTOR, MAP_LOAD_PERCENT, MAP_MIN_CAPACITY};
use djuru_core::{ObjHeader, ObjKind, Value};

use crate::heap::HasHeader;
use crate::object::string::StringObj;

enum Slot {
    Empty,
    /// A removed entry; probing must continue past it, but it is
    /// reusable by a later insert (spec's undefined-key/tombstone pair).
    Tombstone,
    Occupied(Value, Value),
}

pub struct MapTable {
    slots: Vec<Slot>,
    count: usize,
}

impl MapTable {
    fn new() -> MapTable {
        MapTable {
            slots: Vec::new(),
            count: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn find_slot(&self, key: Value) -> usize {
        let cap = self.capacity();
        let mut index = (key_hash(key) as usize) % cap;
        let mut tombstone: Option<usize> = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) if key_eq(*k, key) => return index,
                Slot::Occupied(..) => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut fresh = MapTable {
            slots: (0..new_capacity).map(|_| Slot::Empty).collect(),
            count: 0,
        };
        for slot in self.slots.drain(..) {
            if let Slot::Occupied(k, v) = slot {
                fresh.raw_insert(k, v);
            }
        }
        *self = fresh;
    }

    fn raw_insert(&mut self, key: Value, value: Value) {
        let index = self.find_slot(key);
        if !matches!(self.slots[index], Slot::Occupied(..)) {
            self.count += 1;
        }
        self.slots[index] = Slot::Occupied(key, value);
    }

    /// Returns whether `key` was newly inserted (vs. an update).
    pub fn set(&mut self, key: Value, value: Value) -> bool {
        if self.capacity() == 0 {
            self.grow(MAP_MIN_CAPACITY);
        } else if (self.count + 1) * 100 > self.capacity() * MAP_LOAD_PERCENT {
            self.grow(self.capacity() * MAP_GROW_FACTOR);
        }
        let index = self.find_slot(key);
        let is_new = !matches!(self.slots[index], Slot::Occupied(..));
        if is_new {
            self.count += 1;
        }
        self.slots[index] = Slot::Occupied(key, value);
        is_new
    }

    #[must_use]
    pub fn get(&self, key: Value) -> Option<Value> {
        if self.capacity() == 0 {
            return None;
        }
        match self.slots[self.find_slot(key)] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, key: Value) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, shrinking the backing storage once occupancy falls
    /// below `1/MAP_GROW_FACTOR` of the load-percent threshold.
    pub fn remove(&mut self, key: Value) -> Option<Value> {
        if self.capacity() == 0 {
            return None;
        }
        let index = self.find_slot(key);
        let removed = match std::mem::replace(&mut self.slots[index], Slot::Empty) {
            Slot::Occupied(_, v) => {
                self.slots[index] = Slot::Tombstone;
                self.count -= 1;
                Some(v)
            }
            other => {
                self.slots[index] = other;
                None
            }
        };
        if removed.is_some() {
            let shrink_threshold = self.capacity() * MAP_LOAD_PERCENT / 100 / MAP_GROW_FACTOR;
            if self.count < shrink_threshold && self.capacity() > MAP_MIN_CAPACITY {
                self.grow((self.capacity() / MAP_GROW_FACTOR).max(MAP_MIN_CAPACITY));
            } else if self.count == 0 {
                self.slots.clear();
            }
        }
        removed
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// `iterate(iter)`: returns the next occupied bucket index at or
    /// after `iter + 1` (or `0` on the first call), or `None` when
    /// exhausted.
    #[must_use]
    pub fn iterate(&self, iter: Option<usize>) -> Option<usize> {
        let start = iter.map(|i| i + 1).unwrap_or(0);
        (start..self.capacity()).find(|&i| matches!(self.slots[i], Slot::Occupied(..)))
    }

    #[must_use]
    pub fn entry_at(&self, bucket: usize) -> Option<(Value, Value)> {
        match self.slots.get(bucket) {
            Some(Slot::Occupied(k, v)) => Some((*k, *v)),
            _ => None,
        }
    }
}

impl Default for MapTable {
    fn default() -> MapTable {
        MapTable::new()
    }
}

fn as_string(v: Value) -> Option<&'static StringObj> {
    if v.obj_kind() != Some(ObjKind::String) {
        return None;
    }
    let ptr = v.as_obj()?;
    // SAFETY: kind check above guarantees this header belongs to a
    // `StringObj` allocation; the reference's lifetime is bounded by the
    // heap, which outlives any single map operation.
    Some(unsafe { &*ptr.cast::<StringObj>().as_ptr() })
}

fn key_hash(key: Value) -> u64 {
    if let Some(s) = as_string(key) {
        return s.hash;
    }
    key.primitive_hash().unwrap_or_else(|| key.as_obj().map_or(0, |p| p.as_ptr() as u64))
}

fn key_eq(a: Value, b: Value) -> bool {
    if let (Some(sa), Some(sb)) = (as_string(a), as_string(b)) {
        return sa.as_str() == sb.as_str();
    }
    if a.is_number() && b.is_number() {
        return a.as_number() == b.as_number();
    }
    a.is_identical(b)
}

#[repr(C)]
pub struct MapObj {
    pub header: ObjHeader,
    pub table: RefCell<MapTable>,
}

unsafe impl HasHeader for MapObj {}

impl MapObj {
    #[must_use]
    pub fn new() -> MapObj {
        MapObj {
            header: ObjHeader::new(ObjKind::Map),
            table: RefCell::new(MapTable::new()),
        }
    }
}

impl Default for MapObj {
    fn default() -> MapObj {
        MapObj::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_new_vs_update() {
        let mut table = MapTable::new();
        assert!(table.set(Value::number(1.0), Value::TRUE));
        assert!(!table.set(Value::number(1.0), Value::FALSE));
        assert_eq!(table.get(Value::number(1.0)), Some(Value::FALSE));
    }

    #[test]
    fn remove_then_lookup_misses() {
        let mut table = MapTable::new();
        table.set(Value::number(1.0), Value::TRUE);
        assert_eq!(table.remove(Value::number(1.0)), Some(Value::TRUE));
        assert_eq!(table.get(Value::number(1.0)), None);
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table = MapTable::new();
        for i in 0..20 {
            table.set(Value::number(i as f64), Value::TRUE);
        }
        assert!(table.capacity() >= 20 * 100 / MAP_LOAD_PERCENT);
    }
}
