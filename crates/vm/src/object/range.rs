//! Numeric ranges (spec §4.8). Endpoints are doubles; iteration drives
//! `for` loops when the iterated expression is a range.

use djuru_core::{ObjHeader, ObjKind};

use crate::heap::HasHeader;

#[repr(C)]
pub struct RangeObj {
    pub header: ObjHeader,
    pub from: f64,
    pub to: f64,
    pub inclusive: bool,
}

unsafe impl HasHeader for RangeObj {}

impl RangeObj {
    #[must_use]
    pub fn new(from: f64, to: f64, inclusive: bool) -> RangeObj {
        RangeObj {
            header: ObjHeader::new(ObjKind::Range),
            from,
            to,
            inclusive,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        if self.from <= self.to {
            self.inclusive && self.from > self.to
        } else {
            true
        }
    }

    /// `iterate(iter)`: returns the next iterator value, or `None` once
    /// exhausted. `iter` is `None` on the first call.
    #[must_use]
    pub fn iterate(&self, iter: Option<f64>) -> Option<f64> {
        let step = if self.from <= self.to { 1.0 } else { -1.0 };
        let next = match iter {
            None => self.from,
            Some(prev) => prev + step,
        };
        let exhausted = if self.from <= self.to {
            if self.inclusive {
                next > self.to
            } else {
                next >= self.to
            }
        } else if self.inclusive {
            next < self.to
        } else {
            next <= self.to
        };
        if exhausted {
            None
        } else {
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_ascending_range_iterates_endpoints() {
        let r = RangeObj::new(1.0, 3.0, true);
        assert_eq!(r.iterate(None), Some(1.0));
        assert_eq!(r.iterate(Some(1.0)), Some(2.0));
        assert_eq!(r.iterate(Some(2.0)), Some(3.0));
        assert_eq!(r.iterate(Some(3.0)), None);
    }

    #[test]
    fn exclusive_descending_range_stops_before_endpoint() {
        let r = RangeObj::new(3.0, 0.0, false);
        assert_eq!(r.iterate(None), Some(3.0));
        assert_eq!(r.iterate(Some(1.0)), None);
    }
}
