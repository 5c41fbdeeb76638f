//! Loaded modules: a name and a dense, append-only slot vector matching
//! the compiler's `module_vars` ordering (spec §4.2/§4.4).

use std::cell::RefCell;

use djuru_core::{ObjHeader, ObjKind, Value};

use crate::heap::HasHeader;

#[repr(C)]
pub struct ModuleObj {
    pub header: ObjHeader,
    pub name: Box<str>,
    pub names: RefCell<Vec<String>>,
    pub slots: RefCell<Vec<Value>>,
}

unsafe impl HasHeader for ModuleObj {}

impl ModuleObj {
    #[must_use]
    pub fn new(name: Box<str>) -> ModuleObj {
        ModuleObj {
            header: ObjHeader::new(ObjKind::Module),
            name,
            names: RefCell::new(Vec::new()),
            slots: RefCell::new(Vec::new()),
        }
    }

    /// Declares a module variable, returning its slot index. Called by
    /// the loader in the same order the compiler's `module_vars` table
    /// was built, so indices line up exactly.
    pub fn declare(&self, name: &str, initial: Value) -> u16 {
        let mut names = self.names.borrow_mut();
        let mut slots = self.slots.borrow_mut();
        let index = slots.len();
        names.push(name.to_string());
        slots.push(initial);
        index as u16
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<u16> {
        self.names.borrow().iter().position(|n| n == name).map(|i| i as u16)
    }

    #[must_use]
    pub fn get(&self, index: u16) -> Value {
        self.slots.borrow()[index as usize]
    }

    pub fn set(&self, index: u16, value: Value) {
        self.slots.borrow_mut()[index as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_then_find_round_trips() {
        let module = ModuleObj::new("main".into());
        let idx = module.declare("counter", Value::number(0.0));
        assert_eq!(module.find("counter"), Some(idx));
        assert_eq!(module.get(idx).as_number(), Some(0.0));
    }
}
