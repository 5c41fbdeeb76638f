//! Plain instances of a user-defined class: a dense field-slot vector
//! sized to the class's (already inheritance-shifted) field count.

use std::cell::RefCell;
use std::ptr::NonNull;

use djuru_core::{ObjHeader, ObjKind, Value};

use crate::heap::HasHeader;

#[repr(C)]
pub struct InstanceObj {
    pub header: ObjHeader,
    pub fields: RefCell<Box<[Value]>>,
}

unsafe impl HasHeader for InstanceObj {}

impl InstanceObj {
    #[must_use]
    pub fn new(class: NonNull<ObjHeader>, field_count: u16) -> InstanceObj {
        let header = ObjHeader::new(ObjKind::Instance);
        header.class.set(Some(class));
        InstanceObj {
            header,
            fields: RefCell::new(vec![Value::NULL; field_count as usize].into_boxed_slice()),
        }
    }

    #[must_use]
    pub fn field(&self, index: u16) -> Value {
        self.fields.borrow()[index as usize]
    }

    pub fn set_field(&self, index: u16, value: Value) {
        self.fields.borrow_mut()[index as usize] = value;
    }
}
