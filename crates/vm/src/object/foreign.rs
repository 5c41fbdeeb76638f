//! Extern instances: a host-owned opaque payload plus an optional
//! finalizer invoked during sweep (spec §6, `Config::bind_extern_class`).

use std::any::Any;
use std::ptr::NonNull;

use djuru_core::ObjHeader;

use crate::heap::HasHeader;

pub type Finalizer = fn(&mut dyn Any);

#[repr(C)]
pub struct ExternObj {
    pub header: ObjHeader,
    pub payload: Box<dyn Any>,
    pub finalizer: Option<Finalizer>,
}

unsafe impl HasHeader for ExternObj {}

impl ExternObj {
    #[must_use]
    pub fn new(class: NonNull<ObjHeader>, payload: Box<dyn Any>, finalizer: Option<Finalizer>) -> ExternObj {
        let header = ObjHeader::new(djuru_core::ObjKind::Extern);
        header.class.set(Some(class));
        ExternObj {
            header,
            payload,
            finalizer,
        }
    }

    /// Runs the finalizer, if any, just before the collector frees this
    /// object's storage. Idempotent only in the sense that the collector
    /// never calls it twice for the same allocation.
    pub fn finalize(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer(&mut *self.payload);
        }
    }
}
