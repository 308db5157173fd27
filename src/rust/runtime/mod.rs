// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod condition_variable;
pub mod fail;
pub mod logging;
pub mod network;
pub mod timer;

pub use self::{
    condition_variable::SharedConditionVariable,
    fail::Fail,
    timer::SharedTimer,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    fmt,
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Descriptor handed out to the socket layer for every socket.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct QDesc(u32);

/// The SharedObject wraps an object that is shared between the inbound-segment handler, the timer subsystem and the
/// futures returned to the socket layer.
pub struct SharedObject<T>(Rc<T>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for QDesc {
    fn from(val: usize) -> Self {
        QDesc(val as u32)
    }
}

impl From<QDesc> for usize {
    fn from(val: QDesc) -> Self {
        val.0 as usize
    }
}

impl fmt::Display for QDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Dereferences a mutable reference to a shared object for use. The stack runs to completion on a single thread: an
/// inbound segment, a timer expiration or a poll of a socket future each get exclusive use of the object until they
/// return or suspend, so no two mutable dereferences are ever live at the same time. Callers must not hold a mutable
/// dereference across an `.await` point.
impl<T> DerefMut for SharedObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

impl<T> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
