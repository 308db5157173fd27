// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::SharedObject;
use ::std::{
    collections::LinkedList,
    future::Future,
    ops::{
        Deref,
        DerefMut,
    },
    pin::Pin,
    task::{
        Context,
        Poll,
        Waker,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Eq, PartialEq)]
/// The state of the coroutine using this condition variable.
enum YieldState {
    Running,
    Yielded,
}

/// A condition that socket futures suspend on. The inbound-segment handler and the timers signal it whenever they
/// make progress on a connection, after which every waiter re-checks its own wake condition.
pub struct ConditionVariable {
    waiters: LinkedList<Waker>,
    /// Bumped on every broadcast so that a waiter can tell whether it has been signalled since it suspended.
    generation: u64,
}

#[derive(Clone)]
pub struct SharedConditionVariable(SharedObject<ConditionVariable>);

struct YieldFuture {
    /// Reference to the condition variable that issued this future.
    cond_var: SharedConditionVariable,
    /// Generation observed when the wait started.
    generation: u64,
    /// State of the yield.
    state: YieldState,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedConditionVariable {
    /// Wake all waiting coroutines.
    pub fn broadcast(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        while let Some(waiter) = self.waiters.pop_front() {
            waiter.wake();
        }
    }

    /// Number of coroutines currently suspended on this condition variable.
    #[cfg(test)]
    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Wait until signal.
    pub async fn wait(&self) {
        YieldFuture {
            cond_var: self.clone(),
            generation: self.generation,
            state: YieldState::Running,
        }
        .await
    }

    fn add_waiter(&mut self, waker: Waker) {
        self.waiters.push_back(waker);
    }
}

//======================================================================================================================
// Trait Implementation
//======================================================================================================================

impl Default for SharedConditionVariable {
    fn default() -> Self {
        Self(SharedObject::new(ConditionVariable {
            waiters: LinkedList::default(),
            generation: 0,
        }))
    }
}

impl Deref for SharedConditionVariable {
    type Target = ConditionVariable;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SharedConditionVariable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Future for YieldFuture {
    type Output = ();

    /// The first time that this future is polled it registers itself and suspends. It becomes ready once the
    /// condition variable has been signalled.
    fn poll(self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        if self_.cond_var.generation != self_.generation {
            Poll::Ready(())
        } else {
            if self_.state == YieldState::Running {
                self_.cond_var.add_waiter(context.waker().clone());
            }
            self_.state = YieldState::Yielded;
            Poll::Pending
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
