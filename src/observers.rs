/*
    Copyright © 2024, the vigil_bft authors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Single-shot deferred completions.
//!
//! The core exposes a handful of observation hooks (`wait_qc`,
//! `wait_proposal`, `wait_receive_proposal`, `wait_bqc_update`) so an external
//! pacemaker can synchronize its scheduling without polling. Each hook hands
//! out a [`Completion`] that resolves the next time the corresponding
//! internal event fires.
//!
//! A [`Slot`] stores at most one pending completion; subscribing again
//! replaces the previous subscription. There are no queue semantics: an event
//! firing with no subscriber is simply not observed.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

/// The receiving end of a single-shot subscription.
///
/// Backed by a bounded channel so a pacemaker running on its own thread can
/// block in [`wait`](Completion::wait); resolution never blocks the core.
pub struct Completion<T>(Receiver<T>);

impl<T> Completion<T> {
    /// Block until the completion resolves. Returns `None` if the slot was
    /// re-subscribed or dropped before the event fired.
    pub fn wait(self) -> Option<T> {
        self.0.recv().ok()
    }

    /// Take the value if the completion has already resolved.
    pub fn try_take(&self) -> Option<T> {
        self.0.try_recv().ok()
    }

    /// A completion that is already resolved with `value`.
    pub(crate) fn ready(value: T) -> Completion<T> {
        let (sender, receiver) = sync_channel(1);
        let _ = sender.try_send(value);
        Completion(receiver)
    }
}

/// The core-side slot holding at most one pending completion.
pub(crate) struct Slot<T> {
    pending: Option<SyncSender<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Slot<T> {
        Slot { pending: None }
    }

    /// Hand out a fresh completion, replacing any previous subscription.
    pub(crate) fn subscribe(&mut self) -> Completion<T> {
        let (sender, receiver) = sync_channel(1);
        self.pending = Some(sender);
        Completion(receiver)
    }

    /// Resolve the pending completion, if any, and clear the slot.
    pub(crate) fn resolve(&mut self, value: T) {
        if let Some(sender) = self.pending.take() {
            let _ = sender.try_send(value);
        }
    }
}
