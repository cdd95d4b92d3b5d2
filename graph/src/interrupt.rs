// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A minimal "latest interrupt wins" signal used to race an in-flight `Node::run` against a
//! dirty/abort request from the rest of the graph (§4.7 "Cancellation"). Built on
//! `tokio::sync::watch` rather than the teacher's in-house `async_value` crate (see DESIGN.md,
//! Open Question 2): a watch channel already has exactly the semantics this needs — only the
//! most recent value matters, and every clone of the receiver observes it.

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub(crate) enum Signal<E> {
    None,
    /// The entry this task is computing was dirtied while the task is still running. Purely
    /// advisory: the run is allowed to complete normally (see `Entry::dirty`).
    Dirtied,
    /// The entry was cleared or terminated; the caller should stop and report `err` rather than
    /// let the in-flight computation's result reach any waiter.
    Aborted(E),
}

pub(crate) struct Interrupter<E>(watch::Sender<Signal<E>>);

pub(crate) struct Listener<E>(watch::Receiver<Signal<E>>);

pub(crate) fn channel<E: Clone>() -> (Interrupter<E>, Listener<E>) {
    let (tx, rx) = watch::channel(Signal::None);
    (Interrupter(tx), Listener(rx))
}

impl<E: Clone> Interrupter<E> {
    pub(crate) fn dirty(&self) {
        let _ = self.0.send(Signal::Dirtied);
    }

    pub(crate) fn abort(&self, err: E) {
        let _ = self.0.send(Signal::Aborted(err));
    }
}

impl<E: Clone> Listener<E> {
    /// Waits for an `Aborted` signal, ignoring `Dirtied` (the caller only needs to race abort
    /// against completion; dirtiness is handled by `Entry::complete` after the fact).
    pub(crate) async fn recv_abort(&mut self) -> E {
        loop {
            if self.0.changed().await.is_err() {
                // The sender was dropped without ever aborting: wait forever, so that `run`
                // alone determines the outcome of the `tokio::select!` this races against.
                futures::future::pending::<()>().await;
            }
            if let Signal::Aborted(err) = &*self.0.borrow_and_update() {
                return err.clone();
            }
        }
    }
}
