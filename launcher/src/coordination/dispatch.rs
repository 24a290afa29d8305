//! Marshal work onto the rendering thread.
//!
//! Rendering-owned state is only ever touched from the thread that drains the
//! [`UiTaskQueue`]. Other threads hand it closures through a [`UiDispatcher`]:
//! `synchronize` posts and waits for the closure to finish, `post` does not wait.

use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use thiserror::Error;

/// What a rendering surface exposes to marshaled tasks.
pub trait RenderHost {
    /// Stop the UI loop; the process exits with `code` once the loop unwinds.
    fn exit(&mut self, code: i32);
}

pub type UiTask = Box<dyn FnOnce(&mut dyn RenderHost) + Send>;

struct Envelope {
    task: UiTask,
    done: Option<mpsc::Sender<()>>,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("rendering thread is no longer accepting tasks")]
    Closed,
}

#[derive(Clone)]
pub struct UiDispatcher {
    tx: mpsc::Sender<Envelope>,
    render_thread: Arc<OnceLock<ThreadId>>,
}

pub struct UiTaskQueue {
    rx: mpsc::Receiver<Envelope>,
    render_thread: Arc<OnceLock<ThreadId>>,
}

pub fn ui_channel() -> (UiDispatcher, UiTaskQueue) {
    let (tx, rx) = mpsc::channel();
    let render_thread = Arc::new(OnceLock::new());
    (
        UiDispatcher {
            tx,
            render_thread: Arc::clone(&render_thread),
        },
        UiTaskQueue { rx, render_thread },
    )
}

impl std::fmt::Debug for UiDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiDispatcher")
            .field("render_thread", &self.render_thread.get())
            .finish()
    }
}

impl UiDispatcher {
    pub fn is_render_thread(&self) -> bool {
        self.render_thread.get() == Some(&thread::current().id())
    }

    /// Queue `task` without waiting for it to run.
    pub fn post<F>(&self, task: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut dyn RenderHost) + Send + 'static,
    {
        self.tx
            .send(Envelope {
                task: Box::new(task),
                done: None,
            })
            .map_err(|_| DispatchError::Closed)
    }

    /// Run `task` on the rendering thread and block until it has finished.
    ///
    /// Called from the rendering thread itself this degrades to `post`: blocking there
    /// would deadlock the loop that is supposed to run the task.
    pub fn synchronize<F>(&self, task: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut dyn RenderHost) + Send + 'static,
    {
        if self.is_render_thread() {
            return self.post(task);
        }

        let (done_tx, done_rx) = mpsc::channel();
        self.tx
            .send(Envelope {
                task: Box::new(task),
                done: Some(done_tx),
            })
            .map_err(|_| DispatchError::Closed)?;
        done_rx.recv().map_err(|_| DispatchError::Closed)
    }
}

impl UiTaskQueue {
    /// Mark the calling thread as the rendering thread. Only the first call counts.
    pub fn bind_current_thread(&self) {
        let _ = self.render_thread.set(thread::current().id());
    }

    /// Run every queued task against `host`. Returns how many ran.
    pub fn run_pending(&self, host: &mut dyn RenderHost) -> usize {
        let mut ran = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            (envelope.task)(host);
            if let Some(done) = envelope.done {
                let _ = done.send(());
            }
            ran += 1;
        }
        ran
    }
}
