//! Scripting runtime seam.
//!
//! Native-loop callbacks usually call into script code, so every pump runs
//! inside the runtime's execution context. The context is entered through
//! `ContextScope`, which exits on drop; a callback that panics unwinds through
//! the scope and cannot leave the context half-entered.

pub trait ScriptRuntime: Send + Sync + 'static {
    /// Make the runtime's execution context current on this thread.
    fn enter_context(&self);

    /// Undo the matching `enter_context`.
    fn exit_context(&self);

    /// Best-effort hint that the embedder is idle (e.g. run a GC slice).
    fn idle_notification(&self);
}

#[must_use = "the context is exited when the scope is dropped"]
pub struct ContextScope<'a, R: ScriptRuntime + ?Sized> {
    runtime: &'a R,
}

impl<'a, R: ScriptRuntime + ?Sized> ContextScope<'a, R> {
    pub fn enter(runtime: &'a R) -> Self {
        runtime.enter_context();
        Self { runtime }
    }
}

impl<R: ScriptRuntime + ?Sized> Drop for ContextScope<'_, R> {
    fn drop(&mut self) {
        self.runtime.exit_context();
    }
}

/// Runtime for embeddings that have no script engine attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRuntime;

impl ScriptRuntime for NullRuntime {
    fn enter_context(&self) {}

    fn exit_context(&self) {}

    fn idle_notification(&self) {
        log::trace!("idle notification (no runtime attached)");
    }
}
