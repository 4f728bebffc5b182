use core::fmt;

/// Payload of a job node.
///
/// `execute` runs exactly once per run on whichever worker picks the job up;
/// it must not assume a particular thread, nor that a predecessor ran on the
/// same one. `on_executed` runs afterwards on the thread performing the
/// scheduling pass, right before the job's dependents are released.
pub trait Job: Send + 'static {
    fn execute(&mut self);

    fn on_executed(&mut self) {}

    /// Free-form label used in logs.
    fn name(&self) -> &str {
        "job"
    }
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("name", &self.name()).finish()
    }
}

/// A job built from closures.
///
/// The execute closure is `FnMut` so the same job can be re-armed and run
/// again.
pub struct ClosureJob<F> {
    name: String,
    execute: F,
    on_executed: Option<Box<dyn FnMut() + Send>>,
}

impl<F> ClosureJob<F>
where
    F: FnMut() + Send + 'static,
{
    pub fn new(name: impl Into<String>, execute: F) -> Self {
        Self {
            name: name.into(),
            execute,
            on_executed: None,
        }
    }

    #[must_use]
    pub fn with_on_executed(mut self, on_executed: impl FnMut() + Send + 'static) -> Self {
        self.on_executed = Some(Box::new(on_executed));
        self
    }
}

impl<F> Job for ClosureJob<F>
where
    F: FnMut() + Send + 'static,
{
    fn execute(&mut self) {
        (self.execute)();
    }

    fn on_executed(&mut self) {
        if let Some(on_executed) = &mut self.on_executed {
            on_executed();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for ClosureJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureJob")
            .field("name", &self.name)
            .field("on_executed", &self.on_executed.is_some())
            .finish_non_exhaustive()
    }
}
