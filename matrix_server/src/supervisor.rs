//! Program supervision.
//!
//! Exactly one display program owns the surface at a time. Programs lock
//! the shared sink for their whole run, so switching works by aborting the
//! running task: the abort drops its sink guard and the next program takes
//! the lock. A faulted program is logged and replaced with the idle screen
//! after a short delay instead of taking the host down.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use matrix_shared::config::MatrixConfig;
use matrix_shared::render::RenderSink;

use crate::games::game2048::Play2048Program;
use crate::games::pong::PongProgram;
use crate::games::slither::SlitherProgram;

/// Delay before the idle fallback after a program fault, so a crash loop
/// cannot spin the host hot.
const FAULT_FALLBACK_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

/// The one draw surface, shared between successive programs.
pub type SharedSink = Arc<Mutex<Box<dyn RenderSink>>>;

pub fn shared_sink(sink: Box<dyn RenderSink>) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Everything a program needs to run: its config and the surface.
#[derive(Clone)]
pub struct ProgramCtx {
    pub cfg: MatrixConfig,
    pub sink: SharedSink,
}

/// A display program. `run` owns the program and holds the sink lock until
/// it returns or is aborted.
#[async_trait]
pub trait Program: Send {
    fn name(&self) -> &'static str;
    async fn run(self: Box<Self>, ctx: ProgramCtx) -> anyhow::Result<()>;
}

/// Blank screen; holds the surface until the next switch.
pub struct IdleProgram;

#[async_trait]
impl Program for IdleProgram {
    fn name(&self) -> &'static str {
        "idle"
    }

    async fn run(self: Box<Self>, ctx: ProgramCtx) -> anyhow::Result<()> {
        let mut sink = ctx.sink.lock().await;
        sink.clear();
        sink.swap_on_vsync();
        std::future::pending::<()>().await;
        Ok(())
    }
}

type Constructor = fn() -> Box<dyn Program>;

/// Every program the host can run, by console name.
static PROGRAMS: &[(&str, Constructor)] = &[
    ("idle", || Box::new(IdleProgram)),
    ("pong", || Box::new(PongProgram)),
    ("slither", || Box::new(SlitherProgram)),
    ("2048", || Box::new(Play2048Program)),
];

pub fn lookup(name: &str) -> Option<Box<dyn Program>> {
    PROGRAMS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, make)| make())
}

pub fn program_names() -> Vec<&'static str> {
    PROGRAMS.iter().map(|(n, _)| *n).collect()
}

/// Handle to a running program task.
pub struct ProgramHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl ProgramHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ProgramHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Runs one program at a time; switching aborts the previous one.
pub struct ProgramHost {
    cfg: MatrixConfig,
    sink: SharedSink,
    current: Option<ProgramHandle>,
}

impl ProgramHost {
    pub fn new(cfg: MatrixConfig, sink: SharedSink) -> Self {
        Self {
            cfg,
            sink,
            current: None,
        }
    }

    pub fn current_name(&self) -> Option<&'static str> {
        self.current.as_ref().map(|h| h.name())
    }

    /// Replaces the running program. Returns the previous handle, already
    /// aborted; its sink guard is released once the abort lands.
    pub fn switch(&mut self, name: &str) -> anyhow::Result<Option<ProgramHandle>> {
        let Some(program) = lookup(name) else {
            bail!("unknown program {name:?}");
        };
        let program_name = program.name();

        let previous = self.current.take();
        if let Some(handle) = &previous {
            info!(from = handle.name(), to = program_name, "switching program");
            handle.abort();
        } else {
            info!(to = program_name, "starting program");
        }

        let ctx = ProgramCtx {
            cfg: self.cfg.clone(),
            sink: Arc::clone(&self.sink),
        };
        let task = tokio::spawn(run_supervised(program, ctx));
        self.current = Some(ProgramHandle {
            name: program_name,
            task,
        });
        Ok(previous)
    }
}

/// Runs a program to completion and then blanks the surface. A fault is
/// logged and, after a fixed delay, falls back to the idle screen; the
/// host itself never exits.
async fn run_supervised(program: Box<dyn Program>, ctx: ProgramCtx) {
    let name = program.name();
    {
        // Blank whatever the previous program left behind.
        let mut sink = ctx.sink.lock().await;
        sink.clear();
        sink.swap_on_vsync();
    }

    match program.run(ctx.clone()).await {
        Ok(()) => info!(program = name, "program finished"),
        Err(e) => {
            error!(program = name, error = %e, "program faulted");
            tokio::time::sleep(FAULT_FALLBACK_DELAY).await;
        }
    }

    if let Err(e) = Box::new(IdleProgram).run(ctx).await {
        error!(error = %e, "idle fallback failed");
    }
}
