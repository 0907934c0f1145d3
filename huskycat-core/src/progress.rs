//! Live progress reporting.
//!
//! The executor talks to an abstract [`ProgressSink`]; implementations decide
//! how to render. The TTY renderer repaints a per-tool table on stderr at
//! 10 Hz; the no-op sink swallows callbacks on non-terminals; the log sink
//! appends plain lines, which is what the detached non-blocking child uses.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::{cursor, execute, terminal};

use crate::results::ToolStatus;

/// Events emitted by the executor. Callbacks may arrive from any worker;
/// implementations must be thread-safe.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started,
    Finished {
        status: ToolStatus,
        errors: u32,
        warnings: u32,
    },
}

pub trait ProgressSink: Send + Sync {
    fn update(&self, tool: &str, event: ProgressEvent);
}

/// Swallows everything; used on non-terminals.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn update(&self, _tool: &str, _event: ProgressEvent) {}
}

/// Appends one line per event to an arbitrary writer (the run log file).
pub struct LogSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LogSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> ProgressSink for LogSink<W> {
    fn update(&self, tool: &str, event: ProgressEvent) {
        let mut writer = self.writer.lock();
        let line = match event {
            ProgressEvent::Started => format!("[progress] {tool}: started\n"),
            ProgressEvent::Finished {
                status,
                errors,
                warnings,
            } => format!(
                "[progress] {tool}: {status:?} ({errors} error(s), {warnings} warning(s))\n"
            ),
        };
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }
}

#[derive(Debug, Clone)]
enum RowState {
    Running { since: Instant },
    Done {
        status: ToolStatus,
        errors: u32,
        warnings: u32,
        elapsed: Duration,
    },
}

#[derive(Default)]
struct TableState {
    rows: BTreeMap<String, RowState>,
    total: usize,
}

/// Live table renderer for interactive terminals.
///
/// A painter thread repaints at `tick` intervals; `update` only mutates
/// shared state, so callbacks from workers never block on the terminal.
pub struct TtyRenderer {
    state: Arc<Mutex<TableState>>,
    detached: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    painter: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TtyRenderer {
    /// `total` is the number of tools selected for the run.
    pub fn start(total: usize) -> Arc<Self> {
        Self::start_with_tick(total, Duration::from_millis(100))
    }

    pub fn start_with_tick(total: usize, tick: Duration) -> Arc<Self> {
        // 10 Hz floor, 20 Hz cap.
        let tick = tick.clamp(Duration::from_millis(50), Duration::from_millis(100));
        let renderer = Arc::new(Self {
            state: Arc::new(Mutex::new(TableState {
                rows: BTreeMap::new(),
                total,
            })),
            detached: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            painter: Mutex::new(None),
        });

        let state = Arc::clone(&renderer.state);
        let detached = Arc::clone(&renderer.detached);
        let stop = Arc::clone(&renderer.stop);
        let handle = std::thread::spawn(move || {
            let mut painted_rows = 0usize;
            while !stop.load(Ordering::Relaxed) {
                if !detached.load(Ordering::Relaxed) {
                    painted_rows = paint(&state.lock(), painted_rows);
                }
                std::thread::sleep(tick);
            }
            if !detached.load(Ordering::Relaxed) {
                paint(&state.lock(), painted_rows);
            }
        });
        *renderer.painter.lock() = Some(handle);
        renderer
    }

    /// Stop repainting without touching the run. The caller prints its own
    /// "now running in background" notice.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Relaxed);
    }

    /// Final repaint and painter shutdown.
    pub fn finish(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.painter.lock().take() {
            let _ = handle.join();
        }
    }
}

impl ProgressSink for TtyRenderer {
    fn update(&self, tool: &str, event: ProgressEvent) {
        let mut state = self.state.lock();
        match event {
            ProgressEvent::Started => {
                state
                    .rows
                    .insert(tool.to_string(), RowState::Running { since: Instant::now() });
            }
            ProgressEvent::Finished {
                status,
                errors,
                warnings,
            } => {
                let elapsed = match state.rows.get(tool) {
                    Some(RowState::Running { since }) => since.elapsed(),
                    _ => Duration::ZERO,
                };
                state.rows.insert(
                    tool.to_string(),
                    RowState::Done {
                        status,
                        errors,
                        warnings,
                        elapsed,
                    },
                );
            }
        }
    }
}

fn status_icon(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Success => "✓",
        ToolStatus::Failed => "✗",
        ToolStatus::Timeout => "⏱",
        ToolStatus::Skipped => "↷",
        ToolStatus::Unavailable => "–",
    }
}

/// Repaint the table in place: move the cursor back over the previous
/// frame, clear downward, and write the current one. Terminal width is
/// re-read every frame, which also covers resize events.
fn paint(state: &TableState, previous_rows: usize) -> usize {
    let mut err = std::io::stderr();
    let width = terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(80);

    if previous_rows > 0 {
        let _ = execute!(
            err,
            cursor::MoveUp(previous_rows as u16),
            terminal::Clear(terminal::ClearType::FromCursorDown)
        );
    }

    let mut lines = Vec::with_capacity(state.rows.len() + 1);
    for (tool, row) in &state.rows {
        let line = match row {
            RowState::Running { since } => {
                format!("  … {tool:<14} {:>6.1}s", since.elapsed().as_secs_f64())
            }
            RowState::Done {
                status,
                errors,
                warnings,
                elapsed,
            } => format!(
                "  {} {tool:<14} {:>6.1}s  {errors} err {warnings} warn",
                status_icon(*status),
                elapsed.as_secs_f64()
            ),
        };
        lines.push(truncate_line(line, width));
    }
    let done = state
        .rows
        .values()
        .filter(|r| matches!(r, RowState::Done { .. }))
        .count();
    lines.push(format!("  {done}/{} tools complete", state.total));

    for line in &lines {
        let _ = writeln!(err, "{line}");
    }
    let _ = err.flush();
    lines.len()
}

fn truncate_line(line: String, width: usize) -> String {
    if width > 1 && line.chars().count() > width {
        line.chars().take(width.saturating_sub(1)).collect()
    } else {
        line
    }
}
