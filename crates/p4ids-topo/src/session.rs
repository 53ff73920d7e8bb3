//! Console input and signal handling for the interactive shell.
//!
//! Stdin is read on a dedicated thread, one line per request, so a node
//! command running in the foreground gets the terminal's input to itself.
//! Interrupt and termination signals arrive through a `ctrlc` handler and
//! end the session when the shell is idle at the prompt; while a command
//! runs they belong to the child and are ignored here.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use p4ids_net::Runner;

use crate::shell::{Flow, Shell};

pub const PROMPT: &str = "p4ids> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    Eof,
    Interrupt,
}

pub trait InputSource {
    /// Blocks until the next line, end of input, or an interrupt.
    fn next_input(&mut self, prompt: &str) -> Input;

    /// Marks whether a shell command is executing.
    fn set_busy(&self, _busy: bool) {}
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Exit,
    Eof,
    Interrupted,
}

/// Feeds input lines to `shell` until exit, end of input, or interrupt.
pub fn run_session<R, W, I>(shell: &mut Shell<'_, R, W>, input: &mut I) -> io::Result<SessionEnd>
where
    R: Runner,
    W: Write,
    I: InputSource,
{
    loop {
        match input.next_input(PROMPT) {
            Input::Line(line) => {
                input.set_busy(true);
                let flow = shell.execute(&line);
                input.set_busy(false);
                if flow? == Flow::Exit {
                    return Ok(SessionEnd::Exit);
                }
            }
            Input::Eof => {
                tracing::debug!("end of input");
                return Ok(SessionEnd::Eof);
            }
            Input::Interrupt => {
                tracing::info!("interrupted, leaving shell");
                return Ok(SessionEnd::Interrupted);
            }
        }
    }
}

/// Process signal handler state.
///
/// Installed once, before the network starts, so an interrupt that arrives
/// while provisioning is held until someone asks for it.
pub struct Signals {
    rx: Receiver<()>,
    busy: Arc<AtomicBool>,
}

/// Sending half of [`Signals`], owned by the handler.
struct Gate {
    tx: Sender<()>,
    busy: Arc<AtomicBool>,
}

impl Gate {
    fn raise(&self) {
        if !self.busy.load(Ordering::SeqCst) {
            let _ = self.tx.try_send(());
        }
    }
}

impl Signals {
    /// Installs the process handler for interrupt and termination signals.
    /// Can only be called once per process.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let (signals, gate) = Self::channel();
        ctrlc::set_handler(move || gate.raise())?;
        Ok(signals)
    }

    fn channel() -> (Self, Gate) {
        let (tx, rx) = bounded::<()>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let gate = Gate {
            tx,
            busy: busy.clone(),
        };
        (Self { rx, busy }, gate)
    }

    /// Takes a pending signal, if any.
    pub fn interrupted(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// While busy, signals are left to the foreground child.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

/// Terminal-backed [`InputSource`].
pub struct Console {
    requests: Sender<()>,
    lines: Receiver<Input>,
    signals: Signals,
    pending: bool,
}

impl Console {
    /// Starts the stdin reader. Pending and future signals from `signals`
    /// interrupt the prompt.
    pub fn spawn(signals: Signals) -> Self {
        let (requests, request_rx) = bounded::<()>(1);
        let (line_tx, lines) = unbounded();
        // the reader stays blocked on stdin after an interrupt; process exit reaps it
        let spawned = thread::Builder::new()
            .name("stdin".into())
            .spawn(move || read_lines(request_rx, line_tx));
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn stdin reader");
        }

        Self {
            requests,
            lines,
            signals,
            pending: false,
        }
    }
}

fn read_lines(requests: Receiver<()>, lines: Sender<Input>) {
    let stdin = io::stdin();
    for () in requests.iter() {
        let mut line = String::new();
        let input = match stdin.lock().read_line(&mut line) {
            Ok(0) => Input::Eof,
            Ok(_) => Input::Line(line),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                Input::Eof
            }
        };
        let eof = input == Input::Eof;
        if lines.send(input).is_err() || eof {
            break;
        }
    }
}

impl InputSource for Console {
    fn next_input(&mut self, prompt: &str) -> Input {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "{prompt}");
        let _ = stdout.flush();

        if !self.pending {
            if self.requests.send(()).is_err() {
                return Input::Eof;
            }
            self.pending = true;
        }

        select! {
            recv(self.lines) -> msg => {
                self.pending = false;
                match msg {
                    Ok(Input::Eof) | Err(_) => {
                        let _ = writeln!(stdout);
                        Input::Eof
                    }
                    Ok(input) => input,
                }
            }
            recv(self.signals.rx) -> _ => {
                let _ = writeln!(stdout);
                Input::Interrupt
            }
        }
    }

    fn set_busy(&self, busy: bool) {
        self.signals.set_busy(busy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4ids_net::{DryRunRunner, Network, TopologyBuilder};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        inputs: VecDeque<Input>,
        busy_calls: AtomicUsize,
    }

    impl Scripted {
        fn new(inputs: Vec<Input>) -> Self {
            Self {
                inputs: inputs.into(),
                busy_calls: AtomicUsize::new(0),
            }
        }
    }

    impl InputSource for Scripted {
        fn next_input(&mut self, _prompt: &str) -> Input {
            self.inputs.pop_front().unwrap_or(Input::Eof)
        }

        fn set_busy(&self, _busy: bool) {
            self.busy_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn line(s: &str) -> Input {
        Input::Line(format!("{s}\n"))
    }

    #[test]
    fn session_ends_on_each_exit_path() {
        let runner = DryRunRunner::new();
        let topo = TopologyBuilder::default_ids().build().unwrap();
        let mut net = Network::new(topo, &runner).without_controller_check();
        net.start().unwrap();

        let cases = [
            (vec![line("nodes"), line("exit"), line("nodes")], SessionEnd::Exit),
            (vec![line("nodes")], SessionEnd::Eof),
            (vec![Input::Interrupt, line("nodes")], SessionEnd::Interrupted),
        ];
        for (inputs, expected) in cases {
            let mut input = Scripted::new(inputs);
            let mut shell = Shell::new(&mut net, Vec::new());
            assert_eq!(run_session(&mut shell, &mut input).unwrap(), expected);
        }
    }

    #[test]
    fn commands_run_while_marked_busy() {
        let runner = DryRunRunner::new();
        let topo = TopologyBuilder::default_ids().build().unwrap();
        let mut net = Network::new(topo, &runner).without_controller_check();
        net.start().unwrap();

        let mut input = Scripted::new(vec![line("h1 true"), line("quit")]);
        let mut shell = Shell::new(&mut net, Vec::new());
        run_session(&mut shell, &mut input).unwrap();
        // set and clear around each of the two lines
        assert_eq!(input.busy_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn signal_while_idle_is_held() {
        let (signals, gate) = Signals::channel();
        assert!(!signals.interrupted());
        gate.raise();
        gate.raise();
        assert!(signals.interrupted());
        // one pending signal at most
        assert!(!signals.interrupted());
    }

    #[test]
    fn signal_while_busy_is_dropped() {
        let (signals, gate) = Signals::channel();
        signals.set_busy(true);
        gate.raise();
        signals.set_busy(false);
        assert!(!signals.interrupted());
    }
}
