//! Output rendering for chat replies.
//!
//! A [`Renderer`] receives the callbacks of one exchange: every decoded
//! delta, the markup for the reply so far, and finally either the complete
//! text or an error message.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// ANSI escape code for dim text (used for rendered markup).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for informational lines).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering a chat exchange.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text with ANSI styling
/// - Plain text without styling (for piping/redirecting)
/// - Recording renderers in tests
pub trait Renderer: Send {
    /// Print one decoded delta.
    ///
    /// This is called incrementally as text is streamed from the relay.
    fn print_delta(&mut self, delta: &str);

    /// Receive the markup for the whole reply accumulated so far.
    fn render_markup(&mut self, markup: &str) {
        _ = markup;
    }

    /// Called once when the reply is complete, with its full text.
    fn finish_response(&mut self, text: &str);

    /// Print a human-readable error for a failed exchange.
    fn print_error(&mut self, error: &str);

    /// Print an informational line.
    fn print_info(&mut self, info: &str);

    /// Print a marker when a reply was interrupted by the user.
    fn print_interrupted(&mut self) {}

    /// Returns true if the current reply should be abandoned.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
///
/// Deltas go straight to stdout. With `show_markup` set, the final markup is
/// printed after each reply.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    show_markup: bool,
    markup: String,
    line_start: bool,
    streamed: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            show_markup: false,
            markup: String::new(),
            line_start: true,
            streamed: false,
            interrupted: None,
        }
    }

    /// Print the rendered markup after each reply.
    pub fn with_markup(mut self, show_markup: bool) -> Self {
        self.show_markup = show_markup;
        self
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    /// The most recent markup received.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = self.stdout.write_all(text.as_bytes());
        self.line_start = text.ends_with('\n');
        self.flush();
    }

    fn end_line(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_delta(&mut self, delta: &str) {
        self.streamed = true;
        self.write(delta);
    }

    fn render_markup(&mut self, markup: &str) {
        self.markup.clear();
        self.markup.push_str(markup);
    }

    fn finish_response(&mut self, text: &str) {
        // Buffered replies arrive without any delta.
        if !std::mem::take(&mut self.streamed) {
            self.write(text);
        }
        self.end_line();
        if self.show_markup && !self.markup.is_empty() {
            let markup = std::mem::take(&mut self.markup);
            if self.use_color {
                self.write(&format!("{ANSI_DIM}{markup}{ANSI_RESET}\n"));
            } else {
                self.write(&format!("{markup}\n"));
            }
        }
        self.markup.clear();
    }

    fn print_error(&mut self, error: &str) {
        self.streamed = false;
        self.end_line();
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
        self.markup.clear();
    }

    fn print_info(&mut self, info: &str) {
        self.end_line();
        if self.use_color {
            self.write(&format!("{ANSI_CYAN}{info}{ANSI_RESET}\n"));
        } else {
            self.write(&format!("{info}\n"));
        }
    }

    fn print_interrupted(&mut self) {
        self.streamed = false;
        self.end_line();
        self.write("[interrupted]\n");
        self.markup.clear();
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
