//! Terminal stand-ins for the conversation surface: a printing view, a
//! paced "speaker" and a line-based recognizer.

use async_trait::async_trait;
use spokify_core::client::ConversationView;
use spokify_core::speech::{
    CaptureError, ConversationMode, Fragment, Recognizer, SpeechError, Synthesizer,
    VoiceCoordinator,
};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::mpsc;

/// Prints messages as they stream in. Assistant text is written
/// incrementally: only the part not yet printed goes out.
pub struct ConsoleView<W: Write + Send> {
    out: W,
    printed: usize,
    open: bool,
}

impl ConsoleView<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            open: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn finish_open_line(&mut self) {
        if self.open {
            let _ = writeln!(self.out);
            self.open = false;
        }
    }
}

impl<W: Write + Send> ConversationView for ConsoleView<W> {
    fn push_user_message(&mut self, text: &str) {
        self.finish_open_line();
        let _ = writeln!(self.out, "you> {text}");
        let _ = self.out.flush();
    }

    fn open_assistant_message(&mut self) {
        self.finish_open_line();
        let _ = write!(self.out, "ai> ");
        let _ = self.out.flush();
        self.printed = 0;
        self.open = true;
    }

    fn update_assistant_message(&mut self, text: &str) {
        if !self.open {
            self.open_assistant_message();
        }
        if let Some(fresh) = text.get(self.printed..) {
            let _ = write!(self.out, "{fresh}");
            let _ = self.out.flush();
        }
        self.printed = text.len();
    }

    fn push_assistant_message(&mut self, text: &str) {
        self.finish_open_line();
        let _ = writeln!(self.out, "ai> {text}");
        let _ = self.out.flush();
    }

    fn show_transcript(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.finish_open_line();
        let _ = writeln!(self.out, "heard> {text}");
        let _ = self.out.flush();
    }
}

/// Writes each unit to stderr and holds for as long as reading it aloud
/// would take at `words_per_minute`.
pub struct ConsoleSynthesizer {
    words_per_minute: u32,
}

impl ConsoleSynthesizer {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
        }
    }

    pub fn duration_for(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u64;
        Duration::from_millis(words * 60_000 / u64::from(self.words_per_minute))
    }
}

#[async_trait]
impl Synthesizer for ConsoleSynthesizer {
    async fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        eprintln!("  (speaking) {text}");
        tokio::time::sleep(self.duration_for(text)).await;
        Ok(())
    }
}

/// Treats each input line as one final transcript fragment. A blank line
/// counts as "no speech", `/typed` and `/quit` leave continuous mode, and
/// closed input is fatal.
pub struct LineRecognizer {
    lines: mpsc::Receiver<String>,
    voice: VoiceCoordinator,
    quit: bool,
}

impl LineRecognizer {
    pub fn new(lines: mpsc::Receiver<String>, voice: VoiceCoordinator) -> Self {
        Self {
            lines,
            voice,
            quit: false,
        }
    }

    /// Whether `/quit` was typed while listening.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    pub fn into_lines(self) -> mpsc::Receiver<String> {
        self.lines
    }
}

#[async_trait]
impl Recognizer for LineRecognizer {
    async fn start(&mut self) -> Result<(), CaptureError> {
        eprintln!("  (listening, type your reply; /typed to stop)");
        Ok(())
    }

    async fn next_fragment(&mut self) -> Result<Fragment, CaptureError> {
        loop {
            let Some(line) = self.lines.recv().await else {
                return Err(CaptureError::Unsupported("input closed".to_string()));
            };
            match line.trim() {
                "/typed" => self.voice.set_mode(ConversationMode::Typed),
                "/quit" => {
                    self.quit = true;
                    self.voice.set_mode(ConversationMode::Typed);
                }
                // Already listening.
                "/voice" => {}
                "" => return Err(CaptureError::NoSpeech),
                text => return Ok(Fragment::final_text(text)),
            }
        }
    }

    async fn stop(&mut self) {}
}
