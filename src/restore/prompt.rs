//! Asking for volumes
//!
//! Making a volume available is a physical act: inserting a disc, plugging
//! in a card, mounting a share. A [`MediumPrompt`] tells someone what is
//! needed and reports their answer. Availability itself is always confirmed
//! by discovery, never by the prompt.
//!
//! A prompt never waits past the request's deadline and gives up as soon
//! as the restore is cancelled.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Longest stretch between two looks at the cancel flag
const ANSWER_POLL: Duration = Duration::from_millis(100);

/// Operator's answer to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// Start checking for the volume
    Ready,
    /// Do without this volume
    Skip,
    /// Stop the restore
    Abort,
    /// Nobody answered before the deadline
    Expired,
}

/// What the operator is asked for
#[derive(Debug, Clone)]
pub struct MediumRequest<'a> {
    pub label: &'a str,
    /// Where the volume was last seen
    pub last_location: Option<&'a str>,
    pub files: usize,
    /// `None` waits until cancelled
    pub deadline: Option<Instant>,
    pub cancel: &'a AtomicBool,
}

impl MediumRequest<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

pub trait MediumPrompt {
    fn request(&mut self, request: &MediumRequest<'_>) -> PromptResponse;
}

/// Answers ready at once and leaves the rest to polling
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoPrompt;

impl MediumPrompt for AutoPrompt {
    fn request(&mut self, _request: &MediumRequest<'_>) -> PromptResponse {
        PromptResponse::Ready
    }
}

/// Line-oriented prompt on a terminal
///
/// Lines are read on a background thread so that a silent terminal cannot
/// hold the restore past its deadline. `None` on the channel means the
/// input is closed.
pub struct ConsolePrompt<W> {
    answers: Receiver<Option<String>>,
    closed: bool,
    output: W,
}

impl<W: Write> ConsolePrompt<W> {
    pub fn new<R: BufRead + Send + 'static>(input: R, output: W) -> Self {
        let (sender, answers) = mpsc::channel();
        thread::spawn(move || {
            let mut input = input;
            loop {
                let mut line = String::new();
                match input.read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        let _ = sender.send(None);
                        return;
                    }
                    Ok(_) => {
                        if sender.send(Some(line)).is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Self {
            answers,
            closed: false,
            output,
        }
    }

    fn ask(&mut self, request: &MediumRequest<'_>) {
        let _ = write!(
            self.output,
            "Volume {} is needed for {} file(s)",
            request.label, request.files
        );
        if let Some(location) = request.last_location {
            let _ = write!(self.output, " (last seen at {})", location);
        }
        let _ = write!(
            self.output,
            ".\nMake it available and press Enter, 's' to skip, 'q' to abort: "
        );
        let _ = self.output.flush();
    }

    fn wait_for_line(&mut self, request: &MediumRequest<'_>) -> Result<String, PromptResponse> {
        // EOF: nobody is there to answer
        if self.closed {
            return Err(PromptResponse::Abort);
        }
        loop {
            if request.is_cancelled() {
                return Err(PromptResponse::Abort);
            }
            let wait = match request.deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        let _ = writeln!(self.output);
                        return Err(PromptResponse::Expired);
                    }
                    left.min(ANSWER_POLL)
                }
                None => ANSWER_POLL,
            };
            match self.answers.recv_timeout(wait) {
                Ok(Some(line)) => return Ok(line),
                Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                    self.closed = true;
                    return Err(PromptResponse::Abort);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

impl<W: Write> MediumPrompt for ConsolePrompt<W> {
    fn request(&mut self, request: &MediumRequest<'_>) -> PromptResponse {
        self.ask(request);
        match self.wait_for_line(request) {
            Err(response) => response,
            Ok(line) => match line.trim() {
                "s" | "S" | "skip" => PromptResponse::Skip,
                "q" | "Q" | "quit" | "abort" => PromptResponse::Abort,
                _ => PromptResponse::Ready,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, BufReader, Read};

    /// A terminal nobody types into
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            loop {
                thread::sleep(Duration::from_secs(3600));
            }
        }
    }

    fn request<'a>(cancel: &'a AtomicBool, deadline: Option<Instant>) -> MediumRequest<'a> {
        MediumRequest {
            label: "KQ7MZA",
            last_location: Some("/media/card"),
            files: 4,
            deadline,
            cancel,
        }
    }

    fn ask(input: &'static str) -> (PromptResponse, String) {
        let cancel = AtomicBool::new(false);
        let mut output = Vec::new();
        let response = ConsolePrompt::new(input.as_bytes(), &mut output)
            .request(&request(&cancel, None));
        (response, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_console_answers() {
        assert_eq!(ask("\n").0, PromptResponse::Ready);
        assert_eq!(ask("s\n").0, PromptResponse::Skip);
        assert_eq!(ask("q\n").0, PromptResponse::Abort);
        assert_eq!(ask("").0, PromptResponse::Abort);
    }

    #[test]
    fn test_console_names_volume_and_location() {
        let (_, text) = ask("\n");
        assert!(text.contains("KQ7MZA"));
        assert!(text.contains("/media/card"));
        assert!(text.contains("4 file(s)"));
    }

    #[test]
    fn test_silent_terminal_expires_at_deadline() {
        let cancel = AtomicBool::new(false);
        let mut prompt = ConsolePrompt::new(BufReader::new(Silent), io::sink());
        let started = Instant::now();
        let deadline = started + Duration::from_millis(150);

        let response = prompt.request(&request(&cancel, Some(deadline)));

        assert_eq!(response, PromptResponse::Expired);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_ends_an_open_ended_wait() {
        let cancel = std::sync::Arc::new(AtomicBool::new(false));
        let setter = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            setter.store(true, Ordering::SeqCst);
        });

        let mut prompt = ConsolePrompt::new(BufReader::new(Silent), io::sink());
        let response = prompt.request(&request(&cancel, None));

        handle.join().unwrap();
        assert_eq!(response, PromptResponse::Abort);
    }

    #[test]
    fn test_closed_input_aborts_every_later_request() {
        let cancel = AtomicBool::new(false);
        let mut prompt = ConsolePrompt::new("".as_bytes(), io::sink());
        assert_eq!(prompt.request(&request(&cancel, None)), PromptResponse::Abort);
        assert_eq!(prompt.request(&request(&cancel, None)), PromptResponse::Abort);
    }
}
