//! Reply parser: turns raw terminal output into classified chunks and
//! completed reply lines.
//!
//! The child speaks free-form text, so everything here works from a small
//! set of sentinel strings (see [`ReplyMarkers`]). Sequencing decisions are
//! left to the session; this module only answers "what does this chunk
//! mean right now?".

use crate::sftp_cli::types::ReplyMarkers;

// ── Byte → text assembly ────────────────────────────────────────────────

/// Decodes transport chunks as UTF-8, carrying an incomplete trailing
/// sequence over to the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    carry: Vec<u8>,
}

impl Utf8Assembler {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(bytes);

        let mut text = String::with_capacity(data.len());
        let mut rest = data.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    text.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[bad..];
                        }
                        None => {
                            // truncated sequence at the end: keep it for next time
                            self.carry = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

// ── Line splitting ──────────────────────────────────────────────────────

/// Split on `\n` and `\r`; runs of terminators collapse into one boundary.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split(|c| c == '\n' || c == '\r')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Reply buffer ────────────────────────────────────────────────────────

/// Output accumulated for the in-flight command (or the open handshake).
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    text: String,
}

impl ReplyBuffer {
    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Text from `since` on, widened by `overlap` bytes so a marker split
    /// across two chunks is still seen.
    pub fn recent(&self, since: usize, overlap: usize) -> &str {
        let mut start = since.saturating_sub(overlap).min(self.text.len());
        while !self.text.is_char_boundary(start) {
            start -= 1;
        }
        &self.text[start..]
    }
}

// ── Chunk classification ────────────────────────────────────────────────

/// What the session is waiting for when a chunk arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseContext {
    /// Connect callback still pending.
    pub handshake_open: bool,
    pub command_active: bool,
    /// Active command is the terminating one.
    pub terminating: bool,
    pub has_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAction {
    /// Handshake output carried a connection-fatal phrase (the offending line).
    FatalConnect(String),
    RemoteClosed,
    /// Nobody is listening.
    Discard,
    /// Active command (or handshake) finished.
    Complete,
    /// Buffered; forward the raw chunk to the progress sink.
    Progress,
    PasswordPrompt,
    /// Buffered, nothing else to do yet.
    Absorb,
}

#[derive(Debug, Clone)]
pub struct ReplyParser {
    markers: ReplyMarkers,
    password_prompt_lower: String,
}

impl ReplyParser {
    pub fn new(markers: ReplyMarkers) -> Self {
        let password_prompt_lower = markers.password_prompt.to_lowercase();
        Self {
            markers,
            password_prompt_lower,
        }
    }

    pub fn markers(&self) -> &ReplyMarkers {
        &self.markers
    }

    /// Longest marker searched for in the window, minus one.
    pub fn overlap(&self) -> usize {
        let fatal = self.markers.fatal.iter().map(String::len).max().unwrap_or(0);
        self.markers
            .prompt
            .len()
            .max(self.markers.disconnect_ack.len())
            .max(self.markers.password_prompt.len())
            .max(fatal)
            .saturating_sub(1)
    }

    /// Classify one chunk. `window` is the text completion markers are
    /// searched in: the recent buffer tail when output is being tracked,
    /// otherwise the chunk itself.
    pub fn classify(&self, ctx: ParseContext, chunk: &str, window: &str) -> ChunkAction {
        if ctx.handshake_open && !ctx.command_active {
            if let Some(line) = self.fatal_line(window) {
                return ChunkAction::FatalConnect(line);
            }
        }
        if self.is_remote_closed(chunk) {
            return ChunkAction::RemoteClosed;
        }
        if !ctx.command_active && !ctx.handshake_open {
            return ChunkAction::Discard;
        }
        if self.is_prompt(window) || (ctx.terminating && self.is_disconnect_ack(window)) {
            return ChunkAction::Complete;
        }
        if ctx.command_active {
            return if ctx.has_progress {
                ChunkAction::Progress
            } else {
                ChunkAction::Absorb
            };
        }
        if self.is_password_prompt(window) {
            return ChunkAction::PasswordPrompt;
        }
        ChunkAction::Absorb
    }

    /// First line of `text` carrying a connection-fatal phrase.
    pub fn fatal_line(&self, text: &str) -> Option<String> {
        let marker = self.markers.fatal.iter().find(|m| text.contains(m.as_str()))?;
        split_lines(text)
            .into_iter()
            .find(|l| l.contains(marker.as_str()))
            .map(|l| l.trim().to_string())
    }

    pub fn is_remote_closed(&self, chunk: &str) -> bool {
        !self.markers.remote_closed.is_empty() && chunk.contains(&self.markers.remote_closed)
    }

    pub fn is_prompt(&self, text: &str) -> bool {
        text.contains(&self.markers.prompt)
    }

    pub fn is_disconnect_ack(&self, text: &str) -> bool {
        !self.markers.disconnect_ack.is_empty() && text.contains(&self.markers.disconnect_ack)
    }

    pub fn is_password_prompt(&self, text: &str) -> bool {
        !self.password_prompt_lower.is_empty()
            && text.to_lowercase().contains(&self.password_prompt_lower)
    }

    /// Lines of a completed reply, without prompt-only lines and without
    /// the terminal's echo of `command_line`.
    pub fn reply_lines(&self, text: &str, command_line: &str) -> Vec<String> {
        let prompt = self.markers.prompt.as_str();
        let mut lines: Vec<String> = split_lines(text)
            .into_iter()
            .filter(|l| l.trim() != prompt)
            .collect();
        let echoed = lines.first().map_or(false, |first| {
            let first = first.trim_start();
            let first = first.strip_prefix(prompt).unwrap_or(first);
            first.trim() == command_line.trim()
        });
        if echoed {
            lines.remove(0);
        }
        // the trailing prompt may share a line with unterminated output
        if let Some(last) = lines.last_mut() {
            if let Some(idx) = last.rfind(prompt) {
                last.truncate(idx);
                if last.trim().is_empty() {
                    lines.pop();
                }
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ReplyParser {
        ReplyParser::new(ReplyMarkers::default())
    }

    fn active() -> ParseContext {
        ParseContext {
            command_active: true,
            ..ParseContext::default()
        }
    }

    #[test]
    fn split_lines_collapses_terminators() {
        assert_eq!(split_lines("a\r\nb\n\n\rc\r"), vec!["a", "b", "c"]);
        assert_eq!(split_lines("\r\n\r\n"), Vec::<String>::new());
        assert_eq!(split_lines("single"), vec!["single"]);
    }

    #[test]
    fn utf8_split_across_chunks() {
        let mut asm = Utf8Assembler::default();
        let bytes = "é!".as_bytes();
        assert_eq!(asm.push(&bytes[..1]), "");
        assert_eq!(asm.push(&bytes[1..]), "é!");
        assert_eq!(asm.push(&[0xff, b'x']), "\u{fffd}x");
    }

    #[test]
    fn utf8_invalid_byte_keeps_truncated_tail() {
        let mut asm = Utf8Assembler::default();
        let e_acute = "é".as_bytes();
        assert_eq!(asm.push(&[b'a', 0xff, b'b', e_acute[0]]), "a\u{fffd}b");
        assert_eq!(asm.push(&e_acute[1..]), "é");
    }

    #[test]
    fn recent_window_respects_char_boundaries() {
        let mut buf = ReplyBuffer::default();
        buf.push("ééé");
        let since = buf.len();
        buf.push("sftp> ");
        assert_eq!(buf.recent(since, 2), "ésftp> ");
        assert_eq!(buf.recent(since, 3), "éésftp> ");
        assert_eq!(buf.recent(0, 10), "ééésftp> ");
    }

    #[test]
    fn prompt_completes_active_command() {
        let p = parser();
        let chunk = "file.txt\r\nsftp> ";
        assert_eq!(p.classify(active(), chunk, chunk), ChunkAction::Complete);
        assert_eq!(p.classify(active(), "partial", "partial"), ChunkAction::Absorb);
        let with_progress = ParseContext {
            has_progress: true,
            ..active()
        };
        assert_eq!(p.classify(with_progress, " 42% ", " 42% "), ChunkAction::Progress);
    }

    #[test]
    fn prompt_split_across_chunks_uses_window() {
        let p = parser();
        let mut buf = ReplyBuffer::default();
        buf.push("out\nsft");
        let since = buf.len();
        buf.push("p> ");
        let window = buf.recent(since, p.overlap());
        assert_eq!(p.classify(active(), "p> ", window), ChunkAction::Complete);
    }

    #[test]
    fn idle_output_is_discarded() {
        let p = parser();
        let ctx = ParseContext::default();
        assert_eq!(p.classify(ctx, "sftp> ", "sftp> "), ChunkAction::Discard);
    }

    #[test]
    fn fatal_only_while_handshake_open() {
        let p = parser();
        let chunk = "ssh: connect to host h port 22: Connection timed out\r\n";
        let handshake = ParseContext {
            handshake_open: true,
            ..ParseContext::default()
        };
        assert_eq!(
            p.classify(handshake, chunk, chunk),
            ChunkAction::FatalConnect("ssh: connect to host h port 22: Connection timed out".into())
        );
        // same text as command output is just output
        assert_eq!(p.classify(active(), chunk, chunk), ChunkAction::Absorb);
    }

    #[test]
    fn fatal_phrase_split_across_chunks_uses_window() {
        let p = parser();
        let handshake = ParseContext {
            handshake_open: true,
            ..ParseContext::default()
        };
        let mut buf = ReplyBuffer::default();
        buf.push("ssh: connect to host h port 22: Connection ti");
        let since = buf.len();
        buf.push("med out\r\n");
        let window = buf.recent(since, p.overlap());
        match p.classify(handshake, "med out\r\n", window) {
            ChunkAction::FatalConnect(line) => assert!(line.ends_with("Connection timed out")),
            other => panic!("expected a fatal line, got {:?}", other),
        }
    }

    #[test]
    fn remote_close_always_wins() {
        let p = parser();
        let chunk = "Connection to h closed by remote host.\r\n";
        assert_eq!(p.classify(active(), chunk, chunk), ChunkAction::RemoteClosed);
        assert_eq!(p.classify(ParseContext::default(), chunk, chunk), ChunkAction::RemoteClosed);
    }

    #[test]
    fn password_prompt_during_handshake() {
        let p = parser();
        let handshake = ParseContext {
            handshake_open: true,
            ..ParseContext::default()
        };
        let chunk = "alice@files.example's Password: ";
        assert_eq!(p.classify(handshake, chunk, chunk), ChunkAction::PasswordPrompt);
        let banner = "Connected to h.\r\n";
        assert_eq!(p.classify(handshake, banner, banner), ChunkAction::Absorb);
    }

    #[test]
    fn disconnect_ack_only_for_terminating_command() {
        let p = parser();
        let terminating = ParseContext {
            terminating: true,
            ..active()
        };
        assert_eq!(p.classify(terminating, "bye\r\n", "bye\r\n"), ChunkAction::Complete);
        assert_eq!(p.classify(active(), "bye\r\n", "bye\r\n"), ChunkAction::Absorb);
    }

    #[test]
    fn reply_lines_strip_echo_and_prompt() {
        let p = parser();
        let text = "pwd\r\nRemote working directory: /home/alice\r\nsftp> ";
        assert_eq!(p.reply_lines(text, "pwd"), vec!["Remote working directory: /home/alice"]);

        let unterminated = "ls -l x\r\n-rw-r--r-- 1 a b 1 Jan  1 00:00 x\r\nsftp> ";
        let lines = p.reply_lines(unterminated, "ls -l x");
        assert_eq!(lines, vec!["-rw-r--r-- 1 a b 1 Jan  1 00:00 x"]);

        let glued = "done sftp> ";
        assert_eq!(p.reply_lines(glued, "x"), vec!["done "]);
    }
}
