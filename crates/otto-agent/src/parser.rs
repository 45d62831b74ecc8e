// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Single-pass tokenizer over the model's text stream.
//!
//! Tool calls travel inline in the text as `<tool:NAME {json}>`. The parser
//! turns raw text/reasoning deltas into structured events, preserving the
//! original chunk splitting for plain text so the client can render
//! incrementally. It is total: malformed markup degrades to a tool-call
//! event with a synthetic name the registry rejects, never an error. Memory
//! is bounded: an oversized tool body is flushed as malformed rather than
//! accumulated without limit.

use std::collections::HashSet;

use serde_json::json;

use otto_proto::ToolCall;

/// Synthetic tool name for unparseable markup. Not registered anywhere, so
/// dispatch rejects it as an unknown tool and the model sees the error.
pub const MALFORMED_TOOL: &str = "malformed_tool";

const MARKER: &str = "<tool:";
const MAX_NAME_LEN: usize = 128;
const MAX_BODY_LEN: usize = 128 * 1024;

/// One structured event out of the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Text(String),
    Reasoning(String),
    ToolCall(ToolCall),
    /// Emitted right after a tool call whose declaration ends the step.
    EndStep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Text,
    Name,
    Body,
    AwaitClose,
}

/// Incremental parser for one agent step. Restart at step boundaries by
/// constructing a fresh instance.
pub struct StreamParser {
    ends_step: HashSet<String>,
    state: State,
    /// How many chars of `MARKER` are currently matched in `Text` state.
    marker_pos: usize,
    text_buf: String,
    name_buf: String,
    body_buf: String,
    /// JSON body tracking: brace depth, string mode, escape mode.
    depth: u32,
    in_string: bool,
    escaped: bool,
    /// False when the body did not start with `{`; collected raw until `>`.
    json_body: bool,
}

impl StreamParser {
    pub fn new(ends_step: HashSet<String>) -> Self {
        Self {
            ends_step,
            state: State::Text,
            marker_pos: 0,
            text_buf: String::new(),
            name_buf: String::new(),
            body_buf: String::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            json_body: true,
        }
    }

    /// Feed one text delta; returns the events it completed.
    pub fn push_text(&mut self, chunk: &str) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        for c in chunk.chars() {
            self.step_char(c, &mut events);
        }
        // Flush plain text per incoming chunk so downstream rendering keeps
        // the provider's original splitting. Partial marker matches stay
        // held back until resolved.
        if !self.text_buf.is_empty() {
            events.push(ParsedEvent::Text(std::mem::take(&mut self.text_buf)));
        }
        events
    }

    /// Reasoning deltas are forwarded verbatim; tool markup is only ever
    /// parsed out of the text channel.
    pub fn push_reasoning(&mut self, chunk: &str) -> Vec<ParsedEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }
        vec![ParsedEvent::Reasoning(chunk.to_string())]
    }

    /// Signal end of stream. An unterminated tool marker becomes a
    /// malformed call; a partially matched marker was just text.
    pub fn finish(&mut self) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        match self.state {
            State::Text => {
                if self.marker_pos > 0 {
                    self.text_buf.push_str(&MARKER[..self.marker_pos]);
                    self.marker_pos = 0;
                }
                if !self.text_buf.is_empty() {
                    events.push(ParsedEvent::Text(std::mem::take(&mut self.text_buf)));
                }
            }
            State::Name | State::Body | State::AwaitClose => {
                let raw = format!("<tool:{} {}", self.name_buf, self.body_buf);
                self.emit_malformed(raw, &mut events);
            }
        }
        events
    }

    fn step_char(&mut self, c: char, events: &mut Vec<ParsedEvent>) {
        match self.state {
            State::Text => self.text_char(c, events),
            State::Name => self.name_char(c, events),
            State::Body => self.body_char(c, events),
            State::AwaitClose => self.await_close_char(c, events),
        }
    }

    fn text_char(&mut self, c: char, events: &mut Vec<ParsedEvent>) {
        let expected = MARKER.as_bytes()[self.marker_pos] as char;
        if c == expected {
            self.marker_pos += 1;
            if self.marker_pos == MARKER.len() {
                if !self.text_buf.is_empty() {
                    events.push(ParsedEvent::Text(std::mem::take(&mut self.text_buf)));
                }
                self.marker_pos = 0;
                self.enter_name();
            }
            return;
        }
        if self.marker_pos > 0 {
            // The partial match was plain text after all.
            self.text_buf.push_str(&MARKER[..self.marker_pos]);
            self.marker_pos = 0;
            if c == '<' {
                self.marker_pos = 1;
                return;
            }
        }
        self.text_buf.push(c);
    }

    fn name_char(&mut self, c: char, events: &mut Vec<ParsedEvent>) {
        match c {
            ' ' => {
                self.enter_body();
            }
            '>' => {
                // No-argument form: `<tool:end_turn>`.
                self.finish_call(json!({}), events);
            }
            c if (c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/')
                && self.name_buf.len() < MAX_NAME_LEN =>
            {
                self.name_buf.push(c);
            }
            other => {
                let raw = format!("<tool:{}{}", self.name_buf, other);
                self.emit_malformed(raw, events);
            }
        }
    }

    fn body_char(&mut self, c: char, events: &mut Vec<ParsedEvent>) {
        if self.body_buf.is_empty() {
            if c.is_whitespace() {
                return;
            }
            self.json_body = c == '{';
        }

        if self.body_buf.len() >= MAX_BODY_LEN {
            let raw = format!("<tool:{} {}", self.name_buf, self.body_buf);
            self.emit_malformed(raw, events);
            return;
        }

        if !self.json_body {
            if c == '>' {
                let raw = format!("<tool:{} {}", self.name_buf, self.body_buf);
                self.emit_malformed(raw, events);
                return;
            }
            self.body_buf.push(c);
            return;
        }

        self.body_buf.push(c);
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            return;
        }
        match c {
            '"' => self.in_string = true,
            '{' => self.depth += 1,
            '}' => {
                self.depth = self.depth.saturating_sub(1);
                if self.depth == 0 {
                    self.state = State::AwaitClose;
                }
            }
            _ => {}
        }
    }

    fn await_close_char(&mut self, c: char, events: &mut Vec<ParsedEvent>) {
        match c {
            '>' => {
                match serde_json::from_str::<serde_json::Value>(&self.body_buf) {
                    Ok(value) if value.is_object() => self.finish_call(value, events),
                    _ => {
                        let raw = format!("<tool:{} {}", self.name_buf, self.body_buf);
                        self.emit_malformed(raw, events);
                    }
                }
            }
            c if c.is_whitespace() => {}
            other => {
                let raw = format!("<tool:{} {}{}", self.name_buf, self.body_buf, other);
                self.emit_malformed(raw, events);
            }
        }
    }

    fn finish_call(&mut self, input: serde_json::Value, events: &mut Vec<ParsedEvent>) {
        let name = std::mem::take(&mut self.name_buf);
        self.reset_to_text();
        if name.is_empty() {
            events.push(ParsedEvent::ToolCall(ToolCall::new(
                MALFORMED_TOOL,
                json!({ "raw": format!("<tool: {input}>") }),
            )));
            return;
        }
        let ends = self.ends_step.contains(&name);
        events.push(ParsedEvent::ToolCall(ToolCall::new(name, input)));
        if ends {
            events.push(ParsedEvent::EndStep);
        }
    }

    fn emit_malformed(&mut self, raw: String, events: &mut Vec<ParsedEvent>) {
        self.reset_to_text();
        events.push(ParsedEvent::ToolCall(ToolCall::new(
            MALFORMED_TOOL,
            json!({ "raw": raw }),
        )));
    }

    fn enter_name(&mut self) {
        self.state = State::Name;
        self.name_buf.clear();
    }

    fn enter_body(&mut self) {
        self.state = State::Body;
        self.body_buf.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.json_body = true;
    }

    fn reset_to_text(&mut self) {
        self.state = State::Text;
        self.name_buf.clear();
        self.body_buf.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.json_body = true;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
