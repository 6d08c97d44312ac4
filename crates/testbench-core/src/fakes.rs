//! In-memory fakes for the text generation and container seams (testing only)
//!
//! `ScriptedTextGenerator` replays queued responses and records every prompt.
//! `FakeContainer` answers commands from substring rules, records every
//! request, and keeps written files in a map.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::container::{ContainerError, ContainerHandle, ExecOutput, ExecRequest};
use crate::llm::TextGenerator;

// ---------------------------------------------------------------------------
// ScriptedTextGenerator
// ---------------------------------------------------------------------------

/// One recorded `complete` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub prompt: String,
    pub system: Option<String>,
}

/// Returns queued responses in order, then `""` once the queue is drained.
#[derive(Debug, Default)]
pub struct ScriptedTextGenerator {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<RecordedPrompt>>,
}

impl ScriptedTextGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedTextGenerator {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> String {
        self.prompts.lock().unwrap().push(RecordedPrompt {
            prompt: prompt.to_string(),
            system: system.map(str::to_string),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// FakeContainer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ExecRule {
    pattern: String,
    /// Replayed in order; the last one repeats.
    outputs: VecDeque<ExecOutput>,
}

/// Rule-driven container double.
///
/// A request matches the first rule whose pattern is a substring of its
/// space-joined argv. Unmatched requests succeed with empty output.
#[derive(Debug)]
pub struct FakeContainer {
    id: String,
    rules: Mutex<Vec<ExecRule>>,
    calls: Mutex<Vec<ExecRequest>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    interactions: AtomicUsize,
}

impl Default for FakeContainer {
    fn default() -> Self {
        Self::new("fake-container")
    }
}

impl FakeContainer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            interactions: AtomicUsize::new(0),
        }
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn on(self, pattern: impl Into<String>, output: ExecOutput) -> Self {
        self.on_sequence(pattern, vec![output])
    }

    /// Answer successive matching commands with `outputs`, repeating the last.
    pub fn on_sequence(self, pattern: impl Into<String>, outputs: Vec<ExecOutput>) -> Self {
        self.rules.lock().unwrap().push(ExecRule {
            pattern: pattern.into(),
            outputs: outputs.into(),
        });
        self
    }

    pub fn with_file(self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.lock().unwrap().insert(path.into(), content.into());
        self
    }

    pub fn calls(&self) -> Vec<ExecRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded requests whose command line contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> Vec<ExecRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.command_line().contains(pattern))
            .cloned()
            .collect()
    }

    /// Total exec, read and write operations.
    pub fn interaction_count(&self) -> usize {
        self.interactions.load(Ordering::SeqCst)
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[async_trait]
impl ContainerHandle for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput, ContainerError> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        if request.argv.is_empty() {
            return Err(ContainerError::EmptyCommand);
        }
        let line = request.command_line();
        self.calls.lock().unwrap().push(request);

        let mut rules = self.rules.lock().unwrap();
        let output = rules
            .iter_mut()
            .find(|rule| line.contains(&rule.pattern))
            .and_then(|rule| {
                if rule.outputs.len() > 1 {
                    rule.outputs.pop_front()
                } else {
                    rule.outputs.front().cloned()
                }
            })
            .unwrap_or_else(|| ExecOutput::ok(""));
        Ok(output)
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ContainerError> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ContainerError> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ContainerError::FileNotFound(path.to_string()))
    }
}
