//! Scripted collaborators shared by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{ProcessDescriptor, ProcessStats};
use crate::services::{CompletionProvider, EmbeddingProvider};

/// Active descriptor (1% cpu) for tests.
pub fn desc(pid: u32, name: &str, command: &str) -> ProcessDescriptor {
    ProcessDescriptor::new(pid, name, command).with_stats(ProcessStats {
        cpu_usage: 1.0,
        memory_bytes: 16 * 1024 * 1024,
        ..ProcessStats::empty()
    })
}

/// Embedding provider answering from a fixed text -> vector table.
/// A request containing any failing text fails as a whole.
#[derive(Default)]
pub struct MockProvider {
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if let Some(bad) = texts.iter().find(|t| self.failing.contains(*t)) {
            return Err(anyhow!("rate limited while embedding '{bad}'"));
        }
        let out = texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .ok_or_else(|| anyhow!("no scripted vector for '{t}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(out)
    }
}

/// Completion provider returning a canned reply and recording prompts.
pub struct MockCompletion {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err("model unavailable".to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}
