use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::models::{Category, ClusterLabel};
use crate::services::{ClusterNameStore, CompletionProvider};

/// One text group inside a cluster, as seen by the namer.
#[derive(Debug, Clone)]
pub struct MemberText {
    pub key: String,
    pub name: String,
    pub command: String,
    pub pid_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterProfile {
    pub members: Vec<MemberText>,
}

impl ClusterProfile {
    pub fn total_pids(&self) -> usize {
        self.members.iter().map(|m| m.pid_count).sum()
    }

    /// Order-independent fingerprint of the text groups in the cluster.
    pub fn signature(&self) -> String {
        let mut keys: Vec<&str> = self.members.iter().map(|m| m.key.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        // FNV-1a, stable across builds so persisted names stay addressable
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for key in &keys {
            for b in key.bytes().chain(std::iter::once(0u8)) {
                hash ^= b as u64;
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        format!("{}-{:016x}", keys.len(), hash)
    }
}

/// Which heuristic produced a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingStep {
    SingleIdentity,
    CommonPrefix,
    DominantMember,
    CategoryFallback,
}

lazy_static! {
    // Checked top to bottom; first match wins.
    static ref CATEGORY_PATTERNS: Vec<(Category, Regex)> = vec![
        (
            Category::Browser,
            Regex::new(r"(?i)\b(safari|chrome|chromium|firefox|brave|msedge|microsoft edge|opera|vivaldi|webkit|arc)\b").unwrap(),
        ),
        (
            Category::Development,
            Regex::new(r"(?i)\b(node|npm|npx|yarn|pnpm|deno|bun|cargo|rustc|rust-analyzer|python\d*(\.\d+)?|java|gradle|gopls|go|code|vscode|cursor|xcode|git|docker|containerd|clang|gcc|make|webpack|vite|tsserver|jupyter|vim|nvim|emacs|idea|pycharm)\b").unwrap(),
        ),
        (
            Category::Communication,
            Regex::new(r"(?i)\b(slack|discord|zoom|teams|telegram|signal|whatsapp|messages|mail|thunderbird|skype|facetime|outlook)\b").unwrap(),
        ),
        (
            Category::Media,
            Regex::new(r"(?i)\b(spotify|music|vlc|mpv|itunes|photos|quicktime|obs|ffmpeg|iina|podcasts|pulseaudio|pipewire)\b").unwrap(),
        ),
        (
            Category::System,
            Regex::new(r"(?i)\b(kernel_task|launchd|systemd|kthreadd|kworker|ksoftirqd|init|windowserver|loginwindow|dbus-daemon|udevd|sshd|cron|crond|syslogd|journald|networkmanager|coreaudiod|mds|mds_stores|daemon)\b").unwrap(),
        ),
        (
            Category::Background,
            Regex::new(r"(?i)\b(helper|agent|service|updater|update|sync|worker|crashpad|crashpad_handler|extension|plugin|renderer|gpu-process)\b").unwrap(),
        ),
    ];
}

/// Keyword classification over a name/command corpus. Pure: same input, same answer.
pub fn infer_category<'a, I>(corpus: I) -> Category
where
    I: IntoIterator<Item = &'a str>,
{
    let text: Vec<&str> = corpus.into_iter().collect();
    for (category, pattern) in CATEGORY_PATTERNS.iter() {
        if text.iter().any(|t| pattern.is_match(t)) {
            return *category;
        }
    }
    Category::Other
}

fn profile_category(profile: &ClusterProfile) -> Category {
    infer_category(
        profile
            .members
            .iter()
            .flat_map(|m| [m.name.as_str(), m.command.as_str()]),
    )
}

fn common_prefix(names: &[&str]) -> String {
    let Some(first) = names.first() else {
        return String::new();
    };
    let mut len = first.len();
    for name in &names[1..] {
        len = first
            .char_indices()
            .zip(name.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(len);
    }
    first[..len]
        .trim_end_matches(|c: char| matches!(c, '-' | '_' | '.' | ' ' | ':' | '/'))
        .to_string()
}

/// Layered naming heuristics. Always produces a label.
pub fn heuristic_label(profile: &ClusterProfile) -> (ClusterLabel, NamingStep) {
    let category = profile_category(profile);
    let total = profile.total_pids();

    let mut unique: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for m in &profile.members {
        if !counts.contains_key(m.name.as_str()) {
            unique.push(m.name.as_str());
        }
        *counts.entry(m.name.as_str()).or_insert(0) += 1;
    }

    if unique.len() == 1 {
        let name = unique[0];
        let label = ClusterLabel {
            name: if total > 1 {
                format!("{name} ({total})")
            } else {
                name.to_string()
            },
            description: format!(
                "{total} instance{} of {name}",
                if total == 1 { "" } else { "s" }
            ),
            category,
        };
        return (label, NamingStep::SingleIdentity);
    }

    if unique.len() > 1 {
        let prefix = common_prefix(&unique);
        if prefix.chars().count() >= 3 {
            let label = ClusterLabel {
                description: format!("{} related processes ({total} running)", unique.len()),
                name: prefix,
                category,
            };
            return (label, NamingStep::CommonPrefix);
        }

        let groups = profile.members.len();
        let mut dominant: Option<(&str, usize)> = None;
        for name in unique.iter().copied() {
            let c = counts[name];
            if dominant.map_or(true, |(_, best)| c > best) {
                dominant = Some((name, c));
            }
        }
        if let Some((name, c)) = dominant {
            if c * 2 > groups {
                let label = ClusterLabel {
                    name: format!("{name} & related"),
                    description: format!("{name} with {} other processes", unique.len() - 1),
                    category,
                };
                return (label, NamingStep::DominantMember);
            }
        }
    }

    let label = ClusterLabel {
        name: format!("{category} processes"),
        description: format!("{} processes ({total} running)", unique.len()),
        category,
    };
    (label, NamingStep::CategoryFallback)
}

#[async_trait]
pub trait ClusterNamer: Send + Sync {
    async fn label(&self, profile: &ClusterProfile) -> ClusterLabel;

    /// Drops remembered labels for memberships outside `live` signatures.
    fn retain_signatures(&self, _live: &HashSet<String>) {}
}

pub struct HeuristicNamer;

#[async_trait]
impl ClusterNamer for HeuristicNamer {
    async fn label(&self, profile: &ClusterProfile) -> ClusterLabel {
        heuristic_label(profile).0
    }
}

#[derive(Deserialize)]
struct ModelReply {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Heuristics first; the remote model only sees clusters that fell through
/// to the category fallback. Answers are remembered per membership signature.
pub struct ModelNamer {
    completion: Arc<dyn CompletionProvider>,
    names: Arc<dyn ClusterNameStore>,
    memo: RwLock<HashMap<String, ClusterLabel>>,
}

impl ModelNamer {
    pub fn new(completion: Arc<dyn CompletionProvider>, names: Arc<dyn ClusterNameStore>) -> Self {
        Self {
            completion,
            names,
            memo: RwLock::new(HashMap::new()),
        }
    }

    fn prompt(profile: &ClusterProfile) -> String {
        let mut prompt = String::from(
            "These operating system processes were grouped together because their \
             command lines are semantically similar. Give the group a short name \
             (2-5 words) and pick one category from: System, Development, Browser, \
             Communication, Media, Background, Other.\n\nProcesses:\n",
        );
        for (i, m) in profile.members.iter().take(20).enumerate() {
            let cmd: String = m.command.chars().take(160).collect();
            prompt.push_str(&format!("{}. {}: {} (x{})\n", i + 1, m.name, cmd, m.pid_count));
        }
        if profile.members.len() > 20 {
            prompt.push_str(&format!("... and {} more\n", profile.members.len() - 20));
        }
        prompt.push_str(
            "\nReply with a JSON object: {\"name\": ..., \"description\": ..., \"category\": ...}\n",
        );
        prompt
    }

    fn parse_reply(reply: &str, fallback: &ClusterLabel) -> Option<ClusterLabel> {
        let start = reply.find('{')?;
        let end = reply.rfind('}')?;
        if end < start {
            return None;
        }
        let parsed: ModelReply = serde_json::from_str(&reply[start..=end]).ok()?;
        let name = parsed.name.trim();
        if name.is_empty() {
            return None;
        }
        Some(ClusterLabel {
            name: name.to_string(),
            description: parsed
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| fallback.description.clone()),
            category: parsed
                .category
                .as_deref()
                .and_then(Category::parse)
                .unwrap_or(fallback.category),
        })
    }

    fn remember(&self, signature: &str, label: &ClusterLabel) {
        if let Ok(mut memo) = self.memo.write() {
            memo.insert(signature.to_string(), label.clone());
        }
    }
}

#[async_trait]
impl ClusterNamer for ModelNamer {
    async fn label(&self, profile: &ClusterProfile) -> ClusterLabel {
        let (fallback, step) = heuristic_label(profile);
        if step != NamingStep::CategoryFallback {
            return fallback;
        }

        let signature = profile.signature();
        let memo_hit = self.memo.read().ok().and_then(|m| m.get(&signature).cloned());
        if let Some(hit) = memo_hit {
            return hit;
        }
        match self.names.get_label(&signature).await {
            Ok(Some(stored)) => {
                self.remember(&signature, &stored);
                return stored;
            }
            Ok(None) => {}
            Err(e) => warn!("Cluster name lookup failed: {e:#}"),
        }

        debug!("Asking model to name cluster {signature}");
        let label = match self.completion.complete(&Self::prompt(profile)).await {
            Ok(reply) => match Self::parse_reply(&reply, &fallback) {
                Some(label) => label,
                None => {
                    warn!("Unusable cluster name from model, keeping '{}'", fallback.name);
                    return fallback;
                }
            },
            Err(e) => {
                warn!("Model naming failed, keeping '{}': {e:#}", fallback.name);
                return fallback;
            }
        };

        self.remember(&signature, &label);
        if let Err(e) = self.names.put_label(&signature, &label).await {
            warn!("Failed to persist cluster name: {e:#}");
        }
        label
    }

    // persisted names stay in SQLite; only the in-memory copy is trimmed
    fn retain_signatures(&self, live: &HashSet<String>) {
        if let Ok(mut memo) = self.memo.write() {
            memo.retain(|signature, _| live.contains(signature));
        }
    }
}
