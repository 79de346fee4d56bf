use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::models::stats::ClusterStats;

pub const ROOT_CLUSTER_ID: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    System,
    Development,
    Browser,
    Communication,
    Media,
    Background,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::System => "System",
            Category::Development => "Development",
            Category::Browser => "Browser",
            Category::Communication => "Communication",
            Category::Media => "Media",
            Category::Background => "Background",
            Category::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Category::System),
            "development" => Some(Category::Development),
            "browser" => Some(Category::Browser),
            "communication" => Some(Category::Communication),
            "media" => Some(Category::Media),
            "background" => Some(Category::Background),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-facing identity of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLabel {
    pub name: String,
    pub description: String,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: Category,
    /// Member pids in join order, no duplicates
    pub pids: Vec<u32>,
    /// Unique text-group keys covered by this cluster
    pub text_keys: Vec<String>,
    /// Mean of member embeddings. Empty means "no valid grouping key".
    #[serde(skip)]
    pub centroid: Vec<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Cluster>,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub stats: ClusterStats,
}

impl Cluster {
    pub fn new(label: ClusterLabel, pids: Vec<u32>, text_keys: Vec<String>, centroid: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: label.name,
            description: label.description,
            category: label.category,
            pids,
            text_keys,
            centroid,
            children: Vec::new(),
            parent_id: None,
            depth: 1,
            stats: ClusterStats::default(),
        }
    }

    pub fn contains_pid(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterTree {
    pub root: Cluster,
    /// Root followed by every cluster, children omitted
    pub clusters: Vec<Cluster>,
    pub rebuilt_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ClusterTree {
    pub fn new(root: Cluster, clusters: Vec<Cluster>, rebuilt_at: Option<DateTime<Utc>>) -> Self {
        let index = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Self {
            root,
            clusters,
            rebuilt_at,
            index,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Cluster> {
        self.index.get(id).map(|&i| &self.clusters[i])
    }

    /// Top-level clusters (excluding the synthetic root)
    pub fn top_level(&self) -> &[Cluster] {
        &self.root.children
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}
