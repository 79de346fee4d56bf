use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote text-to-vector service. One call embeds a whole batch; an error
/// fails that call only.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbedReq<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct TeiOut {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OAData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OAOut {
    data: Vec<OAData>,
}

pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        })
    }
}

/// Accepts both the TEI and the OpenAI response layout.
fn parse_embeddings(bytes: &[u8]) -> Result<Vec<Vec<f32>>> {
    if let Ok(t) = serde_json::from_slice::<TeiOut>(bytes) {
        Ok(t.embeddings)
    } else if let Ok(o) = serde_json::from_slice::<OAOut>(bytes) {
        Ok(o.data.into_iter().map(|d| d.embedding).collect())
    } else {
        Err(anyhow!("unrecognized embedding response shape"))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut req = self.client.post(&self.endpoint).json(&EmbedReq {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("embedding request to '{}' failed", self.endpoint))?;
        if !resp.status().is_success() {
            return Err(anyhow!(
                "embedding request to '{}' failed with status: {}",
                self.endpoint,
                resp.status()
            ));
        }

        let bytes = resp.bytes().await?;
        let vectors = parse_embeddings(&bytes)?;
        if vectors.len() != texts.len() {
            return Err(anyhow!(
                "embedding service returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            ));
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tei_shape() {
        let body = br#"{"embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#;
        let out = parse_embeddings(body).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], vec![0.3, 0.4]);
    }

    #[test]
    fn parses_openai_shape() {
        let body = br#"{"data": [{"embedding": [1.0, 0.0], "index": 0}], "model": "m"}"#;
        let out = parse_embeddings(body).unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0]]);
    }

    #[test]
    fn rejects_unknown_shape() {
        assert!(parse_embeddings(br#"{"vectors": []}"#).is_err());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let p = HttpEmbeddingProvider::new("http://tei:80/", "m", None).unwrap();
        assert_eq!(p.endpoint, "http://tei:80/embeddings");
    }
}
