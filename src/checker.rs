//! Liveness check for a list of models: one short prompt each, all at once.

use std::time::Duration;

use futures_util::future::join_all;

use crate::error::ChatError;
use crate::models::CATALOG;
use crate::openrouter::OpenRouterClient;
use crate::state::ChatMessage;

pub const CHECK_PROMPT: &str = "Explain yourself in one sentence.";
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub id: String,
    pub name: String,
}

impl ModelTarget {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: crate::models::display_name(id).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    Dead(String),
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub target: ModelTarget,
    pub verdict: Verdict,
}

impl CheckResult {
    pub fn is_alive(&self) -> bool {
        self.verdict == Verdict::Alive
    }
}

/// The built-in catalog, used when no models are named.
pub fn catalog_targets() -> Vec<ModelTarget> {
    CATALOG
        .iter()
        .map(|entry| ModelTarget {
            id: entry.id.to_string(),
            name: entry.name.to_string(),
        })
        .collect()
}

/// Parse `id | name` lines; the name is optional and blank lines are ignored.
pub fn parse_model_list(content: &str) -> Vec<ModelTarget> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut parts = line.splitn(2, '|');
            let id = parts.next().unwrap_or_default().trim().to_string();
            let name = parts
                .next()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| id.clone());
            ModelTarget { id, name }
        })
        .collect()
}

/// Working models in the same `id | name` format.
pub fn format_model_list(results: &[CheckResult]) -> String {
    results
        .iter()
        .filter(|r| r.is_alive())
        .map(|r| format!("{} | {}", r.target.id, r.target.name))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn check_model(client: &OpenRouterClient, target: ModelTarget, timeout: Duration) -> CheckResult {
    let messages = [ChatMessage::user(CHECK_PROMPT)];
    let verdict = match tokio::time::timeout(timeout, client.complete(&target.id, &messages)).await {
        Ok(Ok(content)) if !content.trim().is_empty() => Verdict::Alive,
        Ok(Ok(_)) => Verdict::Dead("No Content".to_string()),
        Ok(Err(ChatError::Upstream { status, .. })) => Verdict::Dead(format!("Status {}", status)),
        Ok(Err(e)) => Verdict::Dead(format!("Error: {}", e)),
        Err(_) => Verdict::Dead(format!("Timed out after {}s", timeout.as_secs())),
    };

    tracing::debug!("{} -> {:?}", target.id, verdict);
    CheckResult { target, verdict }
}

/// Check every target concurrently; results keep the input order.
pub async fn check_models(
    client: &OpenRouterClient,
    targets: Vec<ModelTarget>,
    timeout: Duration,
) -> Vec<CheckResult> {
    tracing::info!("Checking {} models", targets.len());
    join_all(
        targets
            .into_iter()
            .map(|target| check_model(client, target, timeout)),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_list_lines() {
        let targets = parse_model_list("a/b:free | Model B\n\n  c/d  \ne/f |   \n");
        assert_eq!(
            targets,
            vec![
                ModelTarget { id: "a/b:free".into(), name: "Model B".into() },
                ModelTarget { id: "c/d".into(), name: "c/d".into() },
                ModelTarget { id: "e/f".into(), name: "e/f".into() },
            ]
        );
    }

    #[test]
    fn formats_only_working_models() {
        let results = vec![
            CheckResult { target: ModelTarget::new("openrouter/free"), verdict: Verdict::Alive },
            CheckResult { target: ModelTarget::new("x/y"), verdict: Verdict::Dead("Status 404".into()) },
        ];
        assert_eq!(format_model_list(&results), "openrouter/free | OpenRouter: Auto (Free)");
    }

    #[test]
    fn catalog_targets_cover_the_catalog() {
        let targets = catalog_targets();
        assert_eq!(targets.len(), CATALOG.len());
        assert_eq!(targets[0].id, crate::models::DEFAULT_MODEL);
    }
}
