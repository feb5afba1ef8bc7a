//! CLI command implementations

use crate::output::{print_json, OutputFormat};
use bytes::Bytes;
use playhead_core::drm::{exchange_license, KeySystemConfig};
use playhead_core::{classify_message, ErrorCategory, RetryPolicy};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use url::Url;

#[derive(Debug, Serialize)]
struct RetryStep {
    retry: u32,
    base_delay_ms: u64,
    min_delay_ms: u64,
    max_delay_ms: u64,
}

#[derive(Debug, Serialize)]
struct RetryPlan {
    policy: RetryPolicy,
    attempts_per_candidate: u32,
    steps: Vec<RetryStep>,
}

fn plan(policy: &RetryPolicy) -> RetryPlan {
    let policy = policy.normalized();
    let steps = (0..policy.max_retries)
        .map(|retry| RetryStep {
            retry,
            base_delay_ms: policy.delay_ms_with_sample(retry, 0.5),
            min_delay_ms: policy.delay_ms_with_sample(retry, 0.0),
            max_delay_ms: policy.delay_ms_with_sample(retry, 1.0),
        })
        .collect();
    RetryPlan {
        attempts_per_candidate: policy.max_retries + 1,
        policy,
        steps,
    }
}

/// Print the clamped policy and the delay range of each retry
pub fn retry_plan(policy: &RetryPolicy, format: OutputFormat) -> anyhow::Result<()> {
    let plan = plan(policy);
    if format == OutputFormat::Json {
        return print_json(&plan);
    }

    let p = &plan.policy;
    println!("Retry Policy:");
    println!("  Max retries: {}", p.max_retries);
    println!("  Base delay: {}ms", p.retry_delay_ms);
    println!("  Max delay: {}ms", p.max_retry_delay_ms);
    println!("  Multiplier: {}", p.backoff_multiplier);
    println!("  Jitter: {}", p.jitter_ratio);
    println!("  Retry on: {:?}", p.retry_on);
    println!("  Attempts per candidate: {}", plan.attempts_per_candidate);

    if plan.steps.is_empty() {
        println!("\nNo retries.");
        return Ok(());
    }

    println!("\nSchedule:");
    for step in &plan.steps {
        if step.min_delay_ms == step.max_delay_ms {
            println!("  retry {}: {}ms", step.retry + 1, step.base_delay_ms);
        } else {
            println!(
                "  retry {}: {}ms ({}-{}ms)",
                step.retry + 1,
                step.base_delay_ms,
                step.min_delay_ms,
                step.max_delay_ms
            );
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct Classification<'a> {
    message: &'a str,
    category: ErrorCategory,
    retried_by_default: bool,
}

/// Print the retry category of an error message
pub fn classify(message: &str, format: OutputFormat) -> anyhow::Result<()> {
    let category = classify_message(message);
    let result = Classification {
        message,
        category,
        retried_by_default: RetryPolicy::default().should_retry(category, 0),
    };

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            println!("Category: {}", result.category);
            println!("Retried by default: {}", result.retried_by_default);
            Ok(())
        }
    }
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid header '{}', expected Name:Value", raw))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("invalid header '{}', name is empty", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[derive(Debug, Serialize)]
struct LicenseReport {
    url: String,
    request_bytes: usize,
    response_bytes: usize,
    elapsed_ms: u64,
}

/// Perform one license exchange and report the response size
pub async fn license(
    license_url: &str,
    message_path: &Path,
    headers: &[String],
    timeout: Duration,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let url = Url::parse(license_url)?;
    let message = Bytes::from(std::fs::read(message_path)?);

    let mut config = KeySystemConfig::new("license-check");
    config.license_url = Some(url.clone());
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        config = config.with_header(&name, &value);
    }

    tracing::debug!(url = %url, bytes = message.len(), "Sending license request");
    let client = reqwest::Client::new();
    let started = Instant::now();
    let license = exchange_license(&client, &config, message.clone(), timeout).await?;

    let report = LicenseReport {
        url: url.to_string(),
        request_bytes: message.len(),
        response_bytes: license.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("License server: {}", report.url);
            println!("  Request: {} bytes", report.request_bytes);
            println!("  Response: {} bytes", report.response_bytes);
            println!("  Elapsed: {}ms", report.elapsed_ms);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_clamps_and_bounds_jitter() {
        let policy = RetryPolicy {
            max_retries: 9,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 3000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.5,
            ..Default::default()
        };
        let plan = plan(&policy);

        assert_eq!(plan.policy.max_retries, 5);
        assert_eq!(plan.attempts_per_candidate, 6);
        assert_eq!(plan.steps.len(), 5);
        assert_eq!(plan.steps[0].base_delay_ms, 1000);
        assert_eq!(plan.steps[0].min_delay_ms, 500);
        assert_eq!(plan.steps[0].max_delay_ms, 1500);
        // Capped delays never exceed the cap even with jitter.
        assert_eq!(plan.steps[4].max_delay_ms, 3000);
    }

    #[test]
    fn test_plan_without_retries() {
        let plan = plan(&RetryPolicy::no_retry());
        assert!(plan.steps.is_empty());
        assert_eq!(plan.attempts_per_candidate, 1);
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Authorization: Bearer abc").unwrap(),
            ("Authorization".to_string(), "Bearer abc".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header(":value").is_err());
    }
}
