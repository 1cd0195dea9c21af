//! Job commands.

use anyhow::{Context, Result};
use jobrelay_core::ResourceId;
use serde_json::Value;

use crate::client::ApiClient;

pub async fn submit(
    client: &ApiClient,
    job_type: &str,
    payload: &str,
    max_retries: Option<i32>,
    timeout: Option<i32>,
) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let (id, status) = client
        .submit_job(job_type, payload, max_retries, timeout)
        .await?;
    println!("Submitted job {} ({})", id, status);
    Ok(())
}

pub async fn list(client: &ApiClient, limit: u32, offset: u32) -> Result<()> {
    let body = client.list_jobs(limit, offset).await?;
    let jobs = body["jobs"].as_array().cloned().unwrap_or_default();
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    println!(
        "{:<38} {:<16} {:<8} {:>7} CREATED",
        "ID", "TYPE", "STATUS", "RETRIES"
    );
    for job in jobs {
        println!(
            "{:<38} {:<16} {:<8} {:>7} {}",
            job["id"].as_str().unwrap_or("-"),
            job["type"].as_str().unwrap_or("-"),
            job["status"].as_str().unwrap_or("-"),
            job["retry_count"].as_i64().unwrap_or(0),
            job["created_at"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    let id: ResourceId = id.parse().context("Invalid job ID")?;
    let job = client.get_job(id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

pub async fn stats(client: &ApiClient) -> Result<()> {
    let body = client.job_stats().await?;
    if let Some(counts) = body["counts"].as_object() {
        for (status, count) in counts {
            println!("{:<10} {}", status, count);
        }
    }
    Ok(())
}
