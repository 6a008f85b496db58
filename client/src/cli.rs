use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::pool::WorkerSummary;
use common::{JobInfo, JobRequest, TaskStatus};
use reqwest::Client;
use serde_json::json;
use std::{env, time::Duration};

/// Igual que en el nodo:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Envía un job del catálogo (ej: WordCount)
    Submit {
        #[arg(value_name = "JOB")]
        job: String,

        /// Un item {"text": ...} por cada --text, en orden
        #[arg(long = "text", value_name = "TEXTO")]
        texts: Vec<String>,

        /// Patrón de archivos; el master arma un item por archivo
        #[arg(long, value_name = "GLOB")]
        input_glob: Option<String>,

        /// Espera a que el job termine e imprime el resultado
        #[arg(long)]
        wait: bool,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Cancela un job en curso
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista los workers conectados
    Workers,
}

fn job_request(job: String, texts: Vec<String>, input_glob: Option<String>) -> JobRequest {
    JobRequest {
        task: job,
        items: texts.into_iter().map(|t| json!({ "text": t })).collect(),
        input_glob,
    }
}

fn is_finished(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Complete | TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Stopped
    )
}

fn print_job(job: &JobInfo) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  tarea: {}", job.task);
    println!("  estado: {:?}", job.status);
    println!(
        "  unidades: total={}, pendientes={}, en curso={}, completadas={}",
        job.total_units, job.pending, job.in_progress, job.completed
    );
    println!("  progreso: {:.1}%", job.progress);
    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref done) = job.finished_at {
        println!("  finalizado: {}", done);
    }
    if let Some(ref result) = job.result {
        match serde_json::to_string_pretty(result) {
            Ok(pretty) => println!("  resultado:\n{}", pretty),
            Err(_) => println!("  resultado: {}", result),
        }
    }
}

async fn fetch_job(client: &Client, base_url: &str, id: &str) -> Result<JobInfo> {
    let url = format!("{}/api/v1/jobs/{}", base_url, id);
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        bail!("job {} no encontrado (status {})", id, resp.status());
    }
    Ok(resp.json().await?)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit {
            job,
            texts,
            input_glob,
            wait,
        } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let req = job_request(job, texts, input_glob);

            let resp = client.post(&url).json(&req).send().await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!("el master rechazó el job ({}): {}", status, body);
            }
            let mut job_info: JobInfo = resp.json().await?;
            println!("Job creado: {}", job_info.id);

            if wait {
                while !is_finished(job_info.status) {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    job_info = fetch_job(&client, &base_url, &job_info.id).await?;
                    println!("  progreso: {:.1}%", job_info.progress);
                }
            }
            print_job(&job_info);
        }

        Commands::Status { id } => {
            let job = fetch_job(&client, &base_url, &id).await?;
            print_job(&job);
        }

        Commands::Cancel { id } => {
            let url = format!("{}/api/v1/jobs/{}/cancel", base_url, id);
            let resp = client.post(&url).send().await?;
            if resp.status().is_success() {
                let job: JobInfo = resp.json().await?;
                println!("Cancelación pedida para {} (se aplica en el próximo chequeo)", job.id);
            } else {
                println!("Error: job no encontrado (status {})", resp.status());
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let workers: Vec<WorkerSummary> = resp.json().await?;
                if workers.is_empty() {
                    println!("No hay workers conectados.");
                } else {
                    for w in workers {
                        println!("{:<45} {:?}", w.name, w.state);
                    }
                }
            } else {
                println!(
                    "Error consultando /api/v1/workers (status {})",
                    resp.status()
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_collects_texts_in_order() {
        let cli = Cli::try_parse_from([
            "client", "submit", "WordCount", "--text", "hola mundo", "--text", "chau",
            "--input-glob", "/data/input/*.txt",
        ])
        .unwrap();

        let Commands::Submit {
            job,
            texts,
            input_glob,
            wait,
        } = cli.command
        else {
            panic!("esperaba submit");
        };
        assert!(!wait);

        let req = job_request(job, texts, input_glob);
        assert_eq!(req.task, "WordCount");
        assert_eq!(req.items, vec![json!({"text": "hola mundo"}), json!({"text": "chau"})]);
        assert_eq!(req.input_glob.as_deref(), Some("/data/input/*.txt"));
    }

    #[test]
    fn cancel_needs_an_id() {
        assert!(Cli::try_parse_from(["client", "cancel"]).is_err());
        assert!(Cli::try_parse_from(["client", "cancel", "abc"]).is_ok());
    }

    #[test]
    fn running_jobs_are_not_finished() {
        assert!(!is_finished(TaskStatus::Running));
        assert!(is_finished(TaskStatus::Complete));
        assert!(is_finished(TaskStatus::Cancelled));
    }
}
