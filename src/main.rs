//! mathtutor · problem variation review CLI
//!
//! - `review`  : draft a problem from one template and run the review loop
//! - `batch`   : review several templates concurrently
//! - `vary`    : print a (cached) variation of a template question
//!
//! Important env variables:
//!   PIPELINE_CONFIG_PATH : path to TOML config (backend, review budgets, paths, prompts)
//!   LLM_ENDPOINT         : backend generate URL (default "http://localhost:11434/api/generate")
//!   LLM_MODEL            : backend model name (default "mistral")
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, instrument, warn};

use mathtutor::config::load_pipeline_config;
use mathtutor::pipeline::Pipeline;
use mathtutor::telemetry;

#[derive(Parser, Debug)]
#[command(name = "mathtutor", version, about = "Generate and review math practice problems")]
struct Cli {
  /// TOML config file (overrides PIPELINE_CONFIG_PATH)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Review one template (random when no id is given)
  Review {
    #[arg(long)]
    template: Option<String>,
  },
  /// Review several templates concurrently
  Batch {
    #[arg(short, long, default_value_t = 5)]
    count: usize,
  },
  /// Print a variation of a template question
  Vary {
    #[arg(long)]
    template: Option<String>,
    /// 0 is the cached canonical variation; higher values ask for fresh alternatives
    #[arg(long, default_value_t = 0)]
    index: u32,
  },
}

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();
  let cli = Cli::parse();

  let cfg = load_pipeline_config(cli.config.as_deref());
  let pipeline = Arc::new(Pipeline::from_config(&cfg)?);

  match cli.command {
    Command::Review { template } => {
      let done = pipeline.review_template(template.as_deref()).await?;
      let s = &done.summary;
      println!("{} {} after {} review(s) in {:.1?}", s.candidate_id, s.status, s.iterations, s.elapsed);
      println!("problem:  {}", done.candidate.current_text);
      println!("solution: {}", done.candidate.current_solution);
      println!("feedback: {}", s.feedback);
      println!("record:   {}", done.record_path.display());
    }
    Command::Batch { count } => {
      let report = tokio::select! {
        report = pipeline.review_batch(count) => report,
        _ = tokio::signal::ctrl_c() => {
          warn!(target: "pipeline", "Interrupted; in-flight reviews abandoned");
          return Ok(());
        }
      };
      for s in report.approved.iter().chain(report.rejected.iter()) {
        println!("{} {} ({} review(s)): {}", s.candidate_id, s.status, s.iterations, s.feedback);
      }
      for (template_id, e) in &report.failed {
        println!("template {template_id} failed: {e}");
      }
      info!(target: "pipeline", approved = report.approved.len(), rejected = report.rejected.len(), "Done");
    }
    Command::Vary { template, index } => {
      let (t, entry) = pipeline.variation(template.as_deref(), index).await?;
      println!("original:  {}", t.original_question);
      println!("variation: {}", entry.variation_text);
      if !entry.explanation.is_empty() {
        println!("changes:   {}", entry.explanation);
      }
    }
  }
  Ok(())
}
