//! Diamond workflow demo: one root fans out to two branches that a final
//! step merges, with run state persisted under `./runs`.
//!
//! Run with: `cargo run --example diamond`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tandem_core::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TextDoc {
    text: String,
}

impl Schema for TextDoc {
    const NAME: &'static str = "TextDoc";
}

#[derive(Debug, Default)]
struct Seed;

#[async_trait]
impl Agent for Seed {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        Ok(input)
    }
}

#[derive(Debug, Default)]
struct Annotate;

#[async_trait]
impl Agent for Annotate {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        Ok(TextDoc {
            text: format!("{} [annotated]", input.text),
        })
    }
}

#[derive(Debug, Default)]
struct Shout;

#[async_trait]
impl Agent for Shout {
    type Input = TextDoc;
    type Output = TextDoc;

    async fn call(&self, input: TextDoc) -> Result<TextDoc, AgentError> {
        Ok(TextDoc {
            text: input.text.to_uppercase(),
        })
    }
}

#[derive(Debug, Default)]
struct Join;

#[async_trait]
impl Agent for Join {
    type Input = MergedInput;
    type Output = TextDoc;

    async fn call(&self, input: MergedInput) -> Result<TextDoc, AgentError> {
        let mut lines = Vec::new();
        for step in input.steps().map(str::to_owned).collect::<Vec<_>>() {
            let upstream: TextDoc = input.get(&step)?;
            lines.push(format!("{step}: {}", upstream.text));
        }
        Ok(TextDoc {
            text: lines.join("\n"),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tandem_core=debug")),
        )
        .init();

    let workflow = Arc::new(
        WorkflowBuilder::new("diamond")
            .step::<Seed>("seed", &[])
            .step::<Annotate>("annotate", &["seed"])
            .step::<Shout>("shout", &["seed"])
            .step::<Join>("join", &["annotate", "shout"])
            .build()?,
    );

    let result = WorkflowExecutor::new(workflow)
        .with_retries(2)
        .with_run_store(RunStore::new("./runs"))
        .run(&TextDoc {
            text: "hello from tandem".into(),
        })
        .await?;

    println!("success: {}", result.success);
    println!("{}", result.output_of::<TextDoc>("join")?.text);
    Ok(())
}
