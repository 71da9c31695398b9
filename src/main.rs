use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use inquire::error::InquireResult;
use tracing_subscriber::EnvFilter;

mod books;
mod cli;
mod config;
mod corpus;
mod embedding;
mod index;
mod search;
mod store;
#[cfg(test)]
mod tests;
mod verse;
mod web;

use config::Config;
use corpus::{CorpusEncoder, CorpusTable, EncodeOptions};
use embedding::Embedders;
use index::{BuildOptions, IndexBuilder, IndexService, PineconeClient};
use search::SearchEngine;
use verse::EmbeddingType;

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("VERSESEARCH_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .ok()
        .flatten()
        .context("could not determine home directory")?;
    Ok(home.join(".local/share/versesearch"))
}

fn confirm(message: &str) -> anyhow::Result<bool> {
    match inquire::prompt_confirmation(message) {
        InquireResult::Ok(answer) => Ok(answer),
        InquireResult::Err(err) => bail!("{err}"),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    let config = Config::load_with(&base_path)?;

    match args.command {
        cli::Command::Clean { csv_path } => {
            let report = corpus::clean(&csv_path)
                .with_context(|| format!("failed to clean {}", csv_path.display()))?;
            println!(
                "kept {} verses, dropped {} rows",
                report.kept, report.dropped
            );
        }

        cli::Command::Encode {
            csv_path,
            output,
            batch_size,
            skip_batches,
        } => {
            let embedders = Embedders::from_config(&config, &base_path)?;
            let opts = EncodeOptions {
                batch_size: batch_size.unwrap_or(config.encoder.batch_size),
                skip_batches,
            };

            let report = CorpusEncoder::new(&embedders)
                .encode_file(&csv_path, &output, &opts)
                .with_context(|| format!("failed to encode {}", csv_path.display()))?;
            println!(
                "encoded {} verses in {} batches into {}",
                report.rows,
                report.batches,
                output.display()
            );
        }

        cli::Command::BuildIndex {
            namespace,
            corpus,
            new_index,
            yes,
        } => {
            let corpus_path = match corpus {
                Some(path) => path,
                None => config
                    .translation_path(&namespace)
                    .with_context(|| format!("translation {namespace} is not configured"))?,
            };

            if new_index && !yes {
                let names = config.index.indexes.keys().cloned().collect::<Vec<_>>();
                let prompt = format!(
                    "Existing indexes {} will be deleted with every namespace in them. Continue?",
                    names.join(", ")
                );
                if !confirm(&prompt)? {
                    return Ok(());
                }
            }

            let table = CorpusTable::load(&corpus_path)
                .with_context(|| format!("failed to load {}", corpus_path.display()))?;
            let client = PineconeClient::from_config(&config.index)?;
            let service: &dyn IndexService = &client;

            let opts = BuildOptions {
                namespace,
                delete_if_exists: new_index,
                chunk_size: config.index.chunk_size,
                pod_type: config.index.pod_type.clone(),
                id_scheme: config.index.id_scheme,
                ready_timeout: Duration::from_secs(config.index.ready_timeout_secs),
                poll_interval: Duration::from_millis(config.index.poll_interval_ms),
            };

            let mut builder = IndexBuilder::new(service, &config.index.indexes);
            let report = builder.build(&table, &opts).context("index build failed")?;

            for (index, upserted) in &report.upserted {
                println!("{index}/{}: {upserted} vectors", opts.namespace);
            }
        }

        cli::Command::Search {
            query,
            embedding,
            translation,
            only_text,
            k,
            json,
        } => {
            let embedding_type: EmbeddingType = embedding.parse()?;
            let engine = SearchEngine::from_config(&config, &base_path)?;
            let verses =
                engine.search(&query, embedding_type, translation.as_deref(), only_text, k)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&verses)?);
                return Ok(());
            }

            for verse in verses {
                match verse.reference() {
                    Some(reference) => println!("{reference}  {}", verse.text),
                    None => println!("{}", verse.text),
                }
            }
        }

        cli::Command::Serve { listen } => {
            let engine = SearchEngine::from_config(&config, &base_path)?;
            let listen = listen.unwrap_or_else(|| config.search.listen.clone());
            web::start_daemon(engine, &listen)?;
        }

        cli::Command::Translations {} => {
            for name in config.translations.keys() {
                let marker = if *name == config.default_translation {
                    " (default)"
                } else {
                    ""
                };
                println!("{name}{marker}");
            }
        }
    }

    Ok(())
}
