mod display;
mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use streamverify_binder::{
    Element, GroupingPolicy, JsonFileSink, RequestSettings, TaggingConvention,
    VerificationBinder, VerificationSink, parse_xhtml, scan,
};
use streamverify_client::{ClientConfig, DEFAULT_ENDPOINT, StreamingCompletionClient};
use streamverify_core::{CategoryRegistry, VerifierConfig};

#[derive(Parser)]
#[command(name = "streamverify", version, about = "Verify rendered document groups with a local language model")]
struct Cli {
    /// Verifier configuration (general instruction and category instructions).
    #[arg(long, short, env = "STREAMVERIFY_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the groups found in a document without contacting the server.
    Groups(DocumentArgs),
    /// Verify groups of a document, streaming results as they arrive.
    Verify(VerifyArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Granularity {
    Container,
    Fragment,
}

impl From<Granularity> for GroupingPolicy {
    fn from(g: Granularity) -> Self {
        match g {
            Granularity::Container => GroupingPolicy::Container,
            Granularity::Fragment => GroupingPolicy::Fragment,
        }
    }
}

#[derive(Args)]
struct DocumentArgs {
    /// Rendered XHTML document.
    document: PathBuf,

    #[arg(long, value_enum, default_value = "container")]
    granularity: Granularity,

    /// Class marking verifiable text.
    #[arg(long, default_value = "verifiable")]
    fragment_class: String,

    /// Attribute holding the group identifier.
    #[arg(long, default_value = "data-id")]
    id_attribute: String,
}

impl DocumentArgs {
    fn convention(&self) -> TaggingConvention {
        TaggingConvention {
            fragment_class: self.fragment_class.clone(),
            id_attribute: self.id_attribute.clone(),
            ..TaggingConvention::default()
        }
    }
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    doc: DocumentArgs,

    /// Only verify these group ids (repeatable). Use `#<n>` for groups without an id.
    #[arg(long = "group")]
    groups: Vec<String>,

    /// Persist results to this JSON file.
    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long, env = "STREAMVERIFY_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Overrides the model from the configuration file.
    #[arg(long, env = "STREAMVERIFY_MODEL")]
    model: Option<String>,

    /// Overrides the temperature from the configuration file.
    #[arg(long, env = "STREAMVERIFY_TEMPERATURE")]
    temperature: Option<f32>,

    /// Request timeout in seconds. No timeout by default.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn request_settings(args: &VerifyArgs, config: &VerifierConfig) -> RequestSettings {
    let defaults = RequestSettings::default();
    RequestSettings {
        model: args
            .model
            .clone()
            .or_else(|| config.model.clone())
            .unwrap_or(defaults.model),
        temperature: args
            .temperature
            .or(config.temperature)
            .unwrap_or(defaults.temperature),
    }
}

fn load_document(path: &Path) -> anyhow::Result<Element> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("reading document {}", path.display()))?;
    parse_xhtml(&xml).with_context(|| format!("parsing document {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("streamverify v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = VerifierConfig::load(&cli.config).context("loading verifier config")?;
    let registry: Arc<CategoryRegistry> = Arc::new(config.registry()?);

    match cli.command {
        Command::Groups(args) => {
            let root = load_document(&args.document)?;
            let groups = scan(&root, &registry, args.granularity.into(), &args.convention());
            display::print_groups(&groups);
        }
        Command::Verify(args) => {
            let root = load_document(&args.doc.document)?;
            let client = StreamingCompletionClient::new(&ClientConfig {
                endpoint: args.endpoint.clone(),
                timeout: args.timeout_secs.map(Duration::from_secs),
            })
            .context("building HTTP client")?;
            let sink: Option<Arc<dyn VerificationSink>> = args
                .store
                .as_ref()
                .map(|path| Arc::new(JsonFileSink::new(path)) as Arc<dyn VerificationSink>);

            let binding = VerificationBinder::new(Arc::new(client), registry.clone())
                .with_settings(request_settings(&args, &config))
                .with_convention(args.doc.convention())
                .bind(&root, args.doc.granularity.into(), sink);

            let stats = verify::run_verify(&binding, &args.groups).await?;
            eprintln!(
                "  Verified {}/{} groups ({} failed) in {:.1}s",
                stats.completed, stats.selected, stats.failed, stats.elapsed_secs
            );
            if stats.failed > 0 {
                anyhow::bail!("{} verification(s) failed", stats.failed);
            }
        }
    }
    Ok(())
}
