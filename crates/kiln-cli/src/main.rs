use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use kiln_contracts::events::EventWriter;
use kiln_contracts::models::{ModelRegistry, ModelSelector, DEFAULT_MODEL};
use kiln_contracts::options::{parse_toggle, ASPECT_RATIOS, DEFAULT_ASPECT_RATIO};
use kiln_contracts::request::GenerationForm;
use kiln_engine::{
    package_downloads, unix_timestamp, DownloadArtifact, GenerationSession, PipelineConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kiln", version, about = "Generate images on fal.ai and bundle them for download")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a prompt, wait for the result and save the images as JPEG.
    Generate(GenerateArgs),
    /// Bundle previously generated files into one download.
    Download(DownloadArgs),
    /// List known models and aspect ratios.
    Models,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value = DEFAULT_ASPECT_RATIO)]
    aspect_ratio: String,
    #[arg(long, default_value_t = 1.0)]
    num_images: f64,
    #[arg(long)]
    steps: Option<f64>,
    #[arg(long)]
    guidance: Option<f64>,
    #[arg(long, default_value = "enabled")]
    safety_checker: String,
    /// Falls back to the FAL_KEY environment variable.
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    archive_dir: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Package the generated images right away.
    #[arg(long)]
    download: bool,
}

#[derive(Debug, Parser)]
struct DownloadArgs {
    paths: Vec<PathBuf>,
    #[arg(long)]
    archive_dir: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("kiln error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Download(args) => run_download(args),
        Command::Models => {
            run_models();
            Ok(0)
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut config = PipelineConfig::from_env();
    if let Some(out) = args.out.clone() {
        config = config.with_output_dir(out);
    }
    if let Some(dir) = args.archive_dir.clone() {
        config = config.with_archive_dir(dir);
    }

    let form = form_from_args(&args, &ModelSelector::new(None))?;
    let mut session = GenerationSession::new(config);
    if let Some(path) = args.events.as_ref() {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(session_id = %session_id, path = %path.display(), "recording events");
        session = session.with_events(EventWriter::new(path, session_id));
    }

    let outcome = session.generate(&form);
    println!("{}", outcome.status);
    for path in outcome.paths.as_deref().unwrap_or_default() {
        println!("  {}", path.display());
    }
    if !outcome.is_success() {
        return Ok(1);
    }

    if args.download {
        print_artifact(&session.download()?);
    }
    Ok(0)
}

fn run_download(args: DownloadArgs) -> Result<i32> {
    let mut config = PipelineConfig::from_env();
    if let Some(dir) = args.archive_dir {
        config = config.with_archive_dir(dir);
    }
    let artifact = package_downloads(&args.paths, &config.archive_dir, unix_timestamp())?;
    print_artifact(&artifact);
    Ok(match artifact {
        DownloadArtifact::Nothing(_) => 1,
        _ => 0,
    })
}

fn run_models() {
    let registry = ModelRegistry::default();
    println!("Models:");
    for spec in registry.list() {
        let marker = if spec.name == DEFAULT_MODEL { " (default)" } else { "" };
        println!("  {:<40} {}{marker}", spec.name, spec.label);
    }
    println!("Aspect ratios:");
    for (label, size) in ASPECT_RATIOS {
        println!("  {label:<20} {size}");
    }
}

fn form_from_args(args: &GenerateArgs, selector: &ModelSelector) -> Result<GenerationForm> {
    let Some(enable_safety_checker) = parse_toggle(&args.safety_checker) else {
        bail!(
            "--safety-checker must be 'enabled' or 'disabled', got '{}'",
            args.safety_checker
        );
    };
    let selection = selector.select(Some(args.model.as_str())).map_err(|err| anyhow!(err))?;
    if let Some(reason) = selection.fallback_reason.as_deref() {
        tracing::info!(model = %selection.model_id, "{reason}");
    }
    let spec = selection.spec.as_ref();
    let api_key = resolve_api_key(args.api_key.as_deref(), env::var("FAL_KEY").ok());

    Ok(GenerationForm {
        prompt: args.prompt.clone(),
        model_id: selection.model_id.clone(),
        aspect_ratio: args.aspect_ratio.clone(),
        num_images: args.num_images,
        num_inference_steps: args
            .steps
            .or_else(|| spec.and_then(|spec| spec.default_steps).map(f64::from)),
        guidance_scale: args
            .guidance
            .or_else(|| spec.and_then(|spec| spec.default_guidance)),
        enable_safety_checker: Some(enable_safety_checker),
        api_key,
    })
}

/// `--api-key` wins; `FAL_KEY` is only read, never written.
fn resolve_api_key(explicit: Option<&str>, from_env: Option<String>) -> String {
    explicit
        .map(str::to_string)
        .or(from_env)
        .unwrap_or_default()
}

fn print_artifact(artifact: &DownloadArtifact) {
    match artifact {
        DownloadArtifact::Nothing(message) => println!("{message}"),
        DownloadArtifact::File(path) => println!("Download: {}", path.display()),
        DownloadArtifact::Archive(path) => println!("Download archive: {}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use kiln_contracts::models::{ModelSelector, DEFAULT_MODEL};

    use super::{form_from_args, resolve_api_key, Cli, Command};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn generate_defaults_fill_catalog_parameters() -> anyhow::Result<()> {
        let cli = parse(&["kiln", "generate", "--prompt", "boat", "--api-key", "k"]);
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate command");
        };
        let form = form_from_args(&args, &ModelSelector::new(None))?;
        assert_eq!(form.model_id, "fal-ai/flux/dev");
        assert_eq!(form.aspect_ratio, "4:3 (landscape)");
        assert_eq!(form.num_images, 1.0);
        assert_eq!(form.num_inference_steps, Some(28.0));
        assert_eq!(form.guidance_scale, Some(3.5));
        assert_eq!(form.enable_safety_checker, Some(true));
        assert_eq!(form.api_key, "k");
        Ok(())
    }

    #[test]
    fn uncatalogued_model_gets_no_parameter_defaults() -> anyhow::Result<()> {
        let cli = parse(&[
            "kiln",
            "generate",
            "--prompt",
            "boat",
            "--model",
            "fal-ai/fast-sdxl",
            "--safety-checker",
            "disabled",
            "--api-key",
            "k",
        ]);
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate command");
        };
        let form = form_from_args(&args, &ModelSelector::new(None))?;
        assert_eq!(form.num_inference_steps, None);
        assert_eq!(form.guidance_scale, None);
        assert_eq!(form.enable_safety_checker, Some(false));
        Ok(())
    }

    #[test]
    fn unknown_safety_toggle_is_rejected() {
        let cli = parse(&[
            "kiln",
            "generate",
            "--prompt",
            "boat",
            "--safety-checker",
            "sometimes",
        ]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate command");
        };
        assert!(form_from_args(&args, &ModelSelector::new(None)).is_err());
    }

    #[test]
    fn download_accepts_many_paths() {
        let cli = parse(&["kiln", "download", "a.jpg", "b.jpg"]);
        let Command::Download(args) = cli.command else {
            panic!("expected download command");
        };
        assert_eq!(args.paths.len(), 2);
        assert!(args.archive_dir.is_none());
    }

    #[test]
    fn blank_model_falls_back_to_default_with_its_parameters() -> anyhow::Result<()> {
        let cli = parse(&["kiln", "generate", "--prompt", "boat", "--model", " "]);
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate command");
        };
        let form = form_from_args(&args, &ModelSelector::new(None))?;
        assert_eq!(form.model_id, DEFAULT_MODEL);
        assert_eq!(form.num_inference_steps, Some(28.0));
        assert_eq!(form.guidance_scale, Some(3.5));
        Ok(())
    }

    #[test]
    fn api_key_falls_back_to_fal_key_environment_value() {
        let from_env = Some("env-key".to_string());
        assert_eq!(resolve_api_key(Some("flag-key"), from_env.clone()), "flag-key");
        assert_eq!(resolve_api_key(None, from_env), "env-key");
        assert_eq!(resolve_api_key(None, None), "");
    }
}
