//! captioner - image captioning CLI
//!
//! Usage:
//!   captioner caption <IMAGE> --head <HEAD>   Caption an image
//!   captioner inspect                         Show model dimensions
//!   captioner config                          Show the resolved configuration

use anyhow::{bail, Context, Result};
use captioner_core::{
    default_config_path, load_config, load_image, make_device, safetensors_names, CaptionModel,
    Config, ModelConfig, SamplingConfig, Vocabulary,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "captioner", version, about = "Caption images with a CNN encoder + LSTM decoder")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a caption for an image
    Caption {
        /// Image file (any format the `image` crate decodes)
        image: PathBuf,
        /// Trained head weights (encoder projection + decoder), safetensors
        #[arg(long)]
        head: PathBuf,
        /// Local backbone safetensors instead of downloading from the hub
        #[arg(long)]
        backbone_weights: Option<PathBuf>,
        /// Vocabulary JSON (array of words) for rendering the caption
        #[arg(long)]
        vocab: Option<PathBuf>,
        /// Maximum number of sampled tokens
        #[arg(long)]
        max_len: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show model dimensions and trainable parameter count
    Inspect {
        /// Also list the tensors stored in a head checkpoint
        #[arg(long)]
        head: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration
    Config,
}

#[derive(Serialize)]
struct CaptionOutput {
    image: String,
    tokens: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
}

#[derive(Serialize)]
struct InspectOutput {
    model: ModelConfig,
    feature_width: usize,
    trainable_params: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    head_tensors: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ResolvedConfig {
    path: String,
    model: ModelConfig,
    sampling: SamplingConfig,
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            Ok(path)
        }
        None => default_config_path(),
    }
}

fn load_settings(path: &Path) -> Result<(ModelConfig, SamplingConfig)> {
    let config: Config = load_config(path)?;
    let model = config.model_config().with_env_overrides()?;
    model.validate()?;
    Ok((model, config.sampling_config()))
}

fn caption_text(
    vocab: Option<&Vocabulary>,
    tokens: &[u32],
    sampling: &SamplingConfig,
) -> Option<String> {
    vocab.map(|v| v.render(tokens, sampling.stop_token))
}

fn cmd_caption(
    config_path: &Path,
    image: &Path,
    head: &Path,
    backbone_weights: Option<&Path>,
    vocab: Option<&Path>,
    max_len: Option<usize>,
    json: bool,
) -> Result<()> {
    let (model_config, mut sampling) = load_settings(config_path)?;
    if let Some(max_len) = max_len {
        sampling.max_len = max_len;
    }

    let vocab = vocab.map(Vocabulary::from_json_file).transpose()?;
    if let Some(vocab) = &vocab {
        if vocab.len() != model_config.vocab_size {
            bail!(
                "Vocabulary has {} words but the model expects vocab_size = {}",
                vocab.len(),
                model_config.vocab_size
            );
        }
    }

    let device = make_device();
    let mut model = CaptionModel::from_pretrained(&model_config, backbone_weights, &device)?;
    model.load_head(head)?;

    let pixels = load_image(image, model_config.image_size, &device)?;
    let tokens = model.caption(&pixels, &sampling)?;
    let caption = caption_text(vocab.as_ref(), &tokens, &sampling);

    if json {
        let output = CaptionOutput {
            image: image.display().to_string(),
            tokens,
            caption,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if let Some(caption) = caption {
        println!("{caption}");
    } else {
        let ids: Vec<String> = tokens.iter().map(u32::to_string).collect();
        println!("{}", ids.join(" "));
    }
    Ok(())
}

fn cmd_inspect(config_path: &Path, head: Option<&Path>, json: bool) -> Result<()> {
    let (model_config, _) = load_settings(config_path)?;
    let head_tensors = head.map(safetensors_names).transpose()?;

    let output = InspectOutput {
        feature_width: model_config.backbone.feature_width(),
        trainable_params: model_config.trainable_param_count(),
        model: model_config,
        head_tensors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let model = &output.model;
    println!("Backbone:         {} ({} features, frozen)", model.backbone, output.feature_width);
    println!("Image size:       {0}x{0}", model.image_size);
    println!("Embed size:       {}", model.embed_size);
    println!("Hidden size:      {}", model.hidden_size);
    println!("LSTM layers:      {}", model.num_layers);
    println!("Vocabulary size:  {}", model.vocab_size);
    println!("Trainable params: {}", output.trainable_params);
    if let Some(names) = &output.head_tensors {
        println!("Head tensors:     {}", names.len());
        for name in names {
            println!("  {name}");
        }
    }
    Ok(())
}

fn cmd_config(config_path: &Path) -> Result<()> {
    let (model, sampling) = load_settings(config_path)?;
    let resolved = ResolvedConfig {
        path: config_path.display().to_string(),
        model,
        sampling,
    };
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config).context("Failed to locate config file")?;

    match cli.command {
        Commands::Caption {
            image,
            head,
            backbone_weights,
            vocab,
            max_len,
            json,
        } => cmd_caption(
            &config_path,
            &image,
            &head,
            backbone_weights.as_deref(),
            vocab.as_deref(),
            max_len,
            json,
        ),
        Commands::Inspect { head, json } => cmd_inspect(&config_path, head.as_deref(), json),
        Commands::Config => cmd_config(&config_path),
    }
}
