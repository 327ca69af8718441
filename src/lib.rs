pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod sink;
pub mod transport;

use anyhow::{Context, Result, anyhow, bail};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

use client::ModelClient;
use config::Config;
use model::{ImageSource, Message};
use sink::StdoutSink;
use transport::BedrockHttpTransport;
use transport::http::http_client;

const DEFAULT_PROMPT: &str = "Write a paragraph starting with: \"Once upon a time...\"";
const RULE_WIDTH: usize = 53;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    prompt: String,
    model_id: Option<String>,
    image: Option<PathBuf>,
    stream: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut words = Vec::new();
    let mut model_id = None;
    let mut image = None;
    let mut stream = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stream" | "-s" => stream = true,
            "--model" | "-m" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--model requires a model identifier"))?;
                if value.trim().is_empty() {
                    bail!("--model requires a non-empty model identifier");
                }
                model_id = Some(value);
            }
            "--image" | "-i" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--image requires a file path"))?;
                image = Some(PathBuf::from(value));
            }
            _ => words.push(arg),
        }
    }

    let prompt = if words.is_empty() {
        DEFAULT_PROMPT.to_string()
    } else {
        words.join(" ")
    };

    Ok(CliArgs {
        prompt,
        model_id,
        image,
        stream,
    })
}

fn image_media_type(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        _ => bail!(
            "Unsupported image type for '{}': expected png, jpeg, gif or webp",
            path.display()
        ),
    }
}

fn load_image(path: &Path) -> Result<ImageSource> {
    let media_type = image_media_type(path)?;
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read image '{}'", path.display()))?;
    Ok(ImageSource::from_bytes(media_type, &bytes))
}

fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

pub async fn run() -> Result<()> {
    let cfg = Config::from_env();
    info!(
        region = %cfg.region,
        endpoint = %cfg.endpoint_url,
        model = %cfg.invocation.model_id,
        max_tokens = cfg.invocation.max_tokens,
        malformed_chunk_policy = cfg.invocation.malformed_chunk_policy.as_str(),
        "loaded runtime configuration"
    );

    let args = parse_args(env::args().skip(1))?;
    let message = match &args.image {
        Some(path) => Message::user_with_image(args.prompt.as_str(), load_image(path)?),
        None => Message::user(args.prompt.as_str()),
    };
    let http = http_client(cfg.model_timeout_secs).context("Failed to initialize HTTP client")?;
    let transport =
        BedrockHttpTransport::new(http, &cfg).context("Failed to configure Bedrock transport")?;
    let client = ModelClient::new(transport, cfg.invocation.clone());

    let model_id = args
        .model_id
        .as_deref()
        .unwrap_or(client.config().model_id.as_str())
        .to_string();
    println!("Prompt: {}", args.prompt);
    println!("Model ID: {}", model_id);
    if let Some(path) = &args.image {
        println!("Image: {}", path.display());
    }
    println!("{}", rule());

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let response = if args.stream {
        let mut sink = StdoutSink;
        let streamed = client
            .invoke_message_streaming(message, Some(&model_id), &mut sink, &cancel)
            .await
            .context("Streaming invocation failed")?;
        info!(
            fragments = streamed.fragments,
            time_to_first_fragment_ms = streamed
                .time_to_first_fragment
                .map(|d| d.as_millis() as u64),
            elapsed_ms = streamed.elapsed.as_millis() as u64,
            "stream timings"
        );
        streamed.text
    } else {
        client
            .invoke_message_cancellable(message, Some(&model_id), &cancel)
            .await
            .context("Invocation failed")?
    };

    println!("\n{}", rule());
    println!("Final structured response:");
    println!("{}", response.trim());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{CliArgs, DEFAULT_PROMPT, image_media_type, load_image, parse_args};
    use crate::model::ImageSource;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parse_args_uses_default_prompt_when_empty() {
        let parsed = parse_args(args(&[])).expect("empty args should parse");
        assert_eq!(
            parsed,
            CliArgs {
                prompt: DEFAULT_PROMPT.to_string(),
                model_id: None,
                image: None,
                stream: false,
            }
        );
    }

    #[test]
    fn parse_args_joins_words_and_reads_flags() {
        let parsed = parse_args(args(&[
            "--stream",
            "tell",
            "--model",
            "us.anthropic.claude-3-5-sonnet-20240620-v1:0",
            "me",
            "a story",
        ]))
        .expect("args should parse");

        assert!(parsed.stream);
        assert_eq!(parsed.prompt, "tell me a story");
        assert_eq!(
            parsed.model_id.as_deref(),
            Some("us.anthropic.claude-3-5-sonnet-20240620-v1:0")
        );
    }

    #[test]
    fn parse_args_rejects_dangling_model_flag() {
        let err = parse_args(args(&["hi", "-m"])).expect_err("missing model id");
        assert!(err.to_string().contains("--model"));
    }

    #[test]
    fn parse_args_rejects_empty_model_identifier() {
        for empty in ["", "  "] {
            let err = parse_args(args(&["hi", "--model", empty])).expect_err("empty model id");
            assert!(err.to_string().contains("non-empty"), "unexpected error: {err}");
        }
    }

    #[test]
    fn parse_args_reads_image_path() {
        let parsed = parse_args(args(&["-i", "diagram.png", "describe", "this"]))
            .expect("args should parse");
        assert_eq!(parsed.image, Some(PathBuf::from("diagram.png")));
        assert_eq!(parsed.prompt, "describe this");

        let err = parse_args(args(&["--image"])).expect_err("missing image path");
        assert!(err.to_string().contains("--image"));
    }

    #[test]
    fn image_media_type_follows_extension() {
        assert_eq!(image_media_type(Path::new("a.PNG")).expect("png"), "image/png");
        assert_eq!(image_media_type(Path::new("a.jpg")).expect("jpg"), "image/jpeg");
        assert!(image_media_type(Path::new("a.bmp")).is_err());
        assert!(image_media_type(Path::new("noext")).is_err());
    }

    #[test]
    fn load_image_encodes_file_contents() {
        let path = std::env::temp_dir()
            .join(format!("bedrock-invoke-image-{}.png", std::process::id()));
        std::fs::write(&path, b"\x89PNG").expect("write image");

        let source = load_image(&path).expect("image should load");
        let _ = std::fs::remove_file(&path);

        assert_eq!(
            source,
            ImageSource::Base64 {
                media_type: "image/png".to_string(),
                data: "iVBORw==".to_string(),
            }
        );
    }
}
