use anyhow::Result;
use captioner_core::editor::{self, CropParams, EditProgress, TrimRange};
use captioner_core::error::{categorize, CoreError};
use captioner_core::models::MediaFile;
use captioner_core::thumbnail::generate_thumbnails;
use captioner_core::{export, pipeline, project, scanner, sidecar};
use clap::{Parser, Subcommand};
use cli::context::AppContext;
use cli::output::{exit_code, filter_fields, human_size, print_json, to_values};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let category = categorize(&err);
            eprintln!("error ({}): {err:#}", category.as_str());
            ExitCode::from(exit_code(category))
        }
    }
}

#[derive(Parser)]
#[command(name = "captioner")]
#[command(about = "Caption image and video datasets with a vision model", long_about = None)]
struct Cli {
    /// Application data directory (defaults to $CAPTIONER_DATA_DIR, then the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Settings file (defaults to <data dir>/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a folder into a new working project
    Import { source: PathBuf },
    /// List working projects, newest first
    Projects {
        #[arg(long)]
        json: bool,
    },
    /// Delete a working project
    DeleteProject {
        /// Project name or path
        project: String,
    },
    /// Copy a folder's contents into another folder, replacing it
    Duplicate { source: PathBuf, destination: PathBuf },
    /// List the media files of a project or folder
    List {
        /// Project name or path
        dir: String,
        #[arg(long)]
        json: bool,
        /// Only include these fields in JSON output (comma-separated)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        /// Do not descend into subfolders
        #[arg(long)]
        flat: bool,
    },
    /// Read or write a caption sidecar
    Caption {
        #[command(subcommand)]
        action: CaptionAction,
    },
    /// Generate captions with the configured provider
    Generate {
        /// Media files and/or folders
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Skip files that already have a caption
        #[arg(long)]
        missing: bool,
        /// Write captions to sidecar files
        #[arg(long)]
        write: bool,
        /// Provider to use instead of the configured one (openai, gemini)
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print a JPEG thumbnail as a data URL, or write it to a file
    Thumbnail {
        media: PathBuf,
        #[arg(long)]
        size: Option<u32>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Thumbnails for every media file of a project or folder
    Thumbnails {
        dir: String,
        #[arg(long)]
        size: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Crop (and rotate/flip) an image or video in place
    Crop {
        media: PathBuf,
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// Degrees, a multiple of 90
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        rotation: i32,
        #[arg(long)]
        flip_h: bool,
        #[arg(long)]
        flip_v: bool,
    },
    /// Overwrite an image with the contents of a data URL read from stdin
    SaveImage { media: PathBuf },
    /// Trim a video in place to [start, end) seconds
    Trim {
        video: PathBuf,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        end: f64,
    },
    /// Export a project or folder as a timestamped copy
    Export {
        dir: String,
        destination: PathBuf,
        /// Write a .zip archive instead of a folder
        #[arg(long)]
        zip: bool,
    },
    /// Delete a media file and its caption
    DeleteMedia { media: PathBuf },
    /// Rename a media file and its caption
    RenameMedia { media: PathBuf, new_name: String },
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum CaptionAction {
    /// Print the caption (empty when none)
    Read { media: PathBuf },
    /// Replace the caption
    Write {
        media: PathBuf,
        text: Option<String>,
        /// Read the caption from stdin
        #[arg(long, conflicts_with = "text")]
        stdin: bool,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the effective settings (API key masked)
    Show,
    /// Print the settings file location
    Path,
    /// Set one field and save
    Set { key: String, value: String },
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext::load(cli.data_dir.as_deref(), cli.settings.as_deref())?;

    match cli.command {
        Commands::Import { source } => {
            let path = ctx.projects().import(&source)?;
            println!("{}", path.display());
        }
        Commands::Projects { json } => run_projects(&ctx, json)?,
        Commands::DeleteProject { project } => {
            let path = ctx.resolve_dir(&project)?;
            ctx.projects().delete(&path)?;
            println!("deleted {}", path.display());
        }
        Commands::Duplicate {
            source,
            destination,
        } => {
            let path = project::duplicate_directory(&source, &destination)?;
            println!("{}", path.display());
        }
        Commands::List {
            dir,
            json,
            fields,
            flat,
        } => {
            let dir = ctx.resolve_dir(&dir)?;
            let mut opts = ctx.scan_options();
            if flat {
                opts.recursive = false;
            }
            let files = scanner::list_media(&dir, &opts)?;
            print_media(&files, json, &fields)?;
        }
        Commands::Caption { action } => run_caption(action)?,
        Commands::Generate {
            paths,
            missing,
            write,
            provider,
            json,
        } => run_generate(&ctx, paths, missing, write, provider.as_deref(), json).await?,
        Commands::Thumbnail { media, size, out } => {
            let size = size.unwrap_or(ctx.settings.thumbnail_size);
            let thumbs = ctx.thumbnailer();
            match out {
                Some(out) => {
                    let bytes = thumbs.thumbnail(&media, size)?;
                    std::fs::write(&out, bytes)?;
                    println!("{}", out.display());
                }
                None => println!("{}", thumbs.thumbnail_data_url(&media, size)?),
            }
        }
        Commands::Thumbnails { dir, size, json } => {
            let dir = ctx.resolve_dir(&dir)?;
            let paths: Vec<PathBuf> = scanner::list_media(&dir, &ctx.scan_options())?
                .into_iter()
                .map(|m| m.path)
                .collect();
            let size = size.unwrap_or(ctx.settings.thumbnail_size);
            let outcomes = generate_thumbnails(
                Arc::new(ctx.thumbnailer()),
                paths,
                size,
                ctx.settings.batch_concurrency,
            )
            .await;
            if json {
                print_json(&outcomes)?;
            } else {
                for o in &outcomes {
                    match &o.error {
                        None => println!("ok    {}", o.path.display()),
                        Some(err) => println!("error {}: {}", o.path.display(), err),
                    }
                }
            }
        }
        Commands::Crop {
            media,
            x,
            y,
            width,
            height,
            rotation,
            flip_h,
            flip_v,
        } => {
            let params = CropParams {
                x,
                y,
                width,
                height,
                rotation,
                flip_h,
                flip_v,
            };
            run_crop(&ctx, &media, &params).await?;
        }
        Commands::SaveImage { media } => {
            let mut data_url = String::new();
            std::io::stdin().read_to_string(&mut data_url)?;
            editor::save_image_data_url(&media, data_url.trim())?;
            println!("{}", media.display());
        }
        Commands::Trim { video, start, end } => run_trim(&ctx, video, start, end).await?,
        Commands::Export {
            dir,
            destination,
            zip,
        } => {
            let dir = ctx.resolve_dir(&dir)?;
            let out = export::export_directory(&dir, &destination, zip)?;
            println!("{}", out.display());
        }
        Commands::DeleteMedia { media } => {
            scanner::delete_media(&media)?;
            println!("deleted {}", media.display());
        }
        Commands::RenameMedia { media, new_name } => {
            let target = scanner::rename_media(&media, &new_name)?;
            println!("{}", target.display());
        }
        Commands::Settings { action } => run_settings(&ctx, action)?,
    }
    Ok(())
}

fn run_projects(ctx: &AppContext, json: bool) -> Result<()> {
    let projects = ctx.projects().list()?;
    if json {
        return print_json(&projects);
    }
    if projects.is_empty() {
        println!("no projects in {}", ctx.dirs.working_dir().display());
        return Ok(());
    }
    for p in &projects {
        println!(
            "{:<32} {:>10}  {}  {}",
            p.name,
            human_size(p.size_bytes),
            p.modified,
            p.path.display()
        );
    }
    Ok(())
}

fn print_media(files: &[MediaFile], json: bool, fields: &[String]) -> Result<()> {
    if json {
        let values = filter_fields(to_values(files)?, fields);
        return print_json(&values);
    }
    for f in files {
        let mark = if f.has_caption { "*" } else { " " };
        println!("{} {:<5} {}", mark, f.kind.as_str(), f.relative_path);
    }
    Ok(())
}

fn run_caption(action: CaptionAction) -> Result<()> {
    match action {
        CaptionAction::Read { media } => {
            print!("{}", sidecar::read_caption(&media)?);
        }
        CaptionAction::Write { media, text, stdin } => {
            let content = if stdin {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                text.ok_or_else(|| {
                    CoreError::InvalidInput("caption text or --stdin is required".into())
                })?
            };
            let path = sidecar::write_caption(&media, &content)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn run_generate(
    ctx: &AppContext,
    inputs: Vec<PathBuf>,
    missing: bool,
    write: bool,
    provider: Option<&str>,
    json: bool,
) -> Result<()> {
    let paths = pipeline::expand_media_paths(&inputs, &ctx.scan_options())?;
    let provider = ctx.provider(provider)?;
    let summary = pipeline::caption_paths(&ctx.settings, provider, paths, missing, write).await?;

    if json {
        print_json(&serde_json::json!({
            "outcomes": summary.outcomes,
            "succeeded": summary.succeeded(),
            "failed": summary.failed(),
            "skipped": summary.skipped,
            "saved": summary.saved,
        }))?;
    } else {
        for o in &summary.outcomes {
            match (&o.caption, &o.error) {
                (Some(caption), _) => println!("{}\n  {}", o.path.display(), caption.trim()),
                (None, Some(err)) => println!("{}\n  error: {}", o.path.display(), err),
                (None, None) => {}
            }
        }
        println!(
            "captioned {} file(s), {} failed, {} skipped, {} saved",
            summary.succeeded(),
            summary.failed(),
            summary.skipped,
            summary.saved
        );
    }
    Ok(())
}

async fn run_crop(ctx: &AppContext, media: &std::path::Path, params: &CropParams) -> Result<()> {
    use captioner_core::models::MediaKind;
    use captioner_core::thumbnail::detect_kind;

    match detect_kind(media)? {
        MediaKind::Image => {
            let (w, h) = editor::crop_image(media, params)?;
            println!("{} ({}x{})", media.display(), w, h);
        }
        MediaKind::Video => {
            editor::crop_video(&ctx.ffmpeg(), media, params).await?;
            println!("{}", media.display());
        }
    }
    Ok(())
}

async fn run_trim(ctx: &AppContext, video: PathBuf, start: f64, end: f64) -> Result<()> {
    let progress = Arc::new(EditProgress::new());
    let reporter = {
        let progress = progress.clone();
        tokio::spawn(async move {
            let mut last = 0;
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let pct = progress.get();
                if pct > last && pct < 100 {
                    info!(pct, "trimming");
                    last = pct;
                }
            }
        })
    };
    let result = editor::trim_video(&ctx.ffmpeg(), &video, TrimRange::new(start, end), &progress).await;
    reporter.abort();
    result?;
    println!("{}", video.display());
    Ok(())
}

fn run_settings(ctx: &AppContext, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => print_json(&ctx.settings.redacted())?,
        SettingsAction::Path => println!("{}", ctx.settings_path.display()),
        SettingsAction::Set { key, value } => {
            let mut stored = ctx.stored_settings()?;
            stored.set_field(&key, &value)?;
            ctx.save_settings(&stored)?;
            println!("{key} updated in {}", ctx.settings_path.display());
        }
    }
    Ok(())
}
