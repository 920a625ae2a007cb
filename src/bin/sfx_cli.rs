//! SlideshowFX CLI - Archive inspection and repacking
//!
//! Commands: inspect, slides, repack
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero on failure

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use sfx_engine::presentation_engine::PRESENTATION_ARCHIVE_EXTENSION;
use sfx_engine::template::TEMPLATE_ARCHIVE_EXTENSION;
use sfx_engine::{Engine, EngineError, PresentationEngine, Settings, TemplateEngine};

#[derive(Parser)]
#[command(name = "sfx-cli")]
#[command(about = "SlideshowFX CLI - Template and presentation archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine settings file (JSON)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the configuration of a .sfx or .sfxt archive
    Inspect {
        archive: PathBuf,
    },

    /// List the slides of a presentation in order
    Slides {
        archive: PathBuf,
    },

    /// Load an archive and save it into a new one
    Repack {
        archive: PathBuf,
        destination: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Can not install the logger: {}", e);
    }

    let settings = match &cli.settings {
        Some(path) => match Settings::load_from_file(path) {
            Ok(settings) => settings,
            Err(e) => return failure(&e),
        },
        None => Settings::default(),
    };

    let result = match cli.command {
        Commands::Inspect { archive } => inspect(&archive, &settings),
        Commands::Slides { archive } => slides(&archive, &settings),
        Commands::Repack { archive, destination } => repack(&archive, &destination, &settings),
    };

    match result {
        Ok(output) => {
            print_json(&output);
            ExitCode::SUCCESS
        }
        Err(e) => failure(&e),
    }
}

fn failure(error: &EngineError) -> ExitCode {
    print_json(&json!({
        "success": false,
        "error": error.to_string(),
    }));
    ExitCode::FAILURE
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!(r#"{{"success": false, "error": "{}"}}"#, e),
    }
}

enum Archive {
    Template(TemplateEngine),
    Presentation(Box<PresentationEngine>),
}

fn open(file: &Path, settings: &Settings) -> Result<Archive, EngineError> {
    let extension = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
    debug!(archive = %file.display(), extension, "Opening archive");

    if extension == TEMPLATE_ARCHIVE_EXTENSION {
        let mut engine = TemplateEngine::new();
        engine.core_mut().set_temp_root(settings.temp_root());
        engine.load_archive(file)?;
        Ok(Archive::Template(engine))
    } else if extension == PRESENTATION_ARCHIVE_EXTENSION {
        let mut engine = PresentationEngine::with_settings(settings);
        engine.load_archive(file)?;
        Ok(Archive::Presentation(Box::new(engine)))
    } else {
        Err(EngineError::InvalidArchive(format!(
            "{} is neither a .{} nor a .{} archive",
            file.display(),
            PRESENTATION_ARCHIVE_EXTENSION,
            TEMPLATE_ARCHIVE_EXTENSION
        )))
    }
}

fn configuration_json<E: Engine>(engine: &E) -> Result<Value, EngineError> {
    let mut document = vec![];
    engine.write_configuration_to(&mut document)?;
    Ok(serde_json::from_slice(&document)?)
}

fn inspect(file: &Path, settings: &Settings) -> Result<Value, EngineError> {
    let (kind, configuration, working_directory) = match open(file, settings)? {
        Archive::Template(engine) => (
            "template",
            configuration_json(&engine)?,
            engine.working_directory().map(Path::to_path_buf),
        ),
        Archive::Presentation(engine) => (
            "presentation",
            configuration_json(engine.as_ref())?,
            engine.working_directory().map(Path::to_path_buf),
        ),
    };
    Ok(json!({
        "success": true,
        "kind": kind,
        "working-directory": working_directory,
        "configuration": configuration,
    }))
}

fn slides(file: &Path, settings: &Settings) -> Result<Value, EngineError> {
    let Archive::Presentation(engine) = open(file, settings)? else {
        return Err(EngineError::InvalidArchive(format!(
            "{} is not a presentation",
            file.display()
        )));
    };
    let configuration = engine
        .configuration()
        .ok_or(EngineError::Precondition("No presentation is open"))?;

    let slides: Vec<_> = configuration
        .slides()
        .iter()
        .map(|slide| {
            json!({
                "number": slide.slide_number,
                "id": slide.id,
                "template-id": slide.template_id,
                "elements": slide.element_count(),
                "speaker-notes": slide.has_speaker_notes(),
                "thumbnail": slide.thumbnail.is_some(),
            })
        })
        .collect();

    Ok(json!({
        "success": true,
        "id": configuration.id,
        "slides": slides,
    }))
}

fn repack(file: &Path, destination: &Path, settings: &Settings) -> Result<Value, EngineError> {
    match open(file, settings)? {
        Archive::Template(engine) => engine.save_archive(destination)?,
        Archive::Presentation(engine) => engine.save_archive(destination)?,
    }
    Ok(json!({
        "success": true,
        "archive": destination,
    }))
}
