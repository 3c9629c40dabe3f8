use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use blotter::{
    application::{
        blobs::BlobStore,
        consistency,
        documents::DocumentService,
        error::{AppError, ErrorReport},
        polls::{PollEngine, PollService},
        render::{
            BlockParser, BlockRenderService, RenderRequest, RenderService, build_outline,
            duplicate_headings, parse, render_html,
        },
        sanitize::Sanitizer,
        titles::{OEmbedTitleSource, TitleKey, TitleResolver, TitleState},
    },
    config::{self, OutputFormat},
    domain::{
        blocks::Block,
        documents::Document,
        polls::{PollId, VoterId},
    },
    infra::{error::InfraError, fs::FsStore, telemetry},
};
use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(i32::from(error.exit_code()));
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("blotter::main", error);
    if dispatcher::has_been_set() {
        error!(error = %error, causes = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, causes = ?report.messages, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    let app = Application::open(&settings).await?;

    match cli_args.command {
        config::Command::Render(args) => run_render(&app, args).await,
        config::Command::Sanitize(args) => run_sanitize(&app, args).await,
        config::Command::Ingest(args) => run_ingest(&app, args).await,
        config::Command::Check(args) => run_check(&app, args).await,
        config::Command::Vote(args) => run_vote(&app, args).await,
        config::Command::Tally(args) => run_tally(&app, args).await,
    }
}

struct Application {
    settings: config::Settings,
    documents: DocumentService,
    renderer: BlockRenderService,
    polls: PollService,
    titles: Option<TitleResolver>,
}

impl Application {
    async fn open(settings: &config::Settings) -> Result<Self, AppError> {
        let store = Arc::new(FsStore::new(&settings.storage.directory)?);
        let blobs = Arc::new(BlobStore::new());
        let engine = Arc::new(PollEngine::new());
        let sanitizer_config = settings.sanitizer.sanitizer_config();

        let documents = DocumentService::new(
            store.clone(),
            store.clone(),
            Sanitizer::new(Arc::clone(&blobs), sanitizer_config),
        );
        documents.hydrate().await?;

        let polls = PollService::new(Arc::clone(&engine), store.clone());
        polls.hydrate().await?;

        let mut renderer = BlockRenderService::new(blobs, sanitizer_config, engine);
        let titles = if settings.titles.enabled {
            let source = OEmbedTitleSource::new(settings.titles.timeout).map_err(|err| {
                AppError::unexpected(format!("failed to build title client: {err}"))
            })?;
            let resolver = TitleResolver::new(Arc::new(source), settings.titles.title_config());
            renderer = renderer.with_titles(resolver.clone());
            Some(resolver)
        } else {
            None
        };

        info!(
            target = "blotter::main",
            storage = %settings.storage.directory.display(),
            blobs = documents.blobs().len(),
            titles = settings.titles.enabled,
            "Storage opened"
        );

        Ok(Self {
            settings: settings.clone(),
            documents,
            renderer,
            polls,
            titles,
        })
    }

    fn register_polls(&self, text: &str) -> usize {
        let mut registered = 0;
        for block in parse(text) {
            if let Block::Poll(definition) = block {
                self.polls.engine().register(definition);
                registered += 1;
            }
        }
        registered
    }
}

async fn run_render(app: &Application, args: config::RenderArgs) -> Result<(), AppError> {
    let text = read_text(&args.file).await?;
    let mut request = RenderRequest::new(text);
    if let Some(voter) = args.voter {
        request = request.with_voter(VoterId::new(voter));
    }

    let mut output = app.renderer.render(&request);

    if let Some(titles) = &app.titles {
        let pending: Vec<TitleKey> = output
            .titles
            .iter()
            .filter(|title| !title.state.is_ready())
            .map(|title| title.key.clone())
            .collect();
        if !pending.is_empty() {
            let settled = titles.settle(&pending, app.settings.titles.timeout).await;
            for title in &mut output.titles {
                if let Some(resolved) = settled.get(&title.key) {
                    title.state = TitleState::Ready(resolved.clone());
                }
            }
        }
    }

    app.documents.flush_blobs().await?;

    info!(
        target = "blotter::render",
        file = %args.file.display(),
        blocks = output.metrics.blocks_count,
        anomalies = output.anomalies.len(),
        "Rendered file"
    );

    match args.format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Html => {
            let html = render_html(&output).map_err(|err| AppError::unexpected(err.to_string()))?;
            print!("{html}");
            Ok(())
        }
    }
}

async fn run_sanitize(app: &Application, args: config::SanitizeArgs) -> Result<(), AppError> {
    let text = read_text(&args.file).await?;
    let mut document = Document::new(file_label(&args.file), String::new());
    let report = app.documents.edit(&mut document, text);
    app.documents.flush_blobs().await?;

    info!(
        target = "blotter::sanitize",
        file = %args.file.display(),
        extracted = report.extracted,
        reused = report.reused,
        anomalies = report.anomalies.len(),
        "Sanitized file"
    );

    if args.in_place {
        if report.changed {
            tokio::fs::write(&args.file, document.body.as_bytes())
                .await
                .map_err(InfraError::from)?;
        }
        return print_json(&report);
    }

    print!("{}", document.body);
    Ok(())
}

async fn run_ingest(app: &Application, args: config::IngestArgs) -> Result<(), AppError> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .map_err(InfraError::from)?;
    let name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();

    let mut document = Document::new(name.clone(), String::new());
    let file = app.documents.ingest_file(
        &mut document,
        bytes,
        args.mime.as_deref().unwrap_or_default(),
        &name,
    )?;
    app.documents.flush_blobs().await?;

    println!("{}", file.reference);
    Ok(())
}

async fn run_check(app: &Application, args: config::CheckArgs) -> Result<(), AppError> {
    let mut documents = Vec::new();
    let mut headings = Vec::new();

    for path in &args.files {
        let text = read_text(path).await?;
        let blocks: Vec<_> = BlockParser::new(&text).collect();
        let duplicates = duplicate_headings(&build_outline(&blocks));
        headings.push(json!({
            "file": path.display().to_string(),
            "duplicate_headings": duplicates,
        }));
        documents.push(Document::new(file_label(path), text));
    }

    for id in app.documents.list().await? {
        documents.push(app.documents.open(id).await?);
    }

    let report = consistency::check(&documents, &app.documents.blobs().references());
    print_json(&json!({
        "consistency": report,
        "headings": headings,
    }))
}

async fn run_vote(app: &Application, args: config::VoteArgs) -> Result<(), AppError> {
    let text = read_text(&args.file).await?;
    app.register_polls(&text);

    let voter = args.voter.map(VoterId::new).unwrap_or_else(VoterId::generate);
    let ballot = app
        .polls
        .vote(&PollId::new(args.poll), &voter, &args.option)
        .await?;
    print_json(&ballot)
}

async fn run_tally(app: &Application, args: config::TallyArgs) -> Result<(), AppError> {
    let text = read_text(&args.file).await?;
    app.register_polls(&text);

    let tally = app.polls.tally(&PollId::new(args.poll))?;
    print_json(&tally)
}

async fn read_text(path: &Path) -> Result<String, AppError> {
    Ok(tokio::fs::read_to_string(path)
        .await
        .map_err(InfraError::from)?)
}

fn file_label(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}

fn print_json(value: &impl Serialize) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value).map_err(InfraError::from)?;
    println!("{rendered}");
    Ok(())
}
