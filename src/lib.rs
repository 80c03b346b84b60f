pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod infer;
pub mod io_utils;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod preview;
pub mod schema;
pub mod store;
pub mod table;

use std::{env, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::IngestConfig,
    model::{NewImport, RequestContext},
    parser::{FileKind, ParseOptions},
    pipeline::Ingestor,
    preview::PreviewService,
    store::{FsBlobStore, FsRecordStore},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

struct Services {
    ctx: RequestContext,
    ingestor: Ingestor,
    preview: PreviewService,
}

impl Services {
    fn open(cli: &Cli, config: IngestConfig) -> Result<Self> {
        let ctx = RequestContext::new(cli.organization.as_str(), cli.user.as_str())?;
        let records = Arc::new(
            FsRecordStore::open(&cli.store)
                .with_context(|| format!("Opening record store in {:?}", cli.store))?,
        );
        let blobs = Arc::new(
            FsBlobStore::open(&cli.store)
                .with_context(|| format!("Opening blob store in {:?}", cli.store))?,
        );
        debug!("Using store {:?} as organization '{}'", cli.store, ctx.organization_id);
        let ingestor = Ingestor::new(records.clone(), blobs, config)?;
        Ok(Self {
            ctx,
            ingestor,
            preview: PreviewService::new(records),
        })
    }
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = IngestConfig::load_or_default(cli.config.as_deref())?;
    // Schema inspection reads a local file and never touches the store.
    let open = || Services::open(&cli, config.clone());
    match &cli.command {
        Commands::Probe(args) => handle_probe(args, &config),
        Commands::Upload(args) => handle_upload(&open()?, args),
        Commands::Analyze(args) => {
            let services = open()?;
            let record = services.ingestor.analyze(&services.ctx, args.import)?;
            print_json(&record)
        }
        Commands::Status(args) => {
            let services = open()?;
            let record = services.ingestor.get_import(&services.ctx, args.import)?;
            print_json(&record)
        }
        Commands::List => handle_list(&open()?),
        Commands::Page(args) => handle_page(&open()?, args),
        Commands::Edit(args) => handle_edit(&open()?, args),
        Commands::History(args) => {
            let services = open()?;
            let edits = services.preview.edit_history(&services.ctx, args.import)?;
            print_json(&edits)
        }
        Commands::Complete(args) => {
            let services = open()?;
            let record = services.ingestor.complete(&services.ctx, args.import)?;
            print_json(&record)
        }
        Commands::Delete(args) => {
            let services = open()?;
            services.ingestor.delete_import(&services.ctx, args.import)?;
            info!("Import {} deleted", args.import);
            Ok(())
        }
    }
}

fn handle_probe(args: &cli::ProbeArgs, config: &IngestConfig) -> Result<()> {
    let filename = args
        .input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Input {:?} has no usable file name", args.input))?;
    let kind = FileKind::from_filename(filename)?;
    let encoding = io_utils::resolve_encoding(
        args.input_encoding
            .as_deref()
            .or(config.input_encoding.as_deref()),
    )?;
    let delimiter = io_utils::resolve_input_delimiter(
        filename,
        args.delimiter.or(config.csv_delimiter.map(|c| c as u8)),
    );
    info!(
        "Probing '{}' as {kind} with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );

    let bytes = io_utils::read_input(&args.input)?;
    let parsed = parser::parse(&bytes, kind, &ParseOptions { delimiter, encoding })
        .with_context(|| format!("Parsing {:?}", args.input))?;
    let sample_rows = args.sample_rows.unwrap_or(config.sample_rows);
    let columns = schema::extract(
        &parsed.header,
        parsed.sample(sample_rows),
        config.header_policy,
    )?;

    if args.json {
        print_json(&columns)?;
    } else {
        print!("{}", table::render_columns(&columns));
    }
    info!(
        "Inferred {} column(s) from {} sampled row(s) of {}",
        parsed.column_count(),
        parsed.sample(sample_rows).len(),
        parsed.row_count()
    );
    Ok(())
}

fn handle_upload(services: &Services, args: &cli::UploadArgs) -> Result<()> {
    let filename = match (&args.filename, io_utils::is_dash(&args.input)) {
        (Some(name), _) => name.clone(),
        (None, true) => return Err(anyhow!("--filename is required when reading from stdin")),
        (None, false) => args
            .input
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Input {:?} has no usable file name", args.input))?,
    };
    let bytes = io_utils::read_input(&args.input)?;
    let mut request = NewImport::new(filename);
    if let Some(name) = &args.name {
        request = request.with_name(name.clone());
    }

    let mut record = services
        .ingestor
        .upload(&services.ctx, &request, &bytes)
        .with_context(|| format!("Uploading {:?}", args.input))?;
    if args.analyze {
        record = services.ingestor.analyze(&services.ctx, record.id)?;
    }
    print_json(&record)
}

fn handle_list(services: &Services) -> Result<()> {
    let records = services.ingestor.list_imports(&services.ctx)?;
    let mut listing =
        table::Table::new(["id", "name", "kind", "status", "rows", "created"]).align_right(4);
    for record in &records {
        listing.push_row(vec![
            record.id.to_string(),
            record.name.clone(),
            record.file_kind.to_string(),
            record.status.to_string(),
            record
                .row_count
                .map(|count| count.to_string())
                .unwrap_or_default(),
            record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    print!("{}", listing.render());
    info!(
        "Listed {} import(s) for organization '{}'",
        records.len(),
        services.ctx.organization_id
    );
    Ok(())
}

fn handle_page(services: &Services, args: &cli::PageArgs) -> Result<()> {
    let page_size = args
        .page_size
        .unwrap_or(services.ingestor.config().default_page_size);
    let page = services
        .preview
        .get_page(&services.ctx, args.import, args.page, page_size)?;
    if args.json {
        print_json(&page)
    } else {
        print!("{}", table::render_page(&page));
        Ok(())
    }
}

fn handle_edit(services: &Services, args: &cli::EditArgs) -> Result<()> {
    let value = if args.null {
        None
    } else {
        args.value.as_deref().and_then(data::coerce_text)
    };
    let edit = services.preview.edit_cell(
        &services.ctx,
        args.import,
        args.row,
        &args.column,
        value,
    )?;
    print_json(&edit)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Rendering JSON output")?;
    println!("{rendered}");
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
