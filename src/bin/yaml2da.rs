//! yaml2da CLI - convert YAML2DA projects to 2DA tables and back
//!
//! Environment:
//! - `RUST_LOG`: log filter (default `info`)
//! - `NWN_2DA_BIN`: path to the `nwn-2da` executable (default `nwn-2da`)

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

use yaml2da::document::SCHEMA_TYPE;
use yaml2da::loader::{self, sanitize_file_name};
use yaml2da::pipeline::{self, ExportOptions};
use yaml2da::{LoadError, MergeMode, Nwn2daCodec, Registry, TableCodec, UnpackOptions, YamlCodec};

#[derive(Parser)]
#[command(name = "yaml2da")]
#[command(version, about = "Schema-driven conversion between YAML2DA files and 2DA tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a YAML2DA file, or every YAML2DA file in a folder, into 2DA tables
    #[command(visible_aliases = ["pack", "build", "finalize", "to2da", "convert"])]
    Export {
        /// YAML2DA file or project folder
        path: PathBuf,

        /// Output folder (default: {project}/packed)
        #[arg(short, long)]
        output_folder: Option<PathBuf>,

        /// Only export documents of these types
        #[arg(short, long, num_args = 1..)]
        filter_type: Vec<String>,

        /// Additional schema files or folders
        #[arg(short, long, num_args = 1..)]
        schema: Vec<PathBuf>,

        /// Table format to write
        #[arg(long, value_enum, default_value_t = CodecKind::Nwn2da)]
        codec: CodecKind,
    },

    /// Convert a 2DA table, or every 2DA table in a folder, into YAML2DA files
    #[command(visible_aliases = ["unpack", "from2da"])]
    Import {
        /// Table file or folder
        path: PathBuf,

        /// Output folder (default: {project}/unpacked)
        #[arg(short, long)]
        output_folder: Option<PathBuf>,

        /// Only accept these types when detecting a table's type
        #[arg(short, long, num_args = 1..)]
        filter_type: Vec<String>,

        /// Additional schema files or folders
        #[arg(short, long, num_args = 1..)]
        schema: Vec<PathBuf>,

        /// Name per-row files {id}_{label} so they sort by row id
        #[arg(short, long)]
        label_invert: bool,

        /// Keep null values in the written files
        #[arg(short, long)]
        print_nulls: bool,

        /// Table format to read
        #[arg(long, value_enum, default_value_t = CodecKind::Nwn2da)]
        codec: CodecKind,
    },

    /// Append YAML2DA files to a target file as variants
    Merge {
        /// File receiving the variants
        target: PathBuf,

        /// Files or folders to merge in
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Additional schema files or folders
        #[arg(short, long, num_args = 1..)]
        schema: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CodecKind {
    /// 2DA through the nwn-2da tool
    Nwn2da,
    /// Plain YAML tables
    Yaml,
}

impl CodecKind {
    fn build(self) -> Box<dyn TableCodec> {
        match self {
            CodecKind::Nwn2da => Box::new(Nwn2daCodec::from_env()),
            CodecKind::Yaml => Box::new(YamlCodec),
        }
    }
}

fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Export { path, output_folder, filter_type, schema, codec } => {
            export(path, output_folder, filter_type, schema, codec)
        }
        Commands::Import { path, output_folder, filter_type, schema, label_invert, print_nulls, codec } => {
            let options = UnpackOptions {
                print_nulls,
                label_invert,
                name: None,
            };
            import(path, output_folder, filter_type, schema, options, codec)
        }
        Commands::Merge { target, sources, schema } => merge(target, sources, schema),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Built-in schemas plus every schema document found under `paths`.
fn load_registry(paths: &[PathBuf]) -> Result<Registry, LoadError> {
    let mut registry = Registry::new();
    registry.register_defaults()?;

    for document in loader::read_documents(paths, &[])? {
        if document.type_name() == Some(SCHEMA_TYPE) {
            registry.register_document(&document)?;
        }
    }
    tracing::debug!("Loaded schemas: {:?}", registry.type_names());
    Ok(registry)
}

fn parent_folder(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn export(
    path: PathBuf,
    output_folder: Option<PathBuf>,
    filter_type: Vec<String>,
    schema: Vec<PathBuf>,
    codec: CodecKind,
) -> Result<(), LoadError> {
    let mut registry = load_registry(&schema)?;

    // A single file exports its own type, and always exports itself.
    let metadata = fs::metadata(&path).map_err(|e| LoadError::io(&path, e))?;
    let (root, filter, project_identifier) = if metadata.is_dir() {
        (path, filter_type, None)
    } else if loader::is_yaml_file(&path) {
        let document = loader::read_document(&path)?
            .ok_or_else(|| LoadError::Invalid(format!("{} is not a YAML2DA file", path.display())))?;
        let type_name = document
            .type_name()
            .ok_or_else(|| LoadError::Invalid(format!("{} is not a YAML2DA file", path.display())))?
            .to_string();
        (parent_folder(&path), vec![type_name], Some(document.identifier().to_string()))
    } else {
        return Err(LoadError::Invalid(format!(
            "{} is neither a YAML file nor a folder",
            path.display()
        )));
    };

    let documents = loader::read_documents(&[&root], &filter)?;
    let groups = pipeline::group_by_type(documents);
    pipeline::register_schemas(&mut registry, &groups)?;

    let tables = pipeline::export(&registry, groups, &ExportOptions { project_identifier })?;
    if tables.is_empty() {
        tracing::warn!("No exportable files were found. Make sure every type in the project has a schema.");
        return Ok(());
    }

    let output = output_folder.unwrap_or_else(|| root.join("packed"));
    let codec = codec.build();
    for exported in tables {
        let file_name = sanitize_file_name(&format!("{}.{}", exported.name, codec.extension()));
        codec.write_table(&exported.packed.table, &output.join(&file_name))?;

        let packed = &exported.packed;
        match registry.get(&exported.type_name).map(|handler| handler.merge_mode()) {
            Some(MergeMode::Inheritance) => tracing::info!(
                "Wrote {} entries and {} blank rows to {}, finishing on ID {}",
                packed.row_count,
                packed.padding_count,
                file_name,
                packed.last_id.map_or_else(|| "-".to_string(), |id| id.to_string())
            ),
            _ => tracing::info!("Wrote {} entries to {}", packed.row_count, file_name),
        }
    }
    Ok(())
}

/// Table files directly inside `path`, or `path` itself.
fn table_files(path: &Path, extension: &str) -> Result<Vec<PathBuf>, LoadError> {
    let metadata = fs::metadata(path).map_err(|e| LoadError::io(path, e))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| LoadError::io(path, e))? {
        let file = entry.map_err(|e| LoadError::io(path, e))?.path();
        let matches = file
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case(extension));
        if file.is_file() && matches {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

fn import(
    path: PathBuf,
    output_folder: Option<PathBuf>,
    filter_type: Vec<String>,
    schema: Vec<PathBuf>,
    options: UnpackOptions,
    codec: CodecKind,
) -> Result<(), LoadError> {
    let registry = load_registry(&schema)?;
    let codec = codec.build();

    let root = if path.is_dir() { path.clone() } else { parent_folder(&path) };
    let output = output_folder.unwrap_or_else(|| root.join("unpacked"));

    let mut imported_any = false;
    for file in table_files(&path, codec.extension())? {
        let table = codec.read_table(&file)?;
        let stem = loader::file_identifier(&file);
        let options = UnpackOptions {
            name: Some(stem.clone()),
            ..options.clone()
        };

        let Some(imported) = pipeline::import(&registry, &table, &filter_type, &options)? else {
            tracing::debug!("No schema accepts {}", file.display());
            continue;
        };
        imported_any = true;

        match imported.merge_mode {
            MergeMode::Composition => {
                for document in &imported.documents {
                    let target = output.join(sanitize_file_name(&format!("{}.yml", document.identifier())));
                    loader::write_document(document, &target)?;
                }
                tracing::info!("Unpacked {}", file.display());
            }
            MergeMode::Inheritance => {
                let folder = output.join(sanitize_file_name(&stem));
                for document in &imported.documents {
                    let target = folder.join(sanitize_file_name(&format!("{}.yml", document.identifier())));
                    loader::write_document(document, &target)?;
                }
                tracing::info!(
                    "Unpacked {} out of {} rows from {} (omitted rows were interpreted as padding)",
                    imported.documents.len(),
                    table.row_count(),
                    file.display()
                );
            }
        }
    }

    if !imported_any {
        tracing::warn!("No importable files were found. Check your filters and provide schemas with --schema.");
    }
    Ok(())
}

fn merge(target: PathBuf, sources: Vec<PathBuf>, schema: Vec<PathBuf>) -> Result<(), LoadError> {
    let registry = load_registry(&schema)?;

    let mut document = loader::read_document(&target)?
        .ok_or_else(|| LoadError::Invalid(format!("{} is not a YAML2DA file", target.display())))?;
    let type_name = document
        .type_name()
        .ok_or_else(|| LoadError::Invalid(format!("{} is not a YAML2DA file", target.display())))?
        .to_string();

    let inputs: Vec<_> = loader::read_documents(&sources, &[type_name.clone()])?
        .into_iter()
        .filter(|source| source.type_name() == Some(type_name.as_str()))
        .collect();
    if inputs.is_empty() {
        return Err(LoadError::Invalid(format!(
            "none of the input files matched the destination file type \"{}\"",
            type_name
        )));
    }

    pipeline::merge_into_variants(&registry, &mut document, &inputs)?;
    loader::write_document(&document, &target)?;
    tracing::info!("Merged {} files into {}", inputs.len(), target.display());
    Ok(())
}
