//
// cli.rs
// Dicom-Editor-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, warn, Level};

use crate::anonymize::{AnonymizeOptions, Anonymizer};
use crate::batch::{self, FileFilter, Operation, RenamePolicy};
use crate::config::{Configuration, Geometry, DEFAULT_CONFIG_FILE};
use crate::elements;
use crate::error::{EditorError, SCRIPT_SAVE_WARNING};
use crate::integer_table::IntegerTable;
use crate::lookup::LookupTable;
use crate::models::BatchReport;
use crate::patient_id;
use crate::script::{self, CompiledScript, DirectiveKey, DirectiveKind, ElementTag};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "dicom-editor")]
#[command(about = "Inspect, edit and de-identify DICOM Part 10 files", long_about = None)]
pub struct Cli {
    /// Settings file holding naming options and script/lookup paths
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
pub struct WalkArgs {
    /// File or directory to process
    pub path: PathBuf,
    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,
    /// Only process files with this extension (repeatable)
    #[arg(long = "ext")]
    pub extensions: Vec<String>,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// De-identify files with the anonymizer script
    Anonymize {
        #[command(flatten)]
        walk: WalkArgs,
        /// Output naming; defaults to the configured checkboxes
        #[arg(long, value_enum)]
        rename: Option<Rename>,
        /// Write Implicit VR Little Endian output
        #[arg(long)]
        force_ivrle: bool,
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(long)]
        lookup: Option<PathBuf>,
        #[arg(long)]
        integer_table: Option<PathBuf>,
    },
    /// Re-type UN and mislabelled elements from the standard dictionary
    FixVrs {
        #[command(flatten)]
        walk: WalkArgs,
    },
    /// Zero the 128-byte preamble
    ClearPreamble {
        #[command(flatten)]
        walk: WalkArgs,
    },
    /// Set PatientID from the first directory level below DIR
    SetPatientIds {
        dir: PathBuf,
        #[arg(long = "ext")]
        extensions: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// List the elements of a file
    Elements {
        file: PathBuf,
        #[arg(long, default_value_t = 4)]
        max_depth: usize,
        #[arg(long, default_value_t = 64)]
        max_value_len: usize,
    },
    /// Set one element value in place
    SetElement {
        file: PathBuf,
        /// (gggg,eeee), ggggeeee or a keyword such as PatientID
        tag: String,
        value: String,
    },
    /// View or edit the anonymizer script
    Script {
        #[arg(long)]
        script: Option<PathBuf>,
        #[command(subcommand)]
        action: ScriptAction,
    },
    /// Show or change the stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    /// Update the given keys and store the file
    Set {
        #[arg(long, value_enum)]
        change_name: Option<YesNo>,
        #[arg(long = "use-sopiuid", value_enum)]
        use_sop_instance_uid: Option<YesNo>,
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(long)]
        lookup: Option<PathBuf>,
        #[arg(long)]
        integer_table: Option<PathBuf>,
        /// Window placement as X,Y,W,H
        #[arg(long, value_parser = parse_geometry)]
        geometry: Option<Geometry>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum YesNo {
    Yes,
    No,
}

impl From<YesNo> for bool {
    fn from(value: YesNo) -> Self {
        matches!(value, YesNo::Yes)
    }
}

fn parse_geometry(text: &str) -> Result<Geometry, String> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected X,Y,W,H, got {text:?}"));
    };
    let bad = |e: std::num::ParseIntError| format!("{text:?}: {e}");
    Ok(Geometry {
        x: x.parse().map_err(bad)?,
        y: y.parse().map_err(bad)?,
        width: w.parse().map_err(bad)?,
        height: h.parse().map_err(bad)?,
    })
}

#[derive(Subcommand)]
pub enum ScriptAction {
    /// Show directives in order
    List {
        #[arg(long)]
        checked_only: bool,
    },
    /// Show the flattened properties form
    Properties,
    Enable {
        kind: String,
        key: String,
    },
    Disable {
        kind: String,
        key: String,
    },
    /// Replace a directive's body
    Set {
        kind: String,
        key: String,
        body: String,
    },
    UncheckAll,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Rename {
    InPlace,
    SuffixNoPhi,
    SopInstanceUid,
}

impl From<Rename> for RenamePolicy {
    fn from(value: Rename) -> Self {
        match value {
            Rename::InPlace => RenamePolicy::InPlace,
            Rename::SuffixNoPhi => RenamePolicy::SuffixNoPhi,
            Rename::SopInstanceUid => RenamePolicy::SopInstanceUid,
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let config = Configuration::load(&cli.config)
        .with_context(|| format!("Failed to read {}", cli.config.display()))?;

    match cli.command {
        Commands::Anonymize {
            walk,
            rename,
            force_ivrle,
            script,
            lookup,
            integer_table,
        } => {
            let script_path = script.unwrap_or_else(|| config.script_file());
            let lookup_path = lookup.unwrap_or_else(|| config.lookup_table_file());
            let model = script::load(&script_path)
                .with_context(|| format!("Failed to load script {}", script_path.display()))?;
            if model.is_empty() {
                warn!("script {} has no directives", script_path.display());
            }
            let compiled = CompiledScript::compile(&model).context("Failed to compile script")?;
            let lookup = LookupTable::load(&lookup_path)?;
            let mut integers = match integer_table.or_else(|| config.integer_table_file()) {
                Some(path) => Some(IntegerTable::open(&path)?),
                None => None,
            };

            let anonymizer = Anonymizer::new(
                &compiled,
                &lookup,
                integers.as_mut(),
                AnonymizeOptions {
                    force_ivrle,
                    rename_to_sop_instance_uid: false,
                },
            );
            let policy = rename.map(RenamePolicy::from).unwrap_or_else(|| config.rename_policy());
            let report = batch::run(
                &walk.path,
                &mut Operation::Anonymize(anonymizer),
                &FileFilter::new(&walk.extensions),
                walk.recursive,
                policy,
            );
            print_report(&report, walk.json)?;
        }
        Commands::FixVrs { walk } => {
            let report = batch::run(
                &walk.path,
                &mut Operation::FixVrs,
                &FileFilter::new(&walk.extensions),
                walk.recursive,
                RenamePolicy::InPlace,
            );
            print_report(&report, walk.json)?;
        }
        Commands::ClearPreamble { walk } => {
            let report = batch::run(
                &walk.path,
                &mut Operation::ClearPreamble,
                &FileFilter::new(&walk.extensions),
                walk.recursive,
                RenamePolicy::InPlace,
            );
            print_report(&report, walk.json)?;
        }
        Commands::SetPatientIds {
            dir,
            extensions,
            json,
        } => {
            let report = patient_id::set_patient_ids(&dir, &FileFilter::new(&extensions));
            print_report(&report, json)?;
        }
        Commands::Elements {
            file,
            max_depth,
            max_value_len,
        } => {
            for row in elements::list_elements(&file, max_depth, max_value_len)? {
                println!("{row}");
            }
        }
        Commands::SetElement { file, tag, value } => {
            let tag = elements::parse_tag(&tag)?;
            elements::set_element(&file, tag, &value)?;
        }
        Commands::Script { script, action } => {
            let path = script.unwrap_or_else(|| config.script_file());
            edit_script(&path, action)?;
        }
        Commands::Config { action } => edit_config(config, action)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the tracing subscriber")
}

fn print_report(report: &BatchReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for (idx, result) in report.results.iter().enumerate() {
        println!("{:>4}. {}", idx + 1, result);
    }
    println!("Done. {} file(s).", report.results.len());
    Ok(())
}

fn directive_key(kind: &str, key: &str) -> anyhow::Result<DirectiveKey> {
    let kind: DirectiveKind = kind.parse()?;
    let key = match kind {
        DirectiveKind::Element => key.parse::<ElementTag>()?.to_string(),
        _ => key.to_string(),
    };
    Ok(DirectiveKey::new(kind, key))
}

fn edit_script(path: &Path, action: ScriptAction) -> anyhow::Result<()> {
    let mut model = script::load(path)
        .with_context(|| format!("Failed to load script {}", path.display()))?;

    match action {
        ScriptAction::List { checked_only } => {
            let directives: Vec<_> = if checked_only {
                model.checked().collect()
            } else {
                model.directives().iter().collect()
            };
            for directive in directives {
                let mark = if directive.is_enabled() { "[x]" } else { "[ ]" };
                println!(
                    "{mark} {:<14} {} = {}",
                    directive.key().to_string(),
                    directive.display_label(),
                    directive.body()
                );
            }
            return Ok(());
        }
        ScriptAction::Properties => {
            print!("{}", script::to_properties(&model).to_text());
            return Ok(());
        }
        ScriptAction::Enable { kind, key } => {
            model.set_enabled(&directive_key(&kind, &key)?, true)?
        }
        ScriptAction::Disable { kind, key } => {
            model.set_enabled(&directive_key(&kind, &key)?, false)?
        }
        ScriptAction::Set { kind, key, body } => {
            let key = directive_key(&kind, &key)?;
            // Reject bodies that would not compile before touching the file.
            let mut candidate = model.clone();
            candidate.set_body(&key, body.as_str())?;
            CompiledScript::compile(&candidate)?;
            model = candidate;
        }
        ScriptAction::UncheckAll => model.uncheck_all(),
    }

    if let Err(e) = script::save(&model, path) {
        if matches!(e, EditorError::ScriptPersist { .. }) {
            error!("{SCRIPT_SAVE_WARNING}");
        }
        bail!(e);
    }
    Ok(())
}

fn edit_config(mut config: Configuration, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("# {}", config.path().display());
            println!("change-name={}", yes_no(config.change_name()));
            println!("use-sopiuid={}", yes_no(config.use_sop_instance_uid()));
            println!("dicom-script={}", config.script_file().display());
            println!("lookup-table={}", config.lookup_table_file().display());
            if let Some(path) = config.integer_table_file() {
                println!("integer-table={}", path.display());
            }
            if let Some(g) = config.geometry() {
                println!("geometry={},{},{},{}", g.x, g.y, g.width, g.height);
            }
        }
        ConfigAction::Set {
            change_name,
            use_sop_instance_uid,
            script,
            lookup,
            integer_table,
            geometry,
        } => {
            if let Some(value) = change_name {
                config.set_change_name(value.into());
            }
            if let Some(value) = use_sop_instance_uid {
                config.set_use_sop_instance_uid(value.into());
            }
            if let Some(path) = script {
                config.put("dicom-script", path.to_string_lossy());
            }
            if let Some(path) = lookup {
                config.put("lookup-table", path.to_string_lossy());
            }
            if let Some(path) = integer_table {
                config.put("integer-table", path.to_string_lossy());
            }
            if let Some(geometry) = geometry {
                config.set_geometry(geometry);
            }
            config
                .store()
                .with_context(|| format!("Failed to store {}", config.path().display()))?;
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
