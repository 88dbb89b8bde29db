//! Option surface of the wrapper: server, table and import options.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{Result, SqliteFdwError};
use crate::host::{HostCatalog, Oid};

/// Kind of object an option list is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionContext {
    Server,
    Table,
}

impl fmt::Display for OptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionContext::Server => write!(f, "server"),
            OptionContext::Table => write!(f, "foreign table"),
        }
    }
}

const VALID_OPTIONS: &[(&str, OptionContext)] = &[
    ("database", OptionContext::Server),
    ("extensions", OptionContext::Server),
    ("table", OptionContext::Table),
    ("on_conversion_error", OptionContext::Table),
];

/// A single `name 'value'` pair as written in the DDL.
pub type OptionPair = (String, String);

fn is_valid_option(name: &str, context: OptionContext) -> bool {
    VALID_OPTIONS
        .iter()
        .any(|(opt, ctx)| *ctx == context && *opt == name)
}

fn valid_options_hint(context: OptionContext) -> String {
    let names: Vec<_> = VALID_OPTIONS
        .iter()
        .filter(|(_, ctx)| *ctx == context)
        .map(|(opt, _)| *opt)
        .collect();
    if names.is_empty() {
        "<none>".to_string()
    } else {
        names.join(", ")
    }
}

/// Checks an option list before the host stores it.
pub fn validate_options(options: &[OptionPair], context: OptionContext) -> Result<()> {
    debug!(%context, num_options = options.len(), "validating options");

    let mut seen: Vec<&str> = Vec::with_capacity(options.len());
    for (name, value) in options {
        if !is_valid_option(name, context) {
            return Err(SqliteFdwError::InvalidOption {
                name: name.clone(),
                valid: valid_options_hint(context),
            });
        }
        if seen.contains(&name.as_str()) {
            return Err(SqliteFdwError::RedundantOption {
                name: name.clone(),
                value: value.clone(),
            });
        }
        seen.push(name);

        match name.as_str() {
            "database" => {
                if !file_exists(Path::new(value))? {
                    return Err(SqliteFdwError::FileNotFound(PathBuf::from(value)));
                }
            }
            "on_conversion_error" => {
                ConversionPolicy::parse(value)?;
            }
            _ => (),
        }
    }

    if context == OptionContext::Server && !seen.contains(&"database") {
        return Err(SqliteFdwError::MissingOption(
            "The database name must be specified",
        ));
    }

    Ok(())
}

/// A directory is not a database. Missing or unreadable paths are reported
/// as absent, anything else is a real error.
pub fn file_exists(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(!meta.is_dir()),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound
                    | io::ErrorKind::NotADirectory
                    | io::ErrorKind::PermissionDenied
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn find<'a>(options: &'a [OptionPair], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|(opt, _)| opt == name)
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub database: PathBuf,
    /// Extensions whose objects may be evaluated by sqlite.
    pub extensions: Vec<Oid>,
}

impl ServerOptions {
    pub fn from_options(options: &[OptionPair], catalog: &dyn HostCatalog) -> Result<Self> {
        let database = find(options, "database")
            .map(PathBuf::from)
            .ok_or(SqliteFdwError::MissingOption(
                "The database name must be specified",
            ))?;

        let mut extensions = Vec::new();
        if let Some(list) = find(options, "extensions") {
            for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let oid = catalog
                    .extension_oid(name)
                    .ok_or_else(|| SqliteFdwError::UnknownExtension(name.to_string()))?;
                if !extensions.contains(&oid) {
                    extensions.push(oid);
                }
            }
        }

        Ok(ServerOptions {
            database,
            extensions,
        })
    }
}

/// What to do with a sqlite value that does not convert to the column type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversionPolicy {
    #[default]
    Error,
    /// Substitute NULL, unless the column is declared not null.
    NullIfNullable,
}

impl ConversionPolicy {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "error" => Ok(ConversionPolicy::Error),
            "null" => Ok(ConversionPolicy::NullIfNullable),
            _ => Err(SqliteFdwError::InvalidOptionValue {
                name: "on_conversion_error".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    pub table: Option<String>,
    pub on_conversion_error: ConversionPolicy,
}

impl TableOptions {
    pub fn from_options(options: &[OptionPair]) -> Result<Self> {
        let on_conversion_error = match find(options, "on_conversion_error") {
            Some(v) => ConversionPolicy::parse(v)?,
            None => ConversionPolicy::default(),
        };
        Ok(TableOptions {
            table: find(options, "table").map(str::to_string),
            on_conversion_error,
        })
    }
}

/// Where a foreign table's rows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSource {
    pub database: PathBuf,
    pub table: String,
    pub on_conversion_error: ConversionPolicy,
}

impl TableSource {
    /// The remote table defaults to the host relation name.
    pub fn resolve(server: &ServerOptions, table: &TableOptions, relation_name: &str) -> Self {
        TableSource {
            database: server.database.clone(),
            table: table
                .table
                .clone()
                .unwrap_or_else(|| relation_name.to_string()),
            on_conversion_error: table.on_conversion_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub import_default: bool,
    pub import_not_null: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            import_default: false,
            import_not_null: true,
        }
    }
}

impl ImportOptions {
    pub fn from_options(options: &[OptionPair]) -> Result<Self> {
        let mut opts = ImportOptions::default();
        for (name, value) in options {
            match name.as_str() {
                "import_default" => opts.import_default = parse_bool(name, value)?,
                "import_not_null" => opts.import_not_null = parse_bool(name, value)?,
                _ => {
                    return Err(SqliteFdwError::InvalidOption {
                        name: name.clone(),
                        valid: "import_default, import_not_null".to_string(),
                    });
                }
            }
        }
        Ok(opts)
    }
}

/// Boolean spellings accepted by the host for option values.
pub fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(SqliteFdwError::InvalidOptionValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
